use crate::api::{self, CommentId, Content, ModerationStatus, Rank, Time, UserId};

/// A comment as held in the local store
///
/// Identity fields (`parent_id`, `root_id`, `depth`, `created_at`) never change once
/// the comment is known. `muted` and `reported` only exist locally.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Comment {
    pub id: CommentId,
    pub parent_id: Option<CommentId>,
    pub root_id: CommentId,
    pub depth: u32,
    pub author_id: UserId,
    pub created_at: Time,
    pub content: Vec<Content>,
    pub edited: bool,
    pub deleted: bool,
    pub status: ModerationStatus,
    pub rank: Rank,

    /// Server total, may exceed the replies known locally
    pub replies_count: u32,

    /// Author was muted by the current user
    pub muted: bool,
    pub reported: bool,
}

impl From<api::Comment> for Comment {
    fn from(c: api::Comment) -> Comment {
        Comment {
            id: c.id,
            parent_id: c.parent_id,
            root_id: c.root_id,
            depth: c.depth,
            author_id: c.author_id,
            created_at: c.created_at,
            content: c.content,
            edited: c.edited,
            deleted: c.deleted,
            status: c.status,
            rank: c.rank,
            replies_count: c.replies_count,
            muted: false,
            reported: false,
        }
    }
}

impl Comment {
    pub fn is_reply(&self) -> bool {
        self.depth > 0
    }

    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|c| match c {
            Content::Text { text, .. } => Some(text as &str),
            _ => None,
        })
    }
}
