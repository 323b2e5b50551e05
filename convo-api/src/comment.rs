use chrono::Utc;
use serde::{Deserialize, Deserializer};

use crate::{CommentId, Error, Time, UserId};

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(from = "i8", into = "i8")]
pub enum Vote {
    #[default]
    None,
    Up,
    Down,
}

impl From<i8> for Vote {
    fn from(v: i8) -> Vote {
        match v {
            0 => Vote::None,
            v if v > 0 => Vote::Up,
            _ => Vote::Down,
        }
    }
}

impl From<Vote> for i8 {
    fn from(v: Vote) -> i8 {
        match v {
            Vote::None => 0,
            Vote::Up => 1,
            Vote::Down => -1,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Rank {
    #[serde(default, rename = "ranksUp")]
    pub up: u32,
    #[serde(default, rename = "ranksDown")]
    pub down: u32,
    #[serde(default, rename = "rankedByCurrentUser")]
    pub current_user_vote: Vote,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(from = "String", into = "String")]
pub enum ModerationStatus {
    #[default]
    Published,
    Pending,
    Rejected,
    Blocked,
    RequiresApproval,
}

impl From<String> for ModerationStatus {
    fn from(raw: String) -> ModerationStatus {
        if raw.contains("block") {
            return ModerationStatus::Blocked;
        }
        match &raw as &str {
            "pending" => ModerationStatus::Pending,
            "reject" | "rejected" => ModerationStatus::Rejected,
            "require_approval" => ModerationStatus::RequiresApproval,
            // publish_and_moderate, published, and anything we do not know about
            _ => ModerationStatus::Published,
        }
    }
}

impl From<ModerationStatus> for String {
    fn from(s: ModerationStatus) -> String {
        String::from(match s {
            ModerationStatus::Published => "publish_and_moderate",
            ModerationStatus::Pending => "pending",
            ModerationStatus::Rejected => "reject",
            ModerationStatus::Blocked => "block",
            ModerationStatus::RequiresApproval => "require_approval",
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text {
        id: String,
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Image {
        image_id: String,
        original_width: u32,
        original_height: u32,
    },
    #[serde(rename_all = "camelCase")]
    Animation {
        original_url: String,
        preview_width: u32,
        preview_height: u32,
        original_width: u32,
        original_height: u32,
    },
    #[serde(other)]
    Unknown,
}

impl Content {
    pub fn text(text: &str) -> Content {
        Content::Text {
            id: String::from("text"),
            text: String::from(text),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub parent_id: Option<CommentId>,
    #[serde(rename = "rootComment")]
    pub root_id: CommentId,
    #[serde(default)]
    pub depth: u32,
    #[serde(rename = "userId")]
    pub author_id: UserId,
    #[serde(rename = "writtenAt", with = "epoch_seconds")]
    pub created_at: Time,
    #[serde(default)]
    pub content: Vec<Content>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub status: ModerationStatus,
    #[serde(default)]
    pub rank: Rank,
    #[serde(default, alias = "totalRepliesCount")]
    pub replies_count: u32,

    /// Replies the server chose to inline with this comment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Comment>,

    /// Reply pagination for this comment
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub has_next: bool,
}

mod epoch_seconds {
    use chrono::{TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::Time;

    pub fn serialize<S: Serializer>(t: &Time, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(t.timestamp())
    }

    // The server sends fractional seconds
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Time, D::Error> {
        let secs = f64::deserialize(d)?;
        Utc.timestamp_opt(secs.trunc() as i64, (secs.fract().abs() * 1e9) as u32)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp {secs} out of range")))
    }
}

fn empty_as_none<'de, D>(d: D) -> Result<Option<CommentId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.filter(|s| !s.is_empty()).map(CommentId))
}

impl Comment {
    pub fn new_top_level(id: CommentId, author_id: UserId, text: &str) -> Comment {
        Comment {
            root_id: id.clone(),
            id,
            parent_id: None,
            depth: 0,
            author_id,
            created_at: Utc::now(),
            content: vec![Content::text(text)],
            edited: false,
            deleted: false,
            status: ModerationStatus::Published,
            rank: Rank::default(),
            replies_count: 0,
            replies: Vec::new(),
            offset: 0,
            has_next: false,
        }
    }

    pub fn new_reply(parent: &Comment, id: CommentId, author_id: UserId, text: &str) -> Comment {
        Comment {
            parent_id: Some(parent.id.clone()),
            root_id: parent.root_id.clone(),
            depth: parent.depth + 1,
            ..Comment::new_top_level(id, author_id, text)
        }
    }

    pub fn is_reply(&self) -> bool {
        self.depth > 0
    }

    /// First text item of the payload, if any
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|c| match c {
            Content::Text { text, .. } => Some(text as &str),
            _ => None,
        })
    }

    /// Consumes the comment and returns it followed by its inlined replies,
    /// depth-first, in server order
    pub fn flatten(mut self) -> Vec<Comment> {
        let replies = std::mem::take(&mut self.replies);
        let mut res = vec![self];
        for r in replies {
            res.extend(r.flatten());
        }
        res
    }

    // See comments on `validate_id` in lib.rs
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_id(self.id.as_str())?;
        crate::validate_id(self.root_id.as_str())?;
        crate::validate_id(self.author_id.as_str())?;
        match (self.depth, &self.parent_id) {
            (0, _) if self.id != self.root_id => {
                return Err(Error::Decode(format!(
                    "top-level comment {} has root {}",
                    self.id, self.root_id
                )))
            }
            (0, _) => (),
            (_, None) => {
                return Err(Error::Decode(format!(
                    "reply {} at depth {} has no parent",
                    self.id, self.depth
                )))
            }
            (_, Some(p)) => {
                crate::validate_id(p.as_str())?;
                if self.id == self.root_id {
                    return Err(Error::Decode(format!("reply {} is its own root", self.id)));
                }
            }
        }
        for c in &self.content {
            match c {
                Content::Text { id, text } => {
                    crate::validate_string(id)?;
                    crate::validate_string(text)?;
                }
                Content::Image { image_id, .. } => crate::validate_string(image_id)?,
                Content::Animation { original_url, .. } => crate::validate_string(original_url)?,
                Content::Unknown => (),
            }
        }
        self.replies.iter().try_for_each(|r| r.validate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_lenient_wire_comment() {
        let c: Comment = serde_json::from_str(
            r#"{
                "id": "c2",
                "parentId": "c1",
                "rootComment": "c1",
                "depth": 1,
                "userId": "u1",
                "writtenAt": 1700000000.25,
                "status": "blocked_by_moderator",
                "rank": {"ranksUp": 3, "rankedByCurrentUser": -1},
                "totalRepliesCount": 4,
                "content": [
                    {"type": "text", "id": "t", "text": "hello"},
                    {"type": "poll", "question": "?"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(c.parent_id, Some(CommentId::from("c1")));
        assert_eq!(c.status, ModerationStatus::Blocked);
        assert_eq!(c.rank.up, 3);
        assert_eq!(c.rank.down, 0);
        assert_eq!(c.rank.current_user_vote, Vote::Down);
        assert_eq!(c.replies_count, 4);
        assert_eq!(c.created_at.timestamp(), 1700000000);
        assert_eq!(c.text(), Some("hello"));
        assert_eq!(c.content[1], Content::Unknown);
        c.validate().unwrap();
    }

    #[test]
    fn empty_parent_is_top_level() {
        let c: Comment = serde_json::from_str(
            r#"{"id": "c1", "parentId": "", "rootComment": "c1", "userId": "u", "writtenAt": 0}"#,
        )
        .unwrap();
        assert_eq!(c.parent_id, None);
        assert!(!c.is_reply());
        c.validate().unwrap();
    }

    #[test]
    fn validate_rejects_broken_links() {
        let top = Comment::new_top_level(CommentId::from("a"), UserId::from("u"), "x");
        let mut reply = Comment::new_reply(&top, CommentId::from("b"), UserId::from("u"), "y");
        reply.validate().unwrap();
        reply.parent_id = None;
        assert!(reply.validate().is_err());

        let mut top2 = top.clone();
        top2.root_id = CommentId::from("zz");
        assert!(top2.validate().is_err());
    }

    #[test]
    fn flatten_is_depth_first() {
        let mut a = Comment::new_top_level(CommentId::from("a"), UserId::from("u"), "a");
        let mut b = Comment::new_reply(&a, CommentId::from("b"), UserId::from("u"), "b");
        let c = Comment::new_reply(&b, CommentId::from("c"), UserId::from("u"), "c");
        let d = Comment::new_reply(&a, CommentId::from("d"), UserId::from("u"), "d");
        b.replies.push(c);
        a.replies.push(b);
        a.replies.push(d);
        let ids = a
            .flatten()
            .into_iter()
            .map(|c| c.id.0)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }
}
