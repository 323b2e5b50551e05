use std::{collections::HashMap, fmt, str::FromStr};

use crate::{Comment, CommentId, ConversationId, Error};

pub const DEFAULT_PAGE_SIZE: u32 = 15;

#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Best,
    Newest,
    Oldest,
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortMode::Best => "best",
            SortMode::Newest => "newest",
            SortMode::Oldest => "oldest",
        })
    }
}

impl FromStr for SortMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<SortMode, Error> {
        match s {
            "best" => Ok(SortMode::Best),
            "newest" => Ok(SortMode::Newest),
            "oldest" => Ok(SortMode::Oldest),
            _ => Err(Error::Decode(format!("unknown sort mode {s:?}"))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PageRequest {
    pub conversation_id: ConversationId,
    pub sort_by: SortMode,
    pub offset: u32,
    pub count: u32,

    /// Empty when reading top-level comments
    #[serde(default)]
    pub parent_id: Option<CommentId>,

    /// Ask the server for conversation-level metadata too
    pub extract_data: bool,

    /// How many levels of the tree to inline
    pub depth: u32,
}

impl PageRequest {
    pub fn first(conversation_id: ConversationId, sort_by: SortMode, count: u32) -> PageRequest {
        PageRequest {
            conversation_id,
            sort_by,
            offset: 0,
            count,
            parent_id: None,
            extract_data: true,
            depth: 2,
        }
    }

    pub fn next(
        conversation_id: ConversationId,
        sort_by: SortMode,
        offset: u32,
        count: u32,
        parent_id: Option<CommentId>,
    ) -> PageRequest {
        PageRequest {
            conversation_id,
            sort_by,
            offset,
            count,
            depth: match parent_id {
                None => 2,
                Some(_) => 1,
            },
            parent_id,
            extract_data: false,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    #[serde(default)]
    pub comments: Vec<Comment>,
    pub offset: u32,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub messages_count: u32,
    #[serde(default)]
    pub read_only: bool,
}

impl PageResponse {
    pub fn validate(&self) -> Result<(), Error> {
        self.comments.iter().try_for_each(|c| c.validate())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Counters {
    #[serde(rename = "Comments")]
    pub comments: u32,
    #[serde(rename = "Replies")]
    pub replies: u32,
}

impl Counters {
    pub fn total(&self) -> u32 {
        self.comments + self.replies
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CountersResponse {
    pub counts: HashMap<ConversationId, Counters>,
}
