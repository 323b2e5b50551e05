use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{Comment, CommentId, ConversationId, Counters, Error};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TypingUsers {
    #[serde(rename = "Overall")]
    pub count: u32,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeData {
    #[serde(default)]
    pub new_comments: HashMap<ConversationId, Vec<Comment>>,
    #[serde(default)]
    pub updated_comments: HashMap<ConversationId, Vec<Comment>>,
    #[serde(default)]
    pub deleted_comment_ids: HashMap<ConversationId, Vec<CommentId>>,
    #[serde(default)]
    pub counters_by_conversation: HashMap<ConversationId, Counters>,
    #[serde(default)]
    pub typing_users_by_conversation: HashMap<ConversationId, TypingUsers>,
    #[serde(default)]
    pub online_viewers_by_conversation: HashMap<ConversationId, u32>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeResponse {
    #[serde(default)]
    pub data: RealtimeData,
    #[serde(default)]
    pub next_fetch_delay_ms: u64,
}

/// Everything one realtime cycle says about a single conversation
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RealtimeDelta {
    pub conversation_id: ConversationId,

    /// In the order the server sent them, oldest first
    pub new_comments: Vec<Comment>,
    pub updated_comments: BTreeMap<CommentId, Comment>,
    pub deleted_comment_ids: BTreeSet<CommentId>,
    pub counters: Option<Counters>,
    pub typing_users: Option<u32>,
    pub online_viewers: Option<u32>,
    pub next_fetch_delay_ms: u64,
}

impl RealtimeDelta {
    pub fn is_empty(&self) -> bool {
        self.new_comments.is_empty()
            && self.updated_comments.is_empty()
            && self.deleted_comment_ids.is_empty()
            && self.counters.is_none()
            && self.typing_users.is_none()
            && self.online_viewers.is_none()
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.new_comments.iter().try_for_each(|c| c.validate())?;
        for (id, c) in &self.updated_comments {
            if *id != c.id {
                return Err(Error::Decode(format!(
                    "updated comment keyed {id} carries id {}",
                    c.id
                )));
            }
            c.validate()?;
        }
        self.deleted_comment_ids
            .iter()
            .try_for_each(|id| crate::validate_id(id.as_str()))
    }
}

impl RealtimeResponse {
    /// Splits the response into one delta per requested conversation
    ///
    /// Conversations the server did not mention get an empty delta, so that callers
    /// always see one entry per id they asked about. Data about conversations that
    /// were not requested is ignored.
    pub fn into_deltas(mut self, ids: &[ConversationId]) -> Vec<RealtimeDelta> {
        let delay = self.next_fetch_delay_ms;
        let data = &mut self.data;
        ids.iter()
            .map(|id| RealtimeDelta {
                conversation_id: id.clone(),
                new_comments: data.new_comments.remove(id).unwrap_or_default(),
                updated_comments: data
                    .updated_comments
                    .remove(id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| (c.id.clone(), c))
                    .collect(),
                deleted_comment_ids: data
                    .deleted_comment_ids
                    .remove(id)
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
                counters: data.counters_by_conversation.remove(id),
                typing_users: data.typing_users_by_conversation.remove(id).map(|t| t.count),
                online_viewers: data.online_viewers_by_conversation.remove(id),
                next_fetch_delay_ms: delay,
            })
            .collect()
    }
}
