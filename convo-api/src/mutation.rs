use crate::{CommentId, Content, ConversationId, UserId, Vote};

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RankOperation {
    Like,
    ToggleLike,
    Dislike,
    ToggleDislike,
}

impl RankOperation {
    /// Operation to send to move the current user's vote from `from` to `to`
    ///
    /// Returns `None` when nothing changes.
    pub fn for_change(from: Vote, to: Vote) -> Option<RankOperation> {
        match (from, to) {
            (f, t) if f == t => None,
            (_, Vote::Up) => Some(RankOperation::Like),
            (_, Vote::Down) => Some(RankOperation::Dislike),
            (Vote::Up, Vote::None) => Some(RankOperation::ToggleLike),
            (Vote::Down, Vote::None) => Some(RankOperation::ToggleDislike),
            (Vote::None, Vote::None) => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RankRequest {
    pub conversation_id: ConversationId,
    #[serde(rename = "message_id")]
    pub comment_id: CommentId,
    pub operation: RankOperation,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RankResponse {
    pub success: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentRef {
    pub conversation_id: ConversationId,
    #[serde(rename = "message_id")]
    pub comment_id: CommentId,
    #[serde(rename = "parent_Id", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CommentId>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub id: CommentId,
    pub soft_deleted: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EditRequest {
    #[serde(flatten)]
    pub comment: CommentRef,
    pub content: Vec<Content>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MuteRequest {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}
