use async_trait::async_trait;

use crate::{
    AuthToken, Comment, CommentRef, ConversationId, CountersResponse, DeleteResponse,
    EditRequest, Error, MuteRequest, PageRequest, PageResponse, RankRequest, RankResponse,
    RealtimeResponse,
};

/// Remote conversation service
///
/// Every call receives the token to authorize with; an `Error::Unauthorized` return
/// means the caller should refresh it before retrying.
#[async_trait]
pub trait Api: Send + Sync {
    async fn read_conversation(
        &self,
        token: &AuthToken,
        req: &PageRequest,
    ) -> Result<PageResponse, Error>;

    async fn fetch_realtime(
        &self,
        token: &AuthToken,
        conversations: &[ConversationId],
    ) -> Result<RealtimeResponse, Error>;

    async fn change_rank(&self, token: &AuthToken, req: &RankRequest)
        -> Result<RankResponse, Error>;

    async fn delete_comment(
        &self,
        token: &AuthToken,
        req: &CommentRef,
    ) -> Result<DeleteResponse, Error>;

    async fn edit_comment(&self, token: &AuthToken, req: &EditRequest) -> Result<Comment, Error>;

    async fn mute_user(&self, token: &AuthToken, req: &MuteRequest) -> Result<(), Error>;

    async fn report_comment(&self, token: &AuthToken, req: &CommentRef) -> Result<(), Error>;

    async fn comment_counters(
        &self,
        token: &AuthToken,
        conversations: &[ConversationId],
    ) -> Result<CountersResponse, Error>;
}
