use std::sync::Arc;

use crate::api::{
    Api, Comment, CommentRef, ConversationId, CountersResponse, DeleteResponse, EditRequest,
    Error, MuteRequest, PageRequest, PageResponse, RankRequest, RankResponse, RealtimeResponse,
    TokenProvider,
};

/// The remote service, with authorization handled
///
/// Each call fetches the current token; if the server refuses it, the token is
/// refreshed once and the call retried once.
#[derive(Clone)]
pub struct Remote {
    api: Arc<dyn Api>,
    tokens: Arc<dyn TokenProvider>,
}

macro_rules! authorized {
    ($self:ident . $call:ident ( $($arg:expr),* )) => {{
        let token = $self.tokens.token().await?;
        match $self.api.$call(&token, $($arg),*).await {
            Err(Error::Unauthorized) => {
                tracing::debug!(call = stringify!($call), "token refused, refreshing it");
                let token = $self.tokens.refresh().await?;
                $self.api.$call(&token, $($arg),*).await
            }
            res => res,
        }
    }};
}

impl Remote {
    pub fn new(api: Arc<dyn Api>, tokens: Arc<dyn TokenProvider>) -> Remote {
        Remote { api, tokens }
    }

    pub async fn read_conversation(&self, req: &PageRequest) -> Result<PageResponse, Error> {
        let page = authorized!(self.read_conversation(req))?;
        page.validate()?;
        Ok(page)
    }

    pub async fn fetch_realtime(
        &self,
        conversations: &[ConversationId],
    ) -> Result<RealtimeResponse, Error> {
        authorized!(self.fetch_realtime(conversations))
    }

    pub async fn change_rank(&self, req: &RankRequest) -> Result<RankResponse, Error> {
        authorized!(self.change_rank(req))
    }

    pub async fn delete_comment(&self, req: &CommentRef) -> Result<DeleteResponse, Error> {
        authorized!(self.delete_comment(req))
    }

    pub async fn edit_comment(&self, req: &EditRequest) -> Result<Comment, Error> {
        let comment = authorized!(self.edit_comment(req))?;
        comment.validate()?;
        Ok(comment)
    }

    pub async fn mute_user(&self, req: &MuteRequest) -> Result<(), Error> {
        authorized!(self.mute_user(req))
    }

    pub async fn report_comment(&self, req: &CommentRef) -> Result<(), Error> {
        authorized!(self.report_comment(req))
    }

    pub async fn comment_counters(
        &self,
        conversations: &[ConversationId],
    ) -> Result<CountersResponse, Error> {
        authorized!(self.comment_counters(conversations))
    }
}
