use std::collections::HashMap;

use async_trait::async_trait;
use convo_api::{
    Api, AuthToken, Comment, CommentRef, ConversationId, CountersResponse, DeleteResponse,
    EditRequest, Error, MuteRequest, PageRequest, PageResponse, RankRequest, RankResponse,
    RealtimeData, RealtimeResponse,
};
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};

/// `Api` over the conversation service's HTTP endpoints
///
/// Conversation ids are qualified with the spot key on the way out and stripped of
/// it on the way back in.
pub struct HttpApi {
    client: reqwest::Client,
    host: String,
    spot_key: Option<String>,
}

#[derive(serde::Serialize)]
struct ConversationIds {
    conversation_ids: Vec<ConversationId>,
}

impl HttpApi {
    pub fn new(host: String, spot_key: Option<String>) -> HttpApi {
        HttpApi {
            client: reqwest::Client::new(),
            host,
            spot_key,
        }
    }

    fn qualify(&self, id: &ConversationId) -> Result<ConversationId, Error> {
        let key = self.spot_key.as_deref().ok_or(Error::MissingSpotKey)?;
        Ok(ConversationId(id.qualified(key)))
    }

    fn qualify_all(&self, ids: &[ConversationId]) -> Result<ConversationIds, Error> {
        Ok(ConversationIds {
            conversation_ids: ids
                .iter()
                .map(|id| self.qualify(id))
                .collect::<Result<_, _>>()?,
        })
    }

    fn unqualify(&self, id: ConversationId) -> ConversationId {
        let local = self
            .spot_key
            .as_deref()
            .and_then(|k| id.as_str().strip_prefix(k))
            .and_then(|rest| rest.strip_prefix('_'))
            .map(ConversationId::from);
        local.unwrap_or(id)
    }

    fn unqualify_keys<V>(&self, map: HashMap<ConversationId, V>) -> HashMap<ConversationId, V> {
        map.into_iter()
            .map(|(k, v)| (self.unqualify(k), v))
            .collect()
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        token: &AuthToken,
        body: &B,
    ) -> Result<Vec<u8>, Error> {
        tracing::debug!(%method, path, "sending request");
        let resp = self
            .client
            .request(method, format!("{}{}", self.host, path))
            .bearer_auth(&token.0)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::from_response(status, &body));
        }
        Ok(body.to_vec())
    }

    async fn call<B, R>(&self, method: Method, path: &str, token: &AuthToken, body: &B) -> Result<R, Error>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let body = self.send(method, path, token, body).await?;
        serde_json::from_slice(&body).map_err(|e| Error::Decode(format!("{path}: {e}")))
    }
}

#[async_trait]
impl Api for HttpApi {
    async fn read_conversation(
        &self,
        token: &AuthToken,
        req: &PageRequest,
    ) -> Result<PageResponse, Error> {
        let req = PageRequest {
            conversation_id: self.qualify(&req.conversation_id)?,
            ..req.clone()
        };
        self.call(Method::POST, "/conversation/read", token, &req)
            .await
    }

    async fn fetch_realtime(
        &self,
        token: &AuthToken,
        conversations: &[ConversationId],
    ) -> Result<RealtimeResponse, Error> {
        let body = self.qualify_all(conversations)?;
        let resp: RealtimeResponse = self
            .call(Method::POST, "/realtime/read", token, &body)
            .await?;
        let d = resp.data;
        Ok(RealtimeResponse {
            data: RealtimeData {
                new_comments: self.unqualify_keys(d.new_comments),
                updated_comments: self.unqualify_keys(d.updated_comments),
                deleted_comment_ids: self.unqualify_keys(d.deleted_comment_ids),
                counters_by_conversation: self.unqualify_keys(d.counters_by_conversation),
                typing_users_by_conversation: self.unqualify_keys(d.typing_users_by_conversation),
                online_viewers_by_conversation: self
                    .unqualify_keys(d.online_viewers_by_conversation),
            },
            next_fetch_delay_ms: resp.next_fetch_delay_ms,
        })
    }

    async fn change_rank(&self, token: &AuthToken, req: &RankRequest) -> Result<RankResponse, Error> {
        let req = RankRequest {
            conversation_id: self.qualify(&req.conversation_id)?,
            ..req.clone()
        };
        self.call(Method::POST, "/rank/rank/message", token, &req)
            .await
    }

    async fn delete_comment(
        &self,
        token: &AuthToken,
        req: &CommentRef,
    ) -> Result<DeleteResponse, Error> {
        let req = CommentRef {
            conversation_id: self.qualify(&req.conversation_id)?,
            ..req.clone()
        };
        self.call(Method::DELETE, "/conversation/comment", token, &req)
            .await
    }

    async fn edit_comment(&self, token: &AuthToken, req: &EditRequest) -> Result<Comment, Error> {
        let req = EditRequest {
            comment: CommentRef {
                conversation_id: self.qualify(&req.comment.conversation_id)?,
                ..req.comment.clone()
            },
            content: req.content.clone(),
        };
        self.call(Method::PATCH, "/conversation/comment", token, &req)
            .await
    }

    async fn mute_user(&self, token: &AuthToken, req: &MuteRequest) -> Result<(), Error> {
        let req = MuteRequest {
            conversation_id: self.qualify(&req.conversation_id)?,
            user_id: req.user_id.clone(),
        };
        self.send(Method::POST, "/user/mute", token, &req).await?;
        Ok(())
    }

    async fn report_comment(&self, token: &AuthToken, req: &CommentRef) -> Result<(), Error> {
        let req = CommentRef {
            conversation_id: self.qualify(&req.conversation_id)?,
            ..req.clone()
        };
        self.send(Method::POST, "/conversation/report/message", token, &req)
            .await?;
        Ok(())
    }

    async fn comment_counters(
        &self,
        token: &AuthToken,
        conversations: &[ConversationId],
    ) -> Result<CountersResponse, Error> {
        let body = self.qualify_all(conversations)?;
        let resp: CountersResponse = self
            .call(Method::POST, "/conversation/count", token, &body)
            .await?;
        Ok(CountersResponse {
            counts: self.unqualify_keys(resp.counts),
        })
    }
}
