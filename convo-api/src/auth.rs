use async_trait::async_trait;

use crate::Error;

#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct AuthToken(pub String);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(crate::STUB_UUID.to_string())
    }
}

/// Session collaborator handing out authorization tokens
///
/// The synchronization core never manages the token lifecycle itself: it asks for
/// the current token before each request, and calls `refresh` at most once per
/// request after the server rejected the current one.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<AuthToken, Error>;
    async fn refresh(&self) -> Result<AuthToken, Error>;
}
