use anyhow::{anyhow, Context};
use serde_json::json;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Could not decode server data: {0}")]
    Decode(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("No spot key configured")]
    MissingSpotKey,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Network(_) => StatusCode::BAD_GATEWAY,
            Error::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::MissingSpotKey => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Rejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Network(msg) => json!({
                "message": msg,
                "type": "network",
            }),
            Error::Decode(msg) => json!({
                "message": msg,
                "type": "decode",
            }),
            Error::Unauthorized => json!({
                "message": "unauthorized",
                "type": "unauthorized",
            }),
            Error::MissingSpotKey => json!({
                "message": "missing spot key",
                "type": "missing-spot-key",
            }),
            Error::NotFound(what) => json!({
                "message": "not found",
                "type": "not-found",
                "what": what,
            }),
            Error::Rejected { status, message } => json!({
                "message": message,
                "type": "rejected",
                "status": status,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let message = || {
            String::from(
                data.get("message")
                    .and_then(|msg| msg.as_str())
                    .unwrap_or(""),
            )
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "network" => Error::Network(message()),
                "decode" => Error::Decode(message()),
                "unauthorized" => Error::Unauthorized,
                "missing-spot-key" => Error::MissingSpotKey,
                "not-found" => Error::NotFound(String::from(
                    data.get("what")
                        .and_then(|w| w.as_str())
                        .ok_or_else(|| anyhow!("error is a not-found without a subject"))?,
                )),
                "rejected" => Error::Rejected {
                    status: data
                        .get("status")
                        .and_then(|s| s.as_u64())
                        .and_then(|s| u16::try_from(s).ok())
                        .ok_or_else(|| anyhow!("error is a rejection without a proper status"))?,
                    message: message(),
                },
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }

    /// Builds an error out of a non-successful HTTP response
    pub fn from_response(status: http::StatusCode, body: &[u8]) -> Error {
        if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
            return Error::Unauthorized;
        }
        match Error::parse(body) {
            Ok(err) => err,
            Err(_) => Error::Rejected {
                status: status.as_u16(),
                message: String::from_utf8_lossy(body).into_owned(),
            },
        }
    }

    /// Whether retrying the same request later might succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
