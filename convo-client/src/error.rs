use crate::{
    api::{self, CommentId, ConversationId},
    MutationKind, MutationTarget,
};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("could not decode server response: {0}")]
    Decode(String),

    #[error("no spot key configured")]
    MissingSpotKey,

    #[error("server rejected the request ({status}): {message}")]
    ServerRejected { status: u16, message: String },

    #[error("unauthorized even after refreshing the token")]
    Unauthorized,

    #[error("cursor is not ready for another page (loading: {is_loading}, has next: {has_next})")]
    CursorNotReady { is_loading: bool, has_next: bool },

    #[error("fetch was superseded by a newer one")]
    Superseded,
}

impl From<api::Error> for FetchError {
    fn from(e: api::Error) -> FetchError {
        match e {
            api::Error::Network(msg) => FetchError::Network(msg),
            api::Error::Decode(msg) => FetchError::Decode(msg),
            api::Error::Unauthorized => FetchError::Unauthorized,
            api::Error::MissingSpotKey => FetchError::MissingSpotKey,
            e @ api::Error::NotFound(_) => FetchError::ServerRejected {
                status: e.status_code().as_u16(),
                message: e.to_string(),
            },
            api::Error::Rejected { status, message } => {
                FetchError::ServerRejected { status, message }
            }
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum MutationError {
    #[error("a {kind:?} mutation is already pending for {target:?}")]
    AlreadyPending {
        target: MutationTarget,
        kind: MutationKind,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("server rejected the mutation ({status}): {message}")]
    ServerRejected { status: u16, message: String },

    #[error("comment {0} is not in a state that allows this mutation")]
    StaleState(CommentId),
}

impl From<api::Error> for MutationError {
    fn from(e: api::Error) -> MutationError {
        match e {
            api::Error::Network(msg) => MutationError::Network(msg),
            api::Error::Rejected { status, message } => {
                MutationError::ServerRejected { status, message }
            }
            e => MutationError::ServerRejected {
                status: e.status_code().as_u16(),
                message: e.to_string(),
            },
        }
    }
}

/// Something the engine had to work around while merging server data
///
/// These are never surfaced as failures, only reported to `Diagnostics`.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ReconciliationInconsistency {
    #[error("dropped reply {comment_id} after waiting {cycles} cycles for parent {parent_id}")]
    OrphanReplyDropped {
        comment_id: CommentId,
        parent_id: CommentId,
        cycles: u32,
    },

    #[error("server changed immutable field {field} of comment {comment_id}")]
    IdentityConflict {
        comment_id: CommentId,
        field: &'static str,
    },
}

pub trait Diagnostics: Send + Sync {
    fn report(&self, conversation: &ConversationId, issue: ReconciliationInconsistency) {
        tracing::warn!(conversation = %conversation, %issue, "reconciliation inconsistency");
    }
}

/// Diagnostics that only log
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_errors_map_onto_fetch_errors() {
        assert_eq!(
            FetchError::from(api::Error::Rejected {
                status: 500,
                message: String::from("boom"),
            }),
            FetchError::ServerRejected {
                status: 500,
                message: String::from("boom"),
            }
        );
        assert_eq!(
            FetchError::from(api::Error::MissingSpotKey),
            FetchError::MissingSpotKey
        );
        match MutationError::from(api::Error::NotFound(String::from("c1"))) {
            MutationError::ServerRejected { status: 404, .. } => (),
            e => panic!("unexpected mapping {e:?}"),
        }
    }
}
