mod comment;
pub use comment::Comment;

mod config;
pub use config::Config;

mod cursor;
pub use cursor::{LoadState, PaginationCursor, Snapshot};

mod error;
pub use error::{
    Diagnostics, FetchError, MutationError, ReconciliationInconsistency, TracingDiagnostics,
};

mod mutation;
pub use mutation::{
    MutationCoordinator, MutationKind, MutationOutcome, MutationStatus, MutationTarget,
    PendingMutation, Submission,
};

mod poller;
pub use poller::{DeltaSink, PollerTiming, RealtimePoller};

mod reconcile;
pub use reconcile::{PageKind, ReconciliationEngine};

mod remote;
pub use remote::Remote;

mod session;
pub use session::{ConversationSession, Presence, ThreadItem};

mod sort;
pub use sort::SortDictate;

mod store;
pub use store::{CommentStore, Field, MergeResult, RankChange, Source};

mod fuzz;

pub mod api {
    pub use convo_api::*;
}
