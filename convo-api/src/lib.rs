use std::fmt;

use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod auth;
pub use auth::{AuthToken, TokenProvider};

mod comment;
pub use comment::{Comment, Content, ModerationStatus, Rank, Vote};

mod conversation;
pub use conversation::{
    Counters, CountersResponse, PageRequest, PageResponse, SortMode, DEFAULT_PAGE_SIZE,
};

mod db;
pub use db::Api;

mod error;
pub use error::Error;

mod mutation;
pub use mutation::{
    CommentRef, DeleteResponse, EditRequest, MuteRequest, RankOperation, RankRequest,
    RankResponse,
};

mod realtime;
pub use realtime::{RealtimeData, RealtimeDelta, RealtimeResponse, TypingUsers};

macro_rules! string_id {
    ( $name:ident ) => {
        #[derive(
            Clone,
            Debug,
            Default,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            serde::Deserialize,
            serde::Serialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> $name {
                $name(String::from(s))
            }
        }
    };
}

string_id!(ConversationId);
string_id!(CommentId);
string_id!(UserId);

impl ConversationId {
    /// Identifier used on the wire, scoped by the publisher's spot key
    pub fn qualified(&self, spot_key: &str) -> String {
        format!("{}_{}", spot_key, self.0)
    }
}

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct MutationId(pub Uuid);

impl MutationId {
    pub fn new() -> MutationId {
        MutationId(Uuid::new_v4())
    }

    pub fn stub() -> MutationId {
        MutationId(STUB_UUID)
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Values coming from the server go through `validate` before entering the local
// store.

pub(crate) fn validate_id(s: &str) -> Result<(), Error> {
    if s.is_empty() {
        return Err(Error::Decode(String::from("empty identifier")));
    }
    if s.contains('\0') {
        return Err(Error::Decode(format!("null byte in identifier {s:?}")));
    }
    Ok(())
}

pub(crate) fn validate_string(s: &str) -> Result<(), Error> {
    match s.contains('\0') {
        true => Err(Error::Decode(format!("null byte in string {s:?}"))),
        false => Ok(()),
    }
}
