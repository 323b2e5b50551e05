use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{
    api::{self, CommentId, ConversationId, Counters, PageRequest, PageResponse, SortMode},
    FetchError, PageKind, ReconciliationEngine, Remote,
};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed(FetchError),
}

/// Conversation-level state, as published to observers
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    pub conversation_id: ConversationId,
    pub sort_mode: SortMode,
    pub offset: u32,
    pub has_next: bool,
    pub messages_count: u32,
    pub read_only: bool,
    pub load_state: LoadState,
}

impl Snapshot {
    fn new(conversation_id: ConversationId) -> Snapshot {
        Snapshot {
            conversation_id,
            sort_mode: SortMode::default(),
            offset: 0,
            has_next: false,
            messages_count: 0,
            read_only: false,
            load_state: LoadState::Idle,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct ReplyCursor {
    offset: u32,
    has_next: bool,
}

#[derive(Debug, Default)]
struct CursorState {
    /// Bumped by every first-page fetch, results from older generations are dropped
    generation: u64,
    is_loading: bool,
    replies: HashMap<CommentId, ReplyCursor>,
}

fn seed_reply_cursors(comments: &[api::Comment], replies: &mut HashMap<CommentId, ReplyCursor>) {
    for c in comments {
        replies.insert(
            c.id.clone(),
            ReplyCursor {
                offset: c.offset,
                has_next: c.has_next,
            },
        );
        seed_reply_cursors(&c.replies, replies);
    }
}

/// Puts the cursor back at rest if a fetch is dropped before the server answered
struct InFlight<'a> {
    cursor: &'a PaginationCursor,
    generation: u64,

    /// Load state to publish on abandon, `None` leaves it untouched
    restore: Option<LoadState>,
    armed: bool,
}

impl InFlight<'_> {
    fn settled(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut st = self.cursor.state.lock();
        if st.generation != self.generation {
            return;
        }
        tracing::debug!(conversation = %self.cursor.conversation, "page fetch abandoned");
        st.is_loading = false;
        if let Some(state) = self.restore.take() {
            self.cursor.snapshot.send_modify(|s| s.load_state = state);
        }
    }
}

/// Drives the offset-paginated reads of one conversation
///
/// At most one page fetch runs at a time. The offset and `has_next` published in the
/// snapshot are always the ones the server answered with.
pub struct PaginationCursor {
    conversation: ConversationId,
    page_size: u32,
    state: Mutex<CursorState>,
    snapshot: watch::Sender<Snapshot>,
}

impl PaginationCursor {
    pub fn new(conversation: ConversationId, page_size: u32) -> PaginationCursor {
        let (snapshot, _) = watch::channel(Snapshot::new(conversation.clone()));
        PaginationCursor {
            conversation,
            page_size,
            state: Mutex::new(CursorState::default()),
            snapshot,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().is_loading
    }

    /// Whether more replies to `parent` can be fetched
    pub fn has_more_replies(&self, parent: &CommentId) -> bool {
        self.state
            .lock()
            .replies
            .get(parent)
            .map(|r| r.has_next)
            .unwrap_or(false)
    }

    /// Restarts the conversation from offset 0 with `sort_mode`
    ///
    /// Any fetch still in flight is superseded.
    pub async fn fetch_first_page(
        &self,
        sort_mode: SortMode,
        remote: &Remote,
        engine: &ReconciliationEngine,
    ) -> Result<(), FetchError> {
        let generation = {
            let mut st = self.state.lock();
            st.generation += 1;
            st.is_loading = true;
            st.replies.clear();
            st.generation
        };
        self.snapshot.send_modify(|s| {
            s.sort_mode = sort_mode;
            s.offset = 0;
            s.has_next = false;
            s.load_state = LoadState::Loading;
        });
        tracing::debug!(conversation = %self.conversation, %sort_mode, "fetching first page");

        let req = PageRequest::first(self.conversation.clone(), sort_mode, self.page_size);
        let in_flight = InFlight {
            cursor: self,
            generation,
            restore: Some(LoadState::Idle),
            armed: true,
        };
        let res = remote.read_conversation(&req).await;
        in_flight.settled();

        let mut st = self.state.lock();
        if st.generation != generation {
            tracing::debug!(conversation = %self.conversation, "dropping superseded first page");
            return Err(FetchError::Superseded);
        }
        st.is_loading = false;
        match res {
            Err(e) => {
                let e = FetchError::from(e);
                tracing::warn!(conversation = %self.conversation, err = %e, "failed fetching first page");
                self.snapshot
                    .send_modify(|s| s.load_state = LoadState::Failed(e.clone()));
                Err(e)
            }
            Ok(page) => {
                seed_reply_cursors(&page.comments, &mut st.replies);
                engine.apply_page(&PageKind::First, &page);
                self.publish(&page);
                Ok(())
            }
        }
    }

    /// Fetches the page after the current one, or more replies to `parent`
    ///
    /// Calling this while a fetch is running or when the server said there is nothing
    /// more is a caller bug, reported as `FetchError::CursorNotReady`.
    pub async fn fetch_next_page(
        &self,
        parent: Option<CommentId>,
        remote: &Remote,
        engine: &ReconciliationEngine,
    ) -> Result<(), FetchError> {
        let (generation, req) = {
            let mut st = self.state.lock();
            let (offset, has_next) = match &parent {
                None => {
                    let s = self.snapshot.borrow();
                    (s.offset, s.has_next)
                }
                Some(p) => match st.replies.get(p) {
                    Some(r) => (r.offset, r.has_next),
                    None => (0, false),
                },
            };
            if st.is_loading || !has_next {
                tracing::error!(
                    conversation = %self.conversation,
                    parent = ?parent,
                    is_loading = st.is_loading,
                    has_next,
                    "next page requested while the cursor is not ready"
                );
                return Err(FetchError::CursorNotReady {
                    is_loading: st.is_loading,
                    has_next,
                });
            }
            st.is_loading = true;
            let sort_mode = self.snapshot.borrow().sort_mode;
            let req = PageRequest::next(
                self.conversation.clone(),
                sort_mode,
                offset,
                self.page_size,
                parent.clone(),
            );
            (st.generation, req)
        };
        if parent.is_none() {
            self.snapshot
                .send_modify(|s| s.load_state = LoadState::Loading);
        }
        tracing::debug!(conversation = %self.conversation, offset = req.offset, parent = ?parent, "fetching next page");

        let in_flight = InFlight {
            cursor: self,
            generation,
            restore: parent.is_none().then_some(LoadState::Loaded),
            armed: true,
        };
        let res = remote.read_conversation(&req).await;
        in_flight.settled();

        let mut st = self.state.lock();
        if st.generation != generation {
            tracing::debug!(conversation = %self.conversation, "dropping superseded page");
            return Err(FetchError::Superseded);
        }
        st.is_loading = false;
        let page = match res {
            Ok(page) => page,
            Err(e) => {
                let e = FetchError::from(e);
                tracing::warn!(conversation = %self.conversation, err = %e, "failed fetching next page");
                if parent.is_none() {
                    self.snapshot
                        .send_modify(|s| s.load_state = LoadState::Loaded);
                }
                return Err(e);
            }
        };
        seed_reply_cursors(&page.comments, &mut st.replies);
        match parent {
            None => {
                engine.apply_page(&PageKind::Next, &page);
                self.publish(&page);
            }
            Some(p) => {
                st.replies.insert(
                    p.clone(),
                    ReplyCursor {
                        offset: page.offset,
                        has_next: page.has_next,
                    },
                );
                engine.apply_page(&PageKind::Replies(p), &page);
            }
        }
        Ok(())
    }

    fn publish(&self, page: &PageResponse) {
        self.snapshot.send_modify(|s| {
            s.offset = page.offset;
            s.has_next = page.has_next;
            s.messages_count = page.messages_count;
            s.read_only = page.read_only;
            s.load_state = LoadState::Loaded;
        });
    }

    /// Takes a fresh comment count from the server
    pub fn record_counters(&self, counters: Counters) {
        self.snapshot.send_if_modified(|s| {
            let total = counters.total();
            let changed = s.messages_count != total;
            s.messages_count = total;
            changed
        });
    }
}
