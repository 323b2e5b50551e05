use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::{
    api::{CommentId, Content, ConversationId, Counters, RealtimeDelta, SortMode, UserId, Vote},
    Comment, CommentStore, Config, DeltaSink, Diagnostics, FetchError, LoadState,
    MutationCoordinator, MutationError, MutationOutcome, PaginationCursor, PollerTiming,
    RealtimePoller, ReconciliationEngine, Remote, Snapshot, SortDictate, Submission,
    TracingDiagnostics,
};

/// Live typing and viewer counts
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Presence {
    pub typing_users: u32,
    pub online_viewers: u32,
}

/// One row of the displayed thread
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ThreadItem {
    Comment(Comment),

    /// Between two top-level threads
    Spacer,

    /// Placeholder while a page is loading
    Skeleton,
}

struct Shared {
    conversation: ConversationId,
    remote: Remote,
    dictate: Arc<SortDictate>,
    cursor: PaginationCursor,
    engine: Arc<ReconciliationEngine>,
    presence: watch::Sender<Presence>,
}

impl DeltaSink for Shared {
    fn deliver(&self, delta: RealtimeDelta) {
        if delta.conversation_id != self.conversation {
            return;
        }
        self.engine.apply_delta(&delta);
        if let Some(c) = delta.counters {
            self.cursor.record_counters(c);
        }
        if delta.typing_users.is_some() || delta.online_viewers.is_some() {
            self.presence.send_if_modified(|p| {
                let before = *p;
                if let Some(t) = delta.typing_users {
                    p.typing_users = t;
                }
                if let Some(o) = delta.online_viewers {
                    p.online_viewers = o;
                }
                *p != before
            });
        }
    }
}

/// Everything the client knows about one conversation, kept in sync with the server
pub struct ConversationSession {
    shared: Arc<Shared>,
    poller: RealtimePoller,
    mutations: Arc<MutationCoordinator>,
}

impl ConversationSession {
    pub fn new(conversation: ConversationId, remote: Remote, config: &Config) -> ConversationSession {
        ConversationSession::with_collaborators(
            conversation,
            remote,
            config,
            Arc::new(SortDictate::new()),
            Arc::new(TracingDiagnostics),
        )
    }

    /// Builds a session sharing its sort dictate with other sessions
    pub fn with_collaborators(
        conversation: ConversationId,
        remote: Remote,
        config: &Config,
        dictate: Arc<SortDictate>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> ConversationSession {
        let store = CommentStore::new(conversation.clone(), config.orphan_max_cycles, diagnostics);
        let engine = Arc::new(ReconciliationEngine::new(Arc::new(store)));
        let (presence, _) = watch::channel(Presence::default());
        let shared = Arc::new(Shared {
            conversation: conversation.clone(),
            remote: remote.clone(),
            dictate,
            cursor: PaginationCursor::new(conversation.clone(), config.page_size),
            engine: engine.clone(),
            presence,
        });
        let poller = RealtimePoller::new(
            remote.clone(),
            PollerTiming::from(config),
            shared.clone() as Arc<dyn DeltaSink>,
        );
        let mutations = Arc::new(MutationCoordinator::new(conversation, remote, engine));
        ConversationSession {
            shared,
            poller,
            mutations,
        }
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.shared.conversation
    }

    pub fn store(&self) -> &CommentStore {
        self.shared.engine.store()
    }

    /// Fetches the first page with the current sort mode
    pub async fn load(&self) -> Result<(), FetchError> {
        let s = &self.shared;
        let mode = s.dictate.current_sort_mode(&s.conversation);
        s.cursor.fetch_first_page(mode, &s.remote, &s.engine).await
    }

    /// Changes the sort mode, re-fetching from the start if it actually changed
    pub async fn set_sort_mode(&self, mode: SortMode) -> Result<(), FetchError> {
        let s = &self.shared;
        if !s.dictate.set_sort_mode(&s.conversation, mode) {
            return Ok(());
        }
        s.cursor.fetch_first_page(mode, &s.remote, &s.engine).await
    }

    pub fn current_sort_mode(&self) -> SortMode {
        self.shared
            .dictate
            .current_sort_mode(&self.shared.conversation)
    }

    pub async fn load_more(&self) -> Result<(), FetchError> {
        let s = &self.shared;
        s.cursor.fetch_next_page(None, &s.remote, &s.engine).await
    }

    pub async fn load_replies(&self, parent: &CommentId) -> Result<(), FetchError> {
        let s = &self.shared;
        s.cursor
            .fetch_next_page(Some(parent.clone()), &s.remote, &s.engine)
            .await
    }

    pub fn has_more_replies(&self, parent: &CommentId) -> bool {
        self.shared.cursor.has_more_replies(parent)
    }

    /// Asks the server for fresh comment counts outside of the realtime loop
    pub async fn refresh_counters(&self) -> Result<Counters, FetchError> {
        let s = &self.shared;
        let ids = [s.conversation.clone()];
        let mut resp = s.remote.comment_counters(&ids).await?;
        let counters = resp.counts.remove(&s.conversation).unwrap_or_default();
        s.cursor.record_counters(counters);
        Ok(counters)
    }

    /// Must be called from within a tokio runtime
    pub fn start_realtime(&self) {
        self.poller.start([self.shared.conversation.clone()]);
    }

    pub fn stop_realtime(&self) {
        self.poller.stop();
    }

    pub fn is_realtime_running(&self) -> bool {
        self.poller.is_running()
    }

    pub fn snapshot(&self) -> watch::Receiver<Snapshot> {
        self.shared.cursor.subscribe()
    }

    pub fn presence(&self) -> watch::Receiver<Presence> {
        self.shared.presence.subscribe()
    }

    pub fn visible_comments(&self) -> Vec<Comment> {
        self.shared.engine.visible_comments()
    }

    pub fn newly_arrived(&self) -> Vec<Comment> {
        self.shared.engine.newly_arrived()
    }

    /// The visible comments laid out as display rows
    pub fn visible_items(&self) -> Vec<ThreadItem> {
        let mut res = Vec::new();
        for thread in self.shared.engine.visible_threads() {
            if !res.is_empty() {
                res.push(ThreadItem::Spacer);
            }
            res.extend(thread.into_iter().map(ThreadItem::Comment));
        }
        if self.shared.cursor.snapshot().load_state == LoadState::Loading {
            res.push(ThreadItem::Skeleton);
        }
        res
    }

    pub fn mutation_results(&self) -> mpsc::UnboundedReceiver<MutationOutcome> {
        self.mutations.subscribe()
    }

    pub fn vote(&self, id: &CommentId, direction: Vote) -> Result<Submission, MutationError> {
        self.mutations.vote(id, direction)
    }

    pub fn delete(&self, id: &CommentId) -> Result<Submission, MutationError> {
        self.mutations.delete(id)
    }

    pub fn edit(&self, id: &CommentId, content: Vec<Content>) -> Result<Submission, MutationError> {
        self.mutations.edit(id, content)
    }

    pub fn mute(&self, user: &UserId) -> Result<Submission, MutationError> {
        self.mutations.mute(user)
    }

    pub fn report(&self, id: &CommentId) -> Result<Submission, MutationError> {
        self.mutations.report(id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use convo_mock_server::{MockServer, MockTokens};

    use super::*;
    use crate::api::{self, Api, RealtimeResponse, TokenProvider};

    fn p1() -> ConversationId {
        ConversationId::from("p1")
    }

    fn session_with(
        server: &Arc<MockServer>,
        config: &Config,
    ) -> (ConversationSession, Arc<MockTokens>) {
        let tokens = Arc::new(MockTokens::new(server.clone()));
        let remote = Remote::new(
            server.clone() as Arc<dyn Api>,
            tokens.clone() as Arc<dyn TokenProvider>,
        );
        (ConversationSession::new(p1(), remote, config), tokens)
    }

    fn session(server: &Arc<MockServer>) -> (ConversationSession, Arc<MockTokens>) {
        session_with(server, &Config::default())
    }

    fn top(id: &str) -> api::Comment {
        api::Comment::new_top_level(CommentId::from(id), UserId::from("u1"), id)
    }

    fn ids(comments: Vec<Comment>) -> Vec<String> {
        comments.into_iter().map(|c| c.id.0).collect()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_arrival_does_not_move_the_offset() {
        let server = Arc::new(MockServer::new());
        for id in ["a", "b", "c", "e"] {
            server.post(&p1(), top(id));
        }
        let config = Config {
            page_size: 3,
            ..Config::default()
        };
        let (session, _) = session_with(&server, &config);
        session.set_sort_mode(SortMode::Oldest).await.unwrap();
        assert_eq!(session.snapshot().borrow().offset, 3);

        let d = top("d");
        server.post(&p1(), d.clone());
        let mut resp = RealtimeResponse::default();
        resp.data.new_comments.insert(p1(), vec![d]);
        server.queue_realtime(resp);
        session.start_realtime();
        settle().await;
        session.stop_realtime();
        assert_eq!(ids(session.visible_comments()), vec!["d", "a", "b", "c"]);
        assert_eq!(ids(session.newly_arrived()), vec!["d"]);
        assert_eq!(session.snapshot().borrow().offset, 3);

        // The server-side page after offset 3 now holds e and d
        session.load_more().await.unwrap();
        assert_eq!(server.page_requests().pop().unwrap().offset, 3);
        assert_eq!(
            ids(session.visible_comments()),
            vec!["d", "a", "b", "c", "e"]
        );
        let snapshot = session.snapshot().borrow().clone();
        assert_eq!((snapshot.offset, snapshot.has_next), (5, false));
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_reply_then_delete() {
        let server = Arc::new(MockServer::new());
        let c1 = top("c1");
        let c2 = top("c2");
        server.post(&p1(), c1.clone());
        server.post(&p1(), c2.clone());
        let (session, _) = session(&server);
        session.load().await.unwrap();
        assert_eq!(session.current_sort_mode(), SortMode::Best);
        session.start_realtime();

        let c3 = api::Comment::new_reply(&c1, CommentId::from("c3"), UserId::from("u2"), "r");
        let mut resp = RealtimeResponse::default();
        resp.data.new_comments.insert(p1(), vec![c3]);
        resp.next_fetch_delay_ms = 1000;
        server.queue_realtime(resp);
        let mut resp = RealtimeResponse::default();
        resp.data.deleted_comment_ids.insert(p1(), vec![c2.id.clone()]);
        resp.data
            .counters_by_conversation
            .insert(p1(), api::Counters { comments: 2, replies: 1 });
        resp.data
            .typing_users_by_conversation
            .insert(p1(), api::TypingUsers { count: 2 });
        server.queue_realtime(resp);

        settle().await;
        assert_eq!(ids(session.store().children(&c1.id)), vec!["c3"]);
        tokio::time::advance(Duration::from_millis(1000)).await;
        settle().await;
        session.stop_realtime();

        assert!(session.store().get(&c2.id).unwrap().deleted);
        let items = session.visible_items();
        assert_eq!(items.len(), 4);
        assert!(matches!(&items[0], ThreadItem::Comment(c) if c.id == c1.id));
        assert!(matches!(&items[1], ThreadItem::Comment(c) if c.id.0 == "c3"));
        assert_eq!(items[2], ThreadItem::Spacer);
        assert!(matches!(&items[3], ThreadItem::Comment(c) if c.id == c2.id && c.deleted));
        assert_eq!(session.snapshot().borrow().messages_count, 3);
        assert_eq!(session.presence().borrow().typing_users, 2);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once() {
        let server = Arc::new(MockServer::new());
        server.post(&p1(), top("c1"));
        let (session, tokens) = session(&server);
        session.load().await.unwrap();
        assert_eq!(tokens.refreshes(), 0);

        server.expire_tokens();
        session.refresh_counters().await.unwrap();
        assert_eq!(tokens.refreshes(), 1);

        server.reject_all_tokens(true);
        assert_eq!(
            session.refresh_counters().await,
            Err(FetchError::Unauthorized)
        );
        assert_eq!(tokens.refreshes(), 2);
    }

    #[tokio::test]
    async fn same_sort_mode_does_not_refetch() {
        let server = Arc::new(MockServer::new());
        server.post(&p1(), top("c1"));
        let (session, _) = session(&server);
        session.load().await.unwrap();
        session.set_sort_mode(SortMode::Best).await.unwrap();
        assert_eq!(server.page_requests().len(), 1);
        session.set_sort_mode(SortMode::Newest).await.unwrap();
        let reqs = server.page_requests();
        assert_eq!(reqs.len(), 2);
        assert_eq!((reqs[1].sort_by, reqs[1].offset), (SortMode::Newest, 0));
    }

    #[tokio::test]
    async fn mutations_go_through_the_session() {
        let server = Arc::new(MockServer::new());
        let c1 = top("c1");
        server.post(&p1(), c1.clone());
        let (session, _) = session(&server);
        session.load().await.unwrap();
        let mut results = session.mutation_results();
        session.vote(&c1.id, Vote::Up).unwrap().wait().await.unwrap();
        session.report(&c1.id).unwrap().wait().await.unwrap();
        assert_eq!(results.recv().await.unwrap().result, Ok(()));
        assert_eq!(results.recv().await.unwrap().result, Ok(()));
        let got = session.store().get(&c1.id).unwrap();
        assert_eq!(got.rank.up, 1);
        assert!(got.reported);
    }

    #[tokio::test]
    async fn loading_shows_a_skeleton() {
        let server = Arc::new(MockServer::new());
        server.post(&p1(), top("c1"));
        server.set_latency(Duration::from_millis(20));
        let (session, _) = session(&server);
        let load = session.load();
        let check = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            session.visible_items()
        };
        let (res, items) = tokio::join!(load, check);
        res.unwrap();
        assert_eq!(items, vec![ThreadItem::Skeleton]);
        assert_eq!(session.visible_items().len(), 1);
        assert!(matches!(session.visible_items()[0], ThreadItem::Comment(_)));
    }
}
