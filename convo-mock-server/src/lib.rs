use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use convo_api::{
    Api, AuthToken, Comment, CommentId, CommentRef, ConversationId, Counters, CountersResponse,
    DeleteResponse, EditRequest, Error, MuteRequest, PageRequest, PageResponse, RankOperation,
    RankRequest, RankResponse, RealtimeResponse, SortMode, TokenProvider, UserId, Uuid, Vote,
};
use parking_lot::Mutex;

/// Conversations to preload a `MockServer` with
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Fixture {
    pub conversations: Vec<FixtureConversation>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FixtureConversation {
    pub id: ConversationId,

    /// Flat list, each reply after its parent
    pub comments: Vec<Comment>,
}

impl Fixture {
    pub fn load(path: &Path) -> anyhow::Result<Fixture> {
        let data = std::fs::read(path)
            .with_context(|| format!("reading fixture file {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("parsing fixture file {}", path.display()))
    }
}

#[derive(Debug, Default)]
struct Conversation {
    /// In posting order
    comments: Vec<Comment>,
}

impl Conversation {
    fn find_mut(&mut self, id: &CommentId) -> Result<&mut Comment, Error> {
        self.comments
            .iter_mut()
            .find(|c| c.id == *id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn replies_to(&self, parent: &CommentId) -> Vec<&Comment> {
        let mut res = self
            .comments
            .iter()
            .filter(|c| c.parent_id.as_ref() == Some(parent))
            .collect::<Vec<_>>();
        res.sort_by_key(|c| c.created_at);
        res
    }

    fn top_level(&self, sort: SortMode) -> Vec<&Comment> {
        let mut res = self
            .comments
            .iter()
            .filter(|c| c.parent_id.is_none())
            .collect::<Vec<_>>();
        res.sort_by_key(|c| c.created_at);
        match sort {
            SortMode::Oldest => (),
            SortMode::Newest => res.reverse(),
            SortMode::Best => {
                res.sort_by_key(|c| -(i64::from(c.rank.up) - i64::from(c.rank.down)))
            }
        }
        res
    }

    /// `c` as the server sends it, with up to `inline` replies when `depth` allows
    fn wire(&self, c: &Comment, depth: u32, inline: usize) -> Comment {
        let replies = self.replies_to(&c.id);
        let mut res = c.clone();
        res.replies_count = replies.len() as u32;
        res.replies = Vec::new();
        if depth > 1 {
            res.replies = replies
                .iter()
                .take(inline)
                .map(|r| self.wire(r, depth - 1, inline))
                .collect();
        }
        res.offset = res.replies.len() as u32;
        res.has_next = replies.len() > res.replies.len();
        res
    }
}

#[derive(Debug)]
struct State {
    conversations: HashMap<ConversationId, Conversation>,
    tokens: HashSet<AuthToken>,
    reject_all_tokens: bool,
    latency: Duration,
    inline_replies: usize,
    failures: VecDeque<Error>,
    realtime: VecDeque<Result<RealtimeResponse, Error>>,
    realtime_requests: usize,
    page_requests: Vec<PageRequest>,
    rank_operations: Vec<RankOperation>,
    muted: Vec<UserId>,
    reported: Vec<CommentId>,
}

/// In-memory stand-in for the conversation service
pub struct MockServer(Mutex<State>);

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer(Mutex::new(State {
            conversations: HashMap::new(),
            tokens: HashSet::new(),
            reject_all_tokens: false,
            latency: Duration::ZERO,
            inline_replies: 2,
            failures: VecDeque::new(),
            realtime: VecDeque::new(),
            realtime_requests: 0,
            page_requests: Vec::new(),
            rank_operations: Vec::new(),
            muted: Vec::new(),
            reported: Vec::new(),
        }))
    }

    pub fn from_fixture(fixture: Fixture) -> MockServer {
        let server = MockServer::new();
        for conv in fixture.conversations {
            for c in conv.comments {
                server.post(&conv.id, c);
            }
        }
        server
    }

    /// Adds a comment as if someone else wrote it
    pub fn post(&self, conversation: &ConversationId, mut comment: Comment) {
        let replies = std::mem::take(&mut comment.replies);
        self.0
            .lock()
            .conversations
            .entry(conversation.clone())
            .or_default()
            .comments
            .push(comment);
        for r in replies {
            self.post(conversation, r);
        }
    }

    pub fn comment(&self, conversation: &ConversationId, id: &CommentId) -> Option<Comment> {
        let st = self.0.lock();
        let conv = st.conversations.get(conversation)?;
        let c = conv.comments.iter().find(|c| c.id == *id)?;
        Some(conv.wire(c, 1, 0))
    }

    pub fn issue_token(&self) -> AuthToken {
        let tok = AuthToken(Uuid::new_v4().to_string());
        self.0.lock().tokens.insert(tok.clone());
        tok
    }

    /// Invalidates every token issued so far
    pub fn expire_tokens(&self) {
        self.0.lock().tokens.clear();
    }

    pub fn reject_all_tokens(&self, reject: bool) {
        self.0.lock().reject_all_tokens = reject;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.0.lock().latency = latency;
    }

    /// Number of replies inlined under each comment of a depth-2 read
    pub fn set_inline_replies(&self, n: usize) {
        self.0.lock().inline_replies = n;
    }

    /// Makes the next call fail with `e`, whatever it is
    pub fn fail_next(&self, e: Error) {
        self.0.lock().failures.push_back(e);
    }

    pub fn queue_realtime(&self, resp: RealtimeResponse) {
        self.0.lock().realtime.push_back(Ok(resp));
    }

    pub fn queue_realtime_failure(&self, e: Error) {
        self.0.lock().realtime.push_back(Err(e));
    }

    pub fn realtime_requests(&self) -> usize {
        self.0.lock().realtime_requests
    }

    pub fn page_requests(&self) -> Vec<PageRequest> {
        self.0.lock().page_requests.clone()
    }

    pub fn rank_operations(&self) -> Vec<RankOperation> {
        self.0.lock().rank_operations.clone()
    }

    pub fn muted_users(&self) -> Vec<UserId> {
        self.0.lock().muted.clone()
    }

    pub fn reported_comments(&self) -> Vec<CommentId> {
        self.0.lock().reported.clone()
    }

    async fn enter(&self, token: &AuthToken) -> Result<(), Error> {
        let latency = {
            let st = self.0.lock();
            if st.reject_all_tokens || !st.tokens.contains(token) {
                return Err(Error::Unauthorized);
            }
            st.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match self.0.lock().failures.pop_front() {
            Some(e) => {
                tracing::debug!(?e, "injecting failure");
                Err(e)
            }
            None => Ok(()),
        }
    }
}

macro_rules! conversation {
    ($st:ident, $id:expr) => {
        $st.conversations
            .get_mut($id)
            .ok_or_else(|| Error::NotFound($id.to_string()))?
    };
}

fn ranked(rank: &mut convo_api::Rank, op: RankOperation) {
    let to = match op {
        RankOperation::Like => Vote::Up,
        RankOperation::Dislike => Vote::Down,
        RankOperation::ToggleLike | RankOperation::ToggleDislike => Vote::None,
    };
    match rank.current_user_vote {
        Vote::Up => rank.up = rank.up.saturating_sub(1),
        Vote::Down => rank.down = rank.down.saturating_sub(1),
        Vote::None => (),
    }
    match to {
        Vote::Up => rank.up += 1,
        Vote::Down => rank.down += 1,
        Vote::None => (),
    }
    rank.current_user_vote = to;
}

#[async_trait]
impl Api for MockServer {
    async fn read_conversation(
        &self,
        token: &AuthToken,
        req: &PageRequest,
    ) -> Result<PageResponse, Error> {
        self.enter(token).await?;
        let mut st = self.0.lock();
        st.page_requests.push(req.clone());
        let inline = st.inline_replies;
        let empty = Conversation::default();
        let conv = st.conversations.get(&req.conversation_id).unwrap_or(&empty);
        let candidates = match &req.parent_id {
            None => conv.top_level(req.sort_by),
            Some(p) => conv.replies_to(p),
        };
        let total = candidates.len();
        let comments = candidates
            .into_iter()
            .skip(req.offset as usize)
            .take(req.count as usize)
            .map(|c| conv.wire(c, req.depth, inline))
            .collect::<Vec<_>>();
        let offset = req.offset + comments.len() as u32;
        Ok(PageResponse {
            has_next: (offset as usize) < total,
            offset,
            messages_count: conv.comments.len() as u32,
            read_only: false,
            comments,
        })
    }

    async fn fetch_realtime(
        &self,
        token: &AuthToken,
        _conversations: &[ConversationId],
    ) -> Result<RealtimeResponse, Error> {
        self.0.lock().realtime_requests += 1;
        self.enter(token).await?;
        self.0
            .lock()
            .realtime
            .pop_front()
            .unwrap_or_else(|| Ok(RealtimeResponse::default()))
    }

    async fn change_rank(&self, token: &AuthToken, req: &RankRequest) -> Result<RankResponse, Error> {
        self.enter(token).await?;
        let mut st = self.0.lock();
        st.rank_operations.push(req.operation);
        let c = conversation!(st, &req.conversation_id).find_mut(&req.comment_id)?;
        ranked(&mut c.rank, req.operation);
        Ok(RankResponse { success: true })
    }

    async fn delete_comment(
        &self,
        token: &AuthToken,
        req: &CommentRef,
    ) -> Result<DeleteResponse, Error> {
        self.enter(token).await?;
        let mut st = self.0.lock();
        let c = conversation!(st, &req.conversation_id).find_mut(&req.comment_id)?;
        c.deleted = true;
        Ok(DeleteResponse {
            id: c.id.clone(),
            soft_deleted: true,
        })
    }

    async fn edit_comment(&self, token: &AuthToken, req: &EditRequest) -> Result<Comment, Error> {
        self.enter(token).await?;
        let mut st = self.0.lock();
        let conv = conversation!(st, &req.comment.conversation_id);
        let c = conv.find_mut(&req.comment.comment_id)?;
        if c.deleted {
            return Err(Error::Rejected {
                status: 409,
                message: String::from("comment is deleted"),
            });
        }
        c.content = req.content.clone();
        c.edited = true;
        let c = c.clone();
        Ok(conv.wire(&c, 1, 0))
    }

    async fn mute_user(&self, token: &AuthToken, req: &MuteRequest) -> Result<(), Error> {
        self.enter(token).await?;
        let mut st = self.0.lock();
        if !st.muted.contains(&req.user_id) {
            st.muted.push(req.user_id.clone());
        }
        Ok(())
    }

    async fn report_comment(&self, token: &AuthToken, req: &CommentRef) -> Result<(), Error> {
        self.enter(token).await?;
        let mut st = self.0.lock();
        conversation!(st, &req.conversation_id).find_mut(&req.comment_id)?;
        st.reported.push(req.comment_id.clone());
        Ok(())
    }

    async fn comment_counters(
        &self,
        token: &AuthToken,
        conversations: &[ConversationId],
    ) -> Result<CountersResponse, Error> {
        self.enter(token).await?;
        let st = self.0.lock();
        let counts = conversations
            .iter()
            .filter_map(|id| {
                let conv = st.conversations.get(id)?;
                let comments = conv.comments.iter().filter(|c| !c.is_reply()).count() as u32;
                let replies = conv.comments.len() as u32 - comments;
                Some((id.clone(), Counters { comments, replies }))
            })
            .collect();
        Ok(CountersResponse { counts })
    }
}

/// Token provider handing out tokens issued by a `MockServer`
pub struct MockTokens {
    server: Arc<MockServer>,
    current: Mutex<AuthToken>,
    refreshes: AtomicUsize,
}

impl MockTokens {
    pub fn new(server: Arc<MockServer>) -> MockTokens {
        let current = Mutex::new(server.issue_token());
        MockTokens {
            server,
            current,
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for MockTokens {
    async fn token(&self) -> Result<AuthToken, Error> {
        Ok(self.current.lock().clone())
    }

    async fn refresh(&self) -> Result<AuthToken, Error> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let tok = self.server.issue_token();
        *self.current.lock() = tok.clone();
        Ok(tok)
    }
}
