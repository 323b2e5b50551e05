use std::{collections::HashMap, fmt, sync::Arc};

use futures::channel::oneshot;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{
    api::{
        self, CommentId, CommentRef, Content, ConversationId, EditRequest, MuteRequest,
        MutationId, RankOperation, RankRequest, UserId, Vote,
    },
    Comment, Field, MutationError, RankChange, ReconciliationEngine, Remote,
};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum MutationTarget {
    Comment(CommentId),
    User(UserId),
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MutationKind {
    Vote,
    Delete,
    Mute,
    Edit,
    Report,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MutationStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingMutation {
    pub id: MutationId,
    pub target: MutationTarget,
    pub kind: MutationKind,

    /// State of every touched comment before the optimistic change
    pub applied_snapshot: Vec<Comment>,
    pub status: MutationStatus,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MutationOutcome {
    pub mutation_id: MutationId,
    pub target: MutationTarget,
    pub kind: MutationKind,
    pub result: Result<(), MutationError>,
}

/// Handle on a submitted mutation
///
/// Dropping it does not cancel anything: the submission runs to completion anyway.
pub struct Submission {
    pub id: MutationId,
    done: oneshot::Receiver<Result<(), MutationError>>,
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Submission {
    pub async fn wait(self) -> Result<(), MutationError> {
        match self.done.await {
            Ok(res) => res,
            Err(oneshot::Canceled) => Err(MutationError::Network(String::from(
                "submission task ended without an answer",
            ))),
        }
    }
}

enum Request {
    Rank(RankRequest),
    Delete(CommentRef),
    Edit(EditRequest),
    Mute(MuteRequest),
    Report(CommentRef),
}

fn next_vote(current: Vote, direction: Vote) -> Vote {
    match current == direction {
        true => Vote::None,
        false => direction,
    }
}

/// Applies local mutations optimistically, then confirms or rolls them back
///
/// There is at most one pending mutation per target and kind.
pub struct MutationCoordinator {
    conversation: ConversationId,
    remote: Remote,
    engine: Arc<ReconciliationEngine>,
    pending: Mutex<HashMap<(MutationTarget, MutationKind), MutationId>>,
    results: Mutex<Vec<mpsc::UnboundedSender<MutationOutcome>>>,
}

impl MutationCoordinator {
    pub fn new(
        conversation: ConversationId,
        remote: Remote,
        engine: Arc<ReconciliationEngine>,
    ) -> MutationCoordinator {
        MutationCoordinator {
            conversation,
            remote,
            engine,
            pending: Mutex::new(HashMap::new()),
            results: Mutex::new(Vec::new()),
        }
    }

    /// Every outcome from now on, in completion order
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MutationOutcome> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.results.lock().push(sender);
        receiver
    }

    pub fn is_pending(&self, target: &MutationTarget, kind: MutationKind) -> bool {
        self.pending.lock().contains_key(&(target.clone(), kind))
    }

    fn reserve(&self, target: &MutationTarget, kind: MutationKind) -> Result<MutationId, MutationError> {
        let mut pending = self.pending.lock();
        let key = (target.clone(), kind);
        if pending.contains_key(&key) {
            return Err(MutationError::AlreadyPending {
                target: target.clone(),
                kind,
            });
        }
        let id = MutationId::new();
        pending.insert(key, id);
        Ok(id)
    }

    /// Reserves the target and applies `f` to the comment
    ///
    /// `f` returns `None` when the mutation makes no sense in the current state.
    fn begin<T, F>(
        &self,
        id: &CommentId,
        kind: MutationKind,
        fields: &[Field],
        f: F,
    ) -> Result<(PendingMutation, T), MutationError>
    where
        F: FnOnce(&mut Comment) -> Option<T>,
    {
        let target = MutationTarget::Comment(id.clone());
        let mutation_id = self.reserve(&target, kind)?;
        let mut out = None;
        let snapshot = self
            .engine
            .store()
            .apply_local(id, Some(mutation_id), fields, |c| {
                out = f(c);
                out.is_some()
            });
        match (snapshot, out) {
            (Some(snapshot), Some(out)) => Ok((
                PendingMutation {
                    id: mutation_id,
                    target,
                    kind,
                    applied_snapshot: vec![snapshot],
                    status: MutationStatus::Pending,
                },
                out,
            )),
            _ => {
                self.pending.lock().remove(&(target, kind));
                Err(MutationError::StaleState(id.clone()))
            }
        }
    }

    fn comment_ref(&self, c: &Comment) -> CommentRef {
        CommentRef {
            conversation_id: self.conversation.clone(),
            comment_id: c.id.clone(),
            parent_id: c.parent_id.clone(),
        }
    }

    /// Votes `direction` on a comment, or retracts the vote if it already is the
    /// current one
    pub fn vote(
        self: &Arc<Self>,
        id: &CommentId,
        direction: Vote,
    ) -> Result<Submission, MutationError> {
        let (pending, operation) = self.begin(id, MutationKind::Vote, &[Field::Rank], |c| {
            if c.deleted {
                return None;
            }
            let from = c.rank.current_user_vote;
            let to = next_vote(from, direction);
            let op = RankOperation::for_change(from, to)?;
            RankChange { from, to }.apply(&mut c.rank);
            Some(op)
        })?;
        let req = RankRequest {
            conversation_id: self.conversation.clone(),
            comment_id: id.clone(),
            operation,
        };
        Ok(self.submit(pending, Request::Rank(req)))
    }

    pub fn delete(self: &Arc<Self>, id: &CommentId) -> Result<Submission, MutationError> {
        let (pending, ()) = self.begin(id, MutationKind::Delete, &[Field::Deleted], |c| {
            if c.deleted {
                return None;
            }
            c.deleted = true;
            Some(())
        })?;
        let req = self.comment_ref(&pending.applied_snapshot[0]);
        Ok(self.submit(pending, Request::Delete(req)))
    }

    pub fn edit(
        self: &Arc<Self>,
        id: &CommentId,
        content: Vec<Content>,
    ) -> Result<Submission, MutationError> {
        let new_content = content.clone();
        let (pending, ()) = self.begin(id, MutationKind::Edit, &[Field::Content], |c| {
            if c.deleted {
                return None;
            }
            c.content = new_content;
            c.edited = true;
            Some(())
        })?;
        let req = EditRequest {
            comment: self.comment_ref(&pending.applied_snapshot[0]),
            content,
        };
        Ok(self.submit(pending, Request::Edit(req)))
    }

    pub fn report(self: &Arc<Self>, id: &CommentId) -> Result<Submission, MutationError> {
        let (pending, ()) = self.begin(id, MutationKind::Report, &[Field::Reported], |c| {
            if c.reported {
                return None;
            }
            c.reported = true;
            Some(())
        })?;
        let req = self.comment_ref(&pending.applied_snapshot[0]);
        Ok(self.submit(pending, Request::Report(req)))
    }

    /// Hides every comment of `user`, including the ones that arrive later
    pub fn mute(self: &Arc<Self>, user: &UserId) -> Result<Submission, MutationError> {
        let target = MutationTarget::User(user.clone());
        let mutation_id = self.reserve(&target, MutationKind::Mute)?;
        let applied_snapshot = self.engine.store().mute_author(user, mutation_id);
        let pending = PendingMutation {
            id: mutation_id,
            target,
            kind: MutationKind::Mute,
            applied_snapshot,
            status: MutationStatus::Pending,
        };
        let req = MuteRequest {
            conversation_id: self.conversation.clone(),
            user_id: user.clone(),
        };
        Ok(self.submit(pending, Request::Mute(req)))
    }

    fn submit(self: &Arc<Self>, pending: PendingMutation, req: Request) -> Submission {
        let (sender, done) = oneshot::channel();
        let id = pending.id;
        let this = self.clone();
        tokio::spawn(async move {
            let res = this.send(req).await;
            let res = this.settle(pending, res);
            // The caller may have stopped waiting
            let _ = sender.send(res);
        });
        Submission { id, done }
    }

    async fn send(&self, req: Request) -> Result<Option<api::Comment>, MutationError> {
        match req {
            Request::Rank(r) => match self.remote.change_rank(&r).await?.success {
                true => Ok(None),
                false => Err(MutationError::ServerRejected {
                    status: 200,
                    message: format!("rank operation {:?} refused", r.operation),
                }),
            },
            Request::Delete(r) => {
                let resp = self.remote.delete_comment(&r).await?;
                tracing::debug!(comment = %resp.id, soft = resp.soft_deleted, "comment deleted");
                Ok(None)
            }
            Request::Edit(r) => Ok(Some(self.remote.edit_comment(&r).await?)),
            Request::Mute(r) => {
                self.remote.mute_user(&r).await?;
                Ok(None)
            }
            Request::Report(r) => {
                self.remote.report_comment(&r).await?;
                Ok(None)
            }
        }
    }

    fn settle(
        &self,
        mut pending: PendingMutation,
        res: Result<Option<api::Comment>, MutationError>,
    ) -> Result<(), MutationError> {
        let res = match res {
            Ok(server) => {
                pending.status = MutationStatus::Confirmed;
                self.engine.apply_mutation_confirmation(&pending, server);
                Ok(())
            }
            Err(err) => {
                pending.status = MutationStatus::Failed;
                tracing::warn!(
                    conversation = %self.conversation,
                    mutation = %pending.id,
                    kind = ?pending.kind,
                    %err,
                    "mutation failed, rolling back"
                );
                self.rollback(&pending);
                Err(err)
            }
        };
        self.pending
            .lock()
            .remove(&(pending.target.clone(), pending.kind));
        let outcome = MutationOutcome {
            mutation_id: pending.id,
            target: pending.target,
            kind: pending.kind,
            result: res.clone(),
        };
        self.results
            .lock()
            .retain_mut(|r| matches!(r.send(outcome.clone()), Ok(())));
        res
    }

    fn rollback(&self, pending: &PendingMutation) {
        let store = self.engine.store();
        match &pending.target {
            MutationTarget::User(user) => store.unmute_author(user, pending.id),
            MutationTarget::Comment(_) => {
                for s in &pending.applied_snapshot {
                    store.rollback(pending.id, s);
                }
            }
        }
    }
}
