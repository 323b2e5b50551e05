use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};

use crate::{
    api::{CommentId, ConversationId, MutationId, Rank, UserId, Vote},
    Comment, Diagnostics, ReconciliationInconsistency,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeResult {
    Inserted,
    Updated,
    Unchanged,

    /// Newly held back until something it depends on shows up: a reply waiting for
    /// its parent, or a deletion waiting for its comment
    Buffered,
}

/// Fields a pending mutation can hold authority over
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Field {
    Rank,
    Content,
    Deleted,
    Muted,
    Reported,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Source {
    Server,

    /// Server answer to the mutation with this id
    Confirmation(MutationId),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RankChange {
    pub from: Vote,
    pub to: Vote,
}

impl RankChange {
    pub fn apply(&self, rank: &mut Rank) {
        match self.from {
            Vote::Up => rank.up = rank.up.saturating_sub(1),
            Vote::Down => rank.down = rank.down.saturating_sub(1),
            Vote::None => (),
        }
        match self.to {
            Vote::Up => rank.up += 1,
            Vote::Down => rank.down += 1,
            Vote::None => (),
        }
        rank.current_user_vote = self.to;
    }
}

#[derive(Debug)]
struct Entry {
    comment: Comment,

    /// The server itself said this comment is deleted
    server_deleted: bool,

    claims: HashMap<Field, MutationId>,
}

impl Entry {
    fn new(comment: Comment) -> Entry {
        Entry {
            server_deleted: comment.deleted,
            comment,
            claims: HashMap::new(),
        }
    }

    fn identity_conflicts(&self, incoming: &Comment) -> Vec<&'static str> {
        let c = &self.comment;
        let mut res = Vec::new();
        if c.parent_id != incoming.parent_id {
            res.push("parent_id");
        }
        if c.root_id != incoming.root_id {
            res.push("root_id");
        }
        if c.depth != incoming.depth {
            res.push("depth");
        }
        if c.created_at != incoming.created_at {
            res.push("created_at");
        }
        if c.author_id != incoming.author_id {
            res.push("author_id");
        }
        res
    }

    /// Returns whether anything changed
    fn merge(&mut self, incoming: Comment, source: Source) -> bool {
        let takes = |f: Field| match self.claims.get(&f) {
            None => true,
            Some(m) => source == Source::Confirmation(*m),
        };
        let take_rank = takes(Field::Rank);
        let take_content = takes(Field::Content);

        let before = self.comment.clone();
        let c = &mut self.comment;
        c.status = incoming.status;
        c.replies_count = incoming.replies_count;
        if incoming.deleted {
            self.server_deleted = true;
            c.deleted = true;
        }
        if take_rank {
            c.rank = incoming.rank;
        }
        if take_content {
            c.content = incoming.content;
            c.edited = incoming.edited;
        }
        if let Source::Confirmation(m) = source {
            self.claims.retain(|_, claim| *claim != m);
        }
        self.comment != before
    }

    fn rollback(&mut self, mutation: MutationId, snapshot: &Comment) {
        let claimed = self
            .claims
            .iter()
            .filter(|(_, m)| **m == mutation)
            .map(|(f, _)| *f)
            .collect::<Vec<_>>();
        for f in claimed {
            self.claims.remove(&f);
            let c = &mut self.comment;
            match f {
                Field::Rank => c.rank = snapshot.rank.clone(),
                Field::Content => {
                    c.content = snapshot.content.clone();
                    c.edited = snapshot.edited;
                }
                Field::Deleted => c.deleted = snapshot.deleted || self.server_deleted,
                Field::Muted => c.muted = snapshot.muted,
                Field::Reported => c.reported = snapshot.reported,
            }
        }
    }
}

#[derive(Debug)]
struct Orphan {
    comment: Comment,
    cycles: u32,
}

/// All the comments known for one conversation
///
/// Writes to a comment serialize on that comment's own lock; the table-wide locks are
/// only held to look entries up or to insert new ones.
pub struct CommentStore {
    conversation: ConversationId,
    orphan_max_cycles: u32,
    diagnostics: Arc<dyn Diagnostics>,
    entries: RwLock<HashMap<CommentId, Arc<Mutex<Entry>>>>,

    /// Reply ids per parent, in arrival order
    children: RwLock<HashMap<CommentId, Vec<CommentId>>>,

    /// Replies waiting for their parent, keyed by the missing parent id
    orphans: Mutex<HashMap<CommentId, Vec<Orphan>>>,

    /// Deletions received before the comment itself
    tombstones: Mutex<HashSet<CommentId>>,

    /// Muted authors, with the mutation still pending on the mute if any
    muted_authors: RwLock<HashMap<UserId, Option<MutationId>>>,
}

impl CommentStore {
    pub fn new(
        conversation: ConversationId,
        orphan_max_cycles: u32,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> CommentStore {
        CommentStore {
            conversation,
            orphan_max_cycles,
            diagnostics,
            entries: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
            orphans: Mutex::new(HashMap::new()),
            tombstones: Mutex::new(HashSet::new()),
            muted_authors: RwLock::new(HashMap::new()),
        }
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    fn entry(&self, id: &CommentId) -> Option<Arc<Mutex<Entry>>> {
        self.entries.read().get(id).cloned()
    }

    pub fn upsert(&self, comment: Comment, source: Source) -> MergeResult {
        if let Some(entry) = self.entry(&comment.id) {
            return self.merge_into(&entry, comment, source);
        }

        if let Some(parent) = &comment.parent_id {
            // Holding the orphan lock across the check pairs with `adopt_orphans`
            let mut orphans = self.orphans.lock();
            if !self.entries.read().contains_key(parent) {
                let waiting = orphans.entry(parent.clone()).or_default();
                // A reply buffered again keeps its age
                return match waiting.iter_mut().find(|o| o.comment.id == comment.id) {
                    Some(o) => {
                        let deleted = o.comment.deleted || comment.deleted;
                        let before = std::mem::replace(&mut o.comment, comment);
                        o.comment.deleted = deleted;
                        match before == o.comment {
                            true => MergeResult::Unchanged,
                            false => MergeResult::Buffered,
                        }
                    }
                    None => {
                        waiting.push(Orphan { comment, cycles: 0 });
                        MergeResult::Buffered
                    }
                };
            }
        }

        let id = comment.id.clone();
        let res = self.insert(comment, source);
        if res == MergeResult::Inserted {
            self.adopt_orphans(&id);
        }
        res
    }

    fn insert(&self, mut comment: Comment, source: Source) -> MergeResult {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(&comment.id).cloned() {
            drop(entries);
            return self.merge_into(&entry, comment, source);
        }
        if self.tombstones.lock().remove(&comment.id) {
            comment.deleted = true;
        }
        let mute = self.muted_authors.read().get(&comment.author_id).copied();
        if mute.is_some() {
            comment.muted = true;
        }
        let parent = comment.parent_id.clone();
        let id = comment.id.clone();
        let mut entry = Entry::new(comment);
        if let Some(Some(m)) = mute {
            entry.claims.insert(Field::Muted, m);
        }
        entries.insert(id.clone(), Arc::new(Mutex::new(entry)));
        drop(entries);
        if let Some(parent) = parent {
            self.children.write().entry(parent).or_default().push(id);
        }
        MergeResult::Inserted
    }

    fn merge_into(&self, entry: &Mutex<Entry>, comment: Comment, source: Source) -> MergeResult {
        let mut e = entry.lock();
        for field in e.identity_conflicts(&comment) {
            self.diagnostics.report(
                &self.conversation,
                ReconciliationInconsistency::IdentityConflict {
                    comment_id: comment.id.clone(),
                    field,
                },
            );
        }
        match e.merge(comment, source) {
            true => MergeResult::Updated,
            false => MergeResult::Unchanged,
        }
    }

    fn adopt_orphans(&self, parent: &CommentId) {
        let waiting = self.orphans.lock().remove(parent);
        for o in waiting.into_iter().flatten() {
            tracing::debug!(comment = %o.comment.id, parent = %parent, "parent arrived for orphan reply");
            self.upsert(o.comment, Source::Server);
        }
    }

    /// Ages buffered orphans by one reconciliation cycle, dropping the ones that
    /// waited too long
    ///
    /// Returns the number of dropped replies.
    pub fn end_cycle(&self) -> usize {
        let max = self.orphan_max_cycles;
        let mut dropped = Vec::new();
        self.orphans.lock().retain(|parent, waiting| {
            waiting.retain_mut(|o| {
                o.cycles += 1;
                if o.cycles < max {
                    return true;
                }
                dropped.push(ReconciliationInconsistency::OrphanReplyDropped {
                    comment_id: o.comment.id.clone(),
                    parent_id: parent.clone(),
                    cycles: o.cycles,
                });
                false
            });
            !waiting.is_empty()
        });
        let res = dropped.len();
        for issue in dropped {
            self.diagnostics.report(&self.conversation, issue);
        }
        res
    }

    pub fn get(&self, id: &CommentId) -> Option<Comment> {
        self.entry(id).map(|e| e.lock().comment.clone())
    }

    pub fn contains(&self, id: &CommentId) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.lock().values().map(|v| v.len()).sum()
    }

    pub fn child_ids(&self, parent: &CommentId) -> Vec<CommentId> {
        self.children
            .read()
            .get(parent)
            .cloned()
            .unwrap_or_default()
    }

    /// Replies to `parent`, in the order they first reached the store
    pub fn children(&self, parent: &CommentId) -> Vec<Comment> {
        self.child_ids(parent)
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Marks a comment deleted on the server's behalf
    ///
    /// Unknown comments are remembered and will arrive already deleted.
    pub fn soft_delete(&self, id: &CommentId) -> MergeResult {
        let entries = self.entries.read();
        let existing = entries.get(id).cloned();
        match existing {
            Some(entry) => {
                drop(entries);
                let mut e = entry.lock();
                e.server_deleted = true;
                match e.comment.deleted {
                    true => MergeResult::Unchanged,
                    false => {
                        e.comment.deleted = true;
                        MergeResult::Updated
                    }
                }
            }
            None => match self.tombstones.lock().insert(id.clone()) {
                true => MergeResult::Buffered,
                false => MergeResult::Unchanged,
            },
        }
    }

    /// Applies a local change to a comment, recording `claim` as the authority over
    /// `fields` until it is confirmed, released or rolled back
    ///
    /// `f` returns whether the change applies at all. Returns the state from before
    /// the change, or `None` if the comment is unknown or `f` refused.
    pub fn apply_local<F>(
        &self,
        id: &CommentId,
        claim: Option<MutationId>,
        fields: &[Field],
        f: F,
    ) -> Option<Comment>
    where
        F: FnOnce(&mut Comment) -> bool,
    {
        let entry = self.entry(id)?;
        let mut e = entry.lock();
        let before = e.comment.clone();
        if !f(&mut e.comment) {
            e.comment = before;
            return None;
        }
        if let Some(m) = claim {
            for f in fields {
                e.claims.insert(*f, m);
            }
        }
        Some(before)
    }

    pub fn apply_rank_delta(
        &self,
        id: &CommentId,
        change: RankChange,
        claim: Option<MutationId>,
    ) -> Option<Comment> {
        self.apply_local(id, claim, &[Field::Rank], |c| {
            change.apply(&mut c.rank);
            true
        })
    }

    /// Restores the fields `mutation` still has authority over from `snapshot`
    pub fn rollback(&self, mutation: MutationId, snapshot: &Comment) {
        if let Some(entry) = self.entry(&snapshot.id) {
            entry.lock().rollback(mutation, snapshot);
        }
    }

    /// Drops the authority of `mutation` over these comments, keeping their current values
    pub fn release(&self, ids: &[CommentId], mutation: MutationId) {
        for id in ids {
            if let Some(entry) = self.entry(id) {
                entry.lock().claims.retain(|_, m| *m != mutation);
            }
        }
    }

    /// Marks every comment of `author`, current and future, as muted
    ///
    /// Returns the comments that were not muted before. An author that is already
    /// muted stays under the mutation that muted it.
    pub fn mute_author(&self, author: &UserId, claim: MutationId) -> Vec<Comment> {
        self.muted_authors
            .write()
            .entry(author.clone())
            .or_insert(Some(claim));
        let entries = self.entries.read().values().cloned().collect::<Vec<_>>();
        let mut res = Vec::new();
        for entry in entries {
            let mut e = entry.lock();
            if e.comment.author_id == *author && !e.comment.muted {
                res.push(e.comment.clone());
                e.comment.muted = true;
                e.claims.insert(Field::Muted, claim);
            }
        }
        res
    }

    fn author_entries(&self, author: &UserId) -> Vec<Arc<Mutex<Entry>>> {
        self.entries
            .read()
            .values()
            .filter(|e| e.lock().comment.author_id == *author)
            .cloned()
            .collect()
    }

    /// Undoes `mute_author` after the server refused `mutation`
    ///
    /// Only what `mutation` muted itself is unmuted.
    pub fn unmute_author(&self, author: &UserId, mutation: MutationId) {
        {
            let mut authors = self.muted_authors.write();
            if authors.get(author) == Some(&Some(mutation)) {
                authors.remove(author);
            }
        }
        for entry in self.author_entries(author) {
            let mut e = entry.lock();
            if e.claims.get(&Field::Muted) == Some(&mutation) {
                e.claims.remove(&Field::Muted);
                e.comment.muted = false;
            }
        }
    }

    /// Makes the mute of `author` by `mutation` permanent once the server accepted it
    pub fn confirm_mute(&self, author: &UserId, mutation: MutationId) {
        if let Some(pending) = self.muted_authors.write().get_mut(author) {
            if *pending == Some(mutation) {
                *pending = None;
            }
        }
        for entry in self.author_entries(author) {
            let mut e = entry.lock();
            if e.claims.get(&Field::Muted) == Some(&mutation) {
                e.claims.remove(&Field::Muted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{self, Content};

    #[derive(Default)]
    struct Collect(Mutex<Vec<ReconciliationInconsistency>>);

    impl Diagnostics for Collect {
        fn report(&self, _: &ConversationId, issue: ReconciliationInconsistency) {
            self.0.lock().push(issue);
        }
    }

    fn store() -> (CommentStore, Arc<Collect>) {
        let diag = Arc::new(Collect::default());
        let store = CommentStore::new(ConversationId::from("p1"), 5, diag.clone());
        (store, diag)
    }

    fn top(id: &str) -> api::Comment {
        api::Comment::new_top_level(CommentId::from(id), UserId::from("u1"), id)
    }

    fn reply(parent: &api::Comment, id: &str) -> api::Comment {
        api::Comment::new_reply(parent, CommentId::from(id), UserId::from("u2"), id)
    }

    #[test]
    fn insert_update_unchanged() {
        let (store, diag) = store();
        let c1 = top("c1");
        assert_eq!(store.upsert(c1.clone().into(), Source::Server), MergeResult::Inserted);
        assert_eq!(store.upsert(c1.clone().into(), Source::Server), MergeResult::Unchanged);
        let mut c1b = c1.clone();
        c1b.rank.up = 4;
        assert_eq!(store.upsert(c1b.into(), Source::Server), MergeResult::Updated);
        assert_eq!(store.get(&c1.id).unwrap().rank.up, 4);
        assert!(diag.0.lock().is_empty());
    }

    #[test]
    fn deleted_is_sticky() {
        let (store, _) = store();
        let c1 = top("c1");
        store.upsert(c1.clone().into(), Source::Server);
        assert_eq!(store.soft_delete(&c1.id), MergeResult::Updated);
        let mut stale = c1.clone();
        stale.rank.up = 10;
        assert_eq!(store.upsert(stale.into(), Source::Server), MergeResult::Updated);
        let got = store.get(&c1.id).unwrap();
        assert!(got.deleted);
        assert_eq!(got.rank.up, 10);
    }

    #[test]
    fn deletion_before_arrival_is_remembered() {
        let (store, _) = store();
        assert_eq!(store.soft_delete(&CommentId::from("c9")), MergeResult::Buffered);
        assert_eq!(store.soft_delete(&CommentId::from("c9")), MergeResult::Unchanged);
        store.upsert(top("c9").into(), Source::Server);
        assert!(store.get(&CommentId::from("c9")).unwrap().deleted);
    }

    #[test]
    fn pending_vote_survives_server_update_until_confirmed() {
        let (store, _) = store();
        let c1 = top("c1");
        store.upsert(c1.clone().into(), Source::Server);
        let m = MutationId::new();
        let change = RankChange {
            from: Vote::None,
            to: Vote::Up,
        };
        let before = store.apply_rank_delta(&c1.id, change, Some(m)).unwrap();
        assert_eq!(before.rank.up, 0);

        // Server still has the old rank, but changed moderation status
        let mut stale = c1.clone();
        stale.status = api::ModerationStatus::Pending;
        store.upsert(stale.into(), Source::Server);
        let got = store.get(&c1.id).unwrap();
        assert_eq!(got.rank.up, 1);
        assert_eq!(got.rank.current_user_vote, Vote::Up);
        assert_eq!(got.status, api::ModerationStatus::Pending);

        // A confirmation for another mutation does not take the field either
        store.upsert(c1.clone().into(), Source::Confirmation(MutationId::new()));
        assert_eq!(store.get(&c1.id).unwrap().rank.up, 1);

        // The matching confirmation wins and releases the claim
        let mut confirmed = c1.clone();
        confirmed.rank.up = 7;
        confirmed.rank.current_user_vote = Vote::Up;
        store.upsert(confirmed.into(), Source::Confirmation(m));
        assert_eq!(store.get(&c1.id).unwrap().rank.up, 7);
        store.upsert(c1.clone().into(), Source::Server);
        assert_eq!(store.get(&c1.id).unwrap().rank.up, 0);
    }

    #[test]
    fn rollback_restores_claimed_fields_only() {
        let (store, _) = store();
        let c1 = top("c1");
        store.upsert(c1.clone().into(), Source::Server);
        let m = MutationId::new();
        let before = store
            .apply_local(&c1.id, Some(m), &[Field::Content], |c| {
                c.content = vec![Content::text("edited")];
                c.edited = true;
                true
            })
            .unwrap();
        let mut server = c1.clone();
        server.rank.down = 2;
        store.upsert(server.into(), Source::Server);
        store.rollback(m, &before);
        let got = store.get(&c1.id).unwrap();
        assert_eq!(got.text(), Some("c1"));
        assert!(!got.edited);
        assert_eq!(got.rank.down, 2);
    }

    #[test]
    fn rollback_of_delete_keeps_server_deletion() {
        let (store, _) = store();
        let c1 = top("c1");
        store.upsert(c1.clone().into(), Source::Server);
        let m = MutationId::new();
        let before = store
            .apply_local(&c1.id, Some(m), &[Field::Deleted], |c| {
                c.deleted = true;
                true
            })
            .unwrap();
        store.soft_delete(&c1.id);
        store.rollback(m, &before);
        assert!(store.get(&c1.id).unwrap().deleted);
    }

    #[test]
    fn refused_local_change_leaves_comment_untouched() {
        let (store, _) = store();
        let c1 = top("c1");
        store.upsert(c1.clone().into(), Source::Server);
        let res = store.apply_local(&c1.id, Some(MutationId::new()), &[Field::Rank], |c| {
            c.rank.up = 100;
            false
        });
        assert_eq!(res, None);
        assert_eq!(store.get(&c1.id).unwrap().rank.up, 0);
        assert_eq!(
            store.apply_rank_delta(
                &CommentId::from("nope"),
                RankChange {
                    from: Vote::None,
                    to: Vote::Up
                },
                None
            ),
            None
        );
    }

    #[test]
    fn rank_changes_follow_vote_transitions() {
        let mut rank = Rank {
            up: 3,
            down: 2,
            current_user_vote: Vote::None,
        };
        let mut step = |from, to| {
            RankChange { from, to }.apply(&mut rank);
            (rank.up, rank.down, rank.current_user_vote)
        };
        assert_eq!(step(Vote::None, Vote::Up), (4, 2, Vote::Up));
        assert_eq!(step(Vote::Up, Vote::Down), (3, 3, Vote::Down));
        assert_eq!(step(Vote::Down, Vote::None), (3, 2, Vote::None));
        assert_eq!(step(Vote::None, Vote::Down), (3, 3, Vote::Down));
        assert_eq!(step(Vote::Down, Vote::Up), (4, 2, Vote::Up));
        assert_eq!(step(Vote::Up, Vote::None), (3, 2, Vote::None));
    }

    #[test]
    fn orphan_waits_for_parent() {
        let (store, diag) = store();
        let c1 = top("c1");
        let c2 = reply(&c1, "c2");
        let c3 = reply(&c2, "c3");
        assert_eq!(store.upsert(c3.clone().into(), Source::Server), MergeResult::Buffered);
        assert_eq!(store.upsert(c2.clone().into(), Source::Server), MergeResult::Buffered);
        assert_eq!(store.upsert(c2.clone().into(), Source::Server), MergeResult::Unchanged);
        store.end_cycle();
        assert_eq!(store.orphan_count(), 2);
        assert_eq!(store.upsert(c1.clone().into(), Source::Server), MergeResult::Inserted);
        assert_eq!(store.orphan_count(), 0);
        assert_eq!(store.child_ids(&c1.id), vec![c2.id.clone()]);
        assert_eq!(store.child_ids(&c2.id), vec![c3.id.clone()]);
        assert!(diag.0.lock().is_empty());
    }

    #[test]
    fn orphan_is_dropped_after_bounded_wait() {
        let (store, diag) = store();
        let c1 = top("c1");
        let c2 = reply(&c1, "c2");
        store.upsert(c2.clone().into(), Source::Server);
        for _ in 0..4 {
            assert_eq!(store.end_cycle(), 0);
        }
        assert_eq!(store.end_cycle(), 1);
        assert_eq!(store.orphan_count(), 0);
        assert_eq!(
            *diag.0.lock(),
            vec![ReconciliationInconsistency::OrphanReplyDropped {
                comment_id: c2.id.clone(),
                parent_id: c1.id.clone(),
                cycles: 5,
            }]
        );

        // The parent showing up later does not resurrect it
        store.upsert(c1.clone().into(), Source::Server);
        assert!(store.children(&c1.id).is_empty());
    }

    #[test]
    fn identity_fields_do_not_move() {
        let (store, diag) = store();
        let c1 = top("c1");
        let c2 = top("c2");
        let c3 = reply(&c1, "c3");
        store.upsert(c1.into(), Source::Server);
        store.upsert(c2.clone().into(), Source::Server);
        store.upsert(c3.clone().into(), Source::Server);
        let mut moved = c3.clone();
        moved.parent_id = Some(c2.id.clone());
        moved.root_id = c2.id.clone();
        store.upsert(moved.into(), Source::Server);
        assert_eq!(store.get(&c3.id).unwrap().parent_id, c3.parent_id);
        assert_eq!(diag.0.lock().len(), 2);
        assert!(store.children(&c2.id).is_empty());
    }

    #[test]
    fn children_keep_arrival_order() {
        let (store, _) = store();
        let c1 = top("c1");
        store.upsert(c1.clone().into(), Source::Server);
        for id in ["r3", "r1", "r2"] {
            store.upsert(reply(&c1, id).into(), Source::Server);
        }
        let ids = store
            .children(&c1.id)
            .into_iter()
            .map(|c| c.id.0)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["r3", "r1", "r2"]);
    }

    #[test]
    fn concurrent_writers_keep_one_entry_per_comment() {
        let (store, diag) = store();
        let c1 = top("c1");
        let replies = (0..4)
            .map(|i| reply(&c1, &format!("r{i}")))
            .collect::<Vec<_>>();
        let up = RankChange {
            from: Vote::None,
            to: Vote::Up,
        };
        std::thread::scope(|s| {
            for t in 0..8 {
                let (store, c1, replies) = (&store, &c1, &replies);
                s.spawn(move || {
                    for i in 0..50 {
                        // Half the threads race the replies ahead of their parent
                        if t % 2 == 0 {
                            store.upsert(replies[i % 4].clone().into(), Source::Server);
                        }
                        store.upsert(c1.clone().into(), Source::Server);
                        store.upsert(replies[(i + t) % 4].clone().into(), Source::Server);
                        store.apply_rank_delta(&c1.id, up, None);
                        store.soft_delete(&c1.id);
                    }
                });
            }
        });

        assert_eq!(store.len(), 5);
        assert_eq!(store.orphan_count(), 0);
        let mut children = store.child_ids(&c1.id);
        assert_eq!(children.len(), 4);
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children.dedup();
        assert_eq!(children.len(), 4);
        assert!(store.get(&c1.id).unwrap().deleted);
        assert!(diag.0.lock().is_empty());
    }

    #[test]
    fn muting_covers_later_comments() {
        let (store, _) = store();
        let c1 = top("c1");
        store.upsert(c1.clone().into(), Source::Server);
        let m = MutationId::new();
        let snapshots = store.mute_author(&UserId::from("u1"), m);
        assert_eq!(snapshots.len(), 1);
        store.upsert(top("c2").into(), Source::Server);
        assert!(store.get(&CommentId::from("c2")).unwrap().muted);
        // Muted is local: server records never clear it
        store.upsert(c1.clone().into(), Source::Server);
        assert!(store.get(&c1.id).unwrap().muted);

        store.unmute_author(&UserId::from("u1"), m);
        assert!(!store.get(&c1.id).unwrap().muted);
        assert!(!store.get(&CommentId::from("c2")).unwrap().muted);
    }

    #[test]
    fn refused_mute_only_undoes_itself() {
        let (store, _) = store();
        let u1 = UserId::from("u1");
        let (accepted, refused) = (MutationId::new(), MutationId::new());
        store.upsert(top("c1").into(), Source::Server);
        store.mute_author(&u1, accepted);
        store.confirm_mute(&u1, accepted);

        assert!(store.mute_author(&u1, refused).is_empty());
        store.upsert(top("c2").into(), Source::Server);
        store.unmute_author(&u1, refused);
        for id in ["c1", "c2"] {
            assert!(store.get(&CommentId::from(id)).unwrap().muted, "{id} was unmuted");
        }
        store.upsert(top("c3").into(), Source::Server);
        assert!(store.get(&CommentId::from("c3")).unwrap().muted);

        // Once accepted, a stray rollback of the first mute has nothing left to undo
        store.unmute_author(&u1, accepted);
        assert!(store.get(&CommentId::from("c1")).unwrap().muted);
    }
}
