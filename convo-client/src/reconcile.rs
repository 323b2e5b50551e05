use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;

use crate::{
    api::{self, CommentId, PageResponse, RealtimeDelta},
    Comment, CommentStore, MergeResult, MutationTarget, PendingMutation, Source,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PageKind {
    /// Replaces the top-level order
    First,

    /// Appends to the top-level order
    Next,

    /// More replies to this comment, the top-level order is untouched
    Replies(CommentId),
}

#[derive(Debug, Default)]
struct Order {
    /// Top-level comments received through pages, in server order
    paged: Vec<CommentId>,

    /// Top-level comments received through realtime, newest first
    arrived: Vec<CommentId>,

    listed: HashSet<CommentId>,
}

impl Order {
    fn clear(&mut self) {
        self.paged.clear();
        self.arrived.clear();
        self.listed.clear();
    }
}

/// What one call did to the store
#[derive(Debug, Default)]
struct Cycle {
    changed: bool,
    buffered: bool,
}

impl Cycle {
    fn record(&mut self, r: MergeResult) {
        match r {
            MergeResult::Inserted | MergeResult::Updated => self.changed = true,
            MergeResult::Buffered => self.buffered = true,
            MergeResult::Unchanged => (),
        }
    }
}

/// Single entry point for everything that changes the store on the server's behalf
///
/// Every call that changes or buffers something ends one reconciliation cycle of the
/// store, which is what ages the buffered orphan replies. A call that does nothing
/// leaves their age alone.
pub struct ReconciliationEngine {
    store: Arc<CommentStore>,
    order: Mutex<Order>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<CommentStore>) -> ReconciliationEngine {
        ReconciliationEngine {
            store,
            order: Mutex::new(Order::default()),
        }
    }

    pub fn store(&self) -> &Arc<CommentStore> {
        &self.store
    }

    fn upsert_tree(&self, c: &api::Comment, source: Source, cycle: &mut Cycle) {
        for c in c.clone().flatten() {
            cycle.record(self.store.upsert(Comment::from(c), source));
        }
    }

    fn finish(&self, cycle: Cycle) -> bool {
        if cycle.changed || cycle.buffered {
            self.store.end_cycle();
        }
        cycle.changed
    }

    pub fn apply_page(&self, kind: &PageKind, page: &PageResponse) -> bool {
        let mut cycle = Cycle::default();
        let mut order = self.order.lock();
        if *kind == PageKind::First {
            cycle.changed = !order.listed.is_empty();
            order.clear();
        }
        for c in &page.comments {
            self.upsert_tree(c, Source::Server, &mut cycle);
            if *kind != PageKind::First && *kind != PageKind::Next {
                continue;
            }
            if !c.is_reply() && order.listed.insert(c.id.clone()) {
                order.paged.push(c.id.clone());
                cycle.changed = true;
            }
        }
        drop(order);
        self.finish(cycle)
    }

    /// Returns whether the delta changed anything, so applying the same delta a second
    /// time returns `false`
    pub fn apply_delta(&self, delta: &RealtimeDelta) -> bool {
        let mut cycle = Cycle::default();
        let mut order = self.order.lock();
        for id in &delta.deleted_comment_ids {
            cycle.record(self.store.soft_delete(id));
        }
        for c in delta.updated_comments.values() {
            self.upsert_tree(c, Source::Server, &mut cycle);
        }
        for c in &delta.new_comments {
            self.upsert_tree(c, Source::Server, &mut cycle);
            if !c.is_reply() && order.listed.insert(c.id.clone()) {
                order.arrived.insert(0, c.id.clone());
                cycle.changed = true;
            }
        }
        drop(order);
        self.finish(cycle)
    }

    /// Settles a mutation the server accepted, with the record it answered if any
    pub fn apply_mutation_confirmation(
        &self,
        mutation: &PendingMutation,
        server: Option<api::Comment>,
    ) {
        let mut cycle = Cycle::default();
        if let Some(c) = server {
            self.upsert_tree(&c, Source::Confirmation(mutation.id), &mut cycle);
        }
        let ids = mutation
            .applied_snapshot
            .iter()
            .map(|c| c.id.clone())
            .collect::<Vec<_>>();
        self.store.release(&ids, mutation.id);
        if let MutationTarget::User(user) = &mutation.target {
            self.store.confirm_mute(user, mutation.id);
        }
        self.finish(cycle);
    }

    /// Top-level comment ids in display order: realtime arrivals, then pages
    pub fn top_level_ids(&self) -> Vec<CommentId> {
        let order = self.order.lock();
        order
            .arrived
            .iter()
            .chain(order.paged.iter())
            .cloned()
            .collect()
    }

    fn push_thread(&self, id: &CommentId, out: &mut Vec<Comment>) {
        let c = match self.store.get(id) {
            Some(c) => c,
            None => return,
        };
        if c.muted {
            return;
        }
        out.push(c);
        for child in self.store.child_ids(id) {
            self.push_thread(&child, out);
        }
    }

    /// Each displayed top-level comment followed by its known replies, depth-first
    ///
    /// Comments of muted authors are hidden with their replies; deleted comments stay
    /// in place.
    pub fn visible_threads(&self) -> Vec<Vec<Comment>> {
        self.top_level_ids()
            .iter()
            .map(|id| {
                let mut thread = Vec::new();
                self.push_thread(id, &mut thread);
                thread
            })
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn visible_comments(&self) -> Vec<Comment> {
        self.visible_threads().into_iter().flatten().collect()
    }

    pub fn newly_arrived(&self) -> Vec<Comment> {
        let ids = self.order.lock().arrived.clone();
        ids.iter().filter_map(|id| self.store.get(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::{ConversationId, UserId},
        TracingDiagnostics,
    };

    fn engine() -> ReconciliationEngine {
        let store = CommentStore::new(ConversationId::from("p1"), 5, Arc::new(TracingDiagnostics));
        ReconciliationEngine::new(Arc::new(store))
    }

    fn top(id: &str) -> api::Comment {
        api::Comment::new_top_level(CommentId::from(id), UserId::from("u1"), id)
    }

    fn page(comments: Vec<api::Comment>, offset: u32) -> PageResponse {
        PageResponse {
            comments,
            offset,
            has_next: true,
            messages_count: 0,
            read_only: false,
        }
    }

    fn delta() -> RealtimeDelta {
        RealtimeDelta {
            conversation_id: ConversationId::from("p1"),
            ..RealtimeDelta::default()
        }
    }

    fn ids(comments: Vec<Comment>) -> Vec<String> {
        comments.into_iter().map(|c| c.id.0).collect()
    }

    #[test]
    fn realtime_arrivals_do_not_shift_pages() {
        let e = engine();
        let (a, b, c, d, f) = (top("a"), top("b"), top("c"), top("d"), top("f"));
        e.apply_page(&PageKind::First, &page(vec![a, b, c], 3));
        let mut dl = delta();
        dl.new_comments.push(d.clone());
        e.apply_delta(&dl);
        assert_eq!(ids(e.visible_comments()), vec!["d", "a", "b", "c"]);
        assert_eq!(ids(e.newly_arrived()), vec!["d"]);

        // The next page was computed server-side without knowing we already have d
        e.apply_page(&PageKind::Next, &page(vec![d, f], 5));
        assert_eq!(ids(e.visible_comments()), vec!["d", "a", "b", "c", "f"]);
    }

    #[test]
    fn newest_arrival_comes_first() {
        let e = engine();
        e.apply_page(&PageKind::First, &page(vec![top("a")], 1));
        let mut dl = delta();
        dl.new_comments = vec![top("x"), top("y")];
        e.apply_delta(&dl);
        assert_eq!(ids(e.visible_comments()), vec!["y", "x", "a"]);
    }

    #[test]
    fn applying_a_delta_twice_is_a_no_op() {
        let e = engine();
        let c1 = top("c1");
        let c2 = top("c2");
        e.apply_page(&PageKind::First, &page(vec![c1.clone(), c2.clone()], 2));
        let mut dl = delta();
        dl.new_comments.push(api::Comment::new_reply(
            &c1,
            CommentId::from("c3"),
            UserId::from("u2"),
            "hi",
        ));
        dl.new_comments.push(top("c4"));
        let mut c1b = c1.clone();
        c1b.rank.up = 2;
        dl.updated_comments.insert(c1b.id.clone(), c1b);
        dl.deleted_comment_ids.insert(c2.id.clone());
        dl.deleted_comment_ids.insert(CommentId::from("unknown"));

        assert!(e.apply_delta(&dl));
        let visible = e.visible_comments();
        assert!(!e.apply_delta(&dl));
        assert_eq!(e.visible_comments(), visible);
        assert_eq!(ids(visible), vec!["c4", "c1", "c3", "c2"]);
    }

    #[test]
    fn reapplied_delta_does_not_age_orphans() {
        let e = engine();
        let c1 = top("c1");
        let mut dl = delta();
        dl.new_comments.push(api::Comment::new_reply(
            &c1,
            CommentId::from("r1"),
            UserId::from("u2"),
            "early",
        ));
        for _ in 0..10 {
            e.apply_delta(&dl);
        }
        assert_eq!(e.store().orphan_count(), 1);

        // Only cycles that bring something count toward the bounded wait
        for i in 0..3 {
            let mut other = delta();
            other.new_comments.push(top(&format!("t{i}")));
            assert!(e.apply_delta(&other));
            assert_eq!(e.store().orphan_count(), 1);
        }
        let mut other = delta();
        other.new_comments.push(top("t3"));
        e.apply_delta(&other);
        assert_eq!(e.store().orphan_count(), 0);
    }

    #[test]
    fn stale_rank_update_after_delete_keeps_deleted() {
        let e = engine();
        let c1 = top("c1");
        e.apply_page(&PageKind::First, &page(vec![c1.clone()], 1));
        let mut del = delta();
        del.deleted_comment_ids.insert(c1.id.clone());
        e.apply_delta(&del);

        let mut stale = c1.clone();
        stale.rank.up = 3;
        let mut upd = delta();
        upd.updated_comments.insert(stale.id.clone(), stale);
        e.apply_delta(&upd);

        let got = e.store().get(&c1.id).unwrap();
        assert!(got.deleted);
        assert_eq!(got.rank.up, 3);
    }

    #[test]
    fn deletions_apply_before_inserts_in_one_delta() {
        let e = engine();
        let mut dl = delta();
        dl.deleted_comment_ids.insert(CommentId::from("n1"));
        dl.new_comments.push(top("n1"));
        e.apply_delta(&dl);
        assert!(e.store().get(&CommentId::from("n1")).unwrap().deleted);
    }

    #[test]
    fn scenario_reply_and_delete() {
        let e = engine();
        let c1 = top("c1");
        let c2 = top("c2");
        e.apply_page(&PageKind::First, &page(vec![c1.clone(), c2.clone()], 2));

        let mut dl = delta();
        dl.new_comments.push(api::Comment::new_reply(
            &c1,
            CommentId::from("c3"),
            UserId::from("u2"),
            "reply",
        ));
        e.apply_delta(&dl);
        assert_eq!(ids(e.store().children(&c1.id)), vec!["c3"]);
        assert!(e.newly_arrived().is_empty());

        let mut dl = delta();
        dl.deleted_comment_ids.insert(c2.id.clone());
        e.apply_delta(&dl);
        assert!(e.store().get(&c2.id).unwrap().deleted);
        assert_eq!(ids(e.visible_comments()), vec!["c1", "c3", "c2"]);
    }

    #[test]
    fn first_page_replaces_order_and_reply_pages_do_not_touch_it() {
        let e = engine();
        let c1 = top("c1");
        let c2 = top("c2");
        e.apply_page(&PageKind::First, &page(vec![c1.clone(), c2.clone()], 2));
        e.apply_page(&PageKind::First, &page(vec![c2.clone(), c1.clone()], 2));
        assert_eq!(e.top_level_ids(), vec![c2.id.clone(), c1.id.clone()]);

        let r = api::Comment::new_reply(&c1, CommentId::from("r1"), UserId::from("u2"), "r");
        e.apply_page(&PageKind::Replies(c1.id.clone()), &page(vec![r], 1));
        assert_eq!(e.top_level_ids().len(), 2);
        assert_eq!(ids(e.visible_comments()), vec!["c2", "c1", "r1"]);
    }

    #[test]
    fn inlined_replies_are_stored() {
        let e = engine();
        let mut c1 = top("c1");
        let r1 = api::Comment::new_reply(&c1, CommentId::from("r1"), UserId::from("u2"), "r");
        let r2 = api::Comment::new_reply(&r1, CommentId::from("r2"), UserId::from("u3"), "r");
        let mut r1 = r1;
        r1.replies.push(r2);
        c1.replies.push(r1);
        e.apply_page(&PageKind::First, &page(vec![c1], 1));
        assert_eq!(ids(e.visible_comments()), vec!["c1", "r1", "r2"]);
    }
}
