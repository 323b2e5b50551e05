#![cfg(test)]

use std::{cmp, collections::HashSet, ops::RangeTo, sync::Arc};

use crate::{
    api::{self, CommentId, ConversationId, PageResponse, RealtimeDelta, UserId},
    CommentStore, PageKind, ReconciliationEngine, TracingDiagnostics,
};

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    /// Top-level comment arriving through a page
    Page { count: u8 },

    /// Top-level comment arriving through realtime
    Arrive,

    /// Reply to an existing (or not yet existing) comment
    Reply { parent: usize, through_page: bool },

    Delete { target: usize },

    Rank { target: usize, up: u8 },
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end);
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1))
}

struct Fuzzer {
    engine: ReconciliationEngine,

    /// Every comment ever generated, by creation order
    known: Vec<api::Comment>,
    deleted: HashSet<CommentId>,
}

impl Fuzzer {
    fn new() -> Fuzzer {
        let store = CommentStore::new(ConversationId::from("p1"), 3, Arc::new(TracingDiagnostics));
        Fuzzer {
            engine: ReconciliationEngine::new(Arc::new(store)),
            known: Vec::new(),
            deleted: HashSet::new(),
        }
    }

    fn delta(&self) -> RealtimeDelta {
        RealtimeDelta {
            conversation_id: ConversationId::from("p1"),
            ..RealtimeDelta::default()
        }
    }

    fn new_top(&mut self) -> api::Comment {
        let id = CommentId(format!("c{}", self.known.len()));
        let c = api::Comment::new_top_level(id, UserId::from("u1"), "fuzz");
        self.known.push(c.clone());
        c
    }

    /// Applies the delta twice and checks the second time changes nothing
    fn apply_delta(&self, delta: RealtimeDelta) {
        self.engine.apply_delta(&delta);
        let visible = self.engine.visible_comments();
        let orphans = self.engine.store().orphan_count();
        assert!(
            !self.engine.apply_delta(&delta),
            "re-applying {delta:?} changed something"
        );
        assert_eq!(self.engine.visible_comments(), visible);
        assert_eq!(self.engine.store().orphan_count(), orphans);
    }

    fn execute(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::Page { count } => {
                let comments = (0..count % 4).map(|_| self.new_top()).collect();
                let page = PageResponse {
                    comments,
                    offset: 0,
                    has_next: true,
                    messages_count: 0,
                    read_only: false,
                };
                self.engine.apply_page(&PageKind::Next, &page);
            }
            FuzzOp::Arrive => {
                let mut delta = self.delta();
                delta.new_comments.push(self.new_top());
                self.apply_delta(delta);
            }
            FuzzOp::Reply {
                parent,
                through_page,
            } => {
                let parent = match resize_int(parent, ..self.known.len()) {
                    Some(p) => self.known[p].clone(),
                    None => return,
                };
                let id = CommentId(format!("c{}", self.known.len()));
                let c = api::Comment::new_reply(&parent, id, UserId::from("u2"), "fuzz");
                self.known.push(c.clone());
                match through_page {
                    true => {
                        let page = PageResponse {
                            comments: vec![c],
                            offset: 0,
                            has_next: false,
                            messages_count: 0,
                            read_only: false,
                        };
                        self.engine
                            .apply_page(&PageKind::Replies(parent.id.clone()), &page);
                    }
                    false => {
                        let mut delta = self.delta();
                        delta.new_comments.push(c);
                        self.apply_delta(delta);
                    }
                }
            }
            FuzzOp::Delete { target } => {
                if let Some(t) = resize_int(target, ..self.known.len()) {
                    let id = self.known[t].id.clone();
                    self.deleted.insert(id.clone());
                    let mut delta = self.delta();
                    delta.deleted_comment_ids.insert(id);
                    self.apply_delta(delta);
                }
            }
            FuzzOp::Rank { target, up } => {
                if let Some(t) = resize_int(target, ..self.known.len()) {
                    let mut c = self.known[t].clone();
                    c.rank.up = u32::from(up);
                    let mut delta = self.delta();
                    delta.updated_comments.insert(c.id.clone(), c);
                    self.apply_delta(delta);
                }
            }
        }
        self.check_invariants();
    }

    fn check_invariants(&self) {
        let store = self.engine.store();
        let visible = self.engine.visible_comments();
        let mut seen = HashSet::new();
        for c in &visible {
            assert!(seen.insert(c.id.clone()), "{} is displayed twice", c.id);
        }
        for c in &self.known {
            if let Some(got) = store.get(&c.id) {
                assert_eq!(got.parent_id, c.parent_id);
                assert_eq!(got.root_id, c.root_id);
                assert_eq!(got.depth, c.depth);
                if self.deleted.contains(&c.id) {
                    assert!(got.deleted, "{} came back from the dead", c.id);
                }
                if let Some(p) = &c.parent_id {
                    assert!(store.contains(p), "{} is stored without its parent", c.id);
                }
            }
        }
    }
}

#[test]
fn reconciliation_keeps_invariants() {
    bolero::check!()
        .with_generator(bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..100usize))
        .cloned()
        .for_each(|ops: Vec<FuzzOp>| {
            let mut fuzzer = Fuzzer::new();
            for op in ops {
                fuzzer.execute(op);
            }
        });
}
