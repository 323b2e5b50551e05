use std::collections::HashMap;

use parking_lot::RwLock;

use crate::api::{ConversationId, SortMode};

/// Active sort mode of each conversation
///
/// Changing the mode is what triggers a full re-fetch of a conversation; the dictate
/// itself never touches any comment.
#[derive(Debug, Default)]
pub struct SortDictate {
    modes: RwLock<HashMap<ConversationId, SortMode>>,
}

impl SortDictate {
    pub fn new() -> SortDictate {
        SortDictate::default()
    }

    /// Returns whether the mode actually changed
    pub fn set_sort_mode(&self, conversation: &ConversationId, mode: SortMode) -> bool {
        let mut modes = self.modes.write();
        let previous = modes.insert(conversation.clone(), mode).unwrap_or_default();
        previous != mode
    }

    pub fn current_sort_mode(&self, conversation: &ConversationId) -> SortMode {
        self.modes
            .read()
            .get(conversation)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_best_and_reports_changes() {
        let d = SortDictate::new();
        let p1 = ConversationId::from("p1");
        assert_eq!(d.current_sort_mode(&p1), SortMode::Best);
        assert!(!d.set_sort_mode(&p1, SortMode::Best));
        assert!(d.set_sort_mode(&p1, SortMode::Newest));
        assert!(!d.set_sort_mode(&p1, SortMode::Newest));
        assert_eq!(d.current_sort_mode(&p1), SortMode::Newest);
        assert_eq!(d.current_sort_mode(&ConversationId::from("p2")), SortMode::Best);
    }
}
