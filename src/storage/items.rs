//! Work-item storage helpers.

use super::traits::{Filter, Storage};
use crate::domain::{ItemState, WorkItem};
use crate::error::{JuggleError, Result};

/// Collection name for work items.
pub const ITEMS_COLLECTION: &str = "items";

/// Terminal/complete/blocked/total tallies for a set of items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounts {
    /// Complete or Blocked
    pub terminal: usize,
    pub complete: usize,
    pub blocked: usize,
    pub total: usize,
}

impl SessionCounts {
    /// Tally the given items.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a WorkItem>) -> Self {
        items.into_iter().fold(Self::default(), |mut counts, item| {
            counts.total += 1;
            match item.state {
                ItemState::Complete => counts.complete += 1,
                ItemState::Blocked => counts.blocked += 1,
                _ => {}
            }
            if item.is_terminal() {
                counts.terminal += 1;
            }
            counts
        })
    }

    /// True when there is at least one item and every item is terminal.
    pub fn all_terminal(&self) -> bool {
        self.total > 0 && self.terminal == self.total
    }
}

/// Helper for item-specific queries.
pub struct ItemStore<'a, S: Storage> {
    storage: &'a S,
}

impl<'a, S: Storage> ItemStore<'a, S> {
    /// Create a new ItemStore wrapping the given storage.
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    /// Items linked to a session (tag match).
    pub fn find_by_session(&self, session_id: &str) -> Result<Vec<WorkItem>> {
        self.storage
            .query(ITEMS_COLLECTION, &[Filter::contains("tags", session_id)])
    }

    /// Items in a given lifecycle state.
    pub fn find_by_state(&self, state: ItemState) -> Result<Vec<WorkItem>> {
        self.storage
            .query(ITEMS_COLLECTION, &[Filter::eq("state", state)])
    }

    /// Tally a session's items.
    pub fn counts_for_session(&self, session_id: &str) -> Result<SessionCounts> {
        Ok(SessionCounts::from_items(&self.find_by_session(session_id)?))
    }

    /// List all items.
    pub fn list_all(&self) -> Result<Vec<WorkItem>> {
        self.storage.list(ITEMS_COLLECTION)
    }

    pub fn get(&self, id: &str) -> Result<Option<WorkItem>> {
        self.storage.get(ITEMS_COLLECTION, id)
    }

    /// Get an item or fail with `ItemNotFound`.
    pub fn require(&self, id: &str) -> Result<WorkItem> {
        self.get(id)?
            .ok_or_else(|| JuggleError::ItemNotFound(id.to_string()))
    }

    pub fn create(&self, item: &WorkItem) -> Result<()> {
        item.check_invariants()?;
        self.storage.create(ITEMS_COLLECTION, item)
    }

    pub fn update(&self, item: &WorkItem) -> Result<()> {
        item.check_invariants()?;
        self.storage.update(ITEMS_COLLECTION, item)
    }

    /// Load an item, apply `f`, and persist it.
    pub fn modify(&self, id: &str, f: impl FnOnce(&mut WorkItem) -> Result<()>) -> Result<WorkItem> {
        let mut item = self.require(id)?;
        f(&mut item)?;
        self.update(&item)?;
        Ok(item)
    }

    /// Forget cached items so the next read hits disk.
    pub fn refresh(&self) -> Result<()> {
        self.storage.invalidate(ITEMS_COLLECTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonlStorage;
    use tempfile::TempDir;

    fn create_test_storage() -> (JsonlStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = JsonlStorage::new(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_find_by_session_uses_tags() {
        let (storage, _temp) = create_test_storage();
        let items = ItemStore::new(&storage);

        items.create(&WorkItem::new("a").with_tag("auth")).unwrap();
        items.create(&WorkItem::new("b").with_tag("billing")).unwrap();
        items.create(&WorkItem::new("c").with_tag("billing").with_tag("auth")).unwrap();

        let auth = items.find_by_session("auth").unwrap();
        let titles: Vec<&str> = auth.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "c"]);
    }

    #[test]
    fn test_counts_treat_blocked_as_terminal() {
        let (storage, _temp) = create_test_storage();
        let items = ItemStore::new(&storage);

        let mut done = WorkItem::new("done").with_tag("s");
        done.complete("ok").unwrap();
        let mut stuck = WorkItem::new("stuck").with_tag("s");
        stuck.block("needs creds").unwrap();
        let open = WorkItem::new("open").with_tag("s");

        for item in [&done, &stuck, &open] {
            items.create(item).unwrap();
        }

        let counts = items.counts_for_session("s").unwrap();
        assert_eq!(
            counts,
            SessionCounts {
                terminal: 2,
                complete: 1,
                blocked: 1,
                total: 3
            }
        );
        assert!(!counts.all_terminal());
    }

    #[test]
    fn test_all_terminal_requires_items() {
        assert!(!SessionCounts::default().all_terminal());
        let counts = SessionCounts {
            terminal: 2,
            complete: 1,
            blocked: 1,
            total: 2,
        };
        assert!(counts.all_terminal());
    }

    #[test]
    fn test_modify_persists_transition() {
        let (storage, _temp) = create_test_storage();
        let items = ItemStore::new(&storage);
        let item = WorkItem::new("x");
        items.create(&item).unwrap();

        items.modify(&item.id, |i| i.start()).unwrap();
        assert_eq!(items.require(&item.id).unwrap().state, ItemState::InProgress);

        let in_progress = items.find_by_state(ItemState::InProgress).unwrap();
        assert_eq!(in_progress.len(), 1);
    }

    #[test]
    fn test_modify_rejected_transition_not_saved() {
        let (storage, _temp) = create_test_storage();
        let items = ItemStore::new(&storage);
        let item = WorkItem::new("x");
        items.create(&item).unwrap();

        assert!(items.modify(&item.id, |i| i.unblock()).is_err());
        assert_eq!(items.require(&item.id).unwrap().state, ItemState::Pending);
    }

    #[test]
    fn test_require_missing() {
        let (storage, _temp) = create_test_storage();
        let items = ItemStore::new(&storage);
        assert!(matches!(items.require("item-nope"), Err(JuggleError::ItemNotFound(_))));
    }

    #[test]
    fn test_update_rejects_inconsistent_item() {
        let (storage, _temp) = create_test_storage();
        let items = ItemStore::new(&storage);
        let mut item = WorkItem::new("x");
        items.create(&item).unwrap();

        item.state = ItemState::Complete;
        assert!(matches!(items.update(&item), Err(JuggleError::InvalidState(_))));
    }
}
