//! Work item record and its lifecycle
//!
//! A WorkItem moves through Pending -> InProgress -> Complete, with Blocked as a
//! side state. Complete is final. The blocked reason exists only while Blocked,
//! and the completion note and timestamp exist only once Complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{JuggleError, Result};
use crate::id::generate_item_id;
use crate::storage::HasId;

/// Priority of a work item, ordered low to urgent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl std::str::FromStr for Priority {
    type Err = JuggleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(JuggleError::InvalidState(format!("unknown priority: {}", other))),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a work item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Not started yet
    #[default]
    Pending,
    /// Being worked on
    InProgress,
    /// Cannot proceed without outside help
    Blocked,
    /// Done, no further transitions
    Complete,
}

impl ItemState {
    /// Returns true if the agent loop should expect no further autonomous
    /// progress on an item in this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Complete | ItemState::Blocked)
    }
}

impl std::str::FromStr for ItemState {
    type Err = JuggleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "complete" => Ok(Self::Complete),
            other => Err(JuggleError::InvalidState(format!("unknown item state: {}", other))),
        }
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// A checklist entry inside a work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Todo {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
            description: None,
        }
    }
}

/// A single trackable unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    //=== Identity ===
    pub id: String,
    pub title: String,
    pub priority: Priority,

    //=== Lifecycle ===
    pub state: ItemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_note: Option<String>,

    //=== Grouping & detail ===
    /// Session ids this item belongs to, in display order
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub todos: Vec<Todo>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    //=== Timestamps ===
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl HasId for WorkItem {
    fn id(&self) -> &str {
        &self.id
    }
}

impl WorkItem {
    /// Create a new Pending item with a generated id
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        let now = Utc::now();
        Self {
            id: generate_item_id("item", &title),
            title,
            priority: Priority::default(),
            state: ItemState::Pending,
            blocked_reason: None,
            completion_note: None,
            tags: Vec::new(),
            todos: Vec::new(),
            acceptance_criteria: Vec::new(),
            created_at: now,
            started_at: None,
            last_activity: now,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.add_tag(tag);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Add a tag unless it is already present. Returns true if it was added.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if self.has_tag(&tag) {
            return false;
        }
        self.tags.push(tag);
        true
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn add_todo(&mut self, todo: Todo) {
        self.todos.push(todo);
        self.touch();
    }

    /// Flip the done flag of the todo at `index`
    pub fn toggle_todo(&mut self, index: usize) -> Result<bool> {
        let todo = self.todos.get_mut(index).ok_or_else(|| {
            JuggleError::InvalidState(format!("item {} has no todo #{}", self.id, index + 1))
        })?;
        todo.done = !todo.done;
        let done = todo.done;
        self.touch();
        Ok(done)
    }

    /// Pending -> InProgress
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            ItemState::Pending => {
                let now = Utc::now();
                self.state = ItemState::InProgress;
                self.started_at = Some(now);
                self.last_activity = now;
                Ok(())
            }
            other => Err(self.reject("start", other)),
        }
    }

    /// Pending | InProgress -> Blocked
    pub fn block(&mut self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(JuggleError::InvalidTransition(
                "a blocked reason is required".to_string(),
            ));
        }
        match self.state {
            ItemState::Pending | ItemState::InProgress => {
                self.state = ItemState::Blocked;
                self.blocked_reason = Some(reason);
                self.touch();
                Ok(())
            }
            other => Err(self.reject("block", other)),
        }
    }

    /// Blocked -> InProgress
    pub fn unblock(&mut self) -> Result<()> {
        match self.state {
            ItemState::Blocked => {
                self.state = ItemState::InProgress;
                self.blocked_reason = None;
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
                self.touch();
                Ok(())
            }
            other => Err(self.reject("unblock", other)),
        }
    }

    /// Pending | InProgress | Blocked -> Complete
    pub fn complete(&mut self, note: impl Into<String>) -> Result<()> {
        let note = note.into();
        if note.trim().is_empty() {
            return Err(JuggleError::InvalidTransition(
                "a completion note is required".to_string(),
            ));
        }
        match self.state {
            ItemState::Pending | ItemState::InProgress | ItemState::Blocked => {
                let now = Utc::now();
                self.state = ItemState::Complete;
                self.blocked_reason = None;
                self.completion_note = Some(note);
                self.completed_at = Some(now);
                self.last_activity = now;
                Ok(())
            }
            other => Err(self.reject("complete", other)),
        }
    }

    /// Verify that reason/note/timestamp fields agree with the state
    pub fn check_invariants(&self) -> Result<()> {
        let complete = self.state == ItemState::Complete;
        let blocked = self.state == ItemState::Blocked;

        if complete != self.completion_note.is_some() {
            return Err(self.inconsistent("completion note"));
        }
        if complete != self.completed_at.is_some() {
            return Err(self.inconsistent("completed timestamp"));
        }
        if blocked != self.blocked_reason.is_some() {
            return Err(self.inconsistent("blocked reason"));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    fn reject(&self, action: &str, from: ItemState) -> JuggleError {
        JuggleError::InvalidTransition(format!("cannot {} item {} while {}", action, self.id, from))
    }

    fn inconsistent(&self, field: &str) -> JuggleError {
        JuggleError::InvalidState(format!("item {} is {} but {} disagrees", self.id, self.state, field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_pending() {
        let item = WorkItem::new("Add login form");
        assert_eq!(item.state, ItemState::Pending);
        assert_eq!(item.priority, Priority::Medium);
        assert!(item.id.starts_with("item-"));
        assert!(item.check_invariants().is_ok());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert!(Priority::High < Priority::Urgent);
        assert_eq!("URGENT".parse::<Priority>().unwrap(), Priority::Urgent);
        assert!("whenever".parse::<Priority>().is_err());
    }

    #[test]
    fn test_terminal_predicate() {
        assert!(!ItemState::Pending.is_terminal());
        assert!(!ItemState::InProgress.is_terminal());
        assert!(ItemState::Blocked.is_terminal());
        assert!(ItemState::Complete.is_terminal());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut item = WorkItem::new("Wire up storage");

        item.start().unwrap();
        assert_eq!(item.state, ItemState::InProgress);
        assert!(item.started_at.is_some());

        item.block("waiting on schema review").unwrap();
        assert_eq!(item.state, ItemState::Blocked);
        assert_eq!(item.blocked_reason.as_deref(), Some("waiting on schema review"));
        item.check_invariants().unwrap();

        item.unblock().unwrap();
        assert_eq!(item.state, ItemState::InProgress);
        assert!(item.blocked_reason.is_none());

        item.complete("merged in #42").unwrap();
        assert_eq!(item.state, ItemState::Complete);
        assert!(item.completed_at.is_some());
        item.check_invariants().unwrap();
    }

    #[test]
    fn test_complete_is_final() {
        let mut item = WorkItem::new("Done already");
        item.complete("shipped").unwrap();

        assert!(matches!(item.start(), Err(JuggleError::InvalidTransition(_))));
        assert!(matches!(item.block("late"), Err(JuggleError::InvalidTransition(_))));
        assert!(matches!(item.unblock(), Err(JuggleError::InvalidTransition(_))));
        assert!(matches!(item.complete("again"), Err(JuggleError::InvalidTransition(_))));
        assert_eq!(item.completion_note.as_deref(), Some("shipped"));
    }

    #[test]
    fn test_block_requires_reason() {
        let mut item = WorkItem::new("x");
        assert!(item.block("   ").is_err());
        assert_eq!(item.state, ItemState::Pending);
    }

    #[test]
    fn test_complete_requires_note() {
        let mut item = WorkItem::new("x");
        assert!(item.complete("").is_err());
        assert_eq!(item.state, ItemState::Pending);
    }

    #[test]
    fn test_complete_from_blocked_clears_reason() {
        let mut item = WorkItem::new("x");
        item.block("flaky CI").unwrap();
        item.complete("fixed upstream").unwrap();
        assert!(item.blocked_reason.is_none());
        item.check_invariants().unwrap();
    }

    #[test]
    fn test_start_only_from_pending() {
        let mut item = WorkItem::new("x");
        item.start().unwrap();
        assert!(item.start().is_err());
    }

    #[test]
    fn test_check_invariants_detects_drift() {
        let mut item = WorkItem::new("x");
        item.completion_note = Some("sneaky".to_string());
        assert!(matches!(item.check_invariants(), Err(JuggleError::InvalidState(_))));

        let mut item = WorkItem::new("y");
        item.state = ItemState::Blocked;
        assert!(item.check_invariants().is_err());
    }

    #[test]
    fn test_tags_are_deduplicated() {
        let mut item = WorkItem::new("x").with_tag("auth");
        assert!(!item.add_tag("auth"));
        assert!(item.add_tag("billing"));
        assert_eq!(item.tags, vec!["auth", "billing"]);
        assert!(item.has_tag("billing"));
    }

    #[test]
    fn test_state_parse_matches_display() {
        for state in [ItemState::Pending, ItemState::InProgress, ItemState::Blocked, ItemState::Complete] {
            assert_eq!(state.to_string().parse::<ItemState>().unwrap(), state);
        }
        assert_eq!("In-Progress".parse::<ItemState>().unwrap(), ItemState::InProgress);
        assert!("dropped".parse::<ItemState>().is_err());
    }

    #[test]
    fn test_toggle_todo() {
        let mut item = WorkItem::new("x");
        item.add_todo(Todo::new("write tests"));
        assert!(item.toggle_todo(0).unwrap());
        assert!(!item.toggle_todo(0).unwrap());
        assert!(item.toggle_todo(3).is_err());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&ItemState::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
