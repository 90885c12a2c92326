//! Domain types for Juggle
//!
//! This module contains all core domain types:
//! - WorkItem: a trackable unit of work and its lifecycle
//! - Session: a tag-identified grouping of work items
//! - LoopOutcome: how an agent loop run ended

pub mod item;
pub mod outcome;
pub mod session;

pub use item::{ItemState, Priority, Todo, WorkItem};
pub use outcome::LoopOutcome;
pub use session::{ModelSize, Session};
