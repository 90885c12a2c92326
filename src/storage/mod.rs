//! Storage layer for Juggle - JSONL persistence with in-memory caching.
//!
//! Work items and sessions live in JSONL collections under the project's
//! `.juggle` directory. `ProjectStore` ties them together with the per-session
//! progress log and output artifact the agent loop writes.

mod items;
mod jsonl;
mod project;
mod sessions;
mod traits;

pub use items::{ITEMS_COLLECTION, ItemStore, SessionCounts};
pub use jsonl::JsonlStorage;
pub use project::{DEFAULT_STATE_DIR, LoopStore, ProjectStore};
pub use sessions::{SESSIONS_COLLECTION, SessionStore};
pub use traits::{Filter, FilterOp, HasId, Storage};
