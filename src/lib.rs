//! Juggle - work items, sessions, and an autonomous agent loop
//!
//! Work items are grouped into sessions by tag. The agent loop repeatedly runs
//! a coding agent against a session, re-reading item state after each run,
//! until every item is complete or blocked.

pub mod agent;
pub mod domain;
pub mod error;
pub mod id;
pub mod prompt;
pub mod storage;

pub use error::{JuggleError, Result};
