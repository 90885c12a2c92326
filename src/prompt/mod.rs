//! Prompt System - per-iteration prompt generation
//!
//! The agent loop asks a `PromptProvider` for a fresh prompt every iteration.
//! The default provider renders the session and its items with Handlebars.

mod provider;
mod render;

pub use provider::{PromptProvider, SessionPromptProvider, TEMPLATE_OVERRIDE_FILE};
pub use render::PromptRenderer;
