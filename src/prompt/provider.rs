//! Prompt provider - builds the agent prompt for a session from current store
//! state on every call.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use super::render::PromptRenderer;
use crate::domain::{ItemState, Session, WorkItem};
use crate::error::{JuggleError, Result};
use crate::storage::{DEFAULT_STATE_DIR, ProjectStore, SessionCounts};

/// File under the state directory that replaces the built-in template.
pub const TEMPLATE_OVERRIDE_FILE: &str = "prompt.hbs";

const SESSION_TEMPLATE: &str = "session";

const DEFAULT_TEMPLATE: &str = r#"You are working through the "{{session.id}}" session of this project.
{{#if session.description}}

## Goal

{{session.description}}
{{/if}}
{{#if session.context}}

## Context

{{session.context}}
{{/if}}
{{#if session.acceptance_criteria}}

## Session acceptance criteria
{{#each session.acceptance_criteria}}
- {{this}}
{{/each}}
{{/if}}

## Work items ({{counts.complete}} complete, {{counts.blocked}} blocked, {{counts.total}} total)
{{#each items}}

### {{id}}: {{title}}
state: {{state}} | priority: {{priority}}
{{#if blocked_reason}}
blocked: {{blocked_reason}}
{{/if}}
{{#if completion_note}}
done: {{completion_note}}
{{/if}}
{{#each todos}}
- [{{#if done}}x{{else}} {{/if}}] {{text}}{{#if description}} ({{description}}){{/if}}
{{/each}}
{{#if acceptance_criteria}}
acceptance criteria:
{{#each acceptance_criteria}}
  - {{this}}
{{/each}}
{{/if}}
{{else}}

(no items are tagged with this session yet)
{{/each}}

## How to work

Pick the most important item that is not complete or blocked and finish it.
Record state changes with the juggle CLI:

- `juggle item start <id>`
- `juggle item complete <id> "<what you did>"`
- `juggle item block <id> "<why you are stuck>"`

When you stop, end your reply with exactly one signal:

- `<promise>CONTINUE</promise>` when you finished an item and others remain
- `<promise>COMPLETE</promise>` when every item is complete or blocked
- `<promise>BLOCKED: reason</promise>` when you cannot make progress at all
{{#if debug}}

## Debug

Before the signal, explain which item you chose, why, and what you verified.
{{/if}}
"#;

/// Produces the prompt for one loop iteration.
///
/// Implementations must reflect the current persisted item state; the loop
/// calls this every iteration and never caches.
#[async_trait]
pub trait PromptProvider: Send + Sync {
    async fn generate(&self, project_root: &Path, session_id: &str, debug: bool) -> Result<String>;
}

#[derive(Serialize)]
struct CountsView {
    complete: usize,
    blocked: usize,
    total: usize,
}

#[derive(Serialize)]
struct PromptContext<'a> {
    session: &'a Session,
    items: &'a [WorkItem],
    counts: CountsView,
    debug: bool,
}

/// Renders the session and its items through a Handlebars template.
pub struct SessionPromptProvider {
    state_dir: String,
    template: Option<String>,
}

impl Default for SessionPromptProvider {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}

impl SessionPromptProvider {
    /// Read state from `<project_root>/<state_dir>`.
    pub fn new(state_dir: impl Into<String>) -> Self {
        Self {
            state_dir: state_dir.into(),
            template: None,
        }
    }

    /// Use `template` instead of the built-in one.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Explicit template, then the project's override file, then the built-in.
    fn template_for(&self, project_root: &Path) -> Result<String> {
        if let Some(template) = &self.template {
            return Ok(template.clone());
        }
        let override_path = project_root.join(&self.state_dir).join(TEMPLATE_OVERRIDE_FILE);
        if override_path.exists() {
            log::debug!("Using prompt template {}", override_path.display());
            return std::fs::read_to_string(&override_path).map_err(|e| {
                JuggleError::Prompt(format!("Failed to read {}: {}", override_path.display(), e))
            });
        }
        Ok(DEFAULT_TEMPLATE.to_string())
    }

    /// Render a prompt from already-loaded state.
    pub fn render(&self, template: &str, session: &Session, items: &[WorkItem], debug: bool) -> Result<String> {
        let mut sorted = items.to_vec();
        sort_for_prompt(&mut sorted);
        let counts = SessionCounts::from_items(&sorted);

        let mut renderer = PromptRenderer::new();
        renderer.register_template(SESSION_TEMPLATE, template)?;
        renderer.render_named(
            SESSION_TEMPLATE,
            &PromptContext {
                session,
                items: &sorted,
                counts: CountsView {
                    complete: counts.complete,
                    blocked: counts.blocked,
                    total: counts.total,
                },
                debug,
            },
        )
    }
}

/// Active work first, then pending, blocked, complete; higher priority first.
fn sort_for_prompt(items: &mut [WorkItem]) {
    fn rank(state: ItemState) -> u8 {
        match state {
            ItemState::InProgress => 0,
            ItemState::Pending => 1,
            ItemState::Blocked => 2,
            ItemState::Complete => 3,
        }
    }
    items.sort_by(|a, b| {
        rank(a.state)
            .cmp(&rank(b.state))
            .then(b.priority.cmp(&a.priority))
            .then(a.created_at.cmp(&b.created_at))
    });
}

#[async_trait]
impl PromptProvider for SessionPromptProvider {
    async fn generate(&self, project_root: &Path, session_id: &str, debug: bool) -> Result<String> {
        let store = ProjectStore::open_in(project_root, &self.state_dir)?;
        let session = store.sessions().require(session_id)?;
        let items = store.items().find_by_session(session_id)?;
        let template = self.template_for(project_root)?;
        self.render(&template, &session, &items, debug)
    }
}
