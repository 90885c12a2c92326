//! Session record
//!
//! A session groups work items by tag: every item whose tags contain the
//! session id belongs to it. The link is derived at query time, never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{JuggleError, Result};
use crate::storage::HasId;

/// Preferred model size for agent runs in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// Model alias understood by the agent CLI
    pub fn model_name(&self) -> &'static str {
        match self {
            ModelSize::Small => "haiku",
            ModelSize::Medium => "sonnet",
            ModelSize::Large => "opus",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = JuggleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "small" | "s" => Ok(Self::Small),
            "medium" | "m" => Ok(Self::Medium),
            "large" | "l" => Ok(Self::Large),
            other => Err(JuggleError::InvalidState(format!("unknown model size: {}", other))),
        }
    }
}

/// A named grouping of work items sharing context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique id, also the tag that links items to this session
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Free-text background handed to the agent
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<ModelSize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HasId for Session {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Session {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: description.into(),
            context: String::new(),
            acceptance_criteria: Vec::new(),
            default_model: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_model(mut self, model: ModelSize) -> Self {
        self.default_model = Some(model);
        self
    }

    pub fn add_criterion(&mut self, criterion: impl Into<String>) {
        self.acceptance_criteria.push(criterion.into());
        self.updated_at = Utc::now();
    }

    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = context.into();
        self.updated_at = Utc::now();
    }

    /// Session ids double as tags and directory names, so keep them simple
    pub fn validate_id(id: &str) -> Result<()> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !id.starts_with('.');
        if valid {
            Ok(())
        } else {
            Err(JuggleError::InvalidState(format!(
                "invalid session id '{}': use letters, digits, '-', '_' or '.'",
                id
            )))
        }
    }
}
