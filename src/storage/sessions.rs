//! Session storage helpers.

use chrono::Utc;

use super::traits::Storage;
use crate::domain::Session;
use crate::error::{JuggleError, Result};

/// Collection name for sessions.
pub const SESSIONS_COLLECTION: &str = "sessions";

/// Helper for session-specific queries.
pub struct SessionStore<'a, S: Storage> {
    storage: &'a S,
}

impl<'a, S: Storage> SessionStore<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    pub fn list_all(&self) -> Result<Vec<Session>> {
        self.storage.list(SESSIONS_COLLECTION)
    }

    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        self.storage.get(SESSIONS_COLLECTION, id)
    }

    /// Get a session or fail with `SessionNotFound`.
    pub fn require(&self, id: &str) -> Result<Session> {
        self.get(id)?
            .ok_or_else(|| JuggleError::SessionNotFound(id.to_string()))
    }

    pub fn create(&self, session: &Session) -> Result<()> {
        Session::validate_id(&session.id)?;
        if self.get(&session.id)?.is_some() {
            return Err(JuggleError::InvalidState(format!("session {} already exists", session.id)));
        }
        self.storage.create(SESSIONS_COLLECTION, session)
    }

    pub fn update(&self, session: &Session) -> Result<()> {
        self.storage.update(SESSIONS_COLLECTION, session)
    }

    /// Load a session, apply `f`, stamp `updated_at`, and persist it.
    pub fn modify(&self, id: &str, f: impl FnOnce(&mut Session) -> Result<()>) -> Result<Session> {
        let mut session = self.require(id)?;
        f(&mut session)?;
        session.updated_at = Utc::now();
        self.update(&session)?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModelSize;
    use crate::storage::JsonlStorage;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_require() {
        let temp = TempDir::new().unwrap();
        let storage = JsonlStorage::new(temp.path()).unwrap();
        let sessions = SessionStore::new(&storage);

        sessions
            .create(&Session::new("auth", "Rework login").with_model(ModelSize::Large))
            .unwrap();

        let loaded = sessions.require("auth").unwrap();
        assert_eq!(loaded.description, "Rework login");
        assert_eq!(loaded.default_model, Some(ModelSize::Large));
    }

    #[test]
    fn test_duplicate_and_invalid_ids_rejected() {
        let temp = TempDir::new().unwrap();
        let storage = JsonlStorage::new(temp.path()).unwrap();
        let sessions = SessionStore::new(&storage);

        sessions.create(&Session::new("auth", "")).unwrap();
        assert!(sessions.create(&Session::new("auth", "again")).is_err());
        assert!(sessions.create(&Session::new("a/b", "")).is_err());
        assert_eq!(sessions.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_modify_persists_and_stamps() {
        let temp = TempDir::new().unwrap();
        let storage = JsonlStorage::new(temp.path()).unwrap();
        let sessions = SessionStore::new(&storage);
        let created = Session::new("auth", "Rework login");
        sessions.create(&created).unwrap();

        let edited = sessions
            .modify("auth", |s| {
                s.set_context("legacy user table");
                s.default_model = Some(ModelSize::Small);
                Ok(())
            })
            .unwrap();
        assert!(edited.updated_at >= created.updated_at);

        storage.invalidate(SESSIONS_COLLECTION).unwrap();
        let loaded = sessions.require("auth").unwrap();
        assert_eq!(loaded.context, "legacy user table");
        assert_eq!(loaded.default_model, Some(ModelSize::Small));
        assert!(matches!(
            sessions.modify("ghost", |_| Ok(())),
            Err(JuggleError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_require_missing() {
        let temp = TempDir::new().unwrap();
        let storage = JsonlStorage::new(temp.path()).unwrap();
        let sessions = SessionStore::new(&storage);
        assert!(matches!(sessions.require("nope"), Err(JuggleError::SessionNotFound(_))));
    }
}
