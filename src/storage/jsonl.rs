//! JSONL-based storage implementation with in-memory caching.
//!
//! One `<collection>.jsonl` file per collection, one record per line. Creates
//! append; updates rewrite the file through a temp file + rename so
//! a concurrent reader never sees a half-written collection.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Serialize, de::DeserializeOwned};

use super::traits::{Filter, HasId, Storage};
use crate::error::{JuggleError, Result};

type Cache = HashMap<String, Vec<serde_json::Value>>;

/// JSONL-based storage with in-memory caching.
pub struct JsonlStorage {
    base_path: PathBuf,
    cache: RwLock<Cache>,
}

impl std::fmt::Debug for JsonlStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlStorage")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

fn lock_err<E: std::fmt::Display>(e: E) -> JuggleError {
    JuggleError::Storage(e.to_string())
}

fn record_id(record: &serde_json::Value) -> Option<&str> {
    record.get("id").and_then(|v| v.as_str())
}

impl JsonlStorage {
    /// Create a new JsonlStorage at the given path.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Directory holding the collection files.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the file path for a collection.
    fn collection_path(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", collection))
    }

    fn read_collection(&self, collection: &str) -> Result<Vec<serde_json::Value>> {
        let path = self.collection_path(collection);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut records = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: serde_json::Value = serde_json::from_str(&line).map_err(|e| {
                JuggleError::Storage(format!("{}:{}: {}", path.display(), lineno + 1, e))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Load a collection into cache if not already loaded.
    fn ensure_loaded(&self, collection: &str) -> Result<()> {
        {
            let cache = self.cache.read().map_err(lock_err)?;
            if cache.contains_key(collection) {
                return Ok(());
            }
        }

        let mut cache = self.cache.write().map_err(lock_err)?;
        if cache.contains_key(collection) {
            return Ok(());
        }

        let records = self.read_collection(collection)?;
        cache.insert(collection.to_string(), records);
        Ok(())
    }

    /// Run `f` against the cached records of a loaded collection.
    fn with_records<R>(&self, collection: &str, f: impl FnOnce(&[serde_json::Value]) -> Result<R>) -> Result<R> {
        self.ensure_loaded(collection)?;
        let cache = self.cache.read().map_err(lock_err)?;
        let records = cache
            .get(collection)
            .ok_or_else(|| JuggleError::Storage(format!("Collection not loaded: {}", collection)))?;
        f(records)
    }

    /// Mutate the cached records, then persist the whole collection.
    fn rewrite_with(&self, collection: &str, f: impl FnOnce(&mut Vec<serde_json::Value>) -> Result<()>) -> Result<()> {
        self.ensure_loaded(collection)?;
        let mut cache = self.cache.write().map_err(lock_err)?;
        let records = cache
            .get_mut(collection)
            .ok_or_else(|| JuggleError::Storage(format!("Collection not loaded: {}", collection)))?;

        f(records)?;

        let path = self.collection_path(collection);
        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp)?;
            for record in records.iter() {
                writeln!(file, "{}", serde_json::to_string(record)?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Append a record to the JSONL file.
    fn append_to_file(&self, collection: &str, record: &serde_json::Value) -> Result<()> {
        let path = self.collection_path(collection);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }
}

impl Storage for JsonlStorage {
    fn create<T: Serialize + DeserializeOwned + HasId>(&self, collection: &str, record: &T) -> Result<()> {
        let duplicate = self.with_records(collection, |records| {
            Ok(records.iter().any(|r| record_id(r) == Some(record.id())))
        })?;
        if duplicate {
            return Err(JuggleError::Storage(format!(
                "{} already contains a record with id {}",
                collection,
                record.id()
            )));
        }

        let value = serde_json::to_value(record)?;

        // File first, it is the source of truth
        self.append_to_file(collection, &value)?;

        let mut cache = self.cache.write().map_err(lock_err)?;
        if let Some(records) = cache.get_mut(collection) {
            records.push(value);
        }
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>> {
        self.with_records(collection, |records| {
            records
                .iter()
                .find(|r| record_id(r) == Some(id))
                .map(|r| serde_json::from_value(r.clone()).map_err(JuggleError::from))
                .transpose()
        })
    }

    fn update<T: Serialize + DeserializeOwned + HasId>(&self, collection: &str, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        let id = record.id();

        self.rewrite_with(collection, |records| {
            let slot = records
                .iter_mut()
                .find(|r| record_id(r) == Some(id))
                .ok_or_else(|| JuggleError::Storage(format!("{} has no record with id {}", collection, id)))?;
            *slot = value;
            Ok(())
        })
    }

    fn query<T: DeserializeOwned>(&self, collection: &str, filters: &[Filter]) -> Result<Vec<T>> {
        self.with_records(collection, |records| {
            records
                .iter()
                .filter(|record| filters.iter().all(|f| f.matches(record)))
                .map(|record| serde_json::from_value(record.clone()).map_err(JuggleError::from))
                .collect()
        })
    }

    fn invalidate(&self, collection: &str) -> Result<()> {
        self.cache.write().map_err(lock_err)?.remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Note {
        id: String,
        body: String,
        tags: Vec<String>,
    }

    impl HasId for Note {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str, body: &str, tags: &[&str]) -> Note {
        Note {
            id: id.to_string(),
            body: body.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn create_test_storage() -> (JsonlStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = JsonlStorage::new(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_create_and_get() {
        let (storage, _temp) = create_test_storage();
        let record = note("n1", "hello", &[]);

        storage.create("notes", &record).unwrap();
        let retrieved: Option<Note> = storage.get("notes", "n1").unwrap();

        assert_eq!(retrieved, Some(record));
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let (storage, _temp) = create_test_storage();
        storage.create("notes", &note("n1", "a", &[])).unwrap();
        assert!(storage.create("notes", &note("n1", "b", &[])).is_err());
    }

    #[test]
    fn test_update_rewrites_file() {
        let (storage, temp) = create_test_storage();
        storage.create("notes", &note("n1", "draft", &[])).unwrap();
        storage.update("notes", &note("n1", "final", &[])).unwrap();

        let fresh = JsonlStorage::new(temp.path()).unwrap();
        let retrieved: Note = fresh.get("notes", "n1").unwrap().unwrap();
        assert_eq!(retrieved.body, "final");
        assert!(!temp.path().join("notes.jsonl.tmp").exists());
    }

    #[test]
    fn test_update_not_found() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.update("notes", &note("ghost", "", &[])).is_err());
    }

    #[test]
    fn test_query_by_tag() {
        let (storage, _temp) = create_test_storage();
        storage.create("notes", &note("n1", "a", &["auth"])).unwrap();
        storage.create("notes", &note("n2", "b", &["billing"])).unwrap();
        storage.create("notes", &note("n3", "c", &["auth", "billing"])).unwrap();

        let auth: Vec<Note> = storage.query("notes", &[Filter::contains("tags", "auth")]).unwrap();
        let ids: Vec<&str> = auth.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n3"]);
    }

    #[test]
    fn test_invalidate_sees_external_writes() {
        let (storage, temp) = create_test_storage();
        storage.create("notes", &note("n1", "before", &[])).unwrap();
        let _: Vec<Note> = storage.list("notes").unwrap();

        // Another process rewrites the record
        let other = JsonlStorage::new(temp.path()).unwrap();
        other.update("notes", &note("n1", "after", &[])).unwrap();

        let stale: Note = storage.get("notes", "n1").unwrap().unwrap();
        assert_eq!(stale.body, "before");

        storage.invalidate("notes").unwrap();
        let fresh: Note = storage.get("notes", "n1").unwrap().unwrap();
        assert_eq!(fresh.body, "after");
    }

    #[test]
    fn test_corrupt_line_reports_location() {
        let (storage, temp) = create_test_storage();
        fs::write(temp.path().join("notes.jsonl"), "{\"id\":\"n1\"}\nnot json\n").unwrap();

        let err = storage.list::<serde_json::Value>("notes").unwrap_err();
        assert!(err.to_string().contains("notes.jsonl:2"));
    }

    #[test]
    fn test_empty_collection() {
        let (storage, _temp) = create_test_storage();
        let all: Vec<Note> = storage.list("empty").unwrap();
        assert!(all.is_empty());
    }
}
