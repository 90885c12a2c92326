//! Project-scoped store used by the agent loop.
//!
//! Layout under the project root:
//!
//! ```text
//! .juggle/
//!   items.jsonl
//!   sessions.jsonl
//!   sessions/<session-id>/progress.txt
//!   sessions/<session-id>/last_output.txt
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::items::{ItemStore, SessionCounts};
use super::jsonl::JsonlStorage;
use super::sessions::SessionStore;
use crate::domain::Session;
use crate::error::Result;

/// Default directory, relative to the project root, holding juggle state.
pub const DEFAULT_STATE_DIR: &str = ".juggle";

const PROGRESS_FILE: &str = "progress.txt";
const OUTPUT_FILE: &str = "last_output.txt";

/// What the agent loop needs from persistent state.
///
/// `terminal_counts` never fails; implementations report all zeros when they
/// cannot read. `append_progress` and `write_output` are best-effort side
/// channels whose errors the loop discards.
pub trait LoopStore: Send + Sync {
    /// Load a session, failing with `SessionNotFound` if absent.
    fn load_session(&self, session_id: &str) -> Result<Session>;

    /// Current terminal/complete/blocked/total counts for a session's items.
    fn terminal_counts(&self, session_id: &str) -> SessionCounts;

    /// Append one line to the session's progress log.
    fn append_progress(&self, session_id: &str, line: &str) -> Result<()>;

    /// Replace the session's last-output artifact.
    fn write_output(&self, session_id: &str, output: &str) -> Result<()>;
}

/// JSONL-backed store rooted at a project directory.
#[derive(Debug)]
pub struct ProjectStore {
    root: PathBuf,
    state_dir: PathBuf,
    storage: JsonlStorage,
}

impl ProjectStore {
    /// Open (creating if needed) the store under `root/.juggle`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_in(root, DEFAULT_STATE_DIR)
    }

    /// Open the store under `root/<dir_name>`.
    pub fn open_in(root: impl AsRef<Path>, dir_name: &str) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let state_dir = root.join(dir_name);
        let storage = JsonlStorage::new(&state_dir)?;
        Ok(Self {
            root,
            state_dir,
            storage,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn items(&self) -> ItemStore<'_, JsonlStorage> {
        ItemStore::new(&self.storage)
    }

    pub fn sessions(&self) -> SessionStore<'_, JsonlStorage> {
        SessionStore::new(&self.storage)
    }

    /// Per-session directory for logs and artifacts.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.state_dir.join("sessions").join(session_id)
    }

    pub fn progress_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(PROGRESS_FILE)
    }

    pub fn output_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(OUTPUT_FILE)
    }
}

impl LoopStore for ProjectStore {
    fn load_session(&self, session_id: &str) -> Result<Session> {
        self.sessions().require(session_id)
    }

    fn terminal_counts(&self, session_id: &str) -> SessionCounts {
        let items = self.items();
        let counts = items
            .refresh()
            .and_then(|_| items.counts_for_session(session_id));
        match counts {
            Ok(counts) => counts,
            Err(e) => {
                log::warn!("Could not count items for session {}: {}", session_id, e);
                SessionCounts::default()
            }
        }
    }

    fn append_progress(&self, session_id: &str, line: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(PROGRESS_FILE))?;
        writeln!(file, "{}", format_progress_line(line))?;
        Ok(())
    }

    fn write_output(&self, session_id: &str, output: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(OUTPUT_FILE), output)?;
        Ok(())
    }
}

/// Insert a timestamp after a leading `[TAG]`, or prefix one if there is no tag.
fn format_progress_line(line: &str) -> String {
    let stamp = Utc::now().to_rfc3339();
    match line.strip_prefix('[').and_then(|rest| rest.split_once(']')) {
        Some((tag, rest)) => format!("[{}] {} {}", tag, stamp, rest.trim_start()),
        None => format!("{} {}", stamp, line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkItem;
    use crate::error::JuggleError;
    use tempfile::TempDir;

    fn open_store() -> (ProjectStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = ProjectStore::open(temp.path()).unwrap();
        (store, temp)
    }

    #[test]
    fn test_load_session_missing() {
        let (store, _temp) = open_store();
        assert!(matches!(store.load_session("ghost"), Err(JuggleError::SessionNotFound(_))));
    }

    #[test]
    fn test_terminal_counts_see_external_updates() {
        let (store, temp) = open_store();
        let item = WorkItem::new("x").with_tag("s");
        store.items().create(&item).unwrap();
        assert_eq!(store.terminal_counts("s").terminal, 0);

        // The agent completes the item through its own process
        let other = ProjectStore::open(temp.path()).unwrap();
        other.items().modify(&item.id, |i| i.complete("done")).unwrap();

        let counts = store.terminal_counts("s");
        assert_eq!(counts.complete, 1);
        assert!(counts.all_terminal());
    }

    #[test]
    fn test_terminal_counts_zero_on_corrupt_store() {
        let (store, temp) = open_store();
        fs::write(temp.path().join(".juggle/items.jsonl"), "garbage\n").unwrap();
        assert_eq!(store.terminal_counts("s"), SessionCounts::default());
    }

    #[test]
    fn test_progress_lines_append() {
        let (store, _temp) = open_store();
        store.append_progress("s", "[RATE_LIMIT] waiting 35s").unwrap();
        store.append_progress("s", "[TIMEOUT] iteration 2").unwrap();

        let log = fs::read_to_string(store.progress_path("s")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[RATE_LIMIT] "));
        assert!(lines[0].ends_with("waiting 35s"));
        assert!(lines[1].starts_with("[TIMEOUT] "));
    }

    #[test]
    fn test_output_overwritten() {
        let (store, _temp) = open_store();
        store.write_output("s", "first run").unwrap();
        store.write_output("s", "second").unwrap();
        assert_eq!(fs::read_to_string(store.output_path("s")).unwrap(), "second");
    }

    #[test]
    fn test_format_progress_line_without_tag() {
        let line = format_progress_line("plain text");
        assert!(line.ends_with(" plain text"));
        assert!(!line.starts_with('['));
    }
}
