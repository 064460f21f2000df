//! Saved session files.
//!
//! A session is `<dir>/<name>.session`, a SQLite database owned by the
//! Telegram client library. SQLite may leave `-journal`, `-wal` and `-shm`
//! files next to it; they are removed together with the session.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

const SESSION_EXT: &str = "session";
const SIDE_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];
const MAX_NAME_LEN: usize = 64;

/// Errors of the session store.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session name '{0}' (allowed: letters, digits, '_' and '-', up to 64 chars)")]
    InvalidName(String),

    #[error("Session '{0}' not found")]
    NotFound(String),

    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata of one saved session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub name: String,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Returns true if `name` may be used as a session file stem.
#[must_use]
pub fn is_valid_session_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Directory of session files.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the session file for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidName`] for names that could escape the
    /// directory or are not valid file stems.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, SessionError> {
        if !is_valid_session_name(name) {
            return Err(SessionError::InvalidName(name.to_owned()));
        }
        Ok(self.dir.join(format!("{name}.{SESSION_EXT}")))
    }

    /// Lists saved sessions sorted by name. A missing directory is an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the directory cannot be read.
    pub async fn list(&self) -> Result<Vec<SessionInfo>, SessionError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SESSION_EXT) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_valid_session_name(name) {
                continue;
            }

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            sessions.push(SessionInfo {
                name: name.to_owned(),
                size_bytes: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sessions)
    }

    /// Deletes a session and its SQLite side files.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] if there is no such session and
    /// [`SessionError::Io`] if a file cannot be removed.
    pub async fn delete(&self, name: &str) -> Result<(), SessionError> {
        let path = self.path_for(name)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(name.to_owned()));
            }
            Err(e) => return Err(e.into()),
        }

        for suffix in SIDE_SUFFIXES {
            let side = self.dir.join(format!("{name}.{SESSION_EXT}{suffix}"));
            match tokio::fs::remove_file(&side).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!("Deleted session '{}'", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_name_validation() {
        assert!(is_valid_session_name("gift_detector"));
        assert!(is_valid_session_name("acc-2"));
        assert!(!is_valid_session_name(""));
        assert!(!is_valid_session_name("../etc/passwd"));
        assert!(!is_valid_session_name("with space"));
        assert!(!is_valid_session_name(&"a".repeat(65)));
    }

    #[test]
    fn test_path_for() {
        let store = SessionStore::new("sessions");
        assert_eq!(
            store.path_for("main").unwrap(),
            PathBuf::from("sessions").join("main.session")
        );
        assert!(matches!(
            store.path_for("a/b"),
            Err(SessionError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nope"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        std::fs::write(dir.path().join("beta.session"), b"12345").unwrap();
        std::fs::write(dir.path().join("alpha.session"), b"1").unwrap();
        std::fs::write(dir.path().join("alpha.session-wal"), b"w").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let sessions = store.list().await.unwrap();
        let names: Vec<&str> = sessions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(sessions[1].size_bytes, 5);

        store.delete("alpha").await.unwrap();
        assert!(!dir.path().join("alpha.session").exists());
        assert!(!dir.path().join("alpha.session-wal").exists());
        assert!(dir.path().join("beta.session").exists());

        assert!(matches!(
            store.delete("alpha").await,
            Err(SessionError::NotFound(_))
        ));
    }
}
