//! Gift history: bounded in-memory list plus optional JSON lines log.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::gifts::GiftInfo;

/// Bounded history of detected gifts, oldest first.
#[derive(Debug)]
pub struct GiftHistory {
    entries: VecDeque<GiftInfo>,
    limit: usize,
}

impl GiftHistory {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(1024)),
            limit: limit.max(1),
        }
    }

    /// Appends a gift, dropping the oldest entry when full.
    pub fn push(&mut self, gift: GiftInfo) {
        if self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(gift);
    }

    /// Up to `limit` most recent gifts, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<GiftInfo> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One line of the gift log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftLogEntry {
    pub timestamp: DateTime<Utc>,
    pub gift: GiftInfo,
}

/// Append-only JSON lines file of detected gifts.
#[derive(Debug, Clone)]
pub struct GiftLog {
    path: PathBuf,
}

impl GiftLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry, creating the file and parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be created or written.
    pub async fn append(&self, gift: &GiftInfo) -> std::io::Result<()> {
        let entry = GiftLogEntry {
            timestamp: Utc::now(),
            gift: gift.clone(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
