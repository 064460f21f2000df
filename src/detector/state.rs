//! Detector state: status counters, de-duplication and per-sender cooldown.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gifts::{GiftInfo, GiftKind};

/// Login / run stage reported to the control panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    Idle,
    SmsRequired,
    PasswordRequired,
    Running,
    Stopped,
    Error,
}

impl AuthState {
    /// Stable snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SmsRequired => "sms_required",
            Self::PasswordRequired => "password_required",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

/// Event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub gifts_detected: u64,
    pub responses_sent: u64,
    pub errors: u64,
    pub ignored_users: u64,
    pub ignored_chats: u64,
    pub throttled: u64,
    pub star_gifts: u64,
    pub unique_gifts: u64,
    pub regular_gifts: u64,
    pub raw_gift_updates: u64,
}

/// Short pointer to the most recent gift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastGift {
    pub gift_type: GiftKind,
    pub sender_id: Option<i64>,
    pub chat_id: i64,
    pub at: DateTime<Utc>,
}

/// Live detector status shared between the runner and the HTTP handlers.
#[derive(Debug, Default)]
pub struct DetectorStatus {
    pub auth: AuthState,
    pub counters: Counters,
    /// Logged-in account, `@username (id)`.
    pub account: Option<String>,
    pub last_gift: Option<LastGift>,
    pub last_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
}

/// Serializable copy of [`DetectorStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: AuthState,
    pub running: bool,
    pub account: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<u64>,
    #[serde(flatten)]
    pub counters: Counters,
    pub last_gift: Option<LastGift>,
    pub last_error: Option<String>,
}

impl DetectorStatus {
    /// Creates an idle status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the detector loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.auth == AuthState::Running
    }

    /// Marks the detector as running, resetting counters and the uptime clock.
    pub fn mark_running(&mut self, account: Option<String>) {
        self.auth = AuthState::Running;
        self.account = account;
        self.counters = Counters::default();
        self.last_gift = None;
        self.last_error = None;
        self.started_at = Some(Utc::now());
        self.started_instant = Some(Instant::now());
    }

    /// Marks the detector as stopped. Counters are kept for inspection.
    pub fn mark_stopped(&mut self) {
        self.auth = AuthState::Stopped;
        self.started_instant = None;
    }

    /// Records a failure and moves to the error state.
    pub fn mark_error(&mut self, error: impl Into<String>) {
        self.auth = AuthState::Error;
        self.started_instant = None;
        self.last_error = Some(error.into());
    }

    /// Records a detected gift in the per-kind counters.
    pub fn record_gift(&mut self, info: &GiftInfo) {
        self.counters.gifts_detected += 1;
        match info.gift_type {
            GiftKind::StarGift => self.counters.star_gifts += 1,
            GiftKind::UniqueGift => self.counters.unique_gifts += 1,
            _ => self.counters.regular_gifts += 1,
        }
        self.last_gift = Some(LastGift {
            gift_type: info.gift_type,
            sender_id: info.sender_id,
            chat_id: info.chat_id,
            at: Utc::now(),
        });
    }

    /// Counts a reply that exhausted its retries.
    ///
    /// The detector keeps running; only the error counter and message change.
    pub fn record_send_failure(&mut self, error: impl Into<String>) {
        self.counters.errors += 1;
        self.last_error = Some(error.into());
    }

    /// Time since the detector started running.
    #[must_use]
    pub fn uptime(&self) -> Option<Duration> {
        self.started_instant.map(|s| s.elapsed())
    }

    /// Serializable copy of the current status.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.auth,
            running: self.is_running(),
            account: self.account.clone(),
            started_at: self.started_at,
            uptime_secs: self.uptime().map(|d| d.as_secs()),
            counters: self.counters,
            last_gift: self.last_gift.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Remembers processed keys to drop duplicate deliveries.
///
/// When the set grows past its capacity it is cleared wholesale.
#[derive(Debug)]
pub struct ProcessedCache<K> {
    seen: HashSet<K>,
    capacity: usize,
}

impl<K: Eq + Hash> ProcessedCache<K> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Inserts `key`, returning false if it was already present.
    pub fn insert(&mut self, key: K) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.seen.len() >= self.capacity {
            self.seen.clear();
        }
        self.seen.insert(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Enforces a minimum interval between replies to the same sender.
#[derive(Debug)]
pub struct ResponseCooldown {
    interval: Duration,
    last: HashMap<i64, Instant>,
}

impl ResponseCooldown {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: HashMap::new(),
        }
    }

    /// Returns true and marks the sender if a reply is allowed at `now`.
    pub fn try_acquire(&mut self, sender_id: i64, now: Instant) -> bool {
        if let Some(last) = self.last.get(&sender_id)
            && now.saturating_duration_since(*last) < self.interval
        {
            return false;
        }

        // Entries older than the interval carry no information.
        let interval = self.interval;
        self.last
            .retain(|_, at| now.saturating_duration_since(*at) < interval);
        self.last.insert(sender_id, now);
        true
    }
}
