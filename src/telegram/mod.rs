//! Telegram client wrapper module.
//!
//! Provides high-level abstractions for interacting with Telegram:
//! authentication, update forwarding, throttled replies, the star gift
//! catalogue and saved session files.

mod client;
pub mod convert;
mod rate_limiter;
mod sessions;

pub use client::{AccountInfo, GiftCatalog, TelegramBot, TelegramError, UpdateReceiver};
pub use grammers_client::Update;
pub use grammers_client::client::{LoginToken, PasswordToken};
pub use rate_limiter::{SendThrottle, send_with_retries};
pub use sessions::{SessionError, SessionInfo, SessionStore, is_valid_session_name};
