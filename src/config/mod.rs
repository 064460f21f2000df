//! Configuration module for the gift responder.
//!
//! Handles loading and validation of Telegram API credentials, HTTP server
//! settings, detector tuning flags and the detection rules file.

mod rules;
mod settings;

pub use rules::{DetectionRules, RulesError};
pub use settings::{
    ConfigError, DetectorSettings, NotificationTarget, ServerSettings, TelegramConfig, mask_phone,
    parse_api_id, parse_flag, parse_id_list,
};

/// Application name reported by the HTTP API and reply signatures.
pub const APP_NAME: &str = "Telegram Gift Detector";

/// Application version reported by the HTTP API.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
