//! Application settings and Telegram configuration.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Phone number of the account, international format.
    #[serde(default)]
    pub phone_number: Option<String>,

    /// Directory holding session files.
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,

    /// Session name; the file is `<session_dir>/<session_name>.session`.
    #[serde(default = "default_session_name")]
    pub session_name: String,
}

fn default_session_dir() -> PathBuf {
    PathBuf::from("sessions")
}

fn default_session_name() -> String {
    "gift_detector".to_owned()
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String) -> Self {
        Self {
            api_id,
            api_hash,
            phone_number: None,
            session_dir: default_session_dir(),
            session_name: default_session_name(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `API_ID` and `API_HASH` to be set. `PHONE_NUMBER`,
    /// `SESSION_DIR` and `SESSION_NAME` are optional.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] or [`ConfigError::InvalidApiId`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id = parse_api_id(
            &std::env::var("API_ID").map_err(|_| ConfigError::MissingEnvVar("API_ID"))?,
        )?;

        let api_hash =
            std::env::var("API_HASH").map_err(|_| ConfigError::MissingEnvVar("API_HASH"))?;

        Ok(Self {
            api_id,
            api_hash,
            phone_number: std::env::var("PHONE_NUMBER").ok().filter(|p| !p.trim().is_empty()),
            session_dir: Self::session_dir_from_env(),
            session_name: std::env::var("SESSION_NAME")
                .unwrap_or_else(|_| default_session_name()),
        })
    }

    /// Session directory from `SESSION_DIR`, `sessions` when unset.
    ///
    /// Read on its own so saved sessions are found without credentials.
    #[must_use]
    pub fn session_dir_from_env() -> PathBuf {
        session_dir_from(std::env::var("SESSION_DIR").ok())
    }

    /// Path of the session file for this configuration.
    #[must_use]
    pub fn session_path(&self) -> PathBuf {
        self.session_dir.join(format!("{}.session", self.session_name))
    }

    /// Checks the credentials for obvious mistakes.
    ///
    /// Returns every problem found, empty when the configuration is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.api_id <= 0 {
            errors.push(ConfigError::InvalidApiId);
        }

        if self.api_hash.chars().count() < 10 {
            errors.push(ConfigError::InvalidApiHash);
        }

        if let Some(phone) = &self.phone_number
            && !phone.trim_start().starts_with('+')
        {
            errors.push(ConfigError::InvalidPhone);
        }

        errors
    }

    /// One-line summary safe for logs.
    #[must_use]
    pub fn redacted(&self) -> String {
        format!(
            "api_id={}, api_hash={}, phone={}, session={}",
            self.api_id,
            "*".repeat(self.api_hash.len().min(8)),
            self.phone_number.as_deref().map_or_else(|| "-".to_owned(), mask_phone),
            self.session_path().display()
        )
    }
}

fn session_dir_from(raw: Option<String>) -> PathBuf {
    raw.filter(|dir| !dir.trim().is_empty())
        .map_or_else(default_session_dir, PathBuf::from)
}

/// Parses an API ID given as text.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidApiId`] unless the text is a positive integer.
pub fn parse_api_id(raw: &str) -> Result<i32, ConfigError> {
    raw.trim()
        .parse::<i32>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or(ConfigError::InvalidApiId)
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deployment environment label.
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    8000
}

fn default_environment() -> String {
    "production".to_owned()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
        }
    }
}

impl ServerSettings {
    /// Creates server settings from `HOST`, `PORT` and `ENVIRONMENT`.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| default_host()),
            port: env_parse("PORT").unwrap_or_else(default_port),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| default_environment()),
        }
    }

    /// Socket address string for the listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Detector tuning flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSettings {
    /// Pause after each reply, in seconds.
    pub response_delay_secs: f64,

    /// Attempts made to deliver a reply.
    pub max_retries: u32,

    /// Number of processed message ids remembered for de-duplication.
    pub cache_size: usize,

    /// Minimum seconds between two replies to the same sender.
    pub min_response_interval_secs: u64,

    /// Number of gifts kept in the in-memory history.
    pub history_limit: usize,

    /// Seconds between stats log lines (0 disables).
    pub stats_interval_secs: u64,

    /// Detect gifts from service message actions.
    pub enable_service_detection: bool,

    /// Detect gifts from known raw action/media constructors.
    pub enable_raw_api_detection: bool,

    /// Detect gifts from text indicators.
    pub enable_text_detection: bool,

    /// Detect gifts from loose markers (emoji, star prices).
    pub enable_extended_detection: bool,

    /// Send replies as HTML.
    pub use_html_formatting: bool,

    /// Suppress link previews in replies.
    pub disable_web_page_preview: bool,

    /// Append the processed counter to replies.
    pub show_stats_in_response: bool,

    /// Append detected gifts to a JSON lines file.
    pub save_gift_logs: bool,

    /// Path of the JSON lines gift log.
    pub gift_logs_file: PathBuf,

    /// Sender ids never answered.
    pub ignored_users: HashSet<i64>,

    /// Chat ids never answered.
    pub ignored_chats: HashSet<i64>,

    /// Optional detection rules file.
    pub rules_path: Option<PathBuf>,

    /// Forward a summary of each answered gift to `notification_chat_id`.
    pub enable_notification_chat: bool,

    /// `me`, `@username` or a numeric chat id.
    pub notification_chat_id: Option<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            response_delay_secs: 0.5,
            max_retries: 3,
            cache_size: 1000,
            min_response_interval_secs: 5,
            history_limit: 100,
            stats_interval_secs: 300,
            enable_service_detection: true,
            enable_raw_api_detection: true,
            enable_text_detection: true,
            enable_extended_detection: false,
            use_html_formatting: true,
            disable_web_page_preview: true,
            show_stats_in_response: true,
            save_gift_logs: false,
            gift_logs_file: PathBuf::from("gifts_log.jsonl"),
            ignored_users: HashSet::new(),
            ignored_chats: HashSet::new(),
            rules_path: None,
            enable_notification_chat: false,
            notification_chat_id: None,
        }
    }
}

impl DetectorSettings {
    /// Creates detector settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        let defaults = Self::default();

        Self {
            response_delay_secs: env_parse("RESPONSE_DELAY").unwrap_or(defaults.response_delay_secs),
            max_retries: env_parse("MAX_RETRIES").unwrap_or(defaults.max_retries),
            cache_size: env_parse("CACHE_SIZE").unwrap_or(defaults.cache_size),
            min_response_interval_secs: env_parse("MIN_RESPONSE_INTERVAL")
                .unwrap_or(defaults.min_response_interval_secs),
            history_limit: env_parse("HISTORY_LIMIT").unwrap_or(defaults.history_limit),
            stats_interval_secs: env_parse("STATS_INTERVAL").unwrap_or(defaults.stats_interval_secs),
            enable_service_detection: env_flag_any(&[
                "ENABLE_SERVICE_DETECTION",
                "ENABLE_PYROGRAM_DETECTION",
            ])
            .unwrap_or(defaults.enable_service_detection),
            enable_raw_api_detection: env_flag("ENABLE_RAW_API_DETECTION")
                .unwrap_or(defaults.enable_raw_api_detection),
            enable_text_detection: env_flag("ENABLE_TEXT_DETECTION")
                .unwrap_or(defaults.enable_text_detection),
            enable_extended_detection: env_flag("ENABLE_EXTENDED_DETECTION")
                .unwrap_or(defaults.enable_extended_detection),
            use_html_formatting: env_flag("USE_HTML_FORMATTING")
                .unwrap_or(defaults.use_html_formatting),
            disable_web_page_preview: env_flag("DISABLE_WEB_PAGE_PREVIEW")
                .unwrap_or(defaults.disable_web_page_preview),
            show_stats_in_response: env_flag("SHOW_STATS_IN_RESPONSE")
                .unwrap_or(defaults.show_stats_in_response),
            save_gift_logs: env_flag("SAVE_GIFT_LOGS").unwrap_or(defaults.save_gift_logs),
            gift_logs_file: std::env::var("GIFT_LOGS_FILE")
                .map_or(defaults.gift_logs_file, PathBuf::from),
            ignored_users: std::env::var("IGNORED_USERS")
                .map(|s| parse_id_list(&s))
                .unwrap_or_default(),
            ignored_chats: std::env::var("IGNORED_CHATS")
                .map(|s| parse_id_list(&s))
                .unwrap_or_default(),
            rules_path: std::env::var("RULES_PATH").ok().map(PathBuf::from),
            enable_notification_chat: env_flag("ENABLE_NOTIFICATION_CHAT")
                .unwrap_or(defaults.enable_notification_chat),
            notification_chat_id: std::env::var("NOTIFICATION_CHAT_ID")
                .ok()
                .filter(|id| !id.trim().is_empty()),
        }
    }

    /// Checks value ranges.
    ///
    /// Returns every problem found, empty when all values are in range.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if !(0.1..=10.0).contains(&self.response_delay_secs) {
            errors.push(ConfigError::OutOfRange {
                name: "RESPONSE_DELAY",
                value: self.response_delay_secs.to_string(),
                range: "0.1..=10",
            });
        }

        if !(1..=10).contains(&self.max_retries) {
            errors.push(ConfigError::OutOfRange {
                name: "MAX_RETRIES",
                value: self.max_retries.to_string(),
                range: "1..=10",
            });
        }

        if !(100..=10_000).contains(&self.cache_size) {
            errors.push(ConfigError::OutOfRange {
                name: "CACHE_SIZE",
                value: self.cache_size.to_string(),
                range: "100..=10000",
            });
        }

        if self.enable_notification_chat {
            match self.notification_chat_id.as_deref() {
                None => errors.push(ConfigError::MissingEnvVar("NOTIFICATION_CHAT_ID")),
                Some(raw) if NotificationTarget::parse(raw).is_none() => {
                    errors.push(ConfigError::InvalidNotificationChat(raw.to_owned()));
                }
                Some(_) => {}
            }
        }

        errors
    }

    /// Chat that receives gift notifications, `None` when forwarding is off.
    #[must_use]
    pub fn notification_target(&self) -> Option<NotificationTarget> {
        if !self.enable_notification_chat {
            return None;
        }
        self.notification_chat_id
            .as_deref()
            .and_then(NotificationTarget::parse)
    }

    /// Pause applied after each reply.
    #[must_use]
    pub fn response_delay(&self) -> Duration {
        Duration::from_secs_f64(self.response_delay_secs.max(0.0))
    }

    /// Minimum interval between replies to one sender.
    #[must_use]
    pub const fn min_response_interval(&self) -> Duration {
        Duration::from_secs(self.min_response_interval_secs)
    }

    /// Interval of the stats reporter, `None` when disabled.
    #[must_use]
    pub const fn stats_interval(&self) -> Option<Duration> {
        if self.stats_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.stats_interval_secs))
        }
    }

    /// Multi-line summary for startup logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "response_delay={}s, max_retries={}, cache_size={}, min_interval={}s, \
             detection: service={} raw={} text={} extended={}, \
             ignored users={} chats={}, gift_log={}, notify={}",
            self.response_delay_secs,
            self.max_retries,
            self.cache_size,
            self.min_response_interval_secs,
            self.enable_service_detection,
            self.enable_raw_api_detection,
            self.enable_text_detection,
            self.enable_extended_detection,
            self.ignored_users.len(),
            self.ignored_chats.len(),
            if self.save_gift_logs {
                self.gift_logs_file.display().to_string()
            } else {
                "off".to_owned()
            },
            self.notification_target()
                .map_or_else(|| "off".to_owned(), |t| t.to_string())
        )
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    env_flag_any(&[name])
}

fn env_flag_any(names: &[&str]) -> Option<bool> {
    flag_from(|name| std::env::var(name).ok(), names)
}

/// First of `names` that `lookup` finds and that parses as a flag.
fn flag_from(lookup: impl Fn(&str) -> Option<String>, names: &[&str]) -> Option<bool> {
    names
        .iter()
        .find_map(|name| lookup(name).and_then(|raw| parse_flag(&raw)))
}

/// Where gift notifications are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTarget {
    /// The account's own Saved Messages.
    SavedMessages,
    /// A public username, without the leading `@`.
    Username(String),
    /// A Bot API style dialog id (`-100...` for channels).
    ChatId(i64),
}

impl NotificationTarget {
    /// Parses `me`, `self`, `@username`, `username` or a numeric id.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("me") || raw.eq_ignore_ascii_case("self") {
            return Some(Self::SavedMessages);
        }
        if let Ok(id) = raw.parse::<i64>() {
            return (id != 0).then_some(Self::ChatId(id));
        }

        let name = raw.strip_prefix('@').unwrap_or(raw);
        let valid = name.len() >= 4
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && name.starts_with(|c: char| c.is_ascii_alphabetic());
        valid.then(|| Self::Username(name.to_owned()))
    }
}

impl std::fmt::Display for NotificationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SavedMessages => f.write_str("me"),
            Self::Username(name) => write!(f, "@{name}"),
            Self::ChatId(id) => write!(f, "{id}"),
        }
    }
}

/// Parses a boolean flag (`true/false`, `1/0`, `yes/no`, `on/off`).
#[must_use]
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses a comma-separated list of ids, skipping entries that are not integers.
#[must_use]
pub fn parse_id_list(raw: &str) -> HashSet<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

/// Masks a phone number for logging (shows last 4 digits).
#[must_use]
pub fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,

    #[error("Invalid API hash (must be at least 10 characters)")]
    InvalidApiHash,

    #[error("Phone number must start with '+'")]
    InvalidPhone,

    #[error("NOTIFICATION_CHAT_ID '{0}' is not 'me', a username or a chat id")]
    InvalidNotificationChat(String),

    #[error("{name} = {value} is out of range ({range})")]
    OutOfRange {
        name: &'static str,
        value: String,
        range: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_detector_settings_are_valid() {
        let settings = DetectorSettings::default();
        assert!(settings.validate().is_empty());
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.cache_size, 1000);
        assert_eq!(settings.response_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_validate_reports_every_range_error() {
        let settings = DetectorSettings {
            response_delay_secs: 20.0,
            max_retries: 0,
            cache_size: 5,
            ..DetectorSettings::default()
        };
        let errors = settings.validate();
        assert_eq!(errors.len(), 3);
        assert!(matches!(
            errors[0],
            ConfigError::OutOfRange { name: "RESPONSE_DELAY", .. }
        ));
    }

    #[test]
    fn test_stats_interval_zero_disables() {
        let settings = DetectorSettings {
            stats_interval_secs: 0,
            ..DetectorSettings::default()
        };
        assert!(settings.stats_interval().is_none());
    }

    #[test]
    fn test_telegram_config_new() {
        let config = TelegramConfig::new(12345, "abc123".to_owned());
        assert_eq!(config.api_id, 12345);
        assert_eq!(config.api_hash, "abc123");
        assert_eq!(
            config.session_path(),
            PathBuf::from("sessions").join("gift_detector.session")
        );
    }

    #[test]
    fn test_telegram_config_validate() {
        let mut config = TelegramConfig::new(12345, "0123456789abcdef".to_owned());
        assert!(config.validate().is_empty());

        config.phone_number = Some("79991234567".to_owned());
        config.api_hash = "short".to_owned();
        let errors = config.validate();
        assert!(errors.contains(&ConfigError::InvalidApiHash));
        assert!(errors.contains(&ConfigError::InvalidPhone));
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = TelegramConfig::new(1, "0123456789abcdef".to_owned());
        config.phone_number = Some("+1234567890".to_owned());
        let line = config.redacted();
        assert!(!line.contains("0123456789abcdef"));
        assert!(!line.contains("+1234567890"));
        assert!(line.contains("***7890"));
    }

    #[test]
    fn test_parse_api_id() {
        assert_eq!(parse_api_id(" 12345 "), Ok(12345));
        assert_eq!(parse_api_id("-5"), Err(ConfigError::InvalidApiId));
        assert_eq!(parse_api_id("abc"), Err(ConfigError::InvalidApiId));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag(" yes "), Some(true));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_parse_id_list_skips_junk() {
        let ids = parse_id_list("1, 2,abc,,-1003")
            .into_iter()
            .collect::<std::collections::BTreeSet<_>>();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![-1003, 1, 2]);
    }

    #[test]
    fn test_session_dir_default_and_override() {
        assert_eq!(session_dir_from(None), PathBuf::from("sessions"));
        assert_eq!(session_dir_from(Some("  ".to_owned())), PathBuf::from("sessions"));
        assert_eq!(
            session_dir_from(Some("/data/sess".to_owned())),
            PathBuf::from("/data/sess")
        );
    }

    #[test]
    fn test_flag_aliases() {
        let env: HashMap<&str, &str> =
            HashMap::from([("ENABLE_PYROGRAM_DETECTION", "false")]);
        let lookup = |name: &str| env.get(name).map(|v| (*v).to_owned());
        let names = ["ENABLE_SERVICE_DETECTION", "ENABLE_PYROGRAM_DETECTION"];

        // Old name alone still applies.
        assert_eq!(flag_from(lookup, &names), Some(false));

        let env: HashMap<&str, &str> = HashMap::from([
            ("ENABLE_SERVICE_DETECTION", "yes"),
            ("ENABLE_PYROGRAM_DETECTION", "false"),
        ]);
        let lookup = |name: &str| env.get(name).map(|v| (*v).to_owned());
        assert_eq!(flag_from(lookup, &names), Some(true));

        // Unparseable values fall through to the next name.
        let env: HashMap<&str, &str> = HashMap::from([
            ("ENABLE_SERVICE_DETECTION", "maybe"),
            ("ENABLE_PYROGRAM_DETECTION", "0"),
        ]);
        let lookup = |name: &str| env.get(name).map(|v| (*v).to_owned());
        assert_eq!(flag_from(lookup, &names), Some(false));

        assert_eq!(flag_from(|_: &str| None, &names), None);
    }

    #[test]
    fn test_parse_notification_target() {
        assert_eq!(NotificationTarget::parse("me"), Some(NotificationTarget::SavedMessages));
        assert_eq!(NotificationTarget::parse(" SELF "), Some(NotificationTarget::SavedMessages));
        assert_eq!(
            NotificationTarget::parse("@gift_watch"),
            Some(NotificationTarget::Username("gift_watch".to_owned()))
        );
        assert_eq!(
            NotificationTarget::parse("-1001234567890"),
            Some(NotificationTarget::ChatId(-1_001_234_567_890))
        );
        assert_eq!(NotificationTarget::parse("0"), None);
        assert_eq!(NotificationTarget::parse("@a b"), None);
        assert_eq!(NotificationTarget::parse(""), None);
        assert_eq!(NotificationTarget::ChatId(-5).to_string(), "-5");
        assert_eq!(NotificationTarget::Username("x_y1".to_owned()).to_string(), "@x_y1");
    }

    #[test]
    fn test_notification_settings() {
        let mut settings = DetectorSettings::default();
        assert!(settings.notification_target().is_none());

        settings.notification_chat_id = Some("me".to_owned());
        // Disabled: the id alone does nothing.
        assert!(settings.notification_target().is_none());

        settings.enable_notification_chat = true;
        assert_eq!(settings.notification_target(), Some(NotificationTarget::SavedMessages));
        assert!(settings.validate().is_empty());

        settings.notification_chat_id = Some("not a chat".to_owned());
        assert_eq!(
            settings.validate(),
            vec![ConfigError::InvalidNotificationChat("not a chat".to_owned())]
        );

        settings.notification_chat_id = None;
        assert_eq!(
            settings.validate(),
            vec![ConfigError::MissingEnvVar("NOTIFICATION_CHAT_ID")]
        );
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+1234567890"), "***7890");
        assert_eq!(mask_phone("123"), "****");
        assert_eq!(mask_phone("+7 (999) 123-45-67"), "***4567");
    }
}
