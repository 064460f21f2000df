//! Detector lifecycle and the login state machine.
//!
//! ```text
//! Idle ──start──▶ Running                      (session already authorised)
//!   │               ▲
//!   └──start──▶ AwaitingCode ──code──▶ Running
//!                   │   ▲ (invalid code)
//!                   └───┴──code──▶ AwaitingPassword ──password──▶ Running
//!                                      ▲ (invalid password) │
//!                                      └────────────────────┘
//! ```
//!
//! `stop` is accepted in every stage. All control operations are serialised
//! through one async mutex.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::auth::{self, LoginStage, LoginStep};
use super::history::GiftHistory;
use super::processor::{GiftProcessor, SimulateRequest};
use super::runner::{DetectorMessage, GiftDetector};
use super::state::{AuthState, DetectorStatus, StatusSnapshot};
use crate::config::{DetectionRules, DetectorSettings, TelegramConfig};
use crate::gifts::{FormatOptions, GiftInfo, format_gift_response};
use crate::telegram::{
    GiftCatalog, LoginToken, PasswordToken, SessionError, SessionInfo, SessionStore, TelegramBot,
    TelegramError, is_valid_session_name,
};

/// How long `stop` waits for the detector loop before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors of control operations.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Detector is already running")]
    AlreadyRunning,

    #[error("Detector is not running")]
    NotRunning,

    #[error("No login in progress, call start first")]
    NoPendingAuth,

    #[error("Login code is required")]
    MissingCode,

    #[error("2FA password is required")]
    PasswordRequired,

    #[error("Phone number is required to log in")]
    PhoneRequired,

    #[error("Invalid login code")]
    InvalidCode,

    #[error("Invalid 2FA password")]
    InvalidPassword,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No previous configuration to restart with")]
    NothingToRestart,

    #[error("Session '{0}' is used by the active client")]
    SessionInUse(String),

    #[error("Simulated message was not recognised as a gift (check the detection toggles)")]
    NotAGift,

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Telegram(TelegramError),
}

impl From<TelegramError> for ControlError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::FloodWait(seconds) => Self::FloodWait(seconds),
            TelegramError::InvalidCode => Self::InvalidCode,
            TelegramError::InvalidPassword(_) => Self::InvalidPassword,
            other => Self::Telegram(other),
        }
    }
}

/// A simulated gift and the reply it would get.
#[derive(Debug, Clone, Serialize)]
pub struct Simulation {
    pub gift: GiftInfo,
    pub response: String,
}

enum Stage {
    Idle,
    Login(LoginStage<LoginToken, PasswordToken>),
    Running {
        tx: mpsc::Sender<DetectorMessage>,
        task: JoinHandle<()>,
    },
}

struct Inner {
    stage: Stage,
    bot: Option<Arc<TelegramBot>>,
    /// Last configuration passed to `start`, reused by `restart`.
    config: Option<TelegramConfig>,
}

/// Owns the client, the login stage and the detector task.
pub struct DetectorController {
    settings: Arc<DetectorSettings>,
    rules: Arc<DetectionRules>,
    status: Arc<RwLock<DetectorStatus>>,
    history: Arc<RwLock<GiftHistory>>,
    sessions: SessionStore,
    simulator: GiftProcessor,
    inner: Mutex<Inner>,
}

impl DetectorController {
    #[must_use]
    pub fn new(
        settings: DetectorSettings,
        rules: DetectionRules,
        session_dir: impl Into<PathBuf>,
    ) -> Self {
        let settings = Arc::new(settings);
        let rules = Arc::new(rules);

        Self {
            history: Arc::new(RwLock::new(GiftHistory::new(settings.history_limit))),
            simulator: GiftProcessor::new(Arc::clone(&settings), Arc::clone(&rules)),
            status: Arc::new(RwLock::new(DetectorStatus::new())),
            sessions: SessionStore::new(session_dir),
            settings,
            rules,
            inner: Mutex::new(Inner {
                stage: Stage::Idle,
                bot: None,
                config: None,
            }),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// Connects and either starts detecting or asks Telegram for a login code.
    ///
    /// A pending login is discarded and started over.
    pub async fn start(&self, mut config: TelegramConfig) -> Result<AuthState, ControlError> {
        let problems = config.validate();
        if !problems.is_empty() {
            let joined = problems
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ControlError::InvalidConfig(joined));
        }
        if !is_valid_session_name(&config.session_name) {
            return Err(ControlError::InvalidConfig(format!(
                "invalid session name '{}'",
                config.session_name
            )));
        }
        config.session_dir = self.sessions.dir().to_path_buf();

        let mut inner = self.inner.lock().await;
        if Self::is_live(&inner.stage) {
            return Err(ControlError::AlreadyRunning);
        }
        self.teardown(&mut inner).await;

        info!("Starting detector ({})", config.redacted());
        let result = self.connect_and_login(&mut inner, &config).await;
        inner.config = Some(config);

        match result {
            Ok(state) => Ok(state),
            Err(e) => {
                error!("Failed to start detector: {}", e);
                self.status.write().await.mark_error(e.to_string());
                self.teardown(&mut inner).await;
                Err(e)
            }
        }
    }

    async fn connect_and_login(
        &self,
        inner: &mut Inner,
        config: &TelegramConfig,
    ) -> Result<AuthState, ControlError> {
        let bot = Arc::new(TelegramBot::connect(config, self.settings.response_delay()).await?);
        inner.bot = Some(Arc::clone(&bot));

        if bot.is_authorized().await? {
            return self.launch(inner, bot).await;
        }

        let phone = config
            .phone_number
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or(ControlError::PhoneRequired)?;

        let token = bot.request_login_code(phone, &config.api_hash).await?;
        inner.stage = Stage::Login(LoginStage::AwaitingCode(token));
        self.status.write().await.auth = AuthState::SmsRequired;
        info!("Login code sent, waiting for complete_auth");
        Ok(AuthState::SmsRequired)
    }

    /// Completes a pending login with the SMS code and/or 2FA password.
    pub async fn complete_auth(
        &self,
        code: Option<String>,
        password: Option<String>,
    ) -> Result<AuthState, ControlError> {
        let code = code.map(|c| c.trim().to_owned()).filter(|c| !c.is_empty());
        let password = password.filter(|p| !p.is_empty());

        let mut inner = self.inner.lock().await;
        let Some(bot) = inner.bot.clone() else {
            return Err(ControlError::NoPendingAuth);
        };

        let stage = match std::mem::replace(&mut inner.stage, Stage::Idle) {
            Stage::Login(stage) => stage,
            running @ Stage::Running { .. } => {
                inner.stage = running;
                return Err(ControlError::AlreadyRunning);
            }
            Stage::Idle => return Err(ControlError::NoPendingAuth),
        };

        match auth::advance(bot.as_ref(), stage, code.as_deref(), password.as_deref()).await {
            LoginStep::Authorized => self.launch(&mut inner, bot).await,
            LoginStep::Pending(stage, result) => {
                self.status.write().await.auth = stage.auth_state();
                inner.stage = Stage::Login(stage);
                result
            }
            LoginStep::Failed(e) => {
                error!("Login failed: {}", e);
                self.status.write().await.mark_error(e.to_string());
                self.teardown(&mut inner).await;
                Err(e)
            }
        }
    }

    /// Spawns the detector loop on an authorised client.
    async fn launch(
        &self,
        inner: &mut Inner,
        bot: Arc<TelegramBot>,
    ) -> Result<AuthState, ControlError> {
        let account = match bot.me().await {
            Ok(account) => Some(account.label()),
            Err(e) => {
                warn!("Could not fetch account info: {}", e);
                None
            }
        };

        let updates = bot.take_updates().await.ok_or_else(|| {
            ControlError::Telegram(TelegramError::Connection(
                "update stream already consumed".to_owned(),
            ))
        })?;

        let detector = GiftDetector::new(
            Arc::clone(&bot),
            Arc::clone(&self.settings),
            Arc::clone(&self.rules),
            Arc::clone(&self.status),
            Arc::clone(&self.history),
        );

        let (tx, rx) = mpsc::channel(8);
        info!(
            "Detector running as {}",
            account.as_deref().unwrap_or("unknown account")
        );
        self.status.write().await.mark_running(account);
        let task = tokio::spawn(detector.run(updates, rx));

        inner.stage = Stage::Running { tx, task };
        Ok(AuthState::Running)
    }

    /// Stops the detector and disconnects. Returns false if nothing was active.
    pub async fn stop(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let was_active = !matches!(inner.stage, Stage::Idle) || inner.bot.is_some();
        self.teardown(&mut inner).await;

        if was_active {
            self.status.write().await.mark_stopped();
            info!("Detector stopped");
        }
        was_active
    }

    /// Stops and starts again with the last configuration.
    pub async fn restart(&self) -> Result<AuthState, ControlError> {
        let config = self
            .inner
            .lock()
            .await
            .config
            .clone()
            .ok_or(ControlError::NothingToRestart)?;

        self.stop().await;
        self.start(config).await
    }

    /// Ends the detector task and drops the client, leaving the stage idle.
    async fn teardown(&self, inner: &mut Inner) {
        if let Stage::Running { tx, mut task } = std::mem::replace(&mut inner.stage, Stage::Idle) {
            if tx.send(DetectorMessage::Shutdown).await.is_err() {
                info!("Detector loop already finished");
            }
            if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
                warn!("Detector loop did not stop in time, aborting");
                task.abort();
            }
        }

        if let Some(bot) = inner.bot.take() {
            bot.disconnect();
        }
    }

    /// Returns true while the detector task is alive.
    fn is_live(stage: &Stage) -> bool {
        matches!(stage, Stage::Running { task, .. } if !task.is_finished())
    }

    /// Current status with uptime.
    pub async fn status(&self) -> StatusSnapshot {
        self.status.read().await.snapshot()
    }

    /// Up to `limit` most recent gifts, newest first.
    pub async fn history(&self, limit: usize) -> Vec<GiftInfo> {
        self.history.read().await.recent(limit)
    }

    /// Number of gifts in the history.
    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    /// Saved sessions plus the name of the one in use, if any.
    pub async fn sessions(&self) -> Result<(Vec<SessionInfo>, Option<String>), ControlError> {
        let active = self.active_session().await;
        Ok((self.sessions.list().await?, active))
    }

    async fn active_session(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .bot
            .as_ref()
            .and(inner.config.as_ref())
            .map(|c| c.session_name.clone())
    }

    /// Deletes a saved session, refusing the one the client is using.
    pub async fn delete_session(&self, name: &str) -> Result<(), ControlError> {
        if self.active_session().await.as_deref() == Some(name) {
            return Err(ControlError::SessionInUse(name.to_owned()));
        }
        self.sessions.delete(name).await?;
        Ok(())
    }

    /// Classifies a synthetic gift and records it in the history.
    pub async fn simulate_gift(&self, request: &SimulateRequest) -> Result<Simulation, ControlError> {
        let gift = self
            .simulator
            .simulate(request)
            .ok_or(ControlError::NotAGift)?;

        let response = format_gift_response(
            &gift,
            FormatOptions {
                html: self.settings.use_html_formatting,
                processed: None,
            },
        );
        info!("Simulated {} gift", gift.gift_type);
        self.history.write().await.push(gift.clone());

        Ok(Simulation { gift, response })
    }

    /// Star gift catalogue of the connected account.
    pub async fn catalog(&self) -> Result<Arc<GiftCatalog>, ControlError> {
        let bot = {
            let inner = self.inner.lock().await;
            if !Self::is_live(&inner.stage) {
                return Err(ControlError::NotRunning);
            }
            inner.bot.clone().ok_or(ControlError::NotRunning)?
        };
        Ok(bot.star_gift_catalog().await?)
    }
}

impl std::fmt::Debug for DetectorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorController")
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}
