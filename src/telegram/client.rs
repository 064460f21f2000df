//! Telegram client wrapper for the gift responder.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use grammers_client::client::{LoginToken, PasswordToken};
use grammers_client::{
    Client, InputMessage, InvocationError, SenderPool, SignInError, Update, UpdatesConfiguration,
    sender,
};
use grammers_mtsender::RpcError;
use grammers_session::storages::SqliteSession;
use grammers_session::types::PeerRef;
use grammers_tl_types as tl;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::SendThrottle;
use crate::config::{NotificationTarget, TelegramConfig, mask_phone};
use crate::gifts::GiftDetails;
use crate::gifts::classifier::parse_gift_details;

/// Updates buffered between the client and the detector loop.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Updates the client library may queue before dropping.
const UPDATE_QUEUE_LIMIT: usize = 2048;

/// How long a fetched star gift catalogue stays fresh.
const CATALOG_TTL: Duration = Duration::from_secs(300);

/// Receiving side of the forwarded update stream.
pub type UpdateReceiver = mpsc::Receiver<Update>;

/// Starts forwarding updates once the detector asks for them.
type UpdatePump = Box<dyn FnOnce(Client) -> UpdateReceiver + Send>;

/// Star gifts by id.
pub type GiftCatalog = HashMap<i64, GiftDetails>;

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Not authorized. Please sign in first.")]
    NotAuthorized,

    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Invalid login code")]
    InvalidCode,

    #[error("Password required for 2FA")]
    PasswordRequired(PasswordToken),

    #[error("Invalid password")]
    InvalidPassword(PasswordToken),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Chat {0} not found among dialogs or usernames")]
    PeerNotFound(String),

    #[error("API invocation error: {0}")]
    Invocation(String),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        if let InvocationError::Rpc(rpc) = &err
            && let Some(seconds) = flood_wait_seconds(rpc)
        {
            return Self::FloodWait(seconds);
        }

        Self::Invocation(err.to_string())
    }
}

/// Seconds to wait if `rpc` asks the client to slow down.
///
/// `FLOOD_WAIT_35` arrives split into the name `FLOOD_WAIT` and the value 35.
/// `FLOOD_PREMIUM_WAIT_<n>` and `SLOWMODE_WAIT_<n>` carry their wait the same way.
fn flood_wait_seconds(rpc: &RpcError) -> Option<u32> {
    let name = rpc.name.as_str();
    let is_wait = (name.starts_with("FLOOD_") && name.ends_with("_WAIT")) || name == "SLOWMODE_WAIT";
    rpc.value.filter(|_| is_wait)
}

/// The logged-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountInfo {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl AccountInfo {
    /// `@username (id)`, or `name (id)` when there is no username.
    #[must_use]
    pub fn label(&self) -> String {
        match (&self.username, &self.first_name) {
            (Some(username), _) => format!("@{username} ({})", self.id),
            (None, Some(name)) => format!("{name} ({})", self.id),
            (None, None) => self.id.to_string(),
        }
    }
}

#[derive(Debug)]
struct CachedCatalog {
    fetched_at: Instant,
    gifts: Arc<GiftCatalog>,
}

/// High-level Telegram client wrapper.
pub struct TelegramBot {
    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Throttle for outgoing replies.
    throttle: SendThrottle,

    /// Pending update stream, consumed by [`TelegramBot::take_updates`].
    updates: Mutex<Option<UpdatePump>>,

    catalog: RwLock<Option<CachedCatalog>>,

    /// Peer resolved for the notification target.
    notify_peer: RwLock<Option<(NotificationTarget, PeerRef)>>,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl TelegramBot {
    /// Connects to Telegram with the given configuration.
    ///
    /// The session directory is created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::Session`] if the session file cannot be
    /// opened and [`TelegramError::Connection`] if the first request fails.
    pub async fn connect(
        config: &TelegramConfig,
        min_send_interval: Duration,
    ) -> Result<Self, TelegramError> {
        info!("Connecting to Telegram ({})...", config.redacted());

        tokio::fs::create_dir_all(&config.session_dir)
            .await
            .map_err(|e| TelegramError::Session(e.to_string()))?;

        let session = Arc::new(
            SqliteSession::open(config.session_path())
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), config.api_id);

        let client = Client::new(handle.clone());

        // Spawn the sender pool runner
        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let pump: UpdatePump = Box::new(move |client: Client| {
            let (tx, rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
            tokio::spawn(async move {
                let mut stream = client.stream_updates(
                    updates,
                    UpdatesConfiguration {
                        catch_up: false,
                        update_queue_limit: Some(UPDATE_QUEUE_LIMIT),
                    },
                );
                loop {
                    match stream.next().await {
                        Ok(update) => {
                            if tx.send(update).await.is_err() {
                                debug!("Update receiver dropped, stopping forwarder");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Update stream ended: {}", e);
                            break;
                        }
                    }
                }
            });
            rx
        });

        let is_authorized = client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))?;

        info!("Connected to Telegram. Authorized: {}", is_authorized);

        Ok(Self {
            client,
            handle: handle.thin,
            throttle: SendThrottle::new(min_send_interval),
            updates: Mutex::new(Some(pump)),
            catalog: RwLock::new(None),
            notify_peer: RwLock::new(None),
            _pool_task: pool_task,
        })
    }

    /// Checks if the client is authorized.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::Connection`] if Telegram cannot be reached.
    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Starts forwarding updates and returns the receiving side.
    ///
    /// Returns `None` on every call after the first.
    pub async fn take_updates(&self) -> Option<UpdateReceiver> {
        let pump = self.updates.lock().await.take()?;
        Some(pump(self.client.clone()))
    }

    /// Requests a login code to be sent to the phone number.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::FloodWait`] when Telegram rate limits code
    /// requests, [`TelegramError::SignInFailed`] otherwise.
    pub async fn request_login_code(
        &self,
        phone: &str,
        api_hash: &str,
    ) -> Result<LoginToken, TelegramError> {
        info!("Requesting login code for phone: {}...", mask_phone(phone));

        self.client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| {
                let err: TelegramError = e.into();
                match err {
                    TelegramError::Invocation(msg) => TelegramError::SignInFailed(msg),
                    other => other,
                }
            })
    }

    /// Signs in with the login code.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::PasswordRequired`] when 2FA is enabled,
    /// [`TelegramError::InvalidCode`] for a wrong code, or
    /// [`TelegramError::SignInFailed`].
    pub async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<(), TelegramError> {
        info!("Signing in with login code...");

        match self.client.sign_in(token, code.trim()).await {
            Ok(_user) => {
                info!("Successfully signed in!");
                Ok(())
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                debug!("2FA password required, hint: {:?}", password_token.hint());
                Err(TelegramError::PasswordRequired(password_token))
            }
            Err(SignInError::InvalidCode) => Err(TelegramError::InvalidCode),
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Checks the 2FA password.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::InvalidPassword`] with a fresh token when the
    /// password is wrong.
    pub async fn check_password(
        &self,
        password_token: PasswordToken,
        password: &str,
    ) -> Result<(), TelegramError> {
        info!("Checking 2FA password...");

        match self.client.check_password(password_token, password).await {
            Ok(_user) => {
                info!("Successfully authenticated with 2FA!");
                Ok(())
            }
            Err(SignInError::InvalidPassword(token)) => Err(TelegramError::InvalidPassword(token)),
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Fetches the logged-in account.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::NotAuthorized`] before sign in.
    pub async fn me(&self) -> Result<AccountInfo, TelegramError> {
        if !self.is_authorized().await? {
            return Err(TelegramError::NotAuthorized);
        }

        let request = tl::functions::users::GetUsers {
            id: vec![tl::enums::InputUser::UserSelf],
        };

        match self.client.invoke(&request).await?.first() {
            Some(tl::enums::User::User(user)) => Ok(AccountInfo {
                id: user.id,
                username: user.username.clone(),
                first_name: user.first_name.clone(),
            }),
            _ => Err(TelegramError::Invocation("users.getUsers returned no user".to_owned())),
        }
    }

    /// Builds an outgoing message.
    #[must_use]
    pub fn compose_message(text: &str, html: bool, link_preview: bool) -> InputMessage {
        let message = if html {
            InputMessage::new().html(text)
        } else {
            InputMessage::new().text(text)
        };
        message.link_preview(link_preview)
    }

    /// Throttle every outgoing message of this client goes through.
    #[must_use]
    pub const fn throttle(&self) -> &SendThrottle {
        &self.throttle
    }

    /// Sends a message to the notification chat.
    ///
    /// Does not wait for the throttle; callers go through
    /// [`send_with_retries`](super::send_with_retries).
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::PeerNotFound`] if the target cannot be
    /// resolved, or the send error.
    pub async fn send_to_chat(
        &self,
        target: &NotificationTarget,
        message: InputMessage,
    ) -> Result<(), TelegramError> {
        let peer = self.resolve_target(target).await?;
        self.client.send_message(peer, message).await?;
        Ok(())
    }

    async fn resolve_target(&self, target: &NotificationTarget) -> Result<PeerRef, TelegramError> {
        if let Some((resolved_for, peer)) = self.notify_peer.read().await.as_ref()
            && resolved_for == target
        {
            return Ok(peer.clone());
        }

        let peer = match target {
            NotificationTarget::Username(name) => match self.client.resolve_username(name).await? {
                Some(peer) => peer.to_ref().await,
                None => None,
            },
            // Saved Messages is the dialog with the account itself.
            NotificationTarget::SavedMessages => self.find_dialog(self.me().await?.id).await?,
            NotificationTarget::ChatId(id) => self.find_dialog(*id).await?,
        }
        .ok_or_else(|| TelegramError::PeerNotFound(target.to_string()))?;

        debug!("Notification chat {} resolved", target);
        *self.notify_peer.write().await = Some((target.clone(), peer.clone()));
        Ok(peer)
    }

    /// Looks up a dialog by its Bot API style id.
    async fn find_dialog(&self, dialog_id: i64) -> Result<Option<PeerRef>, TelegramError> {
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await? {
            let peer = dialog.peer();
            if peer.id().bot_api_dialog_id() == dialog_id {
                return Ok(peer.to_ref().await);
            }
        }
        Ok(None)
    }

    /// Star gift catalogue from `payments.getStarGifts`, cached for five minutes.
    ///
    /// # Errors
    ///
    /// Returns the invocation error when the catalogue cannot be fetched.
    pub async fn star_gift_catalog(&self) -> Result<Arc<GiftCatalog>, TelegramError> {
        if let Some(cached) = self.catalog.read().await.as_ref()
            && cached.fetched_at.elapsed() < CATALOG_TTL
        {
            return Ok(Arc::clone(&cached.gifts));
        }

        debug!("Fetching star gift catalogue...");
        let request = tl::functions::payments::GetStarGifts { hash: 0 };

        let gifts: GiftCatalog = match self.client.invoke(&request).await? {
            tl::enums::payments::StarGifts::Gifts(list) => list
                .gifts
                .iter()
                .map(|gift| parse_gift_details(&format!("{gift:?}")))
                .filter_map(|details| details.id.map(|id| (id, details)))
                .collect(),
            other => {
                debug!("Star gift catalogue not returned: {:?}", other);
                GiftCatalog::new()
            }
        };

        info!("Star gift catalogue: {} gifts", gifts.len());
        let gifts = Arc::new(gifts);
        *self.catalog.write().await = Some(CachedCatalog {
            fetched_at: Instant::now(),
            gifts: Arc::clone(&gifts),
        });
        Ok(gifts)
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_error(code: i32, name: &str, value: Option<u32>) -> InvocationError {
        InvocationError::Rpc(RpcError {
            code,
            name: name.to_owned(),
            value,
            caused_by: None,
        })
    }

    #[test]
    fn test_flood_wait_from_rpc_error() {
        assert!(matches!(
            TelegramError::from(rpc_error(420, "FLOOD_WAIT", Some(35))),
            TelegramError::FloodWait(35)
        ));
        assert!(matches!(
            TelegramError::from(rpc_error(420, "FLOOD_PREMIUM_WAIT", Some(7))),
            TelegramError::FloodWait(7)
        ));
        assert!(matches!(
            TelegramError::from(rpc_error(420, "SLOWMODE_WAIT", Some(60))),
            TelegramError::FloodWait(60)
        ));
    }

    #[test]
    fn test_other_rpc_errors_are_not_flood_waits() {
        // A value on an unrelated error is not a wait time.
        assert!(matches!(
            TelegramError::from(rpc_error(400, "CHANNEL_PRIVATE", None)),
            TelegramError::Invocation(_)
        ));
        assert!(matches!(
            TelegramError::from(rpc_error(303, "NETWORK_MIGRATE", Some(2))),
            TelegramError::Invocation(_)
        ));
        assert!(matches!(
            TelegramError::from(rpc_error(420, "FLOOD_WAIT", None)),
            TelegramError::Invocation(_)
        ));
    }

    #[test]
    fn test_account_label() {
        let mut account = AccountInfo {
            id: 42,
            username: Some("me".to_owned()),
            first_name: Some("Me".to_owned()),
        };
        assert_eq!(account.label(), "@me (42)");

        account.username = None;
        assert_eq!(account.label(), "Me (42)");

        account.first_name = None;
        assert_eq!(account.label(), "42");
    }
}
