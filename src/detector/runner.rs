//! Gift detector loop.
//!
//! The loop multiplexes three sources:
//! 1. Telegram updates: new messages go through the [`GiftProcessor`];
//!    gifts are recorded and answered, anything else gift-shaped is counted
//! 2. Control messages from the controller (shutdown)
//! 3. The stats ticker, when enabled
//!
//! Replies are retried up to `MAX_RETRIES` times. A flood wait blocks the
//! send throttle until it expires; other errors back off for one second.
//! When a notification chat is configured, each answered gift is also
//! summarised there through the same throttle.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, mpsc};
use tokio::time::interval;
use tracing::{debug, error, info, trace, warn};

use super::history::{GiftHistory, GiftLog};
use super::processor::{GiftProcessor, IgnoreReason, Verdict, enrich_from_catalog};
use super::state::DetectorStatus;
use crate::config::{DetectionRules, DetectorSettings, NotificationTarget};
use crate::gifts::{
    FormatOptions, GiftInfo, IncomingMessage, format_gift_response, format_notification,
};
use crate::telegram::convert::{self, PeerNames};
use crate::telegram::{TelegramBot, TelegramError, Update, UpdateReceiver, send_with_retries};

/// Back-off after a failed send that was not a flood wait.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Messages that can be sent to the detector loop.
#[derive(Debug, Clone)]
pub enum DetectorMessage {
    /// Stop the detector.
    Shutdown,
}

/// Texts to send for one answered gift.
#[derive(Debug)]
struct Answer {
    reply: String,
    notification: Option<String>,
}

/// Gift detector bound to one connected client.
pub struct GiftDetector {
    bot: Arc<TelegramBot>,
    processor: GiftProcessor,
    settings: Arc<DetectorSettings>,
    rules: Arc<DetectionRules>,
    status: Arc<RwLock<DetectorStatus>>,
    history: Arc<RwLock<GiftHistory>>,
    gift_log: Option<GiftLog>,
    notify: Option<NotificationTarget>,
}

impl GiftDetector {
    /// Creates a new gift detector.
    #[must_use]
    pub fn new(
        bot: Arc<TelegramBot>,
        settings: Arc<DetectorSettings>,
        rules: Arc<DetectionRules>,
        status: Arc<RwLock<DetectorStatus>>,
        history: Arc<RwLock<GiftHistory>>,
    ) -> Self {
        let gift_log = settings
            .save_gift_logs
            .then(|| GiftLog::new(settings.gift_logs_file.clone()));
        let notify = settings.notification_target();

        Self {
            bot,
            processor: GiftProcessor::new(Arc::clone(&settings), Arc::clone(&rules)),
            settings,
            rules,
            status,
            history,
            gift_log,
            notify,
        }
    }

    /// Runs the detector loop until shutdown or until the update stream ends.
    pub async fn run(mut self, mut updates: UpdateReceiver, mut rx: mpsc::Receiver<DetectorMessage>) {
        info!("Gift detector started, waiting for gifts...");

        let stats_period = self.settings.stats_interval();
        let mut stats_timer = interval(stats_period.unwrap_or(Duration::from_secs(3600)));
        // The first tick completes immediately.
        stats_timer.tick().await;

        loop {
            tokio::select! {
                update = updates.recv() => {
                    if let Some(update) = update {
                        self.handle_update(update).await;
                    } else {
                        warn!("Update stream closed");
                        self.status.write().await.mark_error("Update stream closed");
                        break;
                    }
                }
                msg = rx.recv() => {
                    match msg {
                        Some(DetectorMessage::Shutdown) | None => {
                            info!("Gift detector shutting down");
                            break;
                        }
                    }
                }
                _ = stats_timer.tick(), if stats_period.is_some() => {
                    self.log_stats().await;
                }
            }
        }
    }

    async fn handle_update(&mut self, update: Update) {
        match update {
            Update::NewMessage(msg) => {
                let sender = msg.sender();
                let names = PeerNames {
                    chat_title: msg
                        .peer()
                        .ok()
                        .and_then(|peer| peer.name().map(str::to_owned)),
                    sender_username: sender
                        .as_ref()
                        .and_then(|s| s.username().map(str::to_owned)),
                    sender_name: sender.as_ref().and_then(|s| s.name().map(str::to_owned)),
                };

                let Some(incoming) = convert::from_raw(&msg.raw, &names) else {
                    return;
                };

                let Some(answer) = self.process(&incoming).await else {
                    return;
                };

                let html = self.settings.use_html_formatting;
                let link_preview = !self.settings.disable_web_page_preview;
                let reply = answer.reply.as_str();
                if self
                    .deliver("reply", || {
                        msg.reply(TelegramBot::compose_message(reply, html, link_preview))
                    })
                    .await
                {
                    self.status.write().await.counters.responses_sent += 1;
                    tokio::time::sleep(self.settings.response_delay()).await;
                }

                if let (Some(target), Some(text)) = (&self.notify, &answer.notification) {
                    let bot = &self.bot;
                    self.deliver("notification", || {
                        bot.send_to_chat(target, TelegramBot::compose_message(text, html, false))
                    })
                    .await;
                }
            }
            Update::Raw(raw) => {
                let dump = format!("{raw:?}");
                if is_gift_update(&dump) {
                    self.status.write().await.counters.raw_gift_updates += 1;
                    info!("Raw gift update: {}", truncate(&dump, 200));
                } else {
                    trace!("Skipping raw update: {}", truncate(&dump, 80));
                }
            }
            // Edits and deletions never count as new gifts.
            other => trace!("Skipping update: {}", truncate(&format!("{other:?}"), 80)),
        }
    }

    /// Evaluates one message; returns the texts to send when it should be answered.
    async fn process(&mut self, incoming: &IncomingMessage) -> Option<Answer> {
        match self.processor.evaluate(incoming, Instant::now()) {
            Verdict::Outgoing | Verdict::NotGift => None,
            Verdict::Duplicate => {
                debug!("Duplicate message {} in chat {}", incoming.id, incoming.chat.id);
                None
            }
            Verdict::Ignored(reason) => {
                let mut status = self.status.write().await;
                match reason {
                    IgnoreReason::User => status.counters.ignored_users += 1,
                    IgnoreReason::Chat => status.counters.ignored_chats += 1,
                }
                debug!("Ignored message {} ({:?})", incoming.id, reason);
                None
            }
            Verdict::Throttled(info) => {
                info!(
                    "Gift from {:?} throttled (cooldown {}s)",
                    info.sender_id, self.settings.min_response_interval_secs
                );
                self.status.write().await.counters.throttled += 1;
                self.record(*info).await;
                None
            }
            Verdict::Respond(mut info) => {
                self.enrich(&mut info).await;
                info!(
                    "🎁 Gift detected: {} via {:?} from {:?} in chat {}",
                    info.gift_type, info.detection_method, info.sender_id, info.chat_id
                );

                let processed = self.record((*info).clone()).await;
                let html = self.settings.use_html_formatting;
                let opts = FormatOptions {
                    html,
                    processed: self.settings.show_stats_in_response.then_some(processed),
                };
                Some(Answer {
                    reply: format_gift_response(&info, opts),
                    notification: self
                        .notify
                        .is_some()
                        .then(|| format_notification(&info, html)),
                })
            }
        }
    }

    /// Fills gaps in the gift details from the star gift catalogue.
    async fn enrich(&self, info: &mut GiftInfo) {
        if info.details.id.is_none()
            || (info.details.stars.is_some() && info.details.title.is_some())
        {
            return;
        }

        match self.bot.star_gift_catalog().await {
            Ok(catalog) => enrich_from_catalog(info, &catalog, &self.rules),
            Err(e) => debug!("Star gift catalogue unavailable: {}", e),
        }
    }

    /// Counts, stores and logs a gift. Returns the updated gift count.
    async fn record(&self, info: GiftInfo) -> u64 {
        let processed = {
            let mut status = self.status.write().await;
            status.record_gift(&info);
            status.counters.gifts_detected
        };

        if let Some(log) = &self.gift_log
            && let Err(e) = log.append(&info).await
        {
            warn!("Failed to write gift log {}: {}", log.path().display(), e);
        }

        self.history.write().await.push(info);
        processed
    }

    /// Sends with retries; a send that fails every attempt is counted as an error.
    async fn deliver<F, Fut, T, E>(&self, what: &str, send: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<TelegramError>,
    {
        let attempts = self.settings.max_retries.max(1);

        match send_with_retries(self.bot.throttle(), attempts, RETRY_BACKOFF, send).await {
            Ok(attempt) => {
                debug!("{} sent (attempt {}/{})", what, attempt, attempts);
                true
            }
            Err(e) => {
                error!("Failed to send {} after {} attempts: {}", what, attempts, e);
                self.status
                    .write()
                    .await
                    .record_send_failure(format!("{what} failed after {attempts} attempts: {e}"));
                false
            }
        }
    }

    async fn log_stats(&self) {
        let status = self.status.read().await;
        let c = status.counters;
        info!(
            "📊 Stats: gifts={} (star={}, unique={}, other={}), replies={}, errors={}, \
             throttled={}, ignored users={} chats={}, raw gift updates={}, uptime={}s",
            c.gifts_detected,
            c.star_gifts,
            c.unique_gifts,
            c.regular_gifts,
            c.responses_sent,
            c.errors,
            c.throttled,
            c.ignored_users,
            c.ignored_chats,
            c.raw_gift_updates,
            status.uptime().map_or(0, |d| d.as_secs())
        );
    }
}

impl std::fmt::Debug for GiftDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GiftDetector")
            .field("processor", &self.processor)
            .field("gift_log", &self.gift_log)
            .finish_non_exhaustive()
    }
}

/// Returns true if an update's debug dump carries a gift constructor.
fn is_gift_update(dump: &str) -> bool {
    let lower = dump.to_lowercase();
    lower.contains("stargift") || lower.contains("messageactiongift")
}

/// Truncates a string for display.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
