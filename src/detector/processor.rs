//! Decides what to do with each incoming message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::state::{ProcessedCache, ResponseCooldown};
use crate::config::{DetectionRules, DetectorSettings};
use crate::gifts::classifier::{self, Detection};
use crate::gifts::{
    ChatInfo, ChatKind, DetectionMethod, GiftDetails, GiftInfo, GiftKind, IncomingMessage,
    MediaInfo, SenderInfo, ServiceAction,
};

/// Characters of message text kept in [`GiftInfo::text`].
const TEXT_PREVIEW_CHARS: usize = 200;

/// Why a message was skipped without classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    User,
    Chat,
}

/// Outcome of [`GiftProcessor::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Sent by this account.
    Outgoing,
    /// Same chat and message id seen before.
    Duplicate,
    Ignored(IgnoreReason),
    NotGift,
    /// A gift, but the sender was answered too recently.
    Throttled(Box<GiftInfo>),
    Respond(Box<GiftInfo>),
}

/// Parameters of a simulated gift.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulateRequest {
    /// Gift kind label (`star_gift`, `unique`, `premium`, ...). Defaults to a star gift.
    pub gift_type: Option<String>,
    pub gift_id: Option<i64>,
    pub stars: Option<i64>,
    pub title: Option<String>,
    pub sender_id: Option<i64>,
    pub sender_username: Option<String>,
    pub sender_name: Option<String>,
    /// Message text; used as-is for text gifts.
    pub text: Option<String>,
}

/// Stateful gift filter: de-duplication, ignore lists, classification, cooldown.
#[derive(Debug)]
pub struct GiftProcessor {
    settings: Arc<DetectorSettings>,
    rules: Arc<DetectionRules>,
    processed: ProcessedCache<(i64, i32)>,
    cooldown: ResponseCooldown,
}

impl GiftProcessor {
    #[must_use]
    pub fn new(settings: Arc<DetectorSettings>, rules: Arc<DetectionRules>) -> Self {
        Self {
            processed: ProcessedCache::new(settings.cache_size),
            cooldown: ResponseCooldown::new(settings.min_response_interval()),
            settings,
            rules,
        }
    }

    /// Runs one message through the pipeline.
    pub fn evaluate(&mut self, msg: &IncomingMessage, now: Instant) -> Verdict {
        if msg.outgoing {
            return Verdict::Outgoing;
        }

        if !self.processed.insert((msg.chat.id, msg.id)) {
            return Verdict::Duplicate;
        }

        let sender_id = msg.sender_id();
        if sender_id.is_some_and(|id| self.settings.ignored_users.contains(&id)) {
            return Verdict::Ignored(IgnoreReason::User);
        }
        if self.settings.ignored_chats.contains(&msg.chat.id) {
            return Verdict::Ignored(IgnoreReason::Chat);
        }

        let Some(detection) = classifier::classify(msg, &self.settings, &self.rules) else {
            return Verdict::NotGift;
        };

        let info = Box::new(build_gift_info(msg, detection, &self.rules));

        let throttle_key = sender_id.unwrap_or(msg.chat.id);
        if self.cooldown.try_acquire(throttle_key, now) {
            Verdict::Respond(info)
        } else {
            Verdict::Throttled(info)
        }
    }

    /// Builds a synthetic gift message and classifies it like a real one.
    ///
    /// Returns `None` when the enabled detection methods do not recognise it.
    #[must_use]
    pub fn simulate(&self, request: &SimulateRequest) -> Option<GiftInfo> {
        let msg = simulated_message(request);
        let detection = classifier::classify(&msg, &self.settings, &self.rules)?;

        let mut info = build_gift_info(&msg, detection, &self.rules);
        info.detection_method = DetectionMethod::Simulated;
        if info.details.title.is_none() {
            info.details.title.clone_from(&request.title);
        }
        Some(info)
    }
}

/// Assembles a [`GiftInfo`] from a classified message.
#[must_use]
pub fn build_gift_info(
    msg: &IncomingMessage,
    detection: Detection,
    rules: &DetectionRules,
) -> GiftInfo {
    let (raw_type, mut details) = if let Some(action) = &msg.action {
        (
            Some(action.type_name.clone()),
            classifier::parse_gift_details(&action.dump),
        )
    } else if let Some(media) = &msg.media {
        (
            Some(media.type_name.clone()),
            classifier::parse_gift_details(&media.dump),
        )
    } else {
        (None, GiftDetails::default())
    };

    if details.stars.is_none() {
        details.stars = classifier::extract_price_from_text(&msg.text);
    }
    if detection.kind == GiftKind::UniqueGift {
        details.unique = true;
    }

    let text = msg.text.trim();
    let text: Option<String> =
        (!text.is_empty()).then(|| text.chars().take(TEXT_PREVIEW_CHARS).collect());

    GiftInfo {
        message_id: msg.id,
        chat_id: msg.chat.id,
        chat_type: msg.chat.kind,
        chat_title: msg.chat.title.clone(),
        sender_id: msg.sender_id(),
        sender_username: msg.sender.as_ref().and_then(|s| s.username.clone()),
        sender_name: msg.sender.as_ref().and_then(SenderInfo::full_name),
        date: msg.date,
        gift_type: detection.kind,
        raw_type,
        detection_method: detection.method,
        rare: classifier::is_rare(&details, rules),
        details,
        text,
    }
}

/// Fills missing gift attributes from the star gift catalogue.
pub fn enrich_from_catalog(
    info: &mut GiftInfo,
    catalog: &HashMap<i64, GiftDetails>,
    rules: &DetectionRules,
) {
    if let Some(entry) = info.details.id.and_then(|id| catalog.get(&id)) {
        info.details.fill_from(entry);
        info.rare = classifier::is_rare(&info.details, rules);
    }
}

/// Constructor name used for a simulated gift of `kind`.
const fn simulated_action(kind: GiftKind) -> Option<(&'static str, &'static str)> {
    match kind {
        GiftKind::StarGift => Some(("StarGift", "MessageActionStarGift")),
        GiftKind::UniqueGift => Some(("StarGiftUnique", "MessageActionStarGiftUnique")),
        GiftKind::PremiumGift => Some(("GiftPremium", "MessageActionGiftPremium")),
        GiftKind::GiftCode => Some(("GiftCode", "MessageActionGiftCode")),
        GiftKind::StarsGift => Some(("GiftStars", "MessageActionGiftStars")),
        GiftKind::ServiceGift => Some(("GiftTon", "MessageActionGiftTon")),
        GiftKind::MediaGift | GiftKind::TextMention => None,
    }
}

fn simulated_message(request: &SimulateRequest) -> IncomingMessage {
    let kind = request
        .gift_type
        .as_deref()
        .and_then(GiftKind::parse)
        .unwrap_or(GiftKind::StarGift);
    let sender_id = request.sender_id.unwrap_or_default();

    let mut fields = Vec::new();
    if let Some(id) = request.gift_id {
        fields.push(format!("id: {id}"));
    }
    if let Some(stars) = request.stars {
        fields.push(format!("stars: {stars}"));
    }
    let body = format!("{{ {} }}", fields.join(", "));

    let (action, media) = match (kind, simulated_action(kind)) {
        (_, Some((variant, name))) => (
            Some(ServiceAction {
                type_name: name.to_owned(),
                dump: format!("{variant}({name} {{ gift: Gift(StarGift {body}) }})"),
            }),
            None,
        ),
        (GiftKind::MediaGift, None) => (
            None,
            Some(MediaInfo {
                type_name: "MessageMediaStarGift".to_owned(),
                dump: format!("StarGift(MessageMediaStarGift {body})"),
                file_name: None,
            }),
        ),
        _ => (None, None),
    };

    let text = request.text.clone().unwrap_or_else(|| {
        if kind == GiftKind::TextMention {
            "🎁 Someone sent you a gift".to_owned()
        } else {
            String::new()
        }
    });

    IncomingMessage {
        id: 0,
        chat: ChatInfo {
            id: sender_id,
            kind: ChatKind::Private,
            title: None,
        },
        sender: Some(SenderInfo {
            id: sender_id,
            username: request.sender_username.clone(),
            first_name: request.sender_name.clone(),
            last_name: None,
        }),
        date: Some(Utc::now()),
        text,
        action,
        media,
        entity_types: Vec::new(),
        outgoing: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn processor(settings: DetectorSettings) -> GiftProcessor {
        GiftProcessor::new(Arc::new(settings), Arc::new(DetectionRules::default()))
    }

    fn star_gift_message(id: i32, sender: i64) -> IncomingMessage {
        let mut msg = IncomingMessage::text(id, sender, "");
        msg.action = Some(ServiceAction {
            type_name: "MessageActionStarGift".to_owned(),
            dump: "StarGift(MessageActionStarGift { gift: Gift(StarGift { limited: true, \
                   id: 42, stars: 50, availability_total: Some(1000) }), convert_stars: Some(40) })"
                .to_owned(),
        });
        msg
    }

    #[test]
    fn test_outgoing_skipped() {
        let mut p = processor(DetectorSettings::default());
        let mut msg = star_gift_message(1, 10);
        msg.outgoing = true;
        assert_eq!(p.evaluate(&msg, Instant::now()), Verdict::Outgoing);
    }

    #[test]
    fn test_gift_produces_response() {
        let mut p = processor(DetectorSettings::default());
        let Verdict::Respond(info) = p.evaluate(&star_gift_message(1, 10), Instant::now()) else {
            panic!("expected a response");
        };
        assert_eq!(info.gift_type, GiftKind::StarGift);
        assert_eq!(info.raw_type.as_deref(), Some("MessageActionStarGift"));
        assert_eq!(info.details.id, Some(42));
        assert_eq!(info.details.stars, Some(50));
        assert_eq!(info.details.total_amount, Some(1000));
        assert!(info.details.limited);
        assert_eq!(info.sender_id, Some(10));
    }

    #[test]
    fn test_duplicate_message_is_dropped() {
        let mut p = processor(DetectorSettings::default());
        let now = Instant::now();
        assert!(matches!(
            p.evaluate(&star_gift_message(1, 10), now),
            Verdict::Respond(_)
        ));
        assert_eq!(p.evaluate(&star_gift_message(1, 10), now), Verdict::Duplicate);
    }

    #[test]
    fn test_ignored_user_and_chat() {
        let mut settings = DetectorSettings::default();
        settings.ignored_users.insert(10);
        settings.ignored_chats.insert(20);
        let mut p = processor(settings);

        assert_eq!(
            p.evaluate(&star_gift_message(1, 10), Instant::now()),
            Verdict::Ignored(IgnoreReason::User)
        );
        assert_eq!(
            p.evaluate(&star_gift_message(1, 20), Instant::now()),
            Verdict::Ignored(IgnoreReason::Chat)
        );
    }

    #[test]
    fn test_plain_text_is_not_gift() {
        let mut p = processor(DetectorSettings::default());
        let msg = IncomingMessage::text(1, 10, "hello there");
        assert_eq!(p.evaluate(&msg, Instant::now()), Verdict::NotGift);
    }

    #[test]
    fn test_sender_cooldown() {
        let mut p = processor(DetectorSettings::default());
        let start = Instant::now();

        assert!(matches!(
            p.evaluate(&star_gift_message(1, 10), start),
            Verdict::Respond(_)
        ));
        assert!(matches!(
            p.evaluate(&star_gift_message(2, 10), start + Duration::from_secs(1)),
            Verdict::Throttled(_)
        ));
        assert!(matches!(
            p.evaluate(&star_gift_message(3, 10), start + Duration::from_secs(6)),
            Verdict::Respond(_)
        ));
    }

    #[test]
    fn test_text_price_used_when_no_details() {
        let mut p = processor(DetectorSettings::default());
        let msg = IncomingMessage::text(1, 10, "Bob sent you a gift worth 25 stars");
        let Verdict::Respond(info) = p.evaluate(&msg, Instant::now()) else {
            panic!("expected a response");
        };
        assert_eq!(info.gift_type, GiftKind::TextMention);
        assert_eq!(info.details.stars, Some(25));
        assert_eq!(info.text.as_deref(), Some("Bob sent you a gift worth 25 stars"));
    }

    #[test]
    fn test_enrich_from_catalog() {
        let mut p = processor(DetectorSettings::default());
        let Verdict::Respond(mut info) = p.evaluate(&star_gift_message(1, 10), Instant::now())
        else {
            panic!("expected a response");
        };

        let catalog = HashMap::from([(
            42,
            GiftDetails {
                id: Some(42),
                stars: Some(15),
                title: Some("Rose".to_owned()),
                remaining_amount: Some(10),
                ..GiftDetails::default()
            },
        )]);
        let rules = DetectionRules {
            rare_gift_ids: vec![42],
            ..DetectionRules::default()
        };
        enrich_from_catalog(&mut info, &catalog, &rules);

        assert_eq!(info.details.stars, Some(50));
        assert_eq!(info.details.title.as_deref(), Some("Rose"));
        assert_eq!(info.details.remaining_amount, Some(10));
        assert!(info.rare);
    }

    #[test]
    fn test_simulate_star_gift() {
        let p = processor(DetectorSettings::default());
        let info = p
            .simulate(&SimulateRequest {
                gift_id: Some(7),
                stars: Some(100),
                sender_id: Some(55),
                sender_username: Some("tester".to_owned()),
                ..SimulateRequest::default()
            })
            .unwrap();

        assert_eq!(info.gift_type, GiftKind::StarGift);
        assert_eq!(info.detection_method, DetectionMethod::Simulated);
        assert_eq!(info.details.id, Some(7));
        assert_eq!(info.details.stars, Some(100));
        assert_eq!(info.sender_username.as_deref(), Some("tester"));
    }

    #[test]
    fn test_simulate_kinds() {
        let p = processor(DetectorSettings::default());
        let kind_of = |label: &str| {
            p.simulate(&SimulateRequest {
                gift_type: Some(label.to_owned()),
                ..SimulateRequest::default()
            })
            .map(|i| i.gift_type)
        };

        assert_eq!(kind_of("unique"), Some(GiftKind::UniqueGift));
        assert_eq!(kind_of("premium_gift"), Some(GiftKind::PremiumGift));
        assert_eq!(kind_of("media"), Some(GiftKind::MediaGift));
        assert_eq!(kind_of("text"), Some(GiftKind::TextMention));
        assert_eq!(kind_of("nonsense"), Some(GiftKind::StarGift));
    }

    #[test]
    fn test_simulate_bypasses_cooldown_but_respects_toggles() {
        let settings = DetectorSettings {
            enable_service_detection: false,
            enable_raw_api_detection: false,
            ..DetectorSettings::default()
        };
        let p = processor(settings);
        assert!(p.simulate(&SimulateRequest::default()).is_none());

        let mut p = processor(DetectorSettings::default());
        assert!(matches!(
            p.evaluate(&star_gift_message(1, 0), Instant::now()),
            Verdict::Respond(_)
        ));
        assert!(p.simulate(&SimulateRequest::default()).is_some());
    }
}
