//! Gift domain types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of chat a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

impl ChatKind {
    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }
}

/// Chat a message arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    /// Marked chat id (users positive, groups negative, channels `-100…`).
    pub id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
}

/// Sender of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl SenderInfo {
    /// Full display name, `None` when neither name part is set.
    #[must_use]
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.trim().is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// A service action attached to a message.
///
/// `dump` is the debug rendering of the raw constructor; the classifier
/// reads field values from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAction {
    pub type_name: String,
    pub dump: String,
}

/// Media attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub type_name: String,
    pub dump: String,
    /// File name when the media is a sticker or document.
    pub file_name: Option<String>,
}

/// Library-independent view of an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: i32,
    pub chat: ChatInfo,
    pub sender: Option<SenderInfo>,
    pub date: Option<DateTime<Utc>>,
    pub text: String,
    pub action: Option<ServiceAction>,
    pub media: Option<MediaInfo>,
    /// Entity type names (`bold`, `mention_name`, …).
    pub entity_types: Vec<String>,
    pub outgoing: bool,
}

impl IncomingMessage {
    /// Creates a plain private text message, mostly useful for tests and simulation.
    #[must_use]
    pub fn text(id: i32, chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            chat: ChatInfo {
                id: chat_id,
                kind: ChatKind::Private,
                title: None,
            },
            sender: Some(SenderInfo {
                id: chat_id,
                ..SenderInfo::default()
            }),
            date: None,
            text: text.into(),
            action: None,
            media: None,
            entity_types: Vec::new(),
            outgoing: false,
        }
    }

    /// Id of the sender, falling back to the chat for private chats.
    #[must_use]
    pub fn sender_id(&self) -> Option<i64> {
        self.sender.as_ref().map(|s| s.id).or_else(|| {
            (self.chat.kind == ChatKind::Private).then_some(self.chat.id)
        })
    }
}

/// Classified kind of gift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GiftKind {
    StarGift,
    UniqueGift,
    PremiumGift,
    GiftCode,
    StarsGift,
    MediaGift,
    ServiceGift,
    TextMention,
}

impl GiftKind {
    /// Stable snake_case label used as `gift_type`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StarGift => "star_gift",
            Self::UniqueGift => "unique_gift",
            Self::PremiumGift => "premium_gift",
            Self::GiftCode => "gift_code",
            Self::StarsGift => "stars_gift",
            Self::MediaGift => "media_gift",
            Self::ServiceGift => "service_gift",
            Self::TextMention => "text_mention",
        }
    }

    /// Human-readable label for replies.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::StarGift => "Star Gift",
            Self::UniqueGift => "Unique Gift",
            Self::PremiumGift => "Premium Gift",
            Self::GiftCode => "Gift Code",
            Self::StarsGift => "Stars Gift",
            Self::MediaGift => "Gift Media",
            Self::ServiceGift => "Gift (service message)",
            Self::TextMention => "Gift (text)",
        }
    }

    /// Parses a label or snake_case name, case-insensitively.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();

        match key.as_str() {
            "stargift" | "star" => Some(Self::StarGift),
            "uniquegift" | "unique" => Some(Self::UniqueGift),
            "premiumgift" | "premium" => Some(Self::PremiumGift),
            "giftcode" | "code" => Some(Self::GiftCode),
            "starsgift" | "stars" => Some(Self::StarsGift),
            "mediagift" | "media" => Some(Self::MediaGift),
            "servicegift" | "service" => Some(Self::ServiceGift),
            "textmention" | "text" => Some(Self::TextMention),
            _ => None,
        }
    }
}

impl fmt::Display for GiftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a gift was recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Service,
    RawAction,
    Media,
    Text,
    Keyword,
    Extended,
    Simulated,
}

/// Gift attributes read from the raw constructor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stars: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convert_stars: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_stars: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub months: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default)]
    pub limited: bool,
    #[serde(default)]
    pub sold_out: bool,
    #[serde(default)]
    pub unique: bool,
}

impl GiftDetails {
    /// Returns true if nothing was extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Fills fields missing here from `other` (used for catalogue enrichment).
    pub fn fill_from(&mut self, other: &Self) {
        fn fill<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if dst.is_none() {
                dst.clone_from(src);
            }
        }

        fill(&mut self.id, &other.id);
        fill(&mut self.stars, &other.stars);
        fill(&mut self.title, &other.title);
        fill(&mut self.total_amount, &other.total_amount);
        fill(&mut self.remaining_amount, &other.remaining_amount);
        fill(&mut self.convert_stars, &other.convert_stars);
        fill(&mut self.upgrade_stars, &other.upgrade_stars);
        self.limited |= other.limited;
        self.sold_out |= other.sold_out;
    }
}

/// Everything known about one detected gift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftInfo {
    pub message_id: i32,
    pub chat_id: i64,
    pub chat_type: ChatKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub gift_type: GiftKind,
    /// Raw constructor name when the gift came from an action or media.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_type: Option<String>,
    pub detection_method: DetectionMethod,
    pub details: GiftDetails,
    pub rare: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        let sender = SenderInfo {
            id: 1,
            username: None,
            first_name: Some("Ada".to_owned()),
            last_name: Some("Lovelace".to_owned()),
        };
        assert_eq!(sender.full_name().as_deref(), Some("Ada Lovelace"));
        assert_eq!(SenderInfo::default().full_name(), None);
    }

    #[test]
    fn test_gift_kind_parse() {
        assert_eq!(GiftKind::parse("Star Gift"), Some(GiftKind::StarGift));
        assert_eq!(GiftKind::parse("unique_gift"), Some(GiftKind::UniqueGift));
        assert_eq!(GiftKind::parse("premium"), Some(GiftKind::PremiumGift));
        assert_eq!(GiftKind::parse("teddy"), None);
    }

    #[test]
    fn test_gift_kind_serializes_snake_case() {
        let json = serde_json::to_string(&GiftKind::StarsGift).unwrap();
        assert_eq!(json, "\"stars_gift\"");
        assert_eq!(GiftKind::StarsGift.to_string(), "stars_gift");
    }

    #[test]
    fn test_details_fill_from_keeps_existing() {
        let mut details = GiftDetails {
            stars: Some(50),
            ..GiftDetails::default()
        };
        let catalog = GiftDetails {
            stars: Some(15),
            title: Some("Heart".to_owned()),
            limited: true,
            ..GiftDetails::default()
        };
        details.fill_from(&catalog);
        assert_eq!(details.stars, Some(50));
        assert_eq!(details.title.as_deref(), Some("Heart"));
        assert!(details.limited);
        assert!(!details.is_empty());
        assert!(GiftDetails::default().is_empty());
    }

    #[test]
    fn test_sender_id_falls_back_to_private_chat() {
        let mut msg = IncomingMessage::text(1, 777, "hi");
        msg.sender = None;
        assert_eq!(msg.sender_id(), Some(777));

        msg.chat.kind = ChatKind::Group;
        assert_eq!(msg.sender_id(), None);
    }
}
