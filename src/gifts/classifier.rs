//! Heuristic gift classifier.
//!
//! Gifts reach a userbot in several shapes: a service message whose action
//! constructor mentions a gift, media of a gift type, or plain text written
//! by a client that does not render the action. The helpers here are pure
//! string matchers over those shapes; raw constructors are inspected through
//! their debug rendering so that schema changes in the TL layer only affect
//! which fields are found, never whether the code builds.

use std::collections::HashMap;

use lazy_regex::{Lazy, Regex, lazy_regex};

use super::types::{DetectionMethod, GiftDetails, GiftKind, IncomingMessage};
use crate::config::{DetectionRules, DetectorSettings};

/// `name: value` and `name: Some(value)` pairs in a debug dump.
static RE_FIELD: Lazy<Regex> = lazy_regex!(
    r#"(?:^|[^A-Za-z0-9_])([a-z_][a-z0-9_]*): (?:Some\()?("(?:[^"\\]|\\.)*"|-?\d+|true|false)"#
);

/// A number followed by a star unit.
static RE_PRICE: Lazy<Regex> = lazy_regex!(r"(?i)(\d+)\s*(?:stars?\b|звезд|⭐)");

/// Result of a successful classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub kind: GiftKind,
    pub method: DetectionMethod,
}

impl Detection {
    const fn new(kind: GiftKind, method: DetectionMethod) -> Self {
        Self { kind, method }
    }
}

/// Extracts the constructor name from a debug dump.
///
/// `StarGift(MessageActionStarGift { .. })` yields `MessageActionStarGift`,
/// `MessageActionEmpty` yields itself.
#[must_use]
pub fn tl_type_name(dump: &str) -> String {
    let dump = dump.trim();
    let head_end = dump
        .find(|c: char| c == ' ' || c == '{' || c == '(')
        .unwrap_or(dump.len());

    let inner = if dump[head_end..].starts_with('(') {
        &dump[head_end + 1..]
    } else {
        dump
    };

    inner
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .next()
        .unwrap_or_default()
        .to_owned()
}

/// Returns true if a service action constructor mentions a gift.
#[must_use]
pub fn is_service_gift(type_name: &str) -> bool {
    type_name.to_lowercase().contains("gift")
}

/// Returns true if the constructor is one of the known gift actions.
#[must_use]
pub fn is_known_gift_action(type_name: &str, rules: &DetectionRules) -> bool {
    let name = type_name.to_lowercase();
    rules
        .gift_actions
        .iter()
        .any(|known| name.contains(&known.to_lowercase()))
}

/// Returns true if a media constructor mentions a gift.
#[must_use]
pub fn is_media_gift(type_name: &str) -> bool {
    type_name.to_lowercase().contains("gift")
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .map(|n| n.trim().to_lowercase())
        .any(|n| !n.is_empty() && haystack.contains(&n))
}

/// Returns true if the text carries one of the exact gift phrases.
#[must_use]
pub fn has_text_indicator(text: &str, rules: &DetectionRules) -> bool {
    contains_any(text, &rules.text_indicators)
}

/// Returns true if the text mentions one of the loose gift keywords.
#[must_use]
pub fn has_gift_keyword(text: &str, rules: &DetectionRules) -> bool {
    contains_any(text, &rules.gift_keywords)
}

/// Returns true if a sticker file name looks like a gift sticker.
#[must_use]
pub fn has_sticker_keyword(file_name: &str, rules: &DetectionRules) -> bool {
    contains_any(file_name, &rules.sticker_keywords)
}

/// Returns true if the text has a gift emoji or a star price.
#[must_use]
pub fn has_extended_marker(text: &str, rules: &DetectionRules) -> bool {
    rules.extended_emoji.iter().any(|e| text.contains(e.as_str()))
        || (text.contains('⭐') && text.chars().any(|c| c.is_ascii_digit()))
}

/// Returns true if an entity type name marks a gift.
#[must_use]
pub fn is_gift_entity(entity_type: &str) -> bool {
    matches!(entity_type.to_lowercase().as_str(), "gift" | "star_gift")
}

/// Maps a gift action constructor to a gift kind.
#[must_use]
pub fn kind_for_action(type_name: &str) -> GiftKind {
    let name = type_name.to_lowercase();

    if name.contains("unique") {
        GiftKind::UniqueGift
    } else if name.contains("stargift") {
        GiftKind::StarGift
    } else if name.contains("premium") {
        GiftKind::PremiumGift
    } else if name.contains("giftcode") {
        GiftKind::GiftCode
    } else if name.contains("stars") {
        GiftKind::StarsGift
    } else {
        GiftKind::ServiceGift
    }
}

/// Decides whether a message is a gift, trying each enabled method in turn.
#[must_use]
pub fn classify(
    msg: &IncomingMessage,
    settings: &DetectorSettings,
    rules: &DetectionRules,
) -> Option<Detection> {
    if settings.enable_service_detection {
        if let Some(action) = &msg.action
            && is_service_gift(&action.type_name)
        {
            return Some(Detection::new(
                kind_for_action(&action.type_name),
                DetectionMethod::Service,
            ));
        }

        if msg.entity_types.iter().any(|t| is_gift_entity(t)) {
            return Some(Detection::new(GiftKind::ServiceGift, DetectionMethod::Service));
        }
    }

    if settings.enable_raw_api_detection {
        if let Some(action) = &msg.action
            && is_known_gift_action(&action.type_name, rules)
        {
            return Some(Detection::new(
                kind_for_action(&action.type_name),
                DetectionMethod::RawAction,
            ));
        }

        if let Some(media) = &msg.media
            && is_media_gift(&media.type_name)
        {
            return Some(Detection::new(GiftKind::MediaGift, DetectionMethod::Media));
        }
    }

    if settings.enable_text_detection && has_text_indicator(&msg.text, rules) {
        return Some(Detection::new(GiftKind::TextMention, DetectionMethod::Text));
    }

    if settings.enable_extended_detection {
        if has_gift_keyword(&msg.text, rules) {
            return Some(Detection::new(GiftKind::TextMention, DetectionMethod::Keyword));
        }

        if let Some(file_name) = msg.media.as_ref().and_then(|m| m.file_name.as_deref())
            && has_sticker_keyword(file_name, rules)
        {
            return Some(Detection::new(GiftKind::MediaGift, DetectionMethod::Keyword));
        }

        if has_extended_marker(&msg.text, rules) {
            return Some(Detection::new(GiftKind::TextMention, DetectionMethod::Extended));
        }
    }

    None
}

/// Collects the first value of every `name: value` pair in a dump.
fn dump_fields(dump: &str) -> HashMap<&str, &str> {
    let mut fields = HashMap::new();
    for caps in RE_FIELD.captures_iter(dump) {
        if let (Some(name), Some(value)) = (caps.get(1), caps.get(2)) {
            fields.entry(name.as_str()).or_insert(value.as_str());
        }
    }
    fields
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .map_or_else(
            || value.to_owned(),
            |inner| inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        )
}

/// Returns the first value of `field` in a debug dump.
///
/// String values are unquoted; `Some(..)` wrappers are removed.
#[must_use]
pub fn extract_field(dump: &str, field: &str) -> Option<String> {
    dump_fields(dump).get(field).map(|v| unquote(v))
}

/// Scans a debug dump for the gift attributes replies show.
#[must_use]
pub fn parse_gift_details(dump: &str) -> GiftDetails {
    let fields = dump_fields(dump);

    let int = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| fields.get(n).and_then(|v| v.parse::<i64>().ok()))
    };
    let text = |name: &str| {
        fields
            .get(name)
            .filter(|v| v.starts_with('"'))
            .map(|v| unquote(v))
            .filter(|v| !v.is_empty())
    };
    let flag = |name: &str| fields.get(name).is_some_and(|v| *v == "true");

    GiftDetails {
        id: int(&["id"]),
        stars: int(&["stars", "star_count"]),
        title: text("title"),
        total_amount: int(&["availability_total", "total_amount"]),
        remaining_amount: int(&["availability_remains", "remaining_amount"]),
        convert_stars: int(&["convert_stars"]),
        upgrade_stars: int(&["upgrade_stars", "upgrade_price"]),
        serial_number: int(&["num", "serial_number"]),
        slug: text("slug"),
        months: int(&["months"]),
        amount: int(&["amount"]),
        currency: text("currency"),
        limited: flag("limited"),
        sold_out: flag("sold_out"),
        unique: dump.contains("StarGiftUnique") || flag("unique"),
    }
}

/// Extracts a star price written in free text.
#[must_use]
pub fn extract_price_from_text(text: &str) -> Option<i64> {
    RE_PRICE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Returns true if the gift deserves the rare badge.
#[must_use]
pub fn is_rare(details: &GiftDetails, rules: &DetectionRules) -> bool {
    details.unique || details.id.is_some_and(|id| rules.rare_gift_ids.contains(&id))
}
