//! Reply text for detected gifts.

use super::types::{GiftDetails, GiftInfo};

/// Signature line appended to every reply.
pub const SIGNATURE: &str = "Gift Detector";

/// Rendering options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    /// Emit `<b>`, `<i>` and `<code>` tags and escape user text.
    pub html: bool,
    /// Processed counter shown under the signature.
    pub processed: Option<u64>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            html: true,
            processed: None,
        }
    }
}

/// Groups digits in threes with commas: `100000` becomes `100,000`.
#[must_use]
pub fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);

    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Best human label for the sender: full name, then `@username`, then id.
#[must_use]
pub fn sender_display_name(info: &GiftInfo) -> String {
    if let Some(name) = info.sender_name.as_deref().filter(|n| !n.trim().is_empty()) {
        return name.to_owned();
    }
    if let Some(username) = info.sender_username.as_deref().filter(|u| !u.is_empty()) {
        return format!("@{username}");
    }
    info.sender_id
        .map_or_else(|| "Unknown".to_owned(), |id| format!("User {id}"))
}

struct Writer {
    html: bool,
    lines: Vec<String>,
}

impl Writer {
    fn escape(&self, text: &str) -> String {
        if self.html {
            html_escape::encode_text(text).into_owned()
        } else {
            text.to_owned()
        }
    }

    fn bold(&self, text: &str) -> String {
        if self.html {
            format!("<b>{text}</b>")
        } else {
            text.to_owned()
        }
    }

    fn italic(&self, text: &str) -> String {
        if self.html {
            format!("<i>{text}</i>")
        } else {
            text.to_owned()
        }
    }

    fn code(&self, text: &str) -> String {
        if self.html {
            format!("<code>{text}</code>")
        } else {
            text.to_owned()
        }
    }

    /// Emits `icon label: value`; `value` must already be escaped.
    fn field(&mut self, icon: &str, label: &str, value: &str) {
        let line = format!("{icon} {} {value}", self.bold(&format!("{label}:")));
        self.lines.push(line);
    }

    fn blank(&mut self) {
        self.lines.push(String::new());
    }
}

fn status_badges(details: &GiftDetails, rare: bool) -> Vec<&'static str> {
    let mut badges = Vec::new();
    if details.limited {
        badges.push("🔒 Limited");
    }
    if details.unique {
        badges.push("💎 Unique");
    }
    if details.sold_out {
        badges.push("❌ Sold out");
    }
    if rare {
        badges.push("👑 Rare");
    }
    badges
}

fn write_details(w: &mut Writer, details: &GiftDetails, rare: bool) {
    w.blank();
    let header = w.bold("Gift details:");
    w.lines.push(format!("🔍 {header}"));

    if let Some(id) = details.id {
        let value = w.code(&id.to_string());
        w.field("🆔", "Gift ID", &value);
    }
    if let Some(stars) = details.stars {
        w.field("⭐", "Price", &format!("{} Telegram Stars", group_thousands(stars)));
    }
    if let Some(title) = &details.title {
        let value = w.escape(title);
        w.field("📛", "Title", &value);
    }
    if let Some(total) = details.total_amount {
        w.field("📦", "Issued", &group_thousands(total));
    }
    if let Some(remaining) = details.remaining_amount {
        w.field("📦", "Remaining", &group_thousands(remaining));
    }

    let badges = status_badges(details, rare);
    if !badges.is_empty() {
        w.field("🏷", "Status", &badges.join(" • "));
    }

    if let Some(convert) = details.convert_stars {
        w.field("💫", "Convert to", &format!("{} ⭐", group_thousands(convert)));
    }
    if let Some(upgrade) = details.upgrade_stars {
        w.field("⬆️", "Upgrade", &format!("{} ⭐", group_thousands(upgrade)));
    }
    if let Some(serial) = details.serial_number {
        w.field("🔢", "Serial number", &format!("#{serial}"));
    }
    if let Some(slug) = &details.slug {
        let value = w.code(&w.escape(slug));
        w.field("🔗", "Slug", &value);
    }
    if let Some(months) = details.months {
        w.field("📅", "Duration", &format!("{months} months"));
    }
    if let (Some(amount), Some(currency)) = (details.amount, &details.currency) {
        let value = w.escape(&format_amount(amount, currency));
        w.field("💰", "Paid", &value);
    }
}

/// Minor units to a decimal amount, `399 USD` becomes `3.99 USD`.
fn format_amount(amount: i64, currency: &str) -> String {
    format!("{}.{:02} {currency}", amount / 100, (amount % 100).abs())
}

/// Builds the reply sent back to the gift's sender.
#[must_use]
pub fn format_gift_response(info: &GiftInfo, opts: FormatOptions) -> String {
    let mut w = Writer {
        html: opts.html,
        lines: Vec::new(),
    };

    let header = w.bold("GIFT DETECTED");
    w.lines.push(format!("🎁 {header}"));
    w.blank();

    if let Some(username) = info.sender_username.as_deref().filter(|u| !u.is_empty()) {
        let value = w.escape(&format!("@{username}"));
        w.field("👤", "Sender", &value);
    }
    let name = w.escape(&sender_display_name(info));
    w.field("📛", "Name", &name);
    let sender_id = w.code(&info.sender_id.map_or_else(|| "N/A".to_owned(), |id| id.to_string()));
    w.field("🆔", "User ID", &sender_id);

    let message_id = w.code(&info.message_id.to_string());
    w.field("📨", "Message ID", &message_id);
    if let Some(date) = info.date {
        w.field("🕐", "Time", &date.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    }
    let kind = w.code(info.gift_type.label());
    w.field("🎯", "Gift type", &kind);

    if !info.details.is_empty() || info.rare {
        write_details(&mut w, &info.details, info.rare);
    }

    w.blank();
    let signature = w.italic(SIGNATURE);
    w.lines.push(format!("🤖 {signature}"));
    if let Some(processed) = opts.processed {
        let counter = w.italic(&format!("Gifts processed: {processed}"));
        w.lines.push(format!("📊 {counter}"));
    }

    w.lines.join("\n")
}

/// Builds the short summary forwarded to the notification chat.
#[must_use]
pub fn format_notification(info: &GiftInfo, html: bool) -> String {
    let mut w = Writer {
        html,
        lines: Vec::new(),
    };

    let header = w.bold("New gift received!");
    w.lines.push(format!("🔔 {header}"));
    w.blank();

    let from = w.escape(&sender_display_name(info));
    w.field("👤", "From", &from);
    let sender_id = w.code(&info.sender_id.map_or_else(|| "N/A".to_owned(), |id| id.to_string()));
    w.field("🆔", "ID", &sender_id);
    let chat = format!("{} ({})", w.code(&info.chat_id.to_string()), info.chat_type.as_str());
    w.field("💬", "Chat", &chat);
    w.field("🎯", "Type", info.gift_type.label());
    if let Some(date) = info.date {
        w.field("🕐", "Time", &date.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    }
    if let Some(stars) = info.details.stars {
        w.field("⭐", "Price", &format!("{} stars", group_thousands(stars)));
    }
    if info.details.unique {
        w.lines.push("💎 Unique gift!".to_owned());
    }

    w.lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gifts::types::{ChatKind, DetectionMethod, GiftKind};
    use chrono::{TimeZone, Utc};

    fn info() -> GiftInfo {
        GiftInfo {
            message_id: 321,
            chat_id: 77,
            chat_type: ChatKind::Private,
            chat_title: None,
            sender_id: Some(77),
            sender_username: Some("alice".to_owned()),
            sender_name: Some("Alice <Admin>".to_owned()),
            date: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).single(),
            gift_type: GiftKind::StarGift,
            raw_type: Some("MessageActionStarGift".to_owned()),
            detection_method: DetectionMethod::Service,
            details: GiftDetails {
                id: Some(5_170_145_012_310_081_615),
                stars: Some(15),
                title: Some("Heart & Soul".to_owned()),
                total_amount: Some(100_000),
                remaining_amount: Some(4321),
                limited: true,
                ..GiftDetails::default()
            },
            rare: false,
            text: None,
        }
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(100_000), "100,000");
        assert_eq!(group_thousands(-1_234_567), "-1,234,567");
    }

    #[test]
    fn test_sender_display_name_fallbacks() {
        let mut info = info();
        assert_eq!(sender_display_name(&info), "Alice <Admin>");

        info.sender_name = None;
        assert_eq!(sender_display_name(&info), "@alice");

        info.sender_username = None;
        assert_eq!(sender_display_name(&info), "User 77");

        info.sender_id = None;
        assert_eq!(sender_display_name(&info), "Unknown");
    }

    #[test]
    fn test_html_response_escapes_user_text() {
        let text = format_gift_response(&info(), FormatOptions::default());
        assert!(text.starts_with("🎁 <b>GIFT DETECTED</b>"));
        assert!(text.contains("Alice &lt;Admin&gt;"));
        assert!(text.contains("Heart &amp; Soul"));
        assert!(text.contains("<code>321</code>"));
        assert!(text.contains("100,000"));
        assert!(text.contains("4,321"));
        assert!(text.contains("🔒 Limited"));
        assert!(text.contains("2025-01-02 03:04:05 UTC"));
        assert!(!text.contains("Gifts processed"));
    }

    #[test]
    fn test_plain_response_has_no_tags() {
        let opts = FormatOptions {
            html: false,
            processed: Some(7),
        };
        let text = format_gift_response(&info(), opts);
        assert!(!text.contains("<b>"));
        assert!(!text.contains("<code>"));
        assert!(text.contains("Alice <Admin>"));
        assert!(text.contains("Gifts processed: 7"));
    }

    #[test]
    fn test_details_block_skipped_when_empty() {
        let mut info = info();
        info.details = GiftDetails::default();
        let text = format_gift_response(&info, FormatOptions::default());
        assert!(!text.contains("Gift details"));

        info.rare = true;
        let text = format_gift_response(&info, FormatOptions::default());
        assert!(text.contains("👑 Rare"));
    }

    #[test]
    fn test_notification_summary() {
        let mut info = info();
        info.details.stars = Some(2500);
        info.details.unique = true;

        let text = format_notification(&info, true);
        assert!(text.starts_with("🔔 <b>New gift received!</b>"));
        assert!(text.contains("<b>From:</b> Alice &lt;Admin&gt;"));
        assert!(text.contains("<code>77</code> (private)"));
        assert!(text.contains("2,500 stars"));
        assert!(text.contains("2025-01-02 03:04:05 UTC"));
        assert!(text.ends_with("💎 Unique gift!"));
        // Notifications stay short: no details block, no signature.
        assert!(!text.contains("Gift details"));
        assert!(!text.contains(SIGNATURE));
    }

    #[test]
    fn test_plain_notification_without_price() {
        let mut info = info();
        info.chat_type = ChatKind::Group;
        info.chat_id = -100;
        info.details.stars = None;
        info.date = None;

        let text = format_notification(&info, false);
        assert!(!text.contains("<b>"));
        assert!(text.contains("From: Alice <Admin>"));
        assert!(text.contains("Chat: -100 (group)"));
        assert!(!text.contains("Price"));
        assert!(!text.contains("Time"));
        assert!(!text.contains("Unique gift"));
    }

    #[test]
    fn test_premium_amount() {
        assert_eq!(format_amount(399, "USD"), "3.99 USD");
        assert_eq!(format_amount(1000, "EUR"), "10.00 EUR");
    }
}
