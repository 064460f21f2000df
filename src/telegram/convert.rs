//! Raw TL messages to [`IncomingMessage`].
//!
//! Only the long-stable fields of `message` and `messageService` are matched
//! by name; actions and media are carried as debug dumps for the classifier.

use chrono::{DateTime, Utc};
use grammers_tl_types as tl;

use crate::gifts::classifier::{extract_field, tl_type_name};
use crate::gifts::{ChatInfo, ChatKind, IncomingMessage, MediaInfo, SenderInfo, ServiceAction};

/// Offset of marked channel ids (`-100…`).
const CHANNEL_MARK: i64 = 1_000_000_000_000;

/// Names resolved by the client for a message's chat and sender.
#[derive(Debug, Clone, Default)]
pub struct PeerNames {
    pub chat_title: Option<String>,
    pub sender_username: Option<String>,
    pub sender_name: Option<String>,
}

/// Marks a peer id the Bot API way: users positive, basic groups negative,
/// channels and supergroups `-100…`.
#[must_use]
pub fn marked_peer_id(peer: &tl::enums::Peer) -> (i64, ChatKind) {
    match peer {
        tl::enums::Peer::User(p) => (p.user_id, ChatKind::Private),
        tl::enums::Peer::Chat(p) => (-p.chat_id, ChatKind::Group),
        tl::enums::Peer::Channel(p) => (-(CHANNEL_MARK + p.channel_id), ChatKind::Channel),
    }
}

/// `MessageEntityMentionName` becomes `mention_name`.
#[must_use]
pub fn entity_type_name(constructor: &str) -> String {
    let stem = constructor
        .strip_prefix("MessageEntity")
        .unwrap_or(constructor);

    let mut out = String::with_capacity(stem.len() + 4);
    for (i, c) in stem.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn timestamp(date: i32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::from(date), 0)
}

fn sender(from_id: Option<&tl::enums::Peer>, names: &PeerNames) -> Option<SenderInfo> {
    let (id, _) = marked_peer_id(from_id?);
    Some(SenderInfo {
        id,
        username: names.sender_username.clone(),
        first_name: names.sender_name.clone(),
        last_name: None,
    })
}

/// Sender from `from_id`; private chats carry none for the other side, so
/// the chat peer stands in for incoming ones.
fn sender_or_peer(
    from_id: Option<&tl::enums::Peer>,
    chat: &ChatInfo,
    outgoing: bool,
    names: &PeerNames,
) -> Option<SenderInfo> {
    sender(from_id, names).or_else(|| {
        (chat.kind == ChatKind::Private && !outgoing).then(|| SenderInfo {
            id: chat.id,
            username: names.sender_username.clone(),
            first_name: names.sender_name.clone(),
            last_name: None,
        })
    })
}

fn chat(peer_id: &tl::enums::Peer, names: &PeerNames) -> ChatInfo {
    let (id, kind) = marked_peer_id(peer_id);
    ChatInfo {
        id,
        kind,
        title: names.chat_title.clone(),
    }
}

/// Converts a raw message. Empty messages yield `None`.
#[must_use]
pub fn from_raw(raw: &tl::enums::Message, names: &PeerNames) -> Option<IncomingMessage> {
    match raw {
        tl::enums::Message::Empty(_) => None,
        tl::enums::Message::Message(m) => {
            let chat = chat(&m.peer_id, names);
            let sender = sender_or_peer(m.from_id.as_ref(), &chat, m.out, names);

            let media = m.media.as_ref().map(|media| {
                let dump = format!("{media:?}");
                MediaInfo {
                    type_name: tl_type_name(&dump),
                    file_name: extract_field(&dump, "file_name"),
                    dump,
                }
            });

            let entity_types = m
                .entities
                .iter()
                .flatten()
                .map(|e| entity_type_name(&tl_type_name(&format!("{e:?}"))))
                .collect();

            Some(IncomingMessage {
                id: m.id,
                chat,
                sender,
                date: timestamp(m.date),
                text: m.message.clone(),
                action: None,
                media,
                entity_types,
                outgoing: m.out,
            })
        }
        tl::enums::Message::Service(m) => {
            let chat = chat(&m.peer_id, names);
            let dump = format!("{:?}", m.action);

            Some(IncomingMessage {
                id: m.id,
                sender: sender_or_peer(m.from_id.as_ref(), &chat, m.out, names),
                chat,
                date: timestamp(m.date),
                text: String::new(),
                action: Some(ServiceAction {
                    type_name: tl_type_name(&dump),
                    dump,
                }),
                media: None,
                entity_types: Vec::new(),
                outgoing: m.out,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marked_peer_ids() {
        let user = tl::enums::Peer::User(tl::types::PeerUser { user_id: 42 });
        let chat = tl::enums::Peer::Chat(tl::types::PeerChat { chat_id: 7 });
        let channel = tl::enums::Peer::Channel(tl::types::PeerChannel { channel_id: 1234 });

        assert_eq!(marked_peer_id(&user), (42, ChatKind::Private));
        assert_eq!(marked_peer_id(&chat), (-7, ChatKind::Group));
        assert_eq!(
            marked_peer_id(&channel),
            (-1_000_000_001_234, ChatKind::Channel)
        );
    }

    #[test]
    fn test_entity_type_name() {
        assert_eq!(entity_type_name("MessageEntityBold"), "bold");
        assert_eq!(entity_type_name("MessageEntityMentionName"), "mention_name");
        assert_eq!(entity_type_name("MessageEntityTextUrl"), "text_url");
        assert_eq!(entity_type_name("Custom"), "custom");
    }

    #[test]
    fn test_timestamp() {
        let date = timestamp(1_700_000_000).unwrap();
        assert_eq!(date.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_sender_from_peer() {
        let names = PeerNames {
            sender_username: Some("bob".to_owned()),
            ..PeerNames::default()
        };
        let from = tl::enums::Peer::User(tl::types::PeerUser { user_id: 9 });
        let sender = sender(Some(&from), &names).unwrap();
        assert_eq!(sender.id, 9);
        assert_eq!(sender.username.as_deref(), Some("bob"));
        assert!(super::sender(None, &names).is_none());
    }

    #[test]
    fn test_private_peer_stands_in_for_sender() {
        let names = PeerNames::default();
        let private = ChatInfo {
            id: 5,
            kind: ChatKind::Private,
            title: None,
        };
        assert_eq!(sender_or_peer(None, &private, false, &names).map(|s| s.id), Some(5));
        assert!(sender_or_peer(None, &private, true, &names).is_none());

        let group = ChatInfo {
            id: -5,
            kind: ChatKind::Group,
            title: None,
        };
        assert!(sender_or_peer(None, &group, false, &names).is_none());
    }
}
