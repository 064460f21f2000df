//! Gift model, detection heuristics and reply formatting.

pub mod classifier;
pub mod formatter;
pub mod types;

pub use classifier::{Detection, classify};
pub use formatter::{FormatOptions, format_gift_response, format_notification};
pub use types::{
    ChatInfo, ChatKind, DetectionMethod, GiftDetails, GiftInfo, GiftKind, IncomingMessage,
    MediaInfo, SenderInfo, ServiceAction,
};
