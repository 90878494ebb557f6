//! Typed event channels
//!
//! Every asynchronous thing the daemon can push at us — inbound
//! messages, reactions, receipts, typing indicators, stories, stderr
//! chatter, connection loss — fans out to subscribers as one variant
//! of [`ClientEvent`] over a broadcast channel. Subscribers match on
//! the variants they care about; there is no string-keyed dispatch.

use serde::Deserialize;
use serde_json::Value;

/// Events emitted by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// An inbound text message
    Message(IncomingMessage),
    /// Any daemon notification, before envelope decomposition
    Notification { method: String, params: Value },
    /// A reaction to a previously sent message
    Reaction(ReactionEvent),
    /// Delivery/read/viewed receipt
    Receipt(ReceiptEvent),
    /// Typing started/stopped indicator
    Typing(TypingEvent),
    /// A story post from a contact
    Story(StoryEvent),
    /// Non-fatal errors: parse failures, daemon stderr errors,
    /// reconnect exhaustion
    Error(ErrorEvent),
    /// Informational daemon output
    Log(LogEvent),
    /// The transport closed
    Closed { intentional: bool },
}

/// An inbound message, flattened from the daemon envelope
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Sender identifier (phone number or service id)
    pub source: String,
    /// Sender profile name, when known
    pub source_name: Option<String>,
    /// Group this message was posted to, if any
    pub group_id: Option<String>,
    /// Daemon timestamp of the message
    pub timestamp: Option<u64>,
    /// Message text
    pub text: String,
    /// Attachment descriptors
    pub attachments: Vec<Attachment>,
}

impl IncomingMessage {
    /// Where a reply to this message should go: the group when it was
    /// a group message, otherwise back to the sender
    pub fn reply_recipient(&self) -> &str {
        self.group_id.as_deref().unwrap_or(&self.source)
    }
}

#[derive(Debug, Clone)]
pub struct ReactionEvent {
    pub source: String,
    pub group_id: Option<String>,
    pub emoji: String,
    pub target_author: String,
    pub target_sent_timestamp: u64,
    pub is_remove: bool,
}

#[derive(Debug, Clone)]
pub struct ReceiptEvent {
    pub source: String,
    pub kind: ReceiptKind,
    pub timestamps: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    Delivery,
    Read,
    Viewed,
}

#[derive(Debug, Clone)]
pub struct TypingEvent {
    pub source: String,
    pub group_id: Option<String>,
    /// "STARTED" or "STOPPED" as reported by the daemon
    pub action: String,
}

#[derive(Debug, Clone)]
pub struct StoryEvent {
    pub source: String,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub kind: ErrorEventKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEventKind {
    /// A line of daemon output failed to parse
    Parse,
    /// The daemon wrote an error to stderr
    Daemon,
    /// Reconnect attempts were exhausted
    ReconnectExhausted,
}

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub line: String,
}

// === Daemon envelope wire structures ===

/// The daemon's wrapper around one inbound protocol event
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub data_message: Option<DataMessage>,
    #[serde(default)]
    pub receipt_message: Option<ReceiptMessage>,
    #[serde(default)]
    pub typing_message: Option<TypingMessage>,
    #[serde(default)]
    pub story_message: Option<StoryMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMessage {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub group_info: Option<GroupInfo>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reaction: Option<Reaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub group_id: String,
    #[serde(default)]
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub target_author: String,
    pub target_sent_timestamp: u64,
    #[serde(default)]
    pub is_remove: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptMessage {
    #[serde(default)]
    pub when: Option<u64>,
    #[serde(default)]
    pub is_delivery: bool,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_viewed: bool,
    #[serde(default)]
    pub timestamps: Vec<u64>,
}

impl ReceiptMessage {
    pub fn kind(&self) -> ReceiptKind {
        if self.is_viewed {
            ReceiptKind::Viewed
        } else if self.is_read {
            ReceiptKind::Read
        } else {
            ReceiptKind::Delivery
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingMessage {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryMessage {
    #[serde(default)]
    pub allows_replies: bool,
    #[serde(default)]
    pub timestamp: Option<u64>,
}
