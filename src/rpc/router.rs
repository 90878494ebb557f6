//! Inbound message routing
//!
//! Classifies every line the transport hands us as either a response
//! to a pending call or a daemon notification, and decomposes
//! notification envelopes into typed events. All functions here are
//! pure; the client feeds them and forwards the produced events.

use serde_json::Value;

use crate::common::Error;

use super::events::{
    ClientEvent, Envelope, ErrorEvent, ErrorEventKind, IncomingMessage, ReactionEvent,
    ReceiptEvent, StoryEvent, TypingEvent,
};
use super::wire::{self, Inbound};

/// Method the daemon uses for inbound message pushes
pub const RECEIVE_METHOD: &str = "receive";

/// Outcome of routing one wire line
#[derive(Debug)]
pub enum Routed {
    /// A response to the pending call with this correlation token
    Response(wire::Response),
    /// Events to fan out to subscribers
    Events(Vec<ClientEvent>),
}

/// Route a single line of transport data
///
/// Never fails: unparsable lines become a parse-error event so one bad
/// line cannot take down the reader or drop the rest of a batch.
pub fn route_line(line: &str) -> Routed {
    match wire::parse_line(line) {
        Ok(Inbound::Response(response)) => Routed::Response(response),
        Ok(Inbound::Notification(notification)) => {
            Routed::Events(notification_events(&notification.method, notification.params))
        }
        Err(Error::Parse(message)) => Routed::Events(vec![ClientEvent::Error(ErrorEvent {
            kind: ErrorEventKind::Parse,
            message,
        })]),
        Err(e) => Routed::Events(vec![ClientEvent::Error(ErrorEvent {
            kind: ErrorEventKind::Parse,
            message: e.to_string(),
        })]),
    }
}

/// Expand a notification into the generic event plus any typed
/// sub-events its envelope carries
pub fn notification_events(method: &str, params: Option<Value>) -> Vec<ClientEvent> {
    let params = params.unwrap_or(Value::Null);

    let mut events = vec![ClientEvent::Notification {
        method: method.to_string(),
        params: params.clone(),
    }];

    if method == RECEIVE_METHOD {
        if let Some(envelope) = params
            .get("envelope")
            .cloned()
            .and_then(|v| serde_json::from_value::<Envelope>(v).ok())
        {
            events.extend(envelope_events(&envelope));
        }
    }

    events
}

/// Decompose one envelope into typed events
///
/// The checks are independent and non-exclusive: an envelope carrying
/// both a receipt and a typing indicator emits both.
pub fn envelope_events(envelope: &Envelope) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    let source = envelope.source.clone().unwrap_or_default();

    if let Some(data) = &envelope.data_message {
        let group_id = data.group_info.as_ref().map(|g| g.group_id.clone());

        if let Some(reaction) = &data.reaction {
            events.push(ClientEvent::Reaction(ReactionEvent {
                source: source.clone(),
                group_id: group_id.clone(),
                emoji: reaction.emoji.clone(),
                target_author: reaction.target_author.clone(),
                target_sent_timestamp: reaction.target_sent_timestamp,
                is_remove: reaction.is_remove,
            }));
        }

        if let Some(text) = &data.message {
            events.push(ClientEvent::Message(IncomingMessage {
                source: source.clone(),
                source_name: envelope.source_name.clone(),
                group_id,
                timestamp: data.timestamp.or(envelope.timestamp),
                text: text.clone(),
                attachments: data.attachments.clone(),
            }));
        }
    }

    if let Some(receipt) = &envelope.receipt_message {
        events.push(ClientEvent::Receipt(ReceiptEvent {
            source: source.clone(),
            kind: receipt.kind(),
            timestamps: receipt.timestamps.clone(),
        }));
    }

    if let Some(typing) = &envelope.typing_message {
        events.push(ClientEvent::Typing(TypingEvent {
            source: source.clone(),
            group_id: typing.group_id.clone(),
            action: typing.action.clone(),
        }));
    }

    if let Some(story) = &envelope.story_message {
        events.push(ClientEvent::Story(StoryEvent {
            source,
            timestamp: story.timestamp,
        }));
    }

    events
}
