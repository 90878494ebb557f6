//! JSON-RPC session core: transports, correlation, routing, events

pub mod client;
pub mod events;
pub mod router;
pub mod transport;
pub mod wire;

pub use client::{backoff_delay, Client, ConnectionState, SendResult};
pub use events::{
    ClientEvent, ErrorEvent, ErrorEventKind, IncomingMessage, LogEvent, ReactionEvent,
    ReceiptEvent, ReceiptKind, StoryEvent, TypingEvent,
};
pub use transport::{Channel, StderrLine, StderrSeverity, TransportEvent};
