//! Real-time events: Socket.IO client over WebSocket.
//!
//! One connection per [`EventClient`], authenticated with a bearer credential in the CONNECT
//! packet. Inbound events on the fixed [`Channel`] set are fanned out to local subscribers.
//! Events missed while the link is down are not replayed.

mod channel;
mod client;
pub mod protocol;
mod registry;

pub use channel::{Channel, UnknownChannel};
pub use client::{ClientOptions, ConnectionState, EventClient, RealtimeError};
pub use registry::{Handler, SubscriberRegistry, Subscription};
