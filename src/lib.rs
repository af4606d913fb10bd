//! stomp-core - a transport-agnostic STOMP protocol engine
//!
//! This library implements the client side of STOMP (Simple Text Oriented
//! Messaging Protocol) versions 1.0, 1.1 and 1.2 as a sans-I/O core: an
//! incremental frame codec, a version-aware command layer, a session state
//! machine and a failover reconnect schedule. None of the core components
//! owns a socket, a thread or a timer; they operate on values and leave
//! scheduling to the surrounding transport, so the same engine can back a
//! blocking client, a thread pool or an event loop.
//!
//! The pieces, from the wire up:
//! - [`Frame`] and [`FrameParser`] translate between byte streams and
//!   structured frames, including heart-beats and per-version header
//!   escaping.
//! - [`ToServer`] and [`FromServer`] build and interpret every STOMP
//!   command, validating what the negotiated version requires.
//! - [`Session`] tracks the connection lifecycle, subscriptions (with
//!   replay across reconnects), transactions, receipts and the negotiated
//!   heart-beat schedule.
//! - [`FailoverTransport`] yields `(broker, delay)` reconnect attempts for
//!   a `failover:` URI.
//!
//! The [`client`] module bridges the core onto tokio with a
//! `tokio_util::codec` transport and a ready-made connect handshake.

pub mod client;
pub mod commands;
pub mod error;
pub mod failover;
pub mod frame;
pub mod parser;
pub mod protocol;
pub mod session;

pub use commands::{AckMode, FromServer, ToServer};
pub use error::{Result, StompError};
pub use failover::{Broker, BrokerScheme, FailoverConfig, FailoverTransport};
pub use frame::Frame;
pub use parser::FrameParser;
pub use protocol::{HeartBeat, StompVersion};
pub use session::{ReplayEntry, Session, SessionState, SubscribeOptions};
