//! Typed request/response client and tag-dispatching server.
//!
//! A [`Client`] wraps one outbound connection: it sends fire-and-forget
//! messages and correlated requests, and routes enveloped answers to the
//! callbacks registered on each [`RequestHandle`].
//!
//! A [`Server`] accepts connections, lets a user-supplied tagging function
//! label each one, and fans every received value out to the event or request
//! callbacks subscribed for the connection's tags. Request callbacks answer
//! through a [`Responder`] bound to the originating connection.

pub mod client;
pub mod config;
pub mod context;
mod dispatch;
pub mod error;
mod handlers;
pub mod server;
pub mod signal;
mod tags;

pub use client::{Client, RequestHandle, WeakClient};
pub use config::{ClientConfig, PendingPolicy, ServerConfig, DEFAULT_FAILED_QUEUE_CAPACITY};
pub use context::{EventContext, RequestContext, Responder};
pub use error::{PeerError, Result};
pub use server::{ConnectionHandle, Server};
pub use signal::{CloseSignal, ConnectionState, FailedQueue};
pub use tlj_frame::ConnectionId;
