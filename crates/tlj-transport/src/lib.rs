//! Connection-oriented byte streams for tlj.
//!
//! Provides a single stream type over the transports tlj speaks:
//! - Unix domain sockets (Linux/macOS)
//! - TCP
//!
//! This is the lowest layer of tlj. Framing, the type registry and the
//! client/server engines all build on [`IpcStream`] and [`Listener`].

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod uds;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use listener::Listener;
pub use stream::IpcStream;
pub use tcp::TcpTransport;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
