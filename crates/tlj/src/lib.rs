//! Typed, length-prefixed message exchange over stream sockets.
//!
//! Every value travels as one frame: a little-endian `u16` type code, a
//! little-endian `u32` payload length, then the encoded payload. Peers agree
//! on codes by registering the same types in the same order.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte streams and listeners (Unix domain sockets, TCP)
//! - [`frame`]: type registry, payload codecs, frame reader and writer
//! - [`schema`]: JSON Schema validation per type code (behind `schema` feature)
//! - [`peer`]: request/response client and tag-dispatching server (behind `peer` feature)
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde::{Deserialize, Serialize};
//! use tlj::frame::TypeRegistry;
//! use tlj::peer::{Client, Server};
//! use tlj::transport::Endpoint;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Ping {
//!     seq: u32,
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let types = TypeRegistry::new();
//! types.register::<Ping>()?;
//! let types = Arc::new(types);
//!
//! let endpoint: Endpoint = "unix:/tmp/tlj-demo.sock".parse()?;
//! let server = Server::bind(
//!     &endpoint,
//!     |conn, server| {
//!         server.tag_socket(conn.id(), "all");
//!     },
//!     Arc::clone(&types),
//! )?;
//! server.accept_request::<Ping, _>("all", |ping, ctx| {
//!     let _ = ctx.respond(&Ping { seq: ping.seq + 1 });
//! });
//!
//! let client = Client::connect(&endpoint, types)?;
//! client.request_with::<_, Ping, _>(&Ping { seq: 1 }, |pong| {
//!     println!("got {}", pong.seq);
//! })?;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use tlj_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use tlj_frame::*;
}

/// Re-export schema types (requires `schema` feature).
#[cfg(feature = "schema")]
pub mod schema {
    pub use tlj_schema::*;
}

/// Re-export client and server types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use tlj_peer::*;
}
