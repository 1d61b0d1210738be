use std::fmt;
use std::sync::Arc;

/// Server-assigned identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which side of a connection decoded a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Decoded outside any client or server (tools, tests).
    #[default]
    Standalone,
    Client,
    Server,
}

/// Ambient information handed to every builder.
///
/// Builders can use it for contextual validation, e.g. accepting a message
/// type only from server-side connections.
#[derive(Debug, Clone, Default)]
pub struct FrameContext {
    pub role: Role,
    pub connection: Option<ConnectionId>,
    pub peer: Option<Arc<str>>,
}

impl FrameContext {
    pub fn client(peer: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::Client,
            connection: None,
            peer: Some(peer.into()),
        }
    }

    pub fn server(connection: ConnectionId, peer: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::Server,
            connection: Some(connection),
            peer: Some(peer.into()),
        }
    }
}
