/// Errors that can occur in client and server operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] tlj_transport::TransportError),

    /// Frame-level error, including unregistered outbound types.
    #[error("frame error: {0}")]
    Frame(#[from] tlj_frame::FrameError),

    /// A background thread could not be started.
    #[error("failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        source: std::io::Error,
    },

    /// The server's tagging function panicked; the connection was dropped.
    #[error("tagging function panicked on {0}")]
    TagPanicked(tlj_frame::ConnectionId),
}

pub type Result<T> = std::result::Result<T, PeerError>;
