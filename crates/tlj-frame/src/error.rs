use crate::payload::CodecError;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed on a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// The stream ended before the announced number of bytes arrived.
    #[error("stream ended mid-frame ({received} of {expected} bytes)")]
    Truncated { expected: usize, received: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A received frame carries a type code the registry does not know.
    ///
    /// The payload has already been consumed, so the stream stays aligned.
    #[error("type code {0} on received frame not in type registry")]
    UnknownType(u16),

    /// An outbound value has a type that was never registered.
    #[error("type {0} missing from type registry")]
    UnregisteredType(&'static str),

    /// The payload codec failed to serialize an outbound value.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl FrameError {
    /// Whether a reader should give up on the stream after this error.
    ///
    /// Only [`FrameError::UnknownType`] leaves the stream readable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::UnknownType(_))
    }
}

/// Errors raised while populating a [`crate::TypeRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The type already owns a code in this registry.
    #[error("type {type_name} is already registered as code {code}")]
    AlreadyRegistered { type_name: &'static str, code: u16 },

    /// Every 16-bit code has been handed out.
    #[error("type registry is full (all 65535 codes assigned)")]
    CodeSpaceExhausted,
}

pub type Result<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unknown_type_is_recoverable() {
        assert!(!FrameError::UnknownType(9).is_fatal());
        assert!(FrameError::ConnectionClosed.is_fatal());
        assert!(FrameError::Truncated {
            expected: 1000,
            received: 10
        }
        .is_fatal());
        assert!(FrameError::Io(std::io::Error::other("boom")).is_fatal());
    }
}
