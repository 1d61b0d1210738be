use std::fmt;
use std::io;

use tlj_frame::FrameError;
use tlj_peer::PeerError;
use tlj_schema::SchemaError;
use tlj_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: &io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: &TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidEndpoint(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: &FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::Codec(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed | FrameError::Truncated { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn peer_error(context: &str, err: &PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::Spawn { .. } | PeerError::TagPanicked(_) => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
    }
}

pub fn schema_error(context: &str, err: &SchemaError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connection_is_transport_error() {
        let err = PeerError::Transport(TransportError::Connect {
            addr: "unix:/tmp/none.sock".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        });
        assert_eq!(peer_error("connect", &err).code, TRANSPORT_ERROR);
    }

    #[test]
    fn bad_endpoint_is_usage_error() {
        let err = TransportError::InvalidEndpoint("nowhere".to_string());
        assert_eq!(transport_error("parse", &err).code, USAGE);
    }

    #[test]
    fn oversized_payload_is_data_invalid() {
        let err = FrameError::PayloadTooLarge { size: 10, max: 5 };
        let cli = frame_error("send", &err);
        assert_eq!(cli.code, DATA_INVALID);
        assert!(cli.message.starts_with("send: "));
    }
}
