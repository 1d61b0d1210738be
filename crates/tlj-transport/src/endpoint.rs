use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, TransportError};
use crate::listener::Listener;
use crate::stream::IpcStream;
use crate::tcp::TcpTransport;

/// Where to connect or listen.
///
/// Parsed from `unix:<path>` or `tcp:<host:port>`. A bare string containing a
/// `/` is taken as a Unix socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    /// Open a connection to this endpoint.
    pub fn connect(&self) -> Result<IpcStream> {
        match self {
            #[cfg(unix)]
            Endpoint::Unix(path) => crate::uds::UnixDomainSocket::connect(path),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::Unsupported("unix")),
            Endpoint::Tcp(addr) => TcpTransport::connect(addr.as_str()),
        }
    }

    /// Bind a listener on this endpoint.
    pub fn bind(&self) -> Result<Box<dyn Listener>> {
        match self {
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Box::new(crate::uds::UnixDomainSocket::bind(path)?)),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::Unsupported("unix")),
            Endpoint::Tcp(addr) => Ok(Box::new(TcpTransport::bind(addr.as_str())?)),
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            if !addr.contains(':') {
                return Err(TransportError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Endpoint::Tcp(addr.to_string()));
        }
        if s.contains('/') {
            return Ok(Endpoint::Unix(PathBuf::from(s)));
        }
        Err(TransportError::InvalidEndpoint(s.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_forms() {
        assert_eq!(
            "unix:/tmp/a.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/tmp/a.sock"))
        );
        assert_eq!(
            "tcp:127.0.0.1:9000".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:9000".to_string())
        );
    }

    #[test]
    fn bare_path_is_unix() {
        assert_eq!(
            "./run/tlj.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("./run/tlj.sock"))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "localhost".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!("tcp:nohostport".parse::<Endpoint>().is_err());
        assert!("unix:".parse::<Endpoint>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for text in ["unix:/tmp/x.sock", "tcp:[::1]:80"] {
            let endpoint: Endpoint = text.parse().unwrap();
            assert_eq!(endpoint.to_string(), text);
        }
    }

    #[test]
    fn tcp_endpoint_binds_and_connects() {
        let listener = Endpoint::Tcp("127.0.0.1:0".to_string()).bind().unwrap();
        let label = listener.local_label();
        let addr = label.strip_prefix("tcp:").unwrap().to_string();

        let handle = std::thread::spawn(move || Endpoint::Tcp(addr).connect().unwrap());
        let _server_side = listener.accept().unwrap();
        let _client_side = handle.join().unwrap();
    }
}
