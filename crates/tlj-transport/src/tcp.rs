use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::listener::Listener;
use crate::stream::IpcStream;

/// TCP transport.
///
/// Nagle is disabled on every stream so small frames are not held back.
pub struct TcpTransport {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on a TCP address. Port 0 picks an ephemeral port.
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let label = format!("{addr:?}");
        let listener = TcpListener::bind(&addr).map_err(|e| TransportError::Bind {
            addr: label.clone(),
            source: e,
        })?;
        let addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: label,
            source: e,
        })?;

        info!(%addr, "listening on tcp");

        Ok(Self { listener, addr })
    }

    /// Connect to a listening TCP address (blocking).
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<IpcStream> {
        let stream = TcpStream::connect(&addr).map_err(|e| TransportError::Connect {
            addr: format!("{addr:?}"),
            source: e,
        })?;
        stream.set_nodelay(true)?;
        debug!(?addr, "connected over tcp");
        Ok(stream.into())
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Listener for TcpTransport {
    fn accept(&self) -> Result<IpcStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted tcp connection");
        Ok(stream.into())
    }

    fn local_label(&self) -> String {
        format!("tcp:{}", self.addr)
    }
}
