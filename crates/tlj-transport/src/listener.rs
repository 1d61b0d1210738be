use crate::error::Result;
use crate::stream::IpcStream;

/// A bound socket that hands out connected streams.
///
/// The server's accept loop owns one of these and blocks in [`Listener::accept`]
/// until a peer connects or the listener fails.
pub trait Listener: Send + 'static {
    /// Accept the next incoming connection (blocking).
    fn accept(&self) -> Result<IpcStream>;

    /// Human-readable local address, for logs.
    fn local_label(&self) -> String;
}

impl<L: Listener + ?Sized> Listener for Box<L> {
    fn accept(&self) -> Result<IpcStream> {
        (**self).accept()
    }

    fn local_label(&self) -> String {
        (**self).local_label()
    }
}
