use std::fs::{self, Metadata, Permissions};
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::listener::Listener;
use crate::stream::IpcStream;

/// `sun_path` capacity, including the trailing NUL.
#[cfg(target_os = "linux")]
const SUN_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const SUN_PATH_LEN: usize = 104;

/// Device and inode of the socket file a listener created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketIdentity {
    dev: u64,
    ino: u64,
}

impl SocketIdentity {
    fn of(meta: &Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }
}

/// Listener on a filesystem-path Unix domain socket.
///
/// The socket file is unlinked on drop, but only while the path still names
/// the socket this listener bound.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    identity: SocketIdentity,
}

impl UnixDomainSocket {
    /// Mode applied to socket files unless [`UnixDomainSocket::bind_with_mode`] says otherwise.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind `path`, replacing a stale socket left there by an earlier process.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_path_len(&path)?;

        let bind_failed = |source: io::Error| TransportError::Bind {
            addr: path.display().to_string(),
            source,
        };

        remove_stale_socket(&path).map_err(bind_failed)?;
        let listener = UnixListener::bind(&path).map_err(bind_failed)?;
        fs::set_permissions(&path, Permissions::from_mode(mode)).map_err(bind_failed)?;
        let identity = fs::symlink_metadata(&path)
            .map(|meta| SocketIdentity::of(&meta))
            .map_err(bind_failed)?;

        info!(path = %path.display(), mode = format_args!("{mode:o}"), "bound unix socket");
        Ok(Self {
            listener,
            path,
            identity,
        })
    }

    /// Open a blocking connection to the socket at `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            addr: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "connected over unix socket");
        Ok(stream.into())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn still_owns_path(&self) -> bool {
        fs::symlink_metadata(&self.path)
            .map(|meta| meta.file_type().is_socket() && SocketIdentity::of(&meta) == self.identity)
            .unwrap_or(false)
    }
}

fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= SUN_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: SUN_PATH_LEN,
        });
    }
    Ok(())
}

/// Unlink an existing socket at `path`. Anything that is not a socket is
/// left in place and reported as `AlreadyExists`.
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if !meta.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists and is not a unix socket",
        ));
    }
    debug!(path = %path.display(), "removing stale socket");
    fs::remove_file(path)
}

impl Listener for UnixDomainSocket {
    fn accept(&self) -> Result<IpcStream> {
        let (stream, _) = self.listener.accept().map_err(TransportError::Accept)?;
        Ok(stream.into())
    }

    fn local_label(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        if self.still_owns_path() {
            let _ = fs::remove_file(&self.path);
        } else {
            debug!(path = %self.path.display(), "socket path replaced; leaving it");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    struct Scratch(PathBuf);

    impl Scratch {
        fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("tlj-uds-{tag}-{}", std::process::id()));
            fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn sock(&self, name: &str) -> PathBuf {
            self.0.join(name)
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn accepted_stream_carries_bytes() {
        let scratch = Scratch::new("accept");
        let path = scratch.sock("a.sock");
        let listener = UnixDomainSocket::bind(&path).unwrap();
        assert_eq!(listener.local_label(), format!("unix:{}", path.display()));

        let client_path = path.clone();
        let client = std::thread::spawn(move || {
            let mut stream = UnixDomainSocket::connect(&client_path).unwrap();
            stream.write_all(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x00]).unwrap();
        });

        let mut accepted = listener.accept().unwrap();
        let mut header = [0u8; 6];
        accepted.read_exact(&mut header).unwrap();
        assert_eq!(header, [0x01, 0, 0, 0, 0, 0]);
        client.join().unwrap();

        drop(listener);
        assert!(!path.exists());
    }

    #[test]
    fn overlong_path_is_rejected() {
        let path = PathBuf::from(format!("/tmp/{}.sock", "x".repeat(SUN_PATH_LEN)));
        assert!(matches!(
            UnixDomainSocket::bind(&path),
            Err(TransportError::PathTooLong { max: SUN_PATH_LEN, .. })
        ));
    }

    #[test]
    fn socket_mode_defaults_to_owner_only() {
        let scratch = Scratch::new("mode");
        let path = scratch.sock("m.sock");
        let _listener = UnixDomainSocket::bind(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, UnixDomainSocket::DEFAULT_SOCKET_MODE);
    }

    #[test]
    fn regular_file_is_not_replaced() {
        let scratch = Scratch::new("file");
        let path = scratch.sock("data.sock");
        fs::write(&path, b"keep me").unwrap();

        assert!(matches!(
            UnixDomainSocket::bind(&path),
            Err(TransportError::Bind { .. })
        ));
        assert_eq!(fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn stale_socket_is_replaced() {
        let scratch = Scratch::new("stale");
        let path = scratch.sock("s.sock");
        std::mem::forget(UnixDomainSocket::bind(&path).unwrap());
        assert!(path.exists());

        let rebound = UnixDomainSocket::bind(&path).unwrap();
        assert!(rebound.still_owns_path());
    }

    #[test]
    fn drop_leaves_a_replaced_path_alone() {
        let scratch = Scratch::new("replaced");
        let path = scratch.sock("r.sock");
        let listener = UnixDomainSocket::bind(&path).unwrap();

        fs::remove_file(&path).unwrap();
        fs::write(&path, b"someone else").unwrap();
        drop(listener);

        assert_eq!(fs::read(&path).unwrap(), b"someone else");
    }
}
