use std::io::{self, ErrorKind, Read};

use bytes::BytesMut;
use tlj_transport::IpcStream;
use tracing::{debug, warn};

use crate::codec::{decode_header, FrameConfig, HEADER_SIZE};
use crate::context::FrameContext;
use crate::error::{FrameError, Result};
use crate::payload::PayloadCodec;
use crate::registry::{Decoded, TypeRegistry};

/// Read one frame from `stream` and run it through `registry`.
///
/// - `Ok(Some(_))`: a frame was decoded.
/// - `Ok(None)`: a frame of a known type was consumed but its builder
///   rejected the payload; the caller should simply read on.
/// - `Err(FrameError::UnknownType(_))`: the payload was drained, the stream
///   is still aligned on a frame boundary.
/// - Any other error leaves the stream unusable.
pub fn read_next_frame<R, C>(
    stream: &mut R,
    registry: &TypeRegistry<C>,
    context: &FrameContext,
    max_payload: usize,
) -> Result<Option<Decoded>>
where
    R: Read + ?Sized,
    C: PayloadCodec,
{
    let mut header = [0u8; HEADER_SIZE];
    let got = fill(stream, &mut header)?;
    if got == 0 {
        return Err(FrameError::ConnectionClosed);
    }
    if got < HEADER_SIZE {
        return Err(FrameError::Truncated {
            expected: HEADER_SIZE,
            received: got,
        });
    }

    let header = decode_header(&header);
    let length = header.length as usize;
    if length > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: length,
            max: max_payload,
        });
    }

    if !registry.contains(header.code) {
        let drained = io::copy(&mut (&mut *stream).take(length as u64), &mut io::sink())? as usize;
        if drained < length {
            return Err(FrameError::Truncated {
                expected: length,
                received: drained,
            });
        }
        warn!(code = header.code, length, "skipped frame with unknown type code");
        return Err(FrameError::UnknownType(header.code));
    }

    let mut payload = BytesMut::zeroed(length);
    let got = fill(stream, &mut payload)?;
    if got < length {
        return Err(FrameError::Truncated {
            expected: length,
            received: got,
        });
    }

    match registry.build(header.code, &payload, context) {
        Some(value) => Ok(Some(Decoded {
            code: header.code,
            value,
        })),
        None => {
            debug!(code = header.code, length, "builder rejected payload; frame dropped");
            Ok(None)
        }
    }
}

/// Read until `buf` is full or the stream ends; returns the bytes read.
fn fill<R: Read + ?Sized>(stream: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(filled)
}

/// Reads decoded frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get whole frames.
pub struct FrameReader<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read and decode the next frame (blocking). See [`read_next_frame`].
    pub fn read_next<C: PayloadCodec>(
        &mut self,
        registry: &TypeRegistry<C>,
        context: &FrameContext,
    ) -> Result<Option<Decoded>> {
        read_next_frame(
            &mut self.inner,
            registry,
            context,
            self.config.max_payload_size,
        )
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: tlj_transport::TransportError) -> FrameError {
    match err {
        tlj_transport::TransportError::Io(io) | tlj_transport::TransportError::Accept(io) => {
            FrameError::Io(io)
        }
        tlj_transport::TransportError::Bind { source, .. }
        | tlj_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(io::Error::other(other.to_string())),
    }
}
