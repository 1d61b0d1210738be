use std::io::{ErrorKind, Write};
use std::marker::PhantomData;

use bytes::BytesMut;
use serde::Serialize;
use tlj_transport::IpcStream;

use crate::codec::{encode_frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::payload::{JsonCodec, PayloadCodec};
use crate::reader::transport_to_frame_error;
use crate::registry::TypeRegistry;

/// Writes complete frames to any `Write` stream.
///
/// A frame is always written in full before `write_frame` returns, so
/// callers that serialize access to one writer never interleave frames.
pub struct FrameWriter<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Write one already-encoded frame (header + payload), blocking.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let payload_len = frame.len().saturating_sub(HEADER_SIZE);
        if payload_len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: self.config.max_payload_size,
            });
        }

        let mut rest = frame;
        while !rest.is_empty() {
            match self.inner.write(rest) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => rest = &rest[n..],
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                // A configured write timeout surfaces as WouldBlock/TimedOut.
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Encode `value` through `registry` and write it.
    pub fn send<C, V>(&mut self, registry: &TypeRegistry<C>, value: &V) -> Result<()>
    where
        C: PayloadCodec,
        V: Serialize + 'static,
    {
        let frame = registry.encode(value)?;
        self.write_frame(&frame)
    }

    /// Encode `value` inside an envelope under `request_id` and write it.
    pub fn send_envelope<C, V>(
        &mut self,
        registry: &TypeRegistry<C>,
        value: &V,
        request_id: u16,
    ) -> Result<()>
    where
        C: PayloadCodec,
        V: Serialize + 'static,
    {
        let frame = registry.encode_envelope(value, request_id)?;
        self.write_frame(&frame)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                other => return other.map_err(FrameError::Io),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<IpcStream> {
    /// Create a frame writer for `IpcStream` and apply write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

/// A writer bound to a single message type.
///
/// The type code is resolved once at construction, so each write only
/// serializes and frames the value.
pub struct TypedWriter<V, W, C: PayloadCodec = JsonCodec> {
    writer: FrameWriter<W>,
    code: u16,
    buf: BytesMut,
    _marker: PhantomData<fn(&V, C)>,
}

impl<V, W, C> TypedWriter<V, W, C>
where
    V: Serialize + 'static,
    W: Write,
    C: PayloadCodec,
{
    /// Fails with [`FrameError::UnregisteredType`] if `V` has no code.
    pub fn new(writer: FrameWriter<W>, registry: &TypeRegistry<C>) -> Result<Self> {
        let code = registry.require_code::<V>()?;
        Ok(Self {
            writer,
            code,
            buf: BytesMut::new(),
            _marker: PhantomData,
        })
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn write(&mut self, value: &V) -> Result<()> {
        let payload = C::marshal(value)?;
        self.buf.clear();
        encode_frame(self.code, &payload, &mut self.buf)?;
        self.writer.write_frame(&self.buf)
    }

    pub fn into_inner(self) -> FrameWriter<W> {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use serde::Deserialize;

    use super::*;
    use crate::codec::DEFAULT_MAX_PAYLOAD;
    use crate::context::FrameContext;
    use crate::reader::FrameReader;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Thingy {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "ID")]
        id: i64,
    }

    #[derive(Serialize)]
    struct Unregistered;

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry.register::<Thingy>().unwrap();
        registry
    }

    fn thingy(id: i64) -> Thingy {
        Thingy {
            name: "test".to_string(),
            id,
        }
    }

    fn read_back(wire: Vec<u8>, registry: &TypeRegistry, count: usize) -> Vec<Thingy> {
        let mut reader = FrameReader::new(Cursor::new(wire));
        (0..count)
            .map(|_| {
                let decoded = reader
                    .read_next(registry, &FrameContext::default())
                    .unwrap()
                    .unwrap();
                (*decoded.downcast::<Thingy>().unwrap()).clone()
            })
            .collect()
    }

    #[test]
    fn send_writes_decodable_frames() {
        let registry = registry();
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.send(&registry, &thingy(1)).unwrap();
        writer.send(&registry, &thingy(2)).unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(read_back(wire, &registry, 2), vec![thingy(1), thingy(2)]);
    }

    #[test]
    fn send_unregistered_writes_nothing() {
        let registry = registry();
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));

        let err = writer.send(&registry, &Unregistered).unwrap_err();
        assert!(matches!(err, FrameError::UnregisteredType(_)));
        assert!(writer.into_inner().into_inner().is_empty());
    }

    #[test]
    fn payload_too_large_rejected() {
        let registry = registry();
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::new()), cfg);

        let err = writer.send(&registry, &thingy(1)).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { max: 4, .. }));
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send(&registry(), &thingy(1)).unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_write() {
        let mut writer = FrameWriter::new(InterruptedOnce {
            interrupted: false,
            data: Vec::new(),
        });
        writer.send(&registry(), &thingy(3)).unwrap();

        let wire = writer.into_inner().data;
        assert_eq!(read_back(wire, &registry(), 1), vec![thingy(3)]);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(&registry(), &thingy(1)).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn typed_writer_matches_registry_encoding() {
        let registry = registry();
        let mut typed: TypedWriter<Thingy, _> =
            TypedWriter::new(FrameWriter::new(Cursor::new(Vec::new())), &registry).unwrap();
        assert_eq!(typed.code(), 1);

        typed.write(&thingy(9)).unwrap();
        let wire = typed.into_inner().into_inner().into_inner();

        assert_eq!(wire, registry.encode(&thingy(9)).unwrap().to_vec());
    }

    #[test]
    fn typed_writer_requires_registration() {
        let registry = registry();
        let result: Result<TypedWriter<Unregistered, _>> =
            TypedWriter::new(FrameWriter::new(Cursor::new(Vec::new())), &registry);
        assert!(matches!(result, Err(FrameError::UnregisteredType(_))));
    }

    #[test]
    fn default_config_limit() {
        let writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        assert_eq!(writer.config().max_payload_size, DEFAULT_MAX_PAYLOAD);
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedOnce {
        interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
