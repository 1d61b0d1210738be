use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use tlj_frame::{
    FrameContext, FrameError, FrameReader, FrameWriter, JsonCodec, PayloadCodec, TypeRegistry,
    Value,
};
use tlj_transport::{Endpoint, IpcStream};

use crate::config::{ClientConfig, PendingPolicy};
use crate::dispatch::spawn_callback;
use crate::error::{PeerError, Result};
use crate::signal::{CloseSignal, ConnectionState};

type ResponseCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Callbacks of one request, keyed by the type code they expect.
type PendingEntry = HashMap<u16, Vec<ResponseCallback>>;

/// State shared between client handles and the reader thread.
///
/// The reader holds only this, never the writer, so dropping the last
/// [`Client`] shuts the connection down and lets the reader exit.
struct Correlator<C: PayloadCodec> {
    registry: Arc<TypeRegistry<C>>,
    pending: Mutex<HashMap<u16, PendingEntry>>,
    closed: CloseSignal<FrameError>,
    policy: PendingPolicy,
}

impl<C: PayloadCodec> Correlator<C> {
    fn pending(&self) -> MutexGuard<'_, HashMap<u16, PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_loop(self: Arc<Self>, mut reader: FrameReader<IpcStream>, context: FrameContext) {
        loop {
            match reader.read_next(&self.registry, &context) {
                Ok(Some(decoded)) => match decoded.as_envelope() {
                    Some(envelope) => self.dispatch(
                        envelope.request_id,
                        envelope.type_code,
                        &envelope.data,
                        &context,
                    ),
                    None => debug!(code = decoded.code, "client ignored non-envelope frame"),
                },
                Ok(None) => {}
                Err(err) if !err.is_fatal() => {
                    debug!(error = %err, "client skipped unreadable frame");
                }
                Err(err) => {
                    match &err {
                        FrameError::ConnectionClosed => info!("client connection closed by peer"),
                        other => warn!(error = %other, "client read loop stopped"),
                    }
                    self.closed.close(err);
                    return;
                }
            }
        }
    }

    fn dispatch(&self, request_id: u16, code: u16, data: &[u8], context: &FrameContext) {
        let Some(value) = self.registry.build(code, data, context) else {
            debug!(request_id, code, "dropped response with undecodable payload");
            return;
        };

        let callbacks = {
            let mut pending = self.pending();
            let callbacks = pending
                .get(&request_id)
                .and_then(|entry| entry.get(&code))
                .cloned()
                .unwrap_or_default();
            if !callbacks.is_empty() && self.policy == PendingPolicy::EvictOnDispatch {
                pending.remove(&request_id);
            }
            callbacks
        };

        if callbacks.is_empty() {
            debug!(request_id, code, "no callback registered for response");
            return;
        }
        for callback in callbacks {
            let value = Arc::clone(&value);
            spawn_callback(move || callback(value));
        }
    }
}

struct ClientShared<C: PayloadCodec> {
    core: Arc<Correlator<C>>,
    writer: Mutex<FrameWriter<IpcStream>>,
    control: IpcStream,
    next_request_id: AtomicU16,
}

impl<C: PayloadCodec> Drop for ClientShared<C> {
    fn drop(&mut self) {
        let _ = self.control.shutdown();
    }
}

/// One outbound connection with request/response correlation.
///
/// Cloning is cheap; all clones share the same connection. The connection
/// is shut down when the last clone is dropped or [`Client::close`] is called.
pub struct Client<C: PayloadCodec = JsonCodec> {
    shared: Arc<ClientShared<C>>,
}

impl<C: PayloadCodec> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: PayloadCodec> Client<C> {
    /// Wrap a connected stream and start its reader thread.
    pub fn new(stream: IpcStream, registry: Arc<TypeRegistry<C>>) -> Result<Self> {
        Self::with_config(stream, registry, ClientConfig::default())
    }

    pub fn with_config(
        stream: IpcStream,
        registry: Arc<TypeRegistry<C>>,
        config: ClientConfig,
    ) -> Result<Self> {
        let peer = stream.peer_label();
        let control = stream.try_clone()?;
        let reader = FrameReader::with_config_ipc(stream.try_clone()?, config.frame.clone())?;
        let writer = FrameWriter::with_config_ipc(stream, config.frame.clone())?;

        let core = Arc::new(Correlator {
            registry,
            pending: Mutex::new(HashMap::new()),
            closed: CloseSignal::new(),
            policy: config.pending_policy,
        });

        let context = FrameContext::client(peer.as_str());
        let loop_core = Arc::clone(&core);
        thread::Builder::new()
            .name("tlj-client-reader".to_string())
            .spawn(move || loop_core.read_loop(reader, context))
            .map_err(|source| PeerError::Spawn {
                what: "client reader",
                source,
            })?;

        debug!(peer = %peer, "client started");
        Ok(Self {
            shared: Arc::new(ClientShared {
                core,
                writer: Mutex::new(writer),
                control,
                next_request_id: AtomicU16::new(1),
            }),
        })
    }

    /// Connect to `endpoint` and start a client on the new stream.
    pub fn connect(endpoint: &Endpoint, registry: Arc<TypeRegistry<C>>) -> Result<Self> {
        Self::connect_with_config(endpoint, registry, ClientConfig::default())
    }

    pub fn connect_with_config(
        endpoint: &Endpoint,
        registry: Arc<TypeRegistry<C>>,
        config: ClientConfig,
    ) -> Result<Self> {
        let stream = endpoint.connect()?;
        Self::with_config(stream, registry, config)
    }

    /// Send `value` as a plain frame; no answer is expected.
    pub fn message<T: Serialize + 'static>(&self, value: &T) -> Result<()> {
        let frame = self.shared.core.registry.encode(value)?;
        self.write(&frame)
    }

    /// Send `value` inside an envelope and return a handle for its answers.
    ///
    /// The request is registered before it is written, so callbacks attached
    /// to the returned handle see every answer that arrives afterwards.
    pub fn request<T: Serialize + 'static>(&self, value: &T) -> Result<RequestHandle<C>> {
        self.send_request(value, None)
    }

    /// Like [`Client::request`], with a callback attached before the request
    /// leaves, so even an immediate answer cannot be missed.
    ///
    /// Fails with [`FrameError::UnregisteredType`] if `R` has no type code.
    /// The callback lives as long as the pending entry; to reach the client
    /// from inside it, capture a [`WeakClient`] rather than a clone.
    pub fn request_with<T, R, F>(&self, value: &T, callback: F) -> Result<RequestHandle<C>>
    where
        T: Serialize + 'static,
        R: Send + Sync + 'static,
        F: Fn(Arc<R>) + Send + Sync + 'static,
    {
        let code = self
            .shared
            .core
            .registry
            .lookup::<R>()
            .ok_or(FrameError::UnregisteredType(std::any::type_name::<R>()))?;
        self.send_request(value, Some((code, typed_callback(callback))))
    }

    fn send_request<T: Serialize + 'static>(
        &self,
        value: &T,
        callback: Option<(u16, ResponseCallback)>,
    ) -> Result<RequestHandle<C>> {
        let request_id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = self.shared.core.registry.encode_envelope(value, request_id)?;

        let mut entry = PendingEntry::new();
        if let Some((code, callback)) = callback {
            entry.insert(code, vec![callback]);
        }
        if self
            .shared
            .core
            .pending()
            .insert(request_id, entry)
            .is_some()
        {
            debug!(request_id, "request id reused; replaced stale pending entry");
        }

        if let Err(err) = self.write(&frame) {
            self.shared.core.pending().remove(&request_id);
            return Err(err);
        }
        Ok(RequestHandle {
            request_id,
            client: self.clone(),
        })
    }

    fn write(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self
            .shared
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        writer.write_frame(frame)?;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        if self.shared.core.closed.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    /// The error that stopped the reader, if it has stopped.
    pub fn closed_reason(&self) -> Option<Arc<FrameError>> {
        self.shared.core.closed.get()
    }

    /// Block until the reader stops or `timeout` elapses (`None` waits forever).
    pub fn wait_closed(&self, timeout: Option<Duration>) -> Option<Arc<FrameError>> {
        self.shared.core.closed.wait(timeout)
    }

    /// Number of requests still holding a pending entry.
    pub fn pending_requests(&self) -> usize {
        self.shared.core.pending().len()
    }

    pub fn registry(&self) -> &Arc<TypeRegistry<C>> {
        &self.shared.core.registry
    }

    /// A handle that does not keep the connection open.
    pub fn downgrade(&self) -> WeakClient<C> {
        WeakClient {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Shut the connection down; the reader thread stops shortly after.
    pub fn close(&self) -> Result<()> {
        self.shared.control.shutdown()?;
        Ok(())
    }
}

impl<C: PayloadCodec> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.shared.control.peer_label())
            .field("state", &self.state())
            .finish()
    }
}

/// Non-owning [`Client`] handle.
///
/// Response callbacks are held by the connection itself, and under
/// [`PendingPolicy::Retain`] they are never released. A callback that owns a
/// `Client` clone therefore keeps its own connection open forever.
pub struct WeakClient<C: PayloadCodec = JsonCodec> {
    shared: Weak<ClientShared<C>>,
}

impl<C: PayloadCodec> WeakClient<C> {
    /// The client, unless every owning handle has been dropped.
    pub fn upgrade(&self) -> Option<Client<C>> {
        self.shared.upgrade().map(|shared| Client { shared })
    }
}

impl<C: PayloadCodec> Clone for WeakClient<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<C: PayloadCodec> fmt::Debug for WeakClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakClient")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

/// Handle to one outstanding request.
pub struct RequestHandle<C: PayloadCodec = JsonCodec> {
    request_id: u16,
    client: Client<C>,
}

impl<C: PayloadCodec> RequestHandle<C> {
    pub fn request_id(&self) -> u16 {
        self.request_id
    }

    pub fn client(&self) -> &Client<C> {
        &self.client
    }

    /// Call `callback` with every answer of type `R` to this request.
    ///
    /// Returns `false` without registering anything when `R` has no type
    /// code or the request no longer has a pending entry. See [`WeakClient`]
    /// for callbacks that need the client.
    pub fn on_response<R, F>(&self, callback: F) -> bool
    where
        R: Send + Sync + 'static,
        F: Fn(Arc<R>) + Send + Sync + 'static,
    {
        let core = &self.client.shared.core;
        let Some(code) = core.registry.lookup::<R>() else {
            debug!(
                request_id = self.request_id,
                type_name = std::any::type_name::<R>(),
                "on_response ignored for unregistered type"
            );
            return false;
        };

        let mut pending = core.pending();
        let Some(entry) = pending.get_mut(&self.request_id) else {
            debug!(request_id = self.request_id, "on_response ignored; request no longer pending");
            return false;
        };
        entry
            .entry(code)
            .or_default()
            .push(typed_callback(callback));
        true
    }
}

impl<C: PayloadCodec> fmt::Debug for RequestHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("request_id", &self.request_id)
            .finish()
    }
}

fn typed_callback<R, F>(callback: F) -> ResponseCallback
where
    R: Send + Sync + 'static,
    F: Fn(Arc<R>) + Send + Sync + 'static,
{
    Arc::new(move |value: Value| match value.downcast::<R>() {
        Ok(typed) => callback(typed),
        Err(_) => debug!(
            type_name = std::any::type_name::<R>(),
            "response value did not match callback type"
        ),
    })
}
