use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use tlj_frame::{
    ConnectionId, Decoded, FrameContext, FrameError, FrameReader, FrameWriter, JsonCodec,
    PayloadCodec, TypeRegistry, Value,
};
use tlj_transport::{Endpoint, IpcStream, Listener, TransportError};

use crate::config::ServerConfig;
use crate::context::{EventContext, RequestContext};
use crate::dispatch::spawn_callback;
use crate::error::{PeerError, Result};
use crate::handlers::HandlerTable;
use crate::signal::{CloseSignal, FailedQueue};
use crate::tags::TagIndex;

type TagFn<C> = dyn Fn(&ConnectionHandle, &Server<C>) + Send + Sync;
type EventCallback<C> = Arc<dyn Fn(Value, EventContext<C>) + Send + Sync>;
type RequestCallback<C> = Arc<dyn Fn(Value, RequestContext<C>) + Send + Sync>;

struct ConnectionInner {
    id: ConnectionId,
    peer: Arc<str>,
    credentials: Option<(u32, u32, u32)>,
    writer: Mutex<FrameWriter<IpcStream>>,
    control: IpcStream,
    reported: AtomicBool,
}

/// One accepted connection.
///
/// All responders of a connection write through the same lock, so frames
/// from concurrent callbacks never interleave on the wire.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Transport label of the remote end, e.g. `unix:/run/app.sock`.
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Remote `(pid, uid, gid)` when the transport reports it.
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        self.inner.credentials
    }

    /// Write one encoded frame under the connection's write lock.
    pub fn write_frame(&self, frame: &[u8]) -> std::result::Result<(), FrameError> {
        let mut writer = self
            .inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        writer.write_frame(frame)
    }

    /// Shut the connection down; its read loop ends shortly after.
    pub fn close(&self) -> Result<()> {
        self.inner.control.shutdown()?;
        Ok(())
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .finish()
    }
}

/// Live connections and their tags, kept under one lock so a tag can only
/// be attached to a connection that is still registered.
#[derive(Default)]
struct Roster {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    tags: TagIndex,
}

struct ServerShared<C: PayloadCodec> {
    registry: Arc<TypeRegistry<C>>,
    tag_fn: Box<TagFn<C>>,
    roster: Mutex<Roster>,
    events: HandlerTable<EventCallback<C>>,
    requests: HandlerTable<RequestCallback<C>>,
    failed: FailedQueue,
    listener_failure: CloseSignal<TransportError>,
    next_connection_id: AtomicU64,
    config: ServerConfig,
}

/// Accepts connections, tags them, and dispatches received values to the
/// callbacks subscribed for each tag.
///
/// Cloning is cheap; all clones refer to the same server.
pub struct Server<C: PayloadCodec = JsonCodec> {
    shared: Arc<ServerShared<C>>,
}

impl<C: PayloadCodec> Clone for Server<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: PayloadCodec> Server<C> {
    /// Start accepting on `listener`.
    ///
    /// `tag_fn` runs once per accepted connection, before any of its frames
    /// are read; connections it leaves untagged receive no dispatch.
    /// A connection whose `tag_fn` call panics is dropped; accepting goes on.
    pub fn new<L, F>(listener: L, tag_fn: F, registry: Arc<TypeRegistry<C>>) -> Result<Self>
    where
        L: Listener,
        F: Fn(&ConnectionHandle, &Server<C>) + Send + Sync + 'static,
    {
        Self::with_config(listener, tag_fn, registry, ServerConfig::default())
    }

    pub fn with_config<L, F>(
        listener: L,
        tag_fn: F,
        registry: Arc<TypeRegistry<C>>,
        config: ServerConfig,
    ) -> Result<Self>
    where
        L: Listener,
        F: Fn(&ConnectionHandle, &Server<C>) + Send + Sync + 'static,
    {
        let server = Self::detached(tag_fn, registry, config);
        let weak = Arc::downgrade(&server.shared);
        let label = listener.local_label();
        thread::Builder::new()
            .name("tlj-accept".to_string())
            .spawn(move || accept_loop(listener, weak))
            .map_err(|source| PeerError::Spawn {
                what: "accept",
                source,
            })?;
        info!(listener = %label, "server accepting connections");
        Ok(server)
    }

    /// Bind `endpoint` and start accepting on it.
    pub fn bind<F>(endpoint: &Endpoint, tag_fn: F, registry: Arc<TypeRegistry<C>>) -> Result<Self>
    where
        F: Fn(&ConnectionHandle, &Server<C>) + Send + Sync + 'static,
    {
        Self::bind_with_config(endpoint, tag_fn, registry, ServerConfig::default())
    }

    pub fn bind_with_config<F>(
        endpoint: &Endpoint,
        tag_fn: F,
        registry: Arc<TypeRegistry<C>>,
        config: ServerConfig,
    ) -> Result<Self>
    where
        F: Fn(&ConnectionHandle, &Server<C>) + Send + Sync + 'static,
    {
        let listener = endpoint.bind()?;
        Self::with_config(listener, tag_fn, registry, config)
    }

    /// A server without an accept loop; connections arrive via [`Server::insert`].
    pub fn detached<F>(tag_fn: F, registry: Arc<TypeRegistry<C>>, config: ServerConfig) -> Self
    where
        F: Fn(&ConnectionHandle, &Server<C>) + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(ServerShared {
                registry,
                tag_fn: Box::new(tag_fn),
                roster: Mutex::new(Roster::default()),
                events: HandlerTable::new(),
                requests: HandlerTable::new(),
                failed: FailedQueue::new(config.failed_queue_capacity),
                listener_failure: CloseSignal::new(),
                next_connection_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Adopt an already-connected stream: tag it, then start its read loop.
    pub fn insert(&self, stream: IpcStream) -> Result<ConnectionHandle> {
        let frame_config = self.shared.config.frame.clone();
        let id = ConnectionId::new(self.shared.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let peer: Arc<str> = stream.peer_label().into();
        let credentials = stream.peer_credentials();
        let control = stream.try_clone()?;
        let reader = FrameReader::with_config_ipc(stream.try_clone()?, frame_config.clone())?;
        let writer = FrameWriter::with_config_ipc(stream, frame_config)?;

        let conn = ConnectionHandle {
            inner: Arc::new(ConnectionInner {
                id,
                peer,
                credentials,
                writer: Mutex::new(writer),
                control,
                reported: AtomicBool::new(false),
            }),
        };
        self.roster().connections.insert(id, conn.clone());
        debug!(connection = %id, peer = %conn.peer(), "connection inserted");

        let tagged = panic::catch_unwind(AssertUnwindSafe(|| (self.shared.tag_fn)(&conn, self)));
        if tagged.is_err() {
            warn!(connection = %id, "tagging function panicked; dropping connection");
            self.delete(id);
            let _ = conn.close();
            return Err(PeerError::TagPanicked(id));
        }

        let server = self.clone();
        let loop_conn = conn.clone();
        let spawned = thread::Builder::new()
            .name(format!("tlj-{id}"))
            .spawn(move || server.read_loop(loop_conn, reader));
        if let Err(source) = spawned {
            self.delete(id);
            return Err(PeerError::Spawn {
                what: "connection reader",
                source,
            });
        }
        Ok(conn)
    }

    /// Attach `tag` to a live connection.
    ///
    /// Returns `false` if the connection already carried the tag, or if it
    /// is unknown or already deleted.
    pub fn tag_socket(&self, conn: ConnectionId, tag: &str) -> bool {
        let added = {
            let mut roster = self.roster();
            if !roster.connections.contains_key(&conn) {
                debug!(connection = %conn, tag, "tag refused for unknown connection");
                return false;
            }
            roster.tags.tag(conn, tag)
        };
        if added {
            debug!(connection = %conn, tag, "connection tagged");
        }
        added
    }

    /// Remove `tag` from a connection. Returns `false` if it was not there.
    pub fn untag_socket(&self, conn: ConnectionId, tag: &str) -> bool {
        let removed = self.roster().tags.untag(conn, tag);
        if removed {
            debug!(connection = %conn, tag, "connection untagged");
        }
        removed
    }

    /// Forget a connection: drop all of its tags and its registry entry.
    ///
    /// The stream itself is not closed. Calling this twice is harmless.
    pub fn delete(&self, conn: ConnectionId) {
        let (known, tags) = {
            let mut roster = self.roster();
            let tags = roster.tags.remove(conn);
            (roster.connections.remove(&conn).is_some(), tags)
        };
        if known || !tags.is_empty() {
            debug!(connection = %conn, tags = ?tags, "connection deleted");
        }
    }

    /// Subscribe `callback` to plain frames of type `T` on connections
    /// tagged `tag`.
    ///
    /// Returns `false` without subscribing when `T` has no type code.
    pub fn accept<T, F>(&self, tag: &str, callback: F) -> bool
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>, EventContext<C>) + Send + Sync + 'static,
    {
        let Some(code) = self.lookup::<T>("accept") else {
            return false;
        };
        let callback: EventCallback<C> = Arc::new(move |value: Value, ctx: EventContext<C>| {
            if let Ok(typed) = value.downcast::<T>() {
                callback(typed, ctx);
            }
        });
        self.shared.events.insert(tag, code, callback);
        true
    }

    /// Subscribe `callback` to requests carrying a `T` on connections tagged
    /// `tag`. The callback answers through its [`RequestContext`].
    ///
    /// Returns `false` without subscribing when `T` has no type code.
    pub fn accept_request<T, F>(&self, tag: &str, callback: F) -> bool
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>, RequestContext<C>) + Send + Sync + 'static,
    {
        let Some(code) = self.lookup::<T>("accept_request") else {
            return false;
        };
        let callback: RequestCallback<C> = Arc::new(move |value: Value, ctx: RequestContext<C>| {
            if let Ok(typed) = value.downcast::<T>() {
                callback(typed, ctx);
            }
        });
        self.shared.requests.insert(tag, code, callback);
        true
    }

    fn lookup<T: 'static>(&self, what: &'static str) -> Option<u16> {
        let code = self.shared.registry.lookup::<T>();
        if code.is_none() {
            warn!(
                type_name = std::any::type_name::<T>(),
                "{what} ignored for unregistered type"
            );
        }
        code
    }

    /// Tags currently attached to `conn`, sorted.
    pub fn tags_of(&self, conn: ConnectionId) -> Vec<String> {
        self.roster().tags.tags_of(conn)
    }

    /// Connections currently carrying `tag`, sorted by id.
    pub fn connections_tagged(&self, tag: &str) -> Vec<ConnectionId> {
        self.roster().tags.connections_of(tag)
    }

    /// A live connection by id.
    pub fn connection(&self, conn: ConnectionId) -> Option<ConnectionHandle> {
        self.roster().connections.get(&conn).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.roster().connections.len()
    }

    /// Number of subscribed event and request callbacks.
    pub fn handler_count(&self) -> usize {
        self.shared.events.count() + self.shared.requests.count()
    }

    /// Next connection whose read loop or responder failed, waiting up to
    /// `timeout` (`None` waits forever).
    pub fn next_failed(&self, timeout: Option<Duration>) -> Option<ConnectionId> {
        self.shared.failed.pop(timeout)
    }

    pub fn try_next_failed(&self) -> Option<ConnectionId> {
        self.shared.failed.try_pop()
    }

    /// The accept error that stopped the listener, if it stopped.
    pub fn listener_failure(&self) -> Option<Arc<TransportError>> {
        self.shared.listener_failure.get()
    }

    /// Block until the listener stops or `timeout` elapses (`None` waits forever).
    pub fn wait_listener_failure(&self, timeout: Option<Duration>) -> Option<Arc<TransportError>> {
        self.shared.listener_failure.wait(timeout)
    }

    pub fn registry(&self) -> &Arc<TypeRegistry<C>> {
        &self.shared.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Forget a failed connection, shut it down and report it once.
    pub(crate) fn fail(&self, conn: &ConnectionHandle) {
        self.delete(conn.id());
        let _ = conn.close();
        if !conn.inner.reported.swap(true, Ordering::AcqRel) {
            self.shared.failed.push(conn.id());
        }
    }

    fn roster(&self) -> MutexGuard<'_, Roster> {
        self.shared.roster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_loop(self, conn: ConnectionHandle, mut reader: FrameReader<IpcStream>) {
        let context = FrameContext::server(conn.id(), Arc::clone(&conn.inner.peer));
        loop {
            match reader.read_next(&self.shared.registry, &context) {
                Ok(Some(decoded)) => self.dispatch(&conn, decoded, &context),
                Ok(None) => {}
                Err(err) if !err.is_fatal() => {
                    debug!(connection = %conn.id(), error = %err, "skipped unreadable frame");
                }
                Err(err) => {
                    match err {
                        FrameError::ConnectionClosed => {
                            info!(connection = %conn.id(), "connection closed by peer")
                        }
                        other => warn!(connection = %conn.id(), error = %other, "connection read failed"),
                    }
                    self.fail(&conn);
                    return;
                }
            }
        }
    }

    fn dispatch(&self, conn: &ConnectionHandle, decoded: Decoded, context: &FrameContext) {
        let tags = self.tags_of(conn.id());
        if tags.is_empty() {
            debug!(connection = %conn.id(), code = decoded.code, "frame from untagged connection dropped");
            return;
        }

        match decoded.as_envelope() {
            Some(envelope) => {
                let mut inner: Option<Value> = None;
                for tag in &tags {
                    for callback in self.shared.requests.get(tag, envelope.type_code) {
                        let value = match &inner {
                            Some(value) => Arc::clone(value),
                            None => {
                                let Some(value) = self.shared.registry.build(
                                    envelope.type_code,
                                    &envelope.data,
                                    context,
                                ) else {
                                    debug!(
                                        connection = %conn.id(),
                                        request_id = envelope.request_id,
                                        code = envelope.type_code,
                                        "request with undecodable payload dropped"
                                    );
                                    return;
                                };
                                inner = Some(Arc::clone(&value));
                                value
                            }
                        };
                        let ctx = RequestContext::new(self.clone(), conn.clone(), envelope.request_id);
                        spawn_callback(move || callback(value, ctx));
                    }
                }
            }
            None => {
                for tag in &tags {
                    for callback in self.shared.events.get(tag, decoded.code) {
                        let value = Arc::clone(&decoded.value);
                        let ctx = EventContext::new(self.clone(), conn.clone());
                        spawn_callback(move || callback(value, ctx));
                    }
                }
            }
        }
    }
}

impl<C: PayloadCodec> fmt::Debug for Server<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("connections", &self.connection_count())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

fn accept_loop<L, C>(listener: L, weak: Weak<ServerShared<C>>)
where
    L: Listener,
    C: PayloadCodec,
{
    loop {
        let accepted = listener.accept();
        let Some(shared) = weak.upgrade() else {
            debug!("server dropped; accept loop exiting");
            return;
        };
        let server = Server { shared };
        match accepted {
            Ok(stream) => {
                if let Err(err) = server.insert(stream) {
                    warn!(error = %err, "failed to start accepted connection");
                }
            }
            Err(err) => {
                warn!(listener = %listener.local_label(), error = %err, "listener stopped");
                server.shared.listener_failure.close(err);
                return;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::mpsc;

    use serde::{Deserialize, Serialize};
    use tlj_frame::FrameReader;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    const WAIT: Duration = Duration::from_secs(5);

    fn detached_server() -> Server {
        let registry = TypeRegistry::new();
        registry.register::<Note>().unwrap();
        Server::detached(
            |conn, server| {
                server.tag_socket(conn.id(), "all");
            },
            Arc::new(registry),
            ServerConfig::default(),
        )
    }

    #[test]
    fn insert_runs_tag_fn_and_assigns_ids() {
        let server = detached_server();
        let (a, _a_peer) = IpcStream::pair().unwrap();
        let (b, _b_peer) = IpcStream::pair().unwrap();

        let first = server.insert(a).unwrap();
        let second = server.insert(b).unwrap();

        assert_eq!(first.id(), ConnectionId::new(1));
        assert_eq!(second.id(), ConnectionId::new(2));
        assert_eq!(server.connections_tagged("all"), vec![first.id(), second.id()]);
        assert_eq!(server.connection_count(), 2);
    }

    #[test]
    fn delete_is_idempotent() {
        let server = detached_server();
        let (stream, _peer) = IpcStream::pair().unwrap();
        let conn = server.insert(stream).unwrap();

        server.delete(conn.id());
        server.delete(conn.id());

        assert!(server.tags_of(conn.id()).is_empty());
        assert!(server.connection(conn.id()).is_none());
    }

    #[test]
    fn tagging_dead_or_unknown_connection_is_refused() {
        let server = detached_server();
        let (stream, peer) = IpcStream::pair().unwrap();
        let conn = server.insert(stream).unwrap();
        drop(peer);
        assert_eq!(server.next_failed(Some(WAIT)), Some(conn.id()));

        assert!(!server.tag_socket(conn.id(), "late"));
        assert!(!server.tag_socket(ConnectionId::new(999), "ghost"));
        assert!(server.tags_of(conn.id()).is_empty());
        assert!(server.connections_tagged("late").is_empty());
        assert!(server.connections_tagged("ghost").is_empty());
    }

    #[test]
    fn failed_connection_is_reported_once() {
        let server = detached_server();
        let (stream, _peer) = IpcStream::pair().unwrap();
        let conn = server.insert(stream).unwrap();

        server.fail(&conn);
        server.fail(&conn);

        assert_eq!(server.next_failed(Some(WAIT)), Some(conn.id()));
        assert!(server.next_failed(Some(Duration::from_millis(200))).is_none());
        assert!(server.connection(conn.id()).is_none());
    }

    #[test]
    fn panicking_tag_fn_drops_only_that_connection() {
        let server = Server::detached(
            |conn, server| {
                if conn.id() == ConnectionId::new(1) {
                    panic!("cannot classify {}", conn.id());
                }
                server.tag_socket(conn.id(), "all");
            },
            Arc::new(TypeRegistry::new()),
            ServerConfig::default(),
        );
        let (a, _a_peer) = IpcStream::pair().unwrap();
        let (b, _b_peer) = IpcStream::pair().unwrap();

        assert!(matches!(
            server.insert(a),
            Err(PeerError::TagPanicked(id)) if id == ConnectionId::new(1)
        ));
        let second = server.insert(b).unwrap();
        assert_eq!(server.connection_count(), 1);
        assert_eq!(server.connections_tagged("all"), vec![second.id()]);
    }

    #[test]
    fn responder_answers_on_originating_connection() {
        let server = detached_server();
        server.accept_request::<Note, _>("all", |note, ctx| {
            let reply = Note {
                text: format!("re: {}", note.text),
            };
            ctx.respond(&reply).unwrap();
        });

        let (stream, peer) = IpcStream::pair().unwrap();
        server.insert(stream).unwrap();

        let registry = Arc::clone(server.registry());
        let mut writer = FrameWriter::new(peer.try_clone().unwrap());
        writer
            .send_envelope(
                &registry,
                &Note {
                    text: "hi".to_string(),
                },
                42,
            )
            .unwrap();

        peer.set_read_timeout(Some(WAIT)).unwrap();
        let mut reader = FrameReader::new(peer);
        let decoded = reader
            .read_next(&registry, &FrameContext::default())
            .unwrap()
            .unwrap();
        let envelope = decoded.as_envelope().unwrap();
        assert_eq!(envelope.request_id, 42);
        let reply = registry
            .build(envelope.type_code, &envelope.data, &FrameContext::default())
            .unwrap()
            .downcast::<Note>()
            .unwrap();
        assert_eq!(reply.text, "re: hi");
    }

    #[test]
    fn builder_sees_server_context() {
        let registry = TypeRegistry::new();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        registry
            .register_with::<Note, _>(move |payload: &[u8], context: &FrameContext| {
                let _ = tx.lock().unwrap().send((context.role, context.connection));
                serde_json::from_slice::<Note>(payload).ok()
            })
            .unwrap();
        let server = Server::detached(
            |_conn, _server| {},
            Arc::new(registry),
            ServerConfig::default(),
        );

        let (stream, peer) = IpcStream::pair().unwrap();
        let conn = server.insert(stream).unwrap();
        let mut writer = FrameWriter::new(peer);
        writer
            .send(
                server.registry(),
                &Note {
                    text: "x".to_string(),
                },
            )
            .unwrap();

        let (role, connection) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(role, tlj_frame::Role::Server);
        assert_eq!(connection, Some(conn.id()));
    }
}
