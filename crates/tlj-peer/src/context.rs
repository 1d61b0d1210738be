//! What a server callback gets to see besides the decoded value.

use std::fmt;

use serde::Serialize;
use tracing::warn;

use tlj_frame::{ConnectionId, JsonCodec, PayloadCodec};

use crate::error::Result;
use crate::server::{ConnectionHandle, Server};

/// Context of a plain (non-request) frame.
pub struct EventContext<C: PayloadCodec = JsonCodec> {
    server: Server<C>,
    connection: ConnectionHandle,
}

impl<C: PayloadCodec> EventContext<C> {
    pub(crate) fn new(server: Server<C>, connection: ConnectionHandle) -> Self {
        Self { server, connection }
    }

    pub fn server(&self) -> &Server<C> {
        &self.server
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }
}

impl<C: PayloadCodec> fmt::Debug for EventContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("connection", &self.connection)
            .finish()
    }
}

/// Answers one request on the connection it came from.
pub struct Responder<C: PayloadCodec = JsonCodec> {
    server: Server<C>,
    connection: ConnectionHandle,
    request_id: u16,
}

impl<C: PayloadCodec> Responder<C> {
    pub fn request_id(&self) -> u16 {
        self.request_id
    }

    /// Send `value` back inside an envelope carrying this request's id.
    ///
    /// Encoding failures are returned without touching the connection. A
    /// write failure also deletes the connection from the server, shuts it
    /// down and reports it as failed.
    pub fn respond<T: Serialize + 'static>(&self, value: &T) -> Result<()> {
        let frame = self
            .server
            .registry()
            .encode_envelope(value, self.request_id)?;
        if let Err(err) = self.connection.write_frame(&frame) {
            warn!(
                connection = %self.connection.id(),
                request_id = self.request_id,
                error = %err,
                "response write failed"
            );
            self.server.fail(&self.connection);
            return Err(err.into());
        }
        Ok(())
    }
}

impl<C: PayloadCodec> Clone for Responder<C> {
    fn clone(&self) -> Self {
        Self {
            server: self.server.clone(),
            connection: self.connection.clone(),
            request_id: self.request_id,
        }
    }
}

impl<C: PayloadCodec> fmt::Debug for Responder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("connection", &self.connection.id())
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Context of an enveloped request: the event context plus a responder.
pub struct RequestContext<C: PayloadCodec = JsonCodec> {
    event: EventContext<C>,
    responder: Responder<C>,
}

impl<C: PayloadCodec> RequestContext<C> {
    pub(crate) fn new(server: Server<C>, connection: ConnectionHandle, request_id: u16) -> Self {
        Self {
            responder: Responder {
                server: server.clone(),
                connection: connection.clone(),
                request_id,
            },
            event: EventContext::new(server, connection),
        }
    }

    pub fn server(&self) -> &Server<C> {
        self.event.server()
    }

    pub fn connection(&self) -> &ConnectionHandle {
        self.event.connection()
    }

    pub fn request_id(&self) -> u16 {
        self.responder.request_id
    }

    pub fn respond<T: Serialize + 'static>(&self, value: &T) -> Result<()> {
        self.responder.respond(value)
    }

    /// A responder that outlives this context, e.g. for answering later.
    pub fn responder(&self) -> Responder<C> {
        self.responder.clone()
    }
}

impl<C: PayloadCodec> fmt::Debug for RequestContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("connection", &self.event.connection)
            .field("request_id", &self.responder.request_id)
            .finish()
    }
}
