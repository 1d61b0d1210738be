//! Type registry and type-length-payload framing.
//!
//! Every message on the wire is framed as:
//! - A 2-byte little-endian type code, resolved through a [`TypeRegistry`]
//! - A 4-byte little-endian payload length
//! - The serialized payload (JSON by default, see [`PayloadCodec`])
//!
//! Type code 0 is always the built-in [`Envelope`], which wraps another
//! registered value together with a request id for correlated exchanges.

pub mod codec;
pub mod context;
pub mod envelope;
pub mod error;
pub mod payload;
pub mod reader;
pub mod registry;
pub mod writer;

pub use codec::{
    decode_header, encode_frame, FrameConfig, FrameHeader, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use context::{ConnectionId, FrameContext, Role};
pub use envelope::{Envelope, ENVELOPE_CODE};
pub use error::{FrameError, RegistryError, Result};
pub use payload::{CodecError, JsonCodec, PayloadCodec};
pub use reader::{read_next_frame, FrameReader};
pub use registry::{Decoded, TypeCode, TypeRegistry, Value};
pub use writer::{FrameWriter, TypedWriter};
