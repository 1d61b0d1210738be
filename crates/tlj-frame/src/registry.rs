use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::codec::encode_frame;
use crate::context::FrameContext;
use crate::envelope::{Envelope, ENVELOPE_CODE};
use crate::error::{FrameError, RegistryError, Result};
use crate::payload::{JsonCodec, PayloadCodec};

/// A decoded value, shared between every callback it is dispatched to.
pub type Value = Arc<dyn Any + Send + Sync>;

type Builder = Arc<dyn Fn(&[u8], &FrameContext) -> Option<Value> + Send + Sync>;

/// Token returned by registration, naming the code a type was bound to.
pub struct TypeCode<T> {
    code: u16,
    _type: PhantomData<fn() -> T>,
}

impl<T> TypeCode<T> {
    pub fn code(&self) -> u16 {
        self.code
    }
}

impl<T> Clone for TypeCode<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TypeCode<T> {}

impl<T> fmt::Debug for TypeCode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeCode")
            .field("type", &type_name::<T>())
            .field("code", &self.code)
            .finish()
    }
}

/// A frame that made it through the registry.
#[derive(Clone)]
pub struct Decoded {
    pub code: u16,
    pub value: Value,
}

impl Decoded {
    /// Borrow the value as the built-in envelope, if that is what it is.
    pub fn as_envelope(&self) -> Option<&Envelope> {
        if self.code != ENVELOPE_CODE {
            return None;
        }
        self.value.downcast_ref::<Envelope>()
    }

    /// Take a typed handle on the value.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl fmt::Debug for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoded")
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

struct Entry {
    name: &'static str,
    builder: Builder,
}

struct RegistryState {
    entries: HashMap<u16, Entry>,
    codes: HashMap<TypeId, u16>,
    next_code: u32,
}

/// Bidirectional map between Rust types and 16-bit wire codes.
///
/// Code 0 is bound to [`Envelope`] at construction. Application types get
/// codes 1, 2, 3, ... in registration order; codes are never reused.
/// Registration takes the write lock once for the whole allocation, so a
/// reader either sees a code with its type and builder or not at all.
pub struct TypeRegistry<C: PayloadCodec = JsonCodec> {
    state: RwLock<RegistryState>,
    _codec: PhantomData<fn() -> C>,
}

impl TypeRegistry<JsonCodec> {
    /// Create a registry using JSON payloads.
    pub fn new() -> Self {
        Self::with_codec()
    }
}

impl Default for TypeRegistry<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: PayloadCodec> TypeRegistry<C> {
    /// Create a registry for an explicit payload codec.
    pub fn with_codec() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            ENVELOPE_CODE,
            Entry {
                name: type_name::<Envelope>(),
                builder: decode_builder::<Envelope, C>(),
            },
        );
        let mut codes = HashMap::new();
        codes.insert(TypeId::of::<Envelope>(), ENVELOPE_CODE);

        Self {
            state: RwLock::new(RegistryState {
                entries,
                codes,
                next_code: 1,
            }),
            _codec: PhantomData,
        }
    }

    /// Register `T` with a builder that decodes it with the registry codec.
    pub fn register<T>(&self) -> std::result::Result<TypeCode<T>, RegistryError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.insert::<T>(decode_builder::<T, C>())
    }

    /// Register `T` with a custom builder.
    ///
    /// The builder returns `None` to reject a payload; the frame is then
    /// dropped without further dispatch.
    pub fn register_with<T, F>(&self, builder: F) -> std::result::Result<TypeCode<T>, RegistryError>
    where
        T: Send + Sync + 'static,
        F: Fn(&[u8], &FrameContext) -> Option<T> + Send + Sync + 'static,
    {
        self.insert::<T>(Arc::new(move |payload: &[u8], context: &FrameContext| {
            builder(payload, context).map(|value| Arc::new(value) as Value)
        }))
    }

    fn insert<T: 'static>(&self, builder: Builder) -> std::result::Result<TypeCode<T>, RegistryError> {
        let mut state = self.write();
        let type_id = TypeId::of::<T>();
        if let Some(&code) = state.codes.get(&type_id) {
            return Err(RegistryError::AlreadyRegistered {
                type_name: type_name::<T>(),
                code,
            });
        }
        let code = u16::try_from(state.next_code).map_err(|_| RegistryError::CodeSpaceExhausted)?;

        state.next_code += 1;
        state.entries.insert(
            code,
            Entry {
                name: type_name::<T>(),
                builder,
            },
        );
        state.codes.insert(type_id, code);
        drop(state);

        debug!(code, type_name = type_name::<T>(), "registered type");
        Ok(TypeCode {
            code,
            _type: PhantomData,
        })
    }

    /// Look up the code bound to `T`.
    pub fn lookup<T: 'static>(&self) -> Option<u16> {
        self.lookup_id(TypeId::of::<T>())
    }

    /// Look up the code bound to a type identity.
    pub fn lookup_id(&self, type_id: TypeId) -> Option<u16> {
        self.read().codes.get(&type_id).copied()
    }

    /// Whether a builder is bound to `code`.
    pub fn contains(&self, code: u16) -> bool {
        self.read().entries.contains_key(&code)
    }

    /// Rust type name bound to `code`, for diagnostics.
    pub fn type_name(&self, code: u16) -> Option<&'static str> {
        self.read().entries.get(&code).map(|entry| entry.name)
    }

    /// Every bound code, ascending.
    pub fn codes(&self) -> Vec<u16> {
        let mut codes: Vec<u16> = self.read().entries.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    /// Run the builder for `code` on `payload`.
    ///
    /// Returns `None` for an unknown code or a payload the builder rejects.
    pub fn build(&self, code: u16, payload: &[u8], context: &FrameContext) -> Option<Value> {
        let builder = Arc::clone(&self.read().entries.get(&code)?.builder);
        builder(payload, context)
    }

    /// Encode `value` as a complete frame: `code ‖ length ‖ payload`.
    pub fn encode<T: Serialize + 'static>(&self, value: &T) -> Result<Bytes> {
        let code = self.require_code::<T>()?;
        let payload = C::marshal(value)?;
        let mut dst = BytesMut::new();
        encode_frame(code, &payload, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Encode `value` wrapped in an [`Envelope`] under `request_id`.
    pub fn encode_envelope<T: Serialize + 'static>(&self, value: &T, request_id: u16) -> Result<Bytes> {
        let code = self.require_code::<T>()?;
        let envelope = Envelope::new(request_id, code, C::marshal(value)?);
        self.encode(&envelope)
    }

    /// Encode a raw, already-serialized payload under a known code.
    pub fn encode_raw(&self, code: u16, payload: &[u8]) -> Result<Bytes> {
        if !self.contains(code) {
            return Err(FrameError::UnknownType(code));
        }
        let mut dst = BytesMut::new();
        encode_frame(code, payload, &mut dst)?;
        Ok(dst.freeze())
    }

    pub(crate) fn require_code<T: 'static>(&self) -> Result<u16> {
        self.lookup::<T>()
            .ok_or(FrameError::UnregisteredType(type_name::<T>()))
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: PayloadCodec> fmt::Debug for TypeRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("codec", &C::NAME)
            .field("codes", &self.codes())
            .finish()
    }
}

fn decode_builder<T, C>() -> Builder
where
    T: DeserializeOwned + Send + Sync + 'static,
    C: PayloadCodec,
{
    Arc::new(|payload: &[u8], _context: &FrameContext| match C::unmarshal::<T>(payload) {
        Ok(value) => Some(Arc::new(value) as Value),
        Err(err) => {
            debug!(type_name = type_name::<T>(), error = %err, "dropping malformed payload");
            None
        }
    })
}
