use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;
use tracing::debug;

use tlj_frame::{FrameContext, JsonCodec, TypeCode, TypeRegistry};

use crate::error::Result;
use crate::registry::SchemaRegistry;

/// Register `T` with a builder that checks each payload against the schema
/// bound to `T`'s type code before decoding it.
///
/// A payload that is not JSON, fails its schema, or does not decode into
/// `T` builds to nothing, so the frame is dropped before any callback runs.
/// Types without a schema are accepted unless the schema registry is
/// configured with `fail_on_missing_schema`.
pub fn register_validated<T>(
    types: &TypeRegistry<JsonCodec>,
    schemas: Arc<SchemaRegistry>,
) -> Result<TypeCode<T>>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let assigned = Arc::new(OnceLock::<u16>::new());
    let code_slot = Arc::clone(&assigned);

    let token = types.register_with::<T, _>(move |payload: &[u8], context: &FrameContext| {
        let code = *code_slot.get()?;
        let document: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|err| debug!(code, error = %err, "payload is not JSON"))
            .ok()?;
        if let Err(err) = schemas.validate_value(code, &document) {
            debug!(code, peer = ?context.peer, error = %err, "payload rejected by schema");
            return None;
        }
        serde_json::from_value(document)
            .map_err(|err| debug!(code, error = %err, "payload does not match type"))
            .ok()
    })?;

    let _ = assigned.set(token.code());
    Ok(token)
}
