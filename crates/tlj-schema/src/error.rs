/// Errors that can occur while loading schemas or validating payloads.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A schema file could not be read or was rejected by a loading rule.
    #[error("failed to load schema: {0}")]
    LoadFailed(String),

    /// The schema document is not a valid JSON Schema.
    #[error("failed to compile schema for type code {code}: {message}")]
    CompileFailed { code: u16, message: String },

    /// The payload does not satisfy its schema.
    #[error("validation failed for type code {code}: {message}")]
    ValidationFailed { code: u16, message: String },

    /// The payload or schema is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// No schema is registered for the type code.
    #[error("no schema registered for type code {0}")]
    NoSchema(u16),

    /// The type could not be added to the type registry.
    #[error(transparent)]
    Registry(#[from] tlj_frame::RegistryError),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
