/// Controls schema loading and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Close every object schema that does not say otherwise
    /// (`additionalProperties: false`).
    pub strict_mode: bool,
    /// Fail validation with [`crate::SchemaError::NoSchema`] for type codes
    /// without a schema instead of accepting them.
    pub fail_on_missing_schema: bool,
    /// Maximum number of schema files loaded from one directory.
    pub max_schemas_from_directory: usize,
    /// Maximum size in bytes of one schema file.
    pub max_schema_file_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            fail_on_missing_schema: false,
            max_schemas_from_directory: 256,
            max_schema_file_size: 256 * 1024,
        }
    }
}
