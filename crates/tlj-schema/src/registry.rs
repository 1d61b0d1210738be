use std::collections::HashMap;
use std::path::Path;

use jsonschema::Validator;
use serde_json::Value;

use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};
use crate::loader::load_directory;
use crate::strict::close_objects;

/// Compiled JSON Schema validators keyed by type code.
pub struct SchemaRegistry {
    validators: HashMap<u16, Validator>,
    config: RegistryConfig,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            validators: HashMap::new(),
            config,
        }
    }

    /// Compile `schema_json` and bind it to `code`, replacing any earlier schema.
    pub fn register(&mut self, code: u16, schema_json: &str) -> Result<()> {
        let schema: Value = serde_json::from_str(schema_json)?;
        self.register_value(code, &schema)
    }

    pub fn register_value(&mut self, code: u16, schema: &Value) -> Result<()> {
        let compile_failed = |message: String| SchemaError::CompileFailed { code, message };
        let compiled = if self.config.strict_mode {
            let mut closed = schema.clone();
            close_objects(&mut closed);
            jsonschema::validator_for(&closed).map_err(|err| compile_failed(err.to_string()))?
        } else {
            jsonschema::validator_for(schema).map_err(|err| compile_failed(err.to_string()))?
        };

        self.validators.insert(code, compiled);
        Ok(())
    }

    /// Load every `type_<code>.schema.json` file in `path`.
    pub fn from_directory(path: &Path) -> Result<Self> {
        Self::from_directory_with_config(path, RegistryConfig::default())
    }

    pub fn from_directory_with_config(path: &Path, config: RegistryConfig) -> Result<Self> {
        let mut registry = Self::with_config(config);
        for (code, content) in load_directory(path, &config)? {
            registry.register(code, &content)?;
        }
        Ok(registry)
    }

    /// Build a registry from `(code, schema)` pairs compiled into the binary.
    pub fn from_embedded(schemas: &[(u16, &str)]) -> Result<Self> {
        let mut registry = Self::new();
        for (code, schema) in schemas {
            registry.register(*code, schema)?;
        }
        Ok(registry)
    }

    /// Parse `payload` as JSON and check it against the schema for `code`.
    pub fn validate(&self, code: u16, payload: &[u8]) -> Result<()> {
        if !self.validators.contains_key(&code) {
            return self.missing(code);
        }
        let value: Value = serde_json::from_slice(payload)?;
        self.validate_value(code, &value)
    }

    /// Check an already-parsed document against the schema for `code`.
    pub fn validate_value(&self, code: u16, value: &Value) -> Result<()> {
        let Some(validator) = self.validators.get(&code) else {
            return self.missing(code);
        };

        let mut errors = validator.iter_errors(value);
        let Some(first) = errors.next() else {
            return Ok(());
        };
        let message = errors.take(3).fold(first.to_string(), |mut message, err| {
            message.push_str("; ");
            message.push_str(&err.to_string());
            message
        });
        Err(SchemaError::ValidationFailed { code, message })
    }

    fn missing(&self, code: u16) -> Result<()> {
        if self.config.fail_on_missing_schema {
            Err(SchemaError::NoSchema(code))
        } else {
            Ok(())
        }
    }

    pub fn has_schema(&self, code: u16) -> bool {
        self.validators.contains_key(&code)
    }

    /// Type codes with a schema, ascending.
    pub fn codes(&self) -> Vec<u16> {
        let mut codes: Vec<u16> = self.validators.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("codes", &self.codes())
            .field("config", &self.config)
            .finish()
    }
}
