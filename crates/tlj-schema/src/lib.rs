//! JSON Schema validation of payloads, keyed by type code.
//!
//! Schemas can be checked directly with [`SchemaRegistry::validate`], or
//! wired into a [`tlj_frame::TypeRegistry`] with [`register_validated`] so
//! that payloads failing their schema never reach a callback.

pub mod builder;
pub mod config;
pub mod error;
mod loader;
pub mod registry;
mod strict;

pub use builder::register_validated;
pub use config::RegistryConfig;
pub use error::{Result, SchemaError};
pub use registry::SchemaRegistry;
