use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use tlj_frame::TypeRegistry;
use tlj_schema::{register_validated, RegistryConfig, SchemaRegistry};
use tlj_transport::Endpoint;

use crate::exit::{schema_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections, print every value received and echo requests back.
    Serve(ServeArgs),
    /// Send one JSON value, optionally as a request and wait for the answer.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Endpoint to bind (`unix:/path`, `tcp:host:port`, or a socket path).
    pub endpoint: Endpoint,
    /// Tag given to every accepted connection; handlers subscribe to it.
    #[arg(long, default_value = "all")]
    pub tag: String,
    /// Directory of `type_<code>.schema.json` files to validate payloads against.
    #[arg(long, value_name = "DIR")]
    pub validate: Option<PathBuf>,
    /// Reject fields not declared in an object schema.
    #[arg(long, requires = "validate")]
    pub strict: bool,
    /// Exit after printing N values.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Endpoint to connect to (`unix:/path`, `tcp:host:port`, or a socket path).
    pub endpoint: Endpoint,
    /// JSON document to send.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub json: Option<String>,
    /// Read the JSON document from a file.
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
    /// Send as a request and print the first answer.
    #[arg(long)]
    pub request: bool,
    /// How long to wait for the answer to a request (e.g. 5s, 500ms, 1m).
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub wait_timeout: Duration,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Type code the CLI uses for arbitrary JSON documents.
pub const JSON_CODE: u16 = 1;

/// Registry shared by `serve` and `send`: arbitrary JSON at [`JSON_CODE`],
/// optionally schema-checked.
pub fn json_registry(schema_dir: Option<&Path>, strict: bool) -> CliResult<Arc<TypeRegistry>> {
    let types = TypeRegistry::new();
    let token = match schema_dir {
        Some(dir) => {
            let config = RegistryConfig {
                strict_mode: strict,
                ..RegistryConfig::default()
            };
            let schemas = SchemaRegistry::from_directory_with_config(dir, config)
                .map_err(|err| schema_error("schema load failed", &err))?;
            register_validated::<serde_json::Value>(&types, Arc::new(schemas))
                .map_err(|err| schema_error("type registration failed", &err))?
        }
        None => types
            .register::<serde_json::Value>()
            .map_err(|err| CliError::new(INTERNAL, format!("type registration failed: {err}")))?,
    };
    if token.code() != JSON_CODE {
        return Err(CliError::new(
            INTERNAL,
            format!("JSON registered at code {}, expected {JSON_CODE}", token.code()),
        ));
    }
    Ok(Arc::new(types))
}

/// Parse `500ms`, `5s`, `2m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, CliError> {
    let input = input.trim();
    let (number, scale_ms) = if let Some(num) = input.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = input.strip_suffix('m') {
        (num, 60_000)
    } else {
        (input, 1_000)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input:?}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    value
        .checked_mul(scale_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| CliError::new(USAGE, format!("duration too large: {input:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse() {
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn bad_durations_are_usage_errors() {
        for input in ["", "0s", "soon", "-1s"] {
            assert_eq!(parse_duration(input).unwrap_err().code, USAGE, "{input}");
        }
    }

    #[test]
    fn json_lands_on_code_one() {
        let types = json_registry(None, false).unwrap();
        assert_eq!(types.lookup::<serde_json::Value>(), Some(JSON_CODE));
    }
}
