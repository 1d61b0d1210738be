use std::fs::{self, File, Metadata};
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};

const PREFIX: &str = "type_";
const SUFFIX: &str = ".schema.json";

/// Read every `type_<code>.schema.json` regular file in `dir`.
///
/// Other files are skipped. A `*.schema.json` file whose name does not
/// carry a valid code, or that is a symlink, fails the whole load.
pub(crate) fn load_directory(dir: &Path, config: &RegistryConfig) -> Result<Vec<(u16, String)>> {
    let entries = fs::read_dir(dir)
        .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", dir.display())))?;

    let mut loaded = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.to_ascii_lowercase().ends_with(SUFFIX) {
            continue;
        }

        let path = entry.path();
        let link_meta =
            fs::symlink_metadata(&path).map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
        if link_meta.file_type().is_symlink() {
            return Err(SchemaError::LoadFailed(format!(
                "refusing to load schema symlink: {name}"
            )));
        }
        if !link_meta.file_type().is_file() {
            continue;
        }

        let code = code_from_file_name(&name).ok_or_else(|| {
            SchemaError::LoadFailed(format!("schema file name carries no type code: {name}"))
        })?;

        if loaded.len() >= config.max_schemas_from_directory {
            return Err(SchemaError::LoadFailed(format!(
                "more than {} schema files in {}",
                config.max_schemas_from_directory,
                dir.display()
            )));
        }

        let content = read_bounded(&path, &link_meta, config.max_schema_file_size)?;
        debug!(code, file = %path.display(), "loaded schema");
        loaded.push((code, content));
    }

    loaded.sort_by_key(|(code, _)| *code);
    Ok(loaded)
}

fn read_bounded(path: &Path, link_meta: &Metadata, max_bytes: usize) -> Result<String> {
    let file = File::open(path)
        .map_err(|err| SchemaError::LoadFailed(format!("open {}: {err}", path.display())))?;
    let opened_meta = file
        .metadata()
        .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;

    if !same_file(link_meta, &opened_meta) {
        return Err(SchemaError::LoadFailed(format!(
            "schema file replaced during load: {}",
            path.display()
        )));
    }
    if opened_meta.len() > max_bytes as u64 {
        return Err(SchemaError::LoadFailed(format!(
            "schema file too large ({} bytes, max {max_bytes}): {}",
            opened_meta.len(),
            path.display()
        )));
    }

    let mut content = String::new();
    file.take(max_bytes as u64 + 1)
        .read_to_string(&mut content)
        .map_err(|err| SchemaError::LoadFailed(format!("read {}: {err}", path.display())))?;
    if content.len() > max_bytes {
        return Err(SchemaError::LoadFailed(format!(
            "schema file grew past {max_bytes} bytes while reading: {}",
            path.display()
        )));
    }
    Ok(content)
}

fn code_from_file_name(name: &str) -> Option<u16> {
    let lower = name.to_ascii_lowercase();
    lower
        .strip_prefix(PREFIX)?
        .strip_suffix(SUFFIX)?
        .parse()
        .ok()
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &Metadata, _b: &Metadata) -> bool {
    true
}
