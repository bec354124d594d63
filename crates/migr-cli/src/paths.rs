//! Deterministic path inference (§6): given a directory `D` named `N`, the
//! target DB is `D/N-<16hex>.sqlite` where `<16hex>` is the schema hash
//! prefix, the source DB is the one other file matching `N-<16hex>.sqlite`,
//! and the declarative schema lives at `D/schema.fsx`.

use std::path::{Path, PathBuf};

use migr_core::error::{MigrError, Result};
use migr_core::model::Schema;

pub const SCHEMA_FILE_NAME: &str = "schema.fsx";

/// Load the declarative target schema from `dir/schema.fsx`. The file's
/// internal format is out of scope for this engine; this implementation
/// reads it as a JSON-serialized `Schema` (the same shape `migr-core::model`
/// already carries over the wire for `_schema_identity` hashing).
pub fn load_target_schema(dir: &Path) -> Result<Schema> {
    let path = dir.join(SCHEMA_FILE_NAME);
    if !path.exists() {
        return Err(MigrError::SchemaNotFound { path });
    }
    let text = std::fs::read_to_string(&path)?;
    serde_json::from_str(&text).map_err(MigrError::from)
}

fn dir_label(dir: &Path) -> Result<String> {
    dir.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| MigrError::InvalidInput(format!("cannot derive a name from directory {}", dir.display())))
}

/// The deterministic target DB path for `dir`, named from `target`'s schema
/// hash. Does not require the file to already exist.
pub fn target_db_path(dir: &Path, target: &Schema) -> Result<PathBuf> {
    let label = dir_label(dir)?;
    let hash = migr_core::hash::schema_hash_short(target);
    Ok(dir.join(format!("{label}-{hash}.sqlite")))
}

/// Find the unique existing `N-<16hex>.sqlite` file in `dir` other than
/// `target_path`. Zero or multiple candidates are explicit diagnostics
/// naming the offending files (§6).
pub fn source_db_path(dir: &Path, target_path: &Path) -> Result<PathBuf> {
    let label = dir_label(dir)?;
    let mut candidates = Vec::new();
    let mut non_conforming = Vec::new();

    let entries = std::fs::read_dir(dir)?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if path == target_path {
            continue;
        }
        if is_conforming_name(name, &label) {
            candidates.push(path);
        } else if name.ends_with(".sqlite") {
            non_conforming.push(name.to_string());
        }
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        _ => Err(MigrError::SourceDbNotFound { dir: dir.to_path_buf(), non_conforming }),
    }
}

fn is_conforming_name(name: &str, label: &str) -> bool {
    let Some(rest) = name.strip_prefix(label).and_then(|r| r.strip_prefix('-')) else { return false };
    let Some(hex) = rest.strip_suffix(".sqlite") else { return false };
    hex.len() == 16 && hex.chars().all(|c| c.is_ascii_hexdigit())
}
