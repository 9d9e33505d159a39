//! Output files for exports
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! failed export never leaves a partial file behind.

use chrono::{DateTime, Local};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::flatten::Table;
use super::{ExportError, ExportFormat};

/// `f1-<endpoint>-<YYYYmmdd-HHMMSS>.<ext>`
pub fn default_file_name(endpoint: &str, format: ExportFormat, now: DateTime<Local>) -> String {
    let endpoint: String = endpoint
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!(
        "f1-{}-{}.{}",
        endpoint,
        now.format("%Y%m%d-%H%M%S"),
        format.extension()
    )
}

/// `dir/name`, or `dir/<stem>-N.<ext>` for the first N that is not taken
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (name, None),
    };
    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{}-{}.{}", stem, n, ext)),
            None => dir.join(format!("{}-{}", stem, n)),
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Writes the payload as pretty-printed JSON
pub fn write_json(path: &Path, payload: &Value) -> Result<(), ExportError> {
    let mut bytes = serde_json::to_vec_pretty(payload)?;
    bytes.push(b'\n');
    write_atomically(path, &bytes)
}

/// Writes a header row followed by one row per record
pub fn write_csv(path: &Path, table: &Table) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    let bytes = writer.into_inner().map_err(|e| ExportError::Io {
        path: path.to_path_buf(),
        source: e.into_error(),
    })?;
    write_atomically(path, &bytes)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
