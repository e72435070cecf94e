//! Durable storage layout and atomic file helpers
//!
//! Every shard writes only under paths keyed by its own label, and the merged
//! artifact lives in a separate directory:
//!
//! ```text
//! {base}/
//! ├── plan.json
//! ├── status/{label}.json
//! ├── shards/{label}.vcf.gz
//! ├── shards/{label}.g.vcf.gz
//! ├── shards/.staging/{label}/        (in-flight caller outputs)
//! └── merged/{sample}.vcf.gz(.tbi)    (+ {sample}.manifest.json)
//! ```

mod layout;

pub use layout::StorageLayout;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Write `data` to `path` through a sibling temp file and a rename, so readers
/// see either the previous content or the full new content.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_sibling(path);
    fs::write(&temp_path, data).map_err(|e| {
        tracing::error!(path = %temp_path.display(), error = %e, "Failed to write temp file");
        e
    })?;

    fs::rename(&temp_path, path).map_err(|e| {
        tracing::error!(
            from = %temp_path.display(),
            to = %path.display(),
            error = %e,
            "Failed to rename temp file"
        );
        let _ = fs::remove_file(&temp_path);
        e
    })
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove a directory tree, treating "already gone" as success
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Whether a regular file exists and has content
pub fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// `path` with `suffix` appended to the full file name (`a.vcf.gz` → `a.vcf.gz.tbi`)
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn temp_sibling(path: &Path) -> PathBuf {
    with_suffix(path, ".tmp")
}
