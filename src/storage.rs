//! Whole-document JSON persistence shared by every store.
//!
//! Each file is read in full, mutated in memory and written back in full.
//! Writes go through a temp file and a rename so a crash never leaves a
//! truncated document, but there is no locking: concurrent writers lose
//! updates (last writer wins).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No data stored at {}", .0.display())]
    NotFound(PathBuf),
    #[error("Malformed data in {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read and decode a JSON document. A missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::io(path, err)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

/// Like [`read_json`], but a missing file is an error.
pub fn require_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    read_json(path)?.ok_or_else(|| StoreError::NotFound(path.to_path_buf()))
}

/// Pretty-print `value` and replace the file at `path` with it.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let serialized = serde_json::to_string_pretty(value).map_err(|source| StoreError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    write_text(path, &serialized)
}

/// Replace the file at `path` with `contents`, creating parent directories.
pub fn write_text(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| StoreError::io(path, err))?;
        }
    }
    atomic_write(path, contents.as_bytes()).map_err(|err| StoreError::io(path, err))
}

/// Write content atomically by writing to a temp file and renaming.
fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn missing_file_reads_as_none() {
        let temp = assert_fs::TempDir::new().unwrap();
        let value: Option<BTreeMap<String, u32>> =
            read_json(&temp.path().join("absent.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn invalid_json_is_reported_as_malformed() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("broken.json");
        file.write_str("{ not json").unwrap();
        let err = read_json::<BTreeMap<String, u32>>(file.path()).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[test]
    fn require_json_reports_not_found() {
        let temp = assert_fs::TempDir::new().unwrap();
        let err = require_json::<BTreeMap<String, u32>>(&temp.path().join("absent.json"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn write_then_read_creates_parent_directories() {
        let temp = assert_fs::TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/doc.json");
        let mut doc = BTreeMap::new();
        doc.insert("answer".to_string(), 42u32);
        write_json(&path, &doc).unwrap();
        let back: BTreeMap<String, u32> = require_json(&path).unwrap();
        assert_eq!(back, doc);
    }
}
