//! Catalog of files the server is willing to transfer.
//!
//! Loaded once at startup from a JSON permission file; sizes come from the
//! data directory on disk. The catalog is read-only for the lifetime of the
//! process, so both server variants share it behind an `Arc` with no
//! further synchronization.
//!
//! An empty catalog denies everything: `LIST` reports permissions
//! unavailable and no `RETR` is served.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

/// Shape of the permission file: `{"permitted_files": {"<name>": true}}`.
#[derive(Debug, Deserialize)]
struct PermissionFile {
    #[serde(default)]
    permitted_files: BTreeMap<String, bool>,
}

/// A resolved, validated byte range of a catalog file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

/// Immutable `name -> size` mapping of transferable files.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    files: BTreeMap<String, u64>,
}

impl Catalog {
    /// Loads the permission file and derives sizes from `data_dir`.
    ///
    /// Entries flagged `false`, names that are not bare file names, and
    /// entries whose backing file cannot be stat-ed are skipped with a
    /// warning rather than failing startup.
    pub fn load(permission_path: &Path, data_dir: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read(permission_path)?;
        let parsed: PermissionFile = serde_json::from_slice(&raw)?;

        let mut files = BTreeMap::new();
        for (name, permitted) in parsed.permitted_files {
            if !permitted {
                continue;
            }
            if !is_bare_file_name(&name) {
                warn!(%name, "skipping catalog entry: not a bare file name");
                continue;
            }
            match std::fs::metadata(data_dir.join(&name)) {
                Ok(meta) if meta.is_file() => {
                    files.insert(name, meta.len());
                }
                Ok(_) => warn!(%name, "skipping catalog entry: not a regular file"),
                Err(e) => warn!(%name, error = %e, "skipping catalog entry: cannot stat"),
            }
        }
        Ok(Self { files })
    }

    /// Builds a catalog from explicit entries (tests, embedded servers).
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        Self {
            files: entries.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Size of `name` in bytes, if the catalog permits it.
    pub fn size_of(&self, name: &str) -> Option<u64> {
        self.files.get(name).copied()
    }

    /// The full `name -> size` view, serialized for `LIST`.
    pub fn entries(&self) -> &BTreeMap<String, u64> {
        &self.files
    }

    /// Resolves a `RETR` range against the catalog.
    ///
    /// Applies the protocol defaults (`offset` 0, `length` to end of file)
    /// and enforces `offset + length <= size` before any disk access. An
    /// empty catalog permits nothing.
    pub fn resolve_range(
        &self,
        name: &str,
        offset: Option<u64>,
        length: Option<u64>,
    ) -> Result<ByteRange, RangeError> {
        let size = self
            .size_of(name)
            .ok_or_else(|| RangeError::NotPermitted(name.to_string()))?;

        let offset = offset.unwrap_or(0);
        if offset > size {
            return Err(RangeError::OutOfBounds(name.to_string()));
        }
        let length = length.unwrap_or(size - offset);
        if length > size - offset {
            return Err(RangeError::OutOfBounds(name.to_string()));
        }
        Ok(ByteRange { offset, length })
    }
}

/// True if `name` has no path separators or traversal components.
///
/// Catalog names address files directly inside the data directory; anything
/// else is never transferable, the same posture as rejecting traversal in
/// an upload path.
fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

/// Errors while loading the catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("permission file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Why a `RETR` range could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("file not permitted: {0}")]
    NotPermitted(String),

    #[error("range out of bounds for {0}")]
    OutOfBounds(String),
}
