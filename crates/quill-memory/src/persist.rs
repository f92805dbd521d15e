use std::path::{Path, PathBuf};

use quill_protocol::{InitError, IoError, MEMORY_SCHEMA_VERSION, MemorySnapshot};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};

pub const MEMORY_DIR: &str = ".quill";
const MEMORY_FILE: &str = "memory.json";
const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone)]
pub(crate) struct Layout {
    dir: PathBuf,
}

impl Layout {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            dir: root.join(MEMORY_DIR),
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn memory_path(&self) -> PathBuf {
        self.dir.join(MEMORY_FILE)
    }

    pub(crate) fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub(crate) async fn ensure_dir(&self) -> Result<(), InitError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| InitError::StorageUnavailable {
                path: self.dir.clone(),
                source,
            })
    }

    /// Load the memory document if one exists.
    ///
    /// A document that does not decode is renamed to `memory.json.corrupt`
    /// and treated as absent.
    pub(crate) async fn load(&self) -> Result<Option<MemorySnapshot>, InitError> {
        let path = self.memory_path();
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(InitError::Unreadable { path, source }),
        };

        match serde_json::from_str::<MemorySnapshot>(&raw) {
            Ok(snapshot) if snapshot.schema_version <= MEMORY_SCHEMA_VERSION => {
                debug!(path = ?path, files = snapshot.files.len(), "loaded memory document");
                Ok(Some(snapshot))
            }
            Ok(snapshot) => {
                warn!(
                    path = ?path,
                    found = snapshot.schema_version,
                    supported = MEMORY_SCHEMA_VERSION,
                    "memory document is from a newer schema, starting fresh"
                );
                self.quarantine(&path).await;
                Ok(None)
            }
            Err(error) => {
                warn!(path = ?path, %error, "memory document is corrupt, starting fresh");
                self.quarantine(&path).await;
                Ok(None)
            }
        }
    }

    async fn quarantine(&self, path: &Path) {
        let aside = path.with_extension("json.corrupt");
        if let Err(error) = fs::rename(path, &aside).await {
            warn!(path = ?path, %error, "failed moving corrupt memory document aside");
        }
    }
}

pub(crate) fn encode_pretty<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, IoError> {
    serde_json::to_vec_pretty(value).map_err(|error| IoError::Encode {
        what,
        message: error.to_string(),
    })
}

/// Write to a sibling temp file and rename over the target, so readers only
/// ever observe a complete document.
pub(crate) async fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), IoError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| IoError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, payload)
        .await
        .map_err(|source| IoError::Write {
            path: staging.clone(),
            source,
        })?;
    fs::rename(&staging, path)
        .await
        .map_err(|source| IoError::Write {
            path: path.to_path_buf(),
            source,
        })
}
