//! Typed identifiers.
//!
//! IDs are opaque String wrappers (serde-transparent). A [`ProjectId`] is
//! derived deterministically from the project root so reopening the same
//! directory always yields the same identity; a [`RequestId`] is random and
//! only used to correlate log lines for one assistance request.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(
    /// Stable identity of a project, derived from its root path.
    ProjectId
);
typed_id!(
    /// Correlation id for a single assistance request.
    RequestId
);

impl ProjectId {
    /// Hex SHA-256 of the root path's string form.
    ///
    /// Callers should pass the canonicalized root when it exists so that
    /// `./proj` and `/abs/proj` map to the same project.
    pub fn for_root(root: &Path) -> Self {
        let digest = Sha256::digest(root.to_string_lossy().as_bytes());
        Self(hex::encode(digest))
    }
}

impl RequestId {
    pub fn new_uuid() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new_uuid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn project_id_is_deterministic() {
        let root = PathBuf::from("/work/calculator");
        assert_eq!(ProjectId::for_root(&root), ProjectId::for_root(&root));
        assert_eq!(ProjectId::for_root(&root).as_str().len(), 64);
    }

    #[test]
    fn project_id_differs_per_root() {
        let a = ProjectId::for_root(Path::new("/work/a"));
        let b = ProjectId::for_root(Path::new("/work/b"));
        assert_ne!(a, b);
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new_uuid(), RequestId::new_uuid());
    }
}
