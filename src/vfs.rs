//! Logical file identities.
//!
//! The engine never keys its bookkeeping on raw paths. Everything
//! filesystem-facing passes through a [`FileConverter`], so analyses stay
//! valid when a checkout moves.

use path_slash::PathExt as _;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Opaque logical identifier of a file below the build root.
///
/// Equality, ordering and hashing go by the identifier alone. Two refs that
/// reach the same on-disk file through different identifiers are distinct.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualFileRef(Arc<str>);

impl VirtualFileRef {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    /// File extension of the identifier, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.0.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        (!stem.is_empty()).then_some(ext)
    }
}

impl fmt::Display for VirtualFileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VirtualFileRef {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A logical file together with its current on-disk location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirtualFile {
    id: VirtualFileRef,
    path: PathBuf,
}

impl VirtualFile {
    pub fn new(id: VirtualFileRef, path: impl Into<PathBuf>) -> Self {
        Self { id, path: path.into() }
    }

    pub fn id(&self) -> &VirtualFileRef {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Translates between on-disk paths and [`VirtualFileRef`]s.
pub trait FileConverter: fmt::Debug + Send + Sync {
    fn to_path(&self, file: &VirtualFileRef) -> PathBuf;
    fn to_ref(&self, path: &Path) -> VirtualFileRef;

    fn to_virtual_file(&self, path: &Path) -> VirtualFile {
        VirtualFile::new(self.to_ref(path), path)
    }
}

/// [`FileConverter`] producing root-relative, `/`-separated identifiers.
#[derive(Clone, Debug)]
pub struct RootedConverter {
    root: PathBuf,
}

impl RootedConverter {
    /// Creates a converter rooted at `root`. The root is canonicalized so the
    /// produced refs stay stable across symlinked checkouts.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileConverter for RootedConverter {
    fn to_path(&self, file: &VirtualFileRef) -> PathBuf {
        self.root.join(file.id())
    }

    fn to_ref(&self, path: &Path) -> VirtualFileRef {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        VirtualFileRef::new(rel.to_slash_lossy().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_equality_is_by_identifier() {
        let a = VirtualFileRef::from("src/A.cls");
        let b = VirtualFileRef::new("src/A.cls".to_string());
        let c = VirtualFileRef::from("src/B.cls");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ref_extension() {
        assert_eq!(VirtualFileRef::from("src/A.cls").extension(), Some("cls"));
        assert_eq!(VirtualFileRef::from("src/.hidden").extension(), None);
        assert_eq!(VirtualFileRef::from("Makefile").extension(), None);
    }

    #[test]
    fn rooted_converter_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let converter = RootedConverter::new(tmp.path());
        let path = converter.root().join("src").join("A.cls");
        let file_ref = converter.to_ref(&path);
        assert_eq!(file_ref.id(), "src/A.cls");
        assert_eq!(converter.to_path(&file_ref), path);
    }

    #[test]
    fn foreign_paths_keep_their_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let converter = RootedConverter::new(tmp.path());
        let outside = Path::new("/somewhere/else/lib.jar");
        let file_ref = converter.to_ref(outside);
        assert_eq!(file_ref.id(), "/somewhere/else/lib.jar");
    }
}
