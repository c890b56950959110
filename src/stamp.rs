//! Content and timestamp stamps.

use crate::{
    error::{Error, Result},
    vfs::{FileConverter, VirtualFile, VirtualFileRef},
};
use md5::Digest;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path, time::UNIX_EPOCH};

/// Snapshot of one file's state at stamping time.
///
/// Stamps only compare equal when both the kind and the payload match. A
/// content hash is never equivalent to a timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum Stamp {
    /// Modification time in nanoseconds since the epoch.
    LastModified(u64),
    /// Hex-encoded digest of the file contents.
    ContentHash(String),
    /// The file could not be observed.
    Missing,
}

impl Stamp {
    /// Hashes `contents` into a content stamp.
    pub fn content_of(contents: &[u8]) -> Self {
        let mut hasher = md5::Md5::new();
        hasher.update(contents);
        Stamp::ContentHash(hex::encode(hasher.finalize()))
    }

    /// Reads and hashes the file at `path`.
    pub fn content_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read(path)
            .map_err(|source| Error::StampUnavailable { path: path.to_path_buf(), source })?;
        Ok(Self::content_of(&contents))
    }

    /// Reads the modification time of the file at `path`.
    pub fn modified_from_file(path: &Path) -> Result<Self> {
        let stamp_err =
            |source| Error::StampUnavailable { path: path.to_path_buf(), source };
        let modified = fs::metadata(path).map_err(stamp_err)?.modified().map_err(stamp_err)?;
        let nanos =
            modified.duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or_default();
        Ok(Stamp::LastModified(nanos))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Stamp::Missing)
    }
}

impl VirtualFile {
    /// Content stamp of this file's current on-disk state.
    pub fn content_stamp(&self) -> Result<Stamp> {
        Stamp::content_from_file(self.path())
    }
}

/// On-demand, memoized stamps for one compile run.
///
/// Sources stamp by content, products and libraries by modification time.
/// Unreadable files degrade to [`Stamp::Missing`], which the engine treats as
/// a changed input or a removed output.
#[derive(Debug)]
pub struct StampOracle<'a> {
    converter: &'a dyn FileConverter,
    sources: HashMap<VirtualFileRef, Stamp>,
    products: HashMap<VirtualFileRef, Stamp>,
    libraries: HashMap<VirtualFileRef, Stamp>,
}

impl<'a> StampOracle<'a> {
    pub fn new(converter: &'a dyn FileConverter) -> Self {
        Self {
            converter,
            sources: HashMap::new(),
            products: HashMap::new(),
            libraries: HashMap::new(),
        }
    }

    /// Stamps all of `files` in parallel and seeds the source cache.
    pub fn prime_sources<'b>(&mut self, files: impl IntoIterator<Item = &'b VirtualFileRef>) {
        use rayon::prelude::*;

        let missing: Vec<VirtualFileRef> =
            files.into_iter().filter(|f| !self.sources.contains_key(*f)).cloned().collect();
        let converter = self.converter;
        let stamped: Vec<(VirtualFileRef, Stamp)> = missing
            .into_par_iter()
            .map(|file| {
                let path = converter.to_path(&file);
                let stamp = Stamp::content_from_file(&path).unwrap_or(Stamp::Missing);
                (file, stamp)
            })
            .collect();
        self.sources.extend(stamped);
    }

    /// Content stamp of a source file.
    pub fn source(&mut self, file: &VirtualFileRef) -> Stamp {
        if let Some(stamp) = self.sources.get(file) {
            return stamp.clone();
        }
        let path = self.converter.to_path(file);
        let stamp = Stamp::content_from_file(&path).unwrap_or_else(|err| {
            trace!("source {file} not stampable: {err}");
            Stamp::Missing
        });
        self.sources.insert(file.clone(), stamp.clone());
        stamp
    }

    /// Timestamp stamp of an emitted product.
    pub fn product(&mut self, file: &VirtualFileRef) -> Stamp {
        if let Some(stamp) = self.products.get(file) {
            return stamp.clone();
        }
        let path = self.converter.to_path(file);
        let stamp = Stamp::modified_from_file(&path).unwrap_or_else(|err| {
            trace!("product {file} not stampable: {err}");
            Stamp::Missing
        });
        self.products.insert(file.clone(), stamp.clone());
        stamp
    }

    /// Timestamp stamp of a library on the classpath.
    pub fn library(&mut self, file: &VirtualFileRef) -> Stamp {
        if let Some(stamp) = self.libraries.get(file) {
            return stamp.clone();
        }
        let path = self.converter.to_path(file);
        let stamp = Stamp::modified_from_file(&path).unwrap_or_else(|err| {
            trace!("library {file} not stampable: {err}");
            Stamp::Missing
        });
        self.libraries.insert(file.clone(), stamp.clone());
        stamp
    }
}
