//! In-memory [`OiFileReader`] keyed by path.
//!
//! Used by the test-suite to describe OIFITS files without any binary fixture, and by callers
//! that decode their files with another library and only need the normalization pipeline.
use camino::{Utf8Path, Utf8PathBuf};

use super::{Extension, OiFileReader};
use crate::constants::FastHashMap;
use crate::oifits_errors::OifitsError;

#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    files: FastHashMap<Utf8PathBuf, Vec<Extension>>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the extensions of `path`.
    pub fn insert(&mut self, path: impl Into<Utf8PathBuf>, extensions: Vec<Extension>) {
        self.files.insert(path.into(), extensions);
    }

    /// Builder-style variant of [`MemoryReader::insert`].
    pub fn with_file(mut self, path: impl Into<Utf8PathBuf>, extensions: Vec<Extension>) -> Self {
        self.insert(path, extensions);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl OiFileReader for MemoryReader {
    fn read_extensions(&self, path: &Utf8Path) -> Result<Vec<Extension>, OifitsError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| OifitsError::FileNotFound(path.to_string()))
    }
}
