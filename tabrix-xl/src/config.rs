//! Reader configuration

use std::path::{Path, PathBuf};

use log::warn;

pub const DEFAULT_ROW_CACHE_SIZE: usize = 10;
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Options of a streaming sheet reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Rows per window, at least 1
    row_cache_size: usize,
    /// Initial capacity of the XML event buffer, in bytes
    buffer_size: usize,
    /// Directory of backing files, the system temp dir when `None`
    spill_dir: Option<PathBuf>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            row_cache_size: DEFAULT_ROW_CACHE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            spill_dir: None,
        }
    }
}

impl ReaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row_cache_size(mut self, row_cache_size: usize) -> Self {
        if row_cache_size == 0 {
            warn!("row cache size of 0 is not usable, falling back to 1");
        }
        self.row_cache_size = row_cache_size.max(1);
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_spill_dir<P: AsRef<Path>>(mut self, spill_dir: P) -> Self {
        self.spill_dir = Some(spill_dir.as_ref().to_path_buf());
        self
    }

    pub fn row_cache_size(&self) -> usize {
        self.row_cache_size
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn spill_dir(&self) -> Option<&Path> {
        self.spill_dir.as_deref()
    }
}
