//! Store configuration

use crate::storage::backend::DEFAULT_CHUNK_ROWS;
use crate::storage::Compression;

/// File extension every store path must carry
pub const CONTAINER_EXTENSION: &str = "h5c";

/// Store configuration
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    /// Body compression applied by [`repack`](super::ColStore::repack)
    pub compression: Compression,
    /// Body compression for the write-back after every modifying call
    ///
    /// Each write-back re-encodes the whole file, so this defaults to lz4.
    pub write_compression: Compression,
    /// Chunk hint for newly created columns
    pub expected_rows: usize,
    /// Default for widening byte columns when a value does not fit
    pub allow_resize: bool,
    /// Create missing parent directories on the first write
    pub create_dirs: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            write_compression: Compression::Lz4,
            expected_rows: DEFAULT_CHUNK_ROWS,
            allow_resize: true,
            create_dirs: true,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn write_compression(mut self, compression: Compression) -> Self {
        self.write_compression = compression;
        self
    }

    pub fn expected_rows(mut self, expected_rows: usize) -> Self {
        self.expected_rows = expected_rows.max(1);
        self
    }

    pub fn allow_resize(mut self, allow_resize: bool) -> Self {
        self.allow_resize = allow_resize;
        self
    }

    pub fn create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }
}
