//! Flat file storage the recordings live on
//!
//! Names are relative to the storage root; protected assets sit in a
//! subdirectory and are addressed as `dir/name.wav`.

mod dir;
#[cfg(test)]
mod memory;

pub use dir::DirStorage;
#[cfg(test)]
pub use memory::MemStorage;

/// How a file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create, truncating any existing content
    Write,
}

/// Errors reported by a storage backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage is not available")]
    Unavailable,

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("file was opened read-only: {0}")]
    ReadOnly(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An open file
pub trait FileHandle: Send {
    /// Read from the current position, advancing it; 0 at end of file
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write at the current position, advancing it
    fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError>;

    /// Move the position to an absolute offset
    fn seek(&mut self, offset: u64) -> Result<(), StorageError>;

    fn size(&self) -> Result<u64, StorageError>;

    fn close(self: Box<Self>) -> Result<(), StorageError>;
}

/// The filesystem as seen by the control core
pub trait Storage: Send {
    /// Mount the storage; fails while the card is missing
    fn begin(&mut self) -> Result<(), StorageError>;

    fn exists(&self, name: &str) -> bool;

    fn open(&mut self, name: &str, mode: OpenMode) -> Result<Box<dyn FileHandle>, StorageError>;

    fn remove(&mut self, name: &str) -> Result<(), StorageError>;

    /// Replace `to` with `from` in one step
    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Names of the files directly in the root, sorted
    fn list(&self) -> Result<Vec<String>, StorageError>;
}
