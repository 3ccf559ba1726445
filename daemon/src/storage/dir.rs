//! `std::fs` backed storage rooted at a directory

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{FileHandle, OpenMode, Storage, StorageError};

/// Storage on a host directory
#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

struct DirFile {
    name: String,
    file: File,
    writable: bool,
}

impl FileHandle for DirFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        Ok(self.file.read(buf)?)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        if !self.writable {
            return Err(StorageError::ReadOnly(self.name.clone()));
        }
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn size(&self) -> Result<u64, StorageError> {
        Ok(self.file.metadata()?.len())
    }

    fn close(mut self: Box<Self>) -> Result<(), StorageError> {
        if self.writable {
            self.file.flush()?;
            self.file.sync_data()?;
        }
        Ok(())
    }
}

impl Storage for DirStorage {
    fn begin(&mut self) -> Result<(), StorageError> {
        if self.root.is_dir() {
            debug!(root = %self.root.display(), "storage mounted");
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn open(&mut self, name: &str, mode: OpenMode) -> Result<Box<dyn FileHandle>, StorageError> {
        let path = self.path(name);
        let file = match mode {
            OpenMode::Read => File::open(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
                _ => StorageError::Io(e),
            })?,
            OpenMode::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?,
        };

        Ok(Box::new(DirFile {
            name: name.to_string(),
            file,
            writable: mode == OpenMode::Write,
        }))
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        fs::remove_file(self.path(name)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => StorageError::Io(e),
        })
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        if !self.exists(from) {
            return Err(StorageError::NotFound(from.to_string()));
        }
        fs::rename(self.path(from), self.path(to))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
