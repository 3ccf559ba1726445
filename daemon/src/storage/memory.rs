//! In-memory storage with a shared handle for inspection

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{FileHandle, OpenMode, Storage, StorageError};

#[derive(Debug, Default)]
struct MemState {
    files: BTreeMap<String, Vec<u8>>,
    /// Remaining `begin` calls that report the card missing
    failing_mounts: u32,
    fail_opens: bool,
}

/// Storage kept in memory
///
/// Clones share the same files, so a test can keep one handle while the
/// state machine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    state: Arc<Mutex<MemState>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, name: &str, bytes: impl Into<Vec<u8>>) {
        self.state().files.insert(name.to_string(), bytes.into());
    }

    pub fn read(&self, name: &str) -> Option<Vec<u8>> {
        self.state().files.get(name).cloned()
    }

    /// Report the card missing for the next `count` mounts
    pub fn fail_mounts(&self, count: u32) {
        self.state().failing_mounts = count;
    }

    /// Make every subsequent `open` fail
    pub fn fail_opens(&self, fail: bool) {
        self.state().fail_opens = fail;
    }
}

struct MemFile {
    name: String,
    state: Arc<Mutex<MemState>>,
    position: usize,
    writable: bool,
}

impl MemFile {
    fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FileHandle for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        let state = self.state();
        let data = state
            .files
            .get(&self.name)
            .ok_or_else(|| StorageError::NotFound(self.name.clone()))?;

        let start = self.position.min(data.len());
        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        drop(state);

        self.position = start + count;
        Ok(count)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        if !self.writable {
            return Err(StorageError::ReadOnly(self.name.clone()));
        }
        let position = self.position;
        let name = self.name.clone();
        let mut state = self.state();
        let data = state
            .files
            .get_mut(&name)
            .ok_or_else(|| StorageError::NotFound(name.clone()))?;

        let end = position + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[position..end].copy_from_slice(bytes);
        drop(state);

        self.position = end;
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> Result<(), StorageError> {
        self.position = offset as usize;
        Ok(())
    }

    fn size(&self) -> Result<u64, StorageError> {
        self.state()
            .files
            .get(&self.name)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(self.name.clone()))
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

impl Storage for MemStorage {
    fn begin(&mut self) -> Result<(), StorageError> {
        let mut state = self.state();
        if state.failing_mounts > 0 {
            state.failing_mounts -= 1;
            return Err(StorageError::Unavailable);
        }
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.state().files.contains_key(name)
    }

    fn open(&mut self, name: &str, mode: OpenMode) -> Result<Box<dyn FileHandle>, StorageError> {
        let mut state = self.state();
        if state.fail_opens {
            return Err(StorageError::Unavailable);
        }
        match mode {
            OpenMode::Read if !state.files.contains_key(name) => {
                return Err(StorageError::NotFound(name.to_string()));
            }
            OpenMode::Read => {}
            OpenMode::Write => {
                state.files.insert(name.to_string(), Vec::new());
            }
        }
        drop(state);

        Ok(Box::new(MemFile {
            name: name.to_string(),
            state: Arc::clone(&self.state),
            position: 0,
            writable: mode == OpenMode::Write,
        }))
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        self.state()
            .files
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        let mut state = self.state();
        let data = state
            .files
            .remove(from)
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        state.files.insert(to.to_string(), data);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .state()
            .files
            .keys()
            .filter(|name| !name.contains('/'))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_files() {
        let storage = MemStorage::new();
        let mut owned = storage.clone();

        let mut file = owned.open("temp.wav", OpenMode::Write).unwrap();
        file.write(&[1, 2, 3, 4]).unwrap();
        file.seek(1).unwrap();
        file.write(&[9]).unwrap();
        file.close().unwrap();

        assert_eq!(storage.read("temp.wav").unwrap(), vec![1, 9, 3, 4]);

        let mut file = owned.open("temp.wav", OpenMode::Read).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(file.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 9, 3]);
        assert_eq!(file.read(&mut buf).unwrap(), 1);
        assert_eq!(file.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_failing_mounts_count_down() {
        let mut storage = MemStorage::new();
        storage.fail_mounts(2);
        assert!(storage.begin().is_err());
        assert!(storage.begin().is_err());
        assert!(storage.begin().is_ok());
    }

    #[test]
    fn test_list_skips_protected_dir() {
        let storage = MemStorage::new();
        storage.insert("Don't Delete/Standard greeting.wav", vec![0; 44]);
        storage.insert("00000.wav", vec![0; 44]);
        assert_eq!(storage.list().unwrap(), vec!["00000.wav"]);
    }
}
