//! Sequential recording names: 00000.wav, 00001.wav, ...

use tracing::{debug, error};

use crate::storage::Storage;

use super::RecordingError;

/// Picks the smallest free `NNNNN.wav` name
#[derive(Debug, Clone, Copy)]
pub struct FilenameAllocator {
    slots: u32,
}

impl FilenameAllocator {
    pub fn new(slots: u32) -> Self {
        Self { slots }
    }

    pub fn slot_name(index: u32) -> String {
        format!("{index:05}.wav")
    }

    /// First name in the namespace with no file behind it
    pub fn next_free(&self, storage: &dyn Storage) -> Result<String, RecordingError> {
        (0..self.slots)
            .map(Self::slot_name)
            .find(|name| !storage.exists(name))
            .ok_or(RecordingError::NamespaceExhausted { slots: self.slots })
    }

    /// Rename `temp` to the next free name and return that name
    ///
    /// When every slot is taken the temporary file is removed so the
    /// reserved name is free for the next session.
    pub fn finalize(&self, storage: &mut dyn Storage, temp: &str) -> Result<String, RecordingError> {
        let name = match self.next_free(storage) {
            Ok(name) => name,
            Err(e) => {
                error!(slots = self.slots, "no free recording name left");
                if let Err(remove_err) = storage.remove(temp) {
                    debug!(?remove_err, "temporary recording already gone");
                }
                return Err(e);
            }
        };

        storage
            .rename(temp, &name)
            .map_err(RecordingError::Finalize)?;
        debug!(%name, "recording renamed");
        Ok(name)
    }
}
