//! One message capture: capture queue -> batched writes -> finalized WAV

use tracing::{debug, info, warn};

use crate::config::RecordingSettings;
use crate::hal::{CaptureQueue, BYTES_PER_BLOCK};
use crate::storage::{Storage, StorageError};

use super::names::FilenameAllocator;
use super::wav::{WavFileWriter, HEADER_LEN};

/// Errors that end a recording session
#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("failed to open capture file: {0}")]
    Open(#[source] StorageError),

    #[error("failed to write capture file: {0}")]
    Write(#[source] StorageError),

    #[error("failed to finalize recording: {0}")]
    Finalize(#[source] StorageError),

    #[error("all {slots} recording names are taken")]
    NamespaceExhausted { slots: u32 },

    #[error("a recording session is already open")]
    SessionAlreadyOpen,
}

/// Contiguous buffer of whole capture blocks, flushed in one write
#[derive(Debug)]
struct BlockBatch {
    bytes: Vec<u8>,
    capacity_blocks: usize,
}

impl BlockBatch {
    fn new(capacity_blocks: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity_blocks * BYTES_PER_BLOCK),
            capacity_blocks,
        }
    }

    fn push(&mut self, block: &[u8]) {
        self.bytes.extend_from_slice(block);
    }

    fn capacity_blocks(&self) -> usize {
        self.capacity_blocks
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn clear(&mut self) {
        self.bytes.clear();
    }
}

/// Result of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedRecording {
    /// Sequential name the recording was stored under
    pub name: String,
    /// File length, header included
    pub total_bytes: u64,
    pub too_short: bool,
}

/// Capture file plus its header-inclusive byte count
struct CaptureFile {
    writer: WavFileWriter,
    total_bytes: u64,
    /// First write error; audio is still drained but no longer written
    write_error: Option<StorageError>,
}

impl CaptureFile {
    fn write(&mut self, bytes: &[u8]) {
        if self.write_error.is_some() {
            return;
        }
        match self.writer.append(bytes) {
            Ok(()) => self.total_bytes += bytes.len() as u64,
            Err(e) => {
                warn!(?e, "capture write failed, dropping the rest of the recording");
                self.write_error = Some(e);
            }
        }
    }
}

/// An open capture
///
/// Owns the capture file exclusively. `stop` consumes the session, so the
/// header is always patched before the handle is released.
pub struct RecordingSession {
    file: CaptureFile,
    temp_name: String,
    batch: BlockBatch,
    min_file_bytes: u64,
}

impl RecordingSession {
    /// Open the temporary file, write the placeholder header and start capturing
    ///
    /// Nothing is captured if the file cannot be opened.
    pub fn start(
        storage: &mut dyn Storage,
        capture: &mut dyn CaptureQueue,
        temp_name: &str,
        settings: &RecordingSettings,
    ) -> Result<Self, RecordingError> {
        let writer = WavFileWriter::create(storage, temp_name).map_err(RecordingError::Open)?;
        capture.begin();
        info!(file = temp_name, "recording started");

        Ok(Self {
            file: CaptureFile {
                writer,
                total_bytes: HEADER_LEN as u64,
                write_error: None,
            },
            temp_name: temp_name.to_string(),
            batch: BlockBatch::new(settings.blocks_per_write),
            min_file_bytes: settings.min_file_bytes,
        })
    }

    /// Bytes in the file so far, header included
    #[cfg(test)]
    pub fn total_bytes(&self) -> u64 {
        self.file.total_bytes
    }

    /// Move one full batch from the queue to the file if enough blocks are waiting
    ///
    /// Returns the number of blocks moved.
    pub fn continue_capture(&mut self, capture: &mut dyn CaptureQueue) -> usize {
        let wanted = self.batch.capacity_blocks();
        if capture.available() < wanted {
            return 0;
        }

        self.batch.clear();
        for _ in 0..wanted {
            if let Some(block) = capture.read_buffer() {
                self.batch.push(block);
            }
            capture.free_buffer();
        }

        self.file.write(self.batch.as_bytes());
        debug!(bytes = self.batch.len(), total = self.file.total_bytes, "batch written");
        wanted
    }

    /// End capture, drain what is left, patch the header and store the file
    /// under the next sequential name
    pub fn stop(
        mut self,
        capture: &mut dyn CaptureQueue,
        storage: &mut dyn Storage,
        allocator: &FilenameAllocator,
    ) -> Result<FinishedRecording, RecordingError> {
        capture.end();

        let mut drained = 0;
        while capture.available() > 0 {
            if let Some(block) = capture.read_buffer() {
                self.file.write(block);
            }
            capture.free_buffer();
            drained += 1;
        }

        let CaptureFile {
            writer,
            total_bytes,
            write_error,
        } = self.file;
        let finalized = writer.finalize(total_bytes);
        if let Some(e) = write_error {
            return Err(RecordingError::Write(e));
        }
        finalized.map_err(RecordingError::Finalize)?;

        let too_short = total_bytes < self.min_file_bytes;
        let name = allocator.finalize(storage, &self.temp_name)?;
        info!(%name, total_bytes, drained, too_short, "recording stopped");

        Ok(FinishedRecording {
            name,
            total_bytes,
            too_short,
        })
    }
}
