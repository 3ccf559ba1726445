//! Canonical 44-byte PCM WAV header and the two-phase file writer
//!
//! The capture length is only known once recording stops, so the writer
//! puts a placeholder header first, appends the audio, then seeks back to
//! offset 0 and patches the header in place. The file is never buffered
//! in memory.
//!
//! Files to play are decoded with hound, reading through the storage
//! handle.

use std::io;

use crate::storage::{FileHandle, OpenMode, Storage, StorageError};

pub const HEADER_LEN: usize = 44;
pub const SAMPLE_RATE: u32 = 44_100;
pub const NUM_CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;
pub const BLOCK_ALIGN: u16 = NUM_CHANNELS * (BITS_PER_SAMPLE / 8);
pub const BYTE_RATE: u32 = SAMPLE_RATE * BLOCK_ALIGN as u32;
const PCM_FORMAT: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;

/// Errors from inspecting a file to play
#[derive(Debug, thiserror::Error)]
pub enum WavError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("file is {0} bytes, shorter than a header")]
    Truncated(u64),

    #[error("not a playable WAV file: {0}")]
    Decode(#[from] hound::Error),
}

/// Fields of a mono 16-bit 44.1 kHz PCM header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    /// File length minus 8
    pub chunk_size: u32,
    pub audio_format: u16,
    pub num_channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// File length minus 44
    pub data_size: u32,
}

impl WavHeader {
    /// Header for a file of `total_bytes`, header included
    pub fn for_file_len(total_bytes: u64) -> Self {
        let clamp = |n: u64| u32::try_from(n).unwrap_or(u32::MAX);
        Self {
            chunk_size: clamp(total_bytes.saturating_sub(8)),
            audio_format: PCM_FORMAT,
            num_channels: NUM_CHANNELS,
            sample_rate: SAMPLE_RATE,
            byte_rate: BYTE_RATE,
            block_align: BLOCK_ALIGN,
            bits_per_sample: BITS_PER_SAMPLE,
            data_size: clamp(total_bytes.saturating_sub(HEADER_LEN as u64)),
        }
    }

    /// Header written before any audio; the size fields describe an empty file
    pub fn placeholder() -> Self {
        Self::for_file_len(HEADER_LEN as u64)
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(b"RIFF");
        out[4..8].copy_from_slice(&self.chunk_size.to_le_bytes());
        out[8..12].copy_from_slice(b"WAVE");
        out[12..16].copy_from_slice(b"fmt ");
        out[16..20].copy_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
        out[20..22].copy_from_slice(&self.audio_format.to_le_bytes());
        out[22..24].copy_from_slice(&self.num_channels.to_le_bytes());
        out[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[28..32].copy_from_slice(&self.byte_rate.to_le_bytes());
        out[32..34].copy_from_slice(&self.block_align.to_le_bytes());
        out[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        out[36..40].copy_from_slice(b"data");
        out[40..44].copy_from_slice(&self.data_size.to_le_bytes());
        out
    }
}

#[cfg(test)]
impl WavHeader {
    /// Header fields of a file this module wrote, `None` if the layout differs
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at =
            |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        let ids_match = [(0, b"RIFF"), (8, b"WAVE"), (12, b"fmt "), (36, b"data")]
            .iter()
            .all(|(at, id)| &bytes[*at..*at + 4] == *id);
        if !ids_match || u16_at(20) != PCM_FORMAT {
            return None;
        }

        Some(Self {
            chunk_size: u32_at(4),
            audio_format: u16_at(20),
            num_channels: u16_at(22),
            sample_rate: u32_at(24),
            byte_rate: u32_at(28),
            block_align: u16_at(32),
            bits_per_sample: u16_at(34),
            data_size: u32_at(40),
        })
    }

    /// Play time of the audio the header describes
    pub fn duration_ms(&self) -> u64 {
        if self.byte_rate == 0 {
            return 0;
        }
        self.data_size as u64 * 1_000 / self.byte_rate as u64
    }
}

/// `io::Read` over an open storage file
struct FileReader(Box<dyn FileHandle>);

impl io::Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).map_err(|e| match e {
            StorageError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other),
        })
    }
}

/// Play time of `name` on storage, decoded from its header
pub fn playback_duration_ms(storage: &mut dyn Storage, name: &str) -> Result<u64, WavError> {
    let file = storage.open(name, OpenMode::Read)?;
    let size = file.size()?;
    if size < HEADER_LEN as u64 {
        return Err(WavError::Truncated(size));
    }
    let reader = hound::WavReader::new(FileReader(file))?;
    let spec = reader.spec();
    let duration_ms = match spec.sample_rate {
        0 => 0,
        rate => reader.duration() as u64 * 1_000 / rate as u64,
    };
    reader.into_inner().0.close()?;
    Ok(duration_ms)
}

/// Append-only WAV writer with an in-place header patch at close
pub struct WavFileWriter {
    file: Box<dyn FileHandle>,
}

impl WavFileWriter {
    /// Create (or truncate) `name` and write the placeholder header
    pub fn create(storage: &mut dyn Storage, name: &str) -> Result<Self, StorageError> {
        let mut file = storage.open(name, OpenMode::Write)?;
        file.write(&WavHeader::placeholder().encode())?;
        Ok(Self { file })
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.file.write(bytes)
    }

    /// Patch the header for `total_bytes` and close the file
    ///
    /// The handle is released even if the patch fails.
    pub fn finalize(mut self, total_bytes: u64) -> Result<(), StorageError> {
        let header = WavHeader::for_file_len(total_bytes).encode();
        let patched = self.file.seek(0).and_then(|_| self.file.write(&header));
        let closed = self.file.close();
        patched.and(closed)
    }
}
