//! Message capture to PCM WAV files
//!
//! - `session`: drains the capture queue into the file in batches
//! - `wav`: header layout and the placeholder-then-patch writer
//! - `names`: sequential `NNNNN.wav` allocation and rename-on-finalize

mod names;
mod session;
pub mod wav;

pub use names::FilenameAllocator;
pub use session::{FinishedRecording, RecordingError, RecordingSession};
