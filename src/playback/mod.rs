//! Reply playback: an ordered queue in front of the output device.

pub mod output;
pub mod sequencer;

pub use output::{decode, AudioOutput, CpalOutput, DecodedAudio, PlaybackError};
pub use sequencer::{AudioQueueEntry, PlaybackEvent, PlaybackSequencer};

#[cfg(test)]
pub use output::RecordingOutput;
