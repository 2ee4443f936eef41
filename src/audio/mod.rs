//! Audio capture side: microphone → volume meter → silence clock → clip.
//!
//! # Pipeline
//!
//! ```text
//! Microphone::open ─▶ CaptureStream (AudioChunk, tokio mpsc)
//!     └─▶ SilenceAwareRecorder capture task
//!           ├─ downmix ─▶ Analyser (shared AnalysisContext) ─▶ VolumeLevel
//!           ├─ SilenceClock ─▶ AutoStop
//!           └─ resample ─▶ FinishedAudio (16 kHz mono WAV)
//! ```

pub mod analysis;
pub mod capture;
pub mod encode;
pub mod recorder;
pub mod resample;
pub mod silence;

pub use analysis::{AnalysisContext, Analyser, VolumeLevel};
pub use capture::{AudioChunk, CaptureStream, CpalMicrophone, MediaTracks, Microphone};
pub use encode::FinishedAudio;
pub use recorder::{AutoStop, RecorderError, SilenceAwareRecorder, StopReason};
pub use resample::{downmix, resample, upmix, ResampleError, StreamResampler};
pub use silence::SilenceClock;

#[cfg(test)]
pub use capture::FakeMicrophone;
