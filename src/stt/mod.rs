//! Speech-to-text.
//!
//! * [`Transcriber`]: async trait the orchestrator calls.
//! * [`HttpTranscriber`]: multipart upload to the `/api/stt` service.
//! * [`detect_language`]: picks the language hint for the next request.

pub mod client;
pub mod language;

pub use client::{HttpTranscriber, Transcriber, TranscriptionError};
pub use language::detect_language;

#[cfg(test)]
pub use client::MockTranscriber;
