//! Reply → speech.
//!
//! ```text
//! reply text ─▶ SentenceSegmenter ─▶ [SpeakableUnit]
//!            ─▶ SynthesisPipeline (FullReply | Chunked{n}) ─▶ SynthesisOutcome (in order)
//!                 └─ CachedSynthesizer ─▶ HttpSynthesizer (/api/tts)
//! ```

pub mod cache;
pub mod dispatch;
pub mod segmenter;
pub mod synth;

pub use cache::CachedSynthesizer;
pub use dispatch::{DispatchPolicy, SynthesisOutcome, SynthesisPipeline};
pub use segmenter::{SentenceSegmenter, SpeakableUnit};
pub use synth::{AudioAsset, HttpSynthesizer, SynthesisError, Synthesizer};

#[cfg(test)]
pub use synth::{mock_clip, MockSynthesizer};
