//! Spoken conversation practice: record a question, transcribe it, ask the
//! tutor service, and speak the reply sentence by sentence.

pub mod audio;
pub mod config;
pub mod gate;
pub mod hotkey;
pub mod llm;
pub mod pipeline;
pub mod playback;
pub mod stt;
pub mod tts;

pub(crate) mod http;

#[cfg(test)]
pub(crate) mod testing;
