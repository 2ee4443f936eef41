//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), one sub-config per subsystem,
//! `AppPaths` for cross-platform data locations, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, AudioConfig, DispatchMode, GateConfig, HotkeyConfig, PlaybackConfig,
    ServiceConfig, SpeechConfig,
};
