//! Cross-platform application paths using the `dirs` crate.
//!
//! Everything lives in the config dir:
//!
//!   Windows: %APPDATA%\voice-practice\
//!   macOS:   ~/Library/Application Support/voice-practice/
//!   Linux:   ~/.config/voice-practice/

use std::path::{Path, PathBuf};

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    /// `settings.toml`.
    pub settings_file: PathBuf,
    /// `conversation.json`, the persisted exchange log.
    pub history_file: PathBuf,
    /// `usage.json`, the free-use counter.
    pub usage_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "voice-practice";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);
        Self::in_dir(&config_dir)
    }

    /// Lay the files out under an explicit directory (useful for tests).
    pub fn in_dir(config_dir: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            settings_file: config_dir.join("settings.toml"),
            history_file: config_dir.join("conversation.json"),
            usage_file: config_dir.join("usage.json"),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_non_empty() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
        assert!(paths
            .history_file
            .file_name()
            .is_some_and(|n| n == "conversation.json"));
        assert!(paths
            .usage_file
            .file_name()
            .is_some_and(|n| n == "usage.json"));
    }

    #[test]
    fn in_dir_keeps_files_together() {
        let paths = AppPaths::in_dir(Path::new("/tmp/practice"));
        assert_eq!(paths.history_file.parent(), Some(Path::new("/tmp/practice")));
        assert_eq!(paths.usage_file.parent(), Some(Path::new("/tmp/practice")));
    }
}
