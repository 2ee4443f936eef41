//! Usage gate.
//!
//! Unauthenticated users get `max_free_uses` conversation starts, counted in
//! `usage.json`.  Verifying the owner password (see [`verify`]) lifts the
//! limit for the rest of the process.

pub mod verify;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use verify::{unlock_gate, GateError, HttpPasswordVerifier, PasswordVerifier};

/// Reported as "remaining" once authenticated.
pub const UNLIMITED: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageStatus {
    pub allowed: bool,
    pub remaining: u32,
    pub authenticated: bool,
}

pub trait UsageGate: Send + Sync {
    fn check(&self) -> UsageStatus;
    /// Count one use.  No-op once authenticated.
    fn increment(&self);
}

// ---------------------------------------------------------------------------
// LocalUsageGate
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsageFile {
    #[serde(default)]
    used: u32,
}

pub struct LocalUsageGate {
    path: PathBuf,
    max_free_uses: u32,
    used: Mutex<u32>,
    authenticated: AtomicBool,
}

impl LocalUsageGate {
    /// Load the counter at `path`.  Missing or corrupt files count as zero.
    pub fn open(path: impl Into<PathBuf>, max_free_uses: u32) -> Self {
        let path = path.into();
        let used = read_counter(&path);
        log::debug!("gate: {used}/{max_free_uses} free uses spent");
        Self {
            path,
            max_free_uses,
            used: Mutex::new(used),
            authenticated: AtomicBool::new(false),
        }
    }

    pub fn authenticate(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
        log::info!("gate: authenticated; usage is unlimited");
    }

    pub fn logout(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn current_usage(&self) -> u32 {
        *self.used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget every counted use.
    pub fn reset(&self) -> Result<()> {
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        *used = 0;
        write_counter(&self.path, 0)
    }
}

impl UsageGate for LocalUsageGate {
    fn check(&self) -> UsageStatus {
        if self.is_authenticated() {
            return UsageStatus {
                allowed: true,
                remaining: UNLIMITED,
                authenticated: true,
            };
        }
        let used = self.current_usage();
        UsageStatus {
            allowed: used < self.max_free_uses,
            remaining: self.max_free_uses.saturating_sub(used),
            authenticated: false,
        }
    }

    fn increment(&self) {
        if self.is_authenticated() {
            return;
        }
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        *used += 1;
        log::info!("gate: use {}/{}", *used, self.max_free_uses);
        if let Err(e) = write_counter(&self.path, *used) {
            log::warn!("gate: could not save usage counter: {e}");
        }
    }
}

fn read_counter(path: &Path) -> u32 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str::<UsageFile>(&content).ok())
        .map(|file| file.used)
        .unwrap_or(0)
}

fn write_counter(path: &Path, used: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string(&UsageFile { used })?)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// FixedGate  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use fixed::FixedGate;

#[cfg(test)]
mod fixed {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Always answers `allowed`; counts increments.
    pub struct FixedGate {
        allowed: bool,
        increments: AtomicUsize,
    }

    impl FixedGate {
        pub fn allowing() -> Self {
            Self {
                allowed: true,
                increments: AtomicUsize::new(0),
            }
        }

        pub fn denying() -> Self {
            Self {
                allowed: false,
                increments: AtomicUsize::new(0),
            }
        }

        pub fn increments(&self) -> usize {
            self.increments.load(Ordering::SeqCst)
        }
    }

    impl UsageGate for FixedGate {
        fn check(&self) -> UsageStatus {
            UsageStatus {
                allowed: self.allowed,
                remaining: if self.allowed { 3 } else { 0 },
                authenticated: false,
            }
        }

        fn increment(&self) {
            self.increments.fetch_add(1, Ordering::SeqCst);
        }
    }
}
