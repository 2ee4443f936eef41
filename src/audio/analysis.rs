//! Frequency-domain volume metering.
//!
//! ```text
//! AnalysisContext (one per process, shared via Arc)
//!   └─ lazily plans the FFT + window on first use, never rebuilt
//!
//! Analyser (one per recording)
//!   push(chunk) ─▶ last fft_size samples ─▶ Blackman window ─▶ realfft
//!              ─▶ |X[k]| / N ─▶ smoothed across frames ─▶ dB
//!              ─▶ 0..255 per bin ─▶ mean ─▶ 0..100
//! ```
//!
//! The level published to the UI lives in [`VolumeLevel`], a lock-free cell
//! the capture task writes and anyone may read.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// AnalysisContext
// ---------------------------------------------------------------------------

struct Engine {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
}

/// Shared analysis resources.
///
/// Construct once at startup and hand clones of the `Arc` to every
/// recorder.  The FFT plan is built the first time an analyser actually
/// processes audio and reused for the life of the context.
pub struct AnalysisContext {
    fft_size: usize,
    engine: OnceLock<Engine>,
    initialisations: AtomicUsize,
}

impl AnalysisContext {
    /// `fft_size` is rounded up to a power of two, minimum 32.
    pub fn new(fft_size: usize) -> Arc<Self> {
        Arc::new(Self {
            fft_size: fft_size.max(32).next_power_of_two(),
            engine: OnceLock::new(),
            initialisations: AtomicUsize::new(0),
        })
    }

    pub fn from_config(config: &AudioConfig) -> Arc<Self> {
        Self::new(config.fft_size)
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Whether the FFT plan has been built yet.
    pub fn is_initialised(&self) -> bool {
        self.engine.get().is_some()
    }

    /// How many times the plan was built.  Stays at 0 or 1.
    pub fn initialisations(&self) -> usize {
        self.initialisations.load(Ordering::SeqCst)
    }

    /// New analyser bound to this context.
    pub fn analyser(self: &Arc<Self>, config: &AudioConfig) -> Analyser {
        Analyser::new(Arc::clone(self), config)
    }

    fn engine(&self) -> &Engine {
        self.engine.get_or_init(|| {
            self.initialisations.fetch_add(1, Ordering::SeqCst);
            log::debug!("analysis: planning {}-point FFT", self.fft_size);
            let n = self.fft_size;
            let fft = RealFftPlanner::<f32>::new().plan_fft_forward(n);
            let window = (0..n)
                .map(|i| {
                    let x = i as f32 / n as f32;
                    0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
                })
                .collect();
            Engine { fft, window }
        })
    }
}

impl std::fmt::Debug for AnalysisContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisContext")
            .field("fft_size", &self.fft_size)
            .field("initialised", &self.is_initialised())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Analyser
// ---------------------------------------------------------------------------

/// Per-recording meter.  Feed it mono chunks; each push returns the new
/// 0–100 level.
pub struct Analyser {
    context: Arc<AnalysisContext>,
    smoothing: f32,
    min_db: f32,
    db_range: f32,
    history: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl Analyser {
    fn new(context: Arc<AnalysisContext>, config: &AudioConfig) -> Self {
        let n = context.fft_size();
        let db_range = (config.max_decibels - config.min_decibels).max(f32::EPSILON);
        Self {
            smoothing: config.smoothing.clamp(0.0, 1.0),
            min_db: config.min_decibels,
            db_range,
            history: vec![0.0; n],
            input: vec![0.0; n],
            spectrum: vec![Complex::new(0.0, 0.0); n / 2 + 1],
            scratch: Vec::new(),
            smoothed: vec![0.0; n / 2],
            context,
        }
    }

    /// Slide `samples` into the analysis window and recompute the level.
    pub fn push(&mut self, samples: &[f32]) -> f32 {
        let n = self.history.len();
        if samples.len() >= n {
            self.history.copy_from_slice(&samples[samples.len() - n..]);
        } else if !samples.is_empty() {
            self.history.copy_within(samples.len().., 0);
            self.history[n - samples.len()..].copy_from_slice(samples);
        }
        self.level()
    }

    fn level(&mut self) -> f32 {
        let context = Arc::clone(&self.context);
        let engine = context.engine();
        if self.scratch.len() != engine.fft.get_scratch_len() {
            self.scratch = engine.fft.make_scratch_vec();
        }

        for ((dst, &s), &w) in self.input.iter_mut().zip(&self.history).zip(&engine.window) {
            *dst = s * w;
        }
        if let Err(e) =
            engine
                .fft
                .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
        {
            log::warn!("analysis: fft failed: {e}");
            return 0.0;
        }

        let n = self.history.len() as f32;
        let mut total = 0.0_f32;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(&self.spectrum) {
            let magnitude = bin.norm() / n;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
            let db = 20.0 * smoothed.max(f32::MIN_POSITIVE).log10();
            total += (255.0 * (db - self.min_db) / self.db_range)
                .clamp(0.0, 255.0)
                .floor();
        }

        let mean = total / self.smoothed.len() as f32;
        (mean / 255.0 * 100.0).min(100.0)
    }
}

// ---------------------------------------------------------------------------
// VolumeLevel
// ---------------------------------------------------------------------------

/// Latest volume (0–100), readable from any thread.
#[derive(Debug, Default)]
pub struct VolumeLevel(AtomicU32);

impl VolumeLevel {
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, level: f32) {
        self.0.store(level.clamp(0.0, 100.0).to_bits(), Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
