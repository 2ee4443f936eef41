//! Silence-aware recorder.
//!
//! One recording at a time.  `start()` opens the microphone and spawns a
//! capture task that:
//!
//! ```text
//! chunk ─▶ downmix ─▶ Analyser ─▶ VolumeLevel + SilenceClock
//!        └─▶ StreamResampler (one per recording) ─▶ buffer
//! check tick ─▶ silence window passed / max length hit ─▶ auto-stop
//! ```
//!
//! Whatever ends the capture (manual stop, silence, cap, device loss, the
//! recorder being dropped) the task stops the media tracks before it
//! finishes, and `stop()` awaits that task, so the device is free when
//! `stop()` returns.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::analysis::{AnalysisContext, Analyser, VolumeLevel};
use super::capture::{CaptureStream, Microphone};
use super::encode::FinishedAudio;
use super::resample::{downmix, StreamResampler};
use super::silence::SilenceClock;
use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// RecorderError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum RecorderError {
    /// The device refused to open (denied, busy, misconfigured).
    #[error("microphone access denied: {0}")]
    Permission(String),

    /// No usable capture device or format.
    #[error("audio capture is not supported here: {0}")]
    Unsupported(String),

    #[error("failed to encode recording: {0}")]
    Encode(String),

    #[error("recorder internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// StopReason / AutoStop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Manual,
    Silence,
    MaxDuration,
    /// The capture stream closed underneath us.
    DeviceLost,
}

/// Resolves when the recorder ends a capture on its own.
pub struct AutoStop(oneshot::Receiver<StopReason>);

impl AutoStop {
    /// `Some(reason)` for an automatic stop, `None` if the recording was
    /// stopped by hand or discarded.
    pub async fn fired(self) -> Option<StopReason> {
        self.0.await.ok()
    }
}

// ---------------------------------------------------------------------------
// SilenceAwareRecorder
// ---------------------------------------------------------------------------

struct Captured {
    samples: Vec<f32>,
    reason: StopReason,
}

struct ActiveRecording {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<Captured, RecorderError>>,
}

pub struct SilenceAwareRecorder {
    microphone: Arc<dyn Microphone>,
    context: Arc<AnalysisContext>,
    config: AudioConfig,
    volume: Arc<VolumeLevel>,
    active: Option<ActiveRecording>,
}

impl SilenceAwareRecorder {
    pub fn new(
        microphone: Arc<dyn Microphone>,
        context: Arc<AnalysisContext>,
        config: AudioConfig,
    ) -> Self {
        Self {
            microphone,
            context,
            config,
            volume: Arc::new(VolumeLevel::default()),
            active: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Live 0–100 level of the current recording (0 when idle).
    pub fn volume(&self) -> Arc<VolumeLevel> {
        Arc::clone(&self.volume)
    }

    /// Open the microphone and begin capturing.
    ///
    /// A recording that is somehow still running is discarded first, and its
    /// tracks are released before the microphone is opened again.
    pub async fn start(&mut self) -> Result<AutoStop, RecorderError> {
        if self.is_recording() {
            log::warn!("recorder: start while recording; discarding previous capture");
            self.cancel().await;
        }

        let stream = self.microphone.open().await?;
        let analyser = self.context.analyser(&self.config);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (auto_tx, auto_rx) = oneshot::channel();

        let task = tokio::spawn(capture_loop(
            stream,
            analyser,
            self.config.clone(),
            Arc::clone(&self.volume),
            stop_rx,
            auto_tx,
        ));
        self.active = Some(ActiveRecording { stop_tx, task });
        log::debug!("recorder: capture started");
        Ok(AutoStop(auto_rx))
    }

    /// End the recording and return the clip.  `Ok(None)` when nothing was
    /// recording.
    pub async fn stop(&mut self) -> Result<Option<FinishedAudio>, RecorderError> {
        let Some(captured) = self.halt().await? else {
            return Ok(None);
        };
        let audio = FinishedAudio::from_samples(&captured.samples, self.config.target_sample_rate)?;
        log::info!(
            "recorder: captured {:.2}s ({:?})",
            audio.duration.as_secs_f32(),
            captured.reason
        );
        Ok(Some(audio))
    }

    /// End the recording and throw the audio away.
    pub async fn cancel(&mut self) {
        if let Err(e) = self.halt().await {
            log::warn!("recorder: cancel failed: {e}");
        }
    }

    async fn halt(&mut self) -> Result<Option<Captured>, RecorderError> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        // Already finished on its own if the receiver is gone.
        let _ = active.stop_tx.send(());
        active
            .task
            .await
            .map_err(|e| RecorderError::Internal(e.to_string()))?
            .map(Some)
    }
}

impl Drop for SilenceAwareRecorder {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.stop_tx.send(());
        }
    }
}

async fn capture_loop(
    mut stream: CaptureStream,
    mut analyser: Analyser,
    config: AudioConfig,
    volume: Arc<VolumeLevel>,
    mut stop_rx: oneshot::Receiver<()>,
    auto_tx: oneshot::Sender<StopReason>,
) -> Result<Captured, RecorderError> {
    let started = Instant::now();
    let max_len = Duration::try_from_secs_f32(config.max_recording_secs)
        .unwrap_or(Duration::from_secs(60));
    let mut clock = SilenceClock::from_config(&config, started);
    let mut check = tokio::time::interval(Duration::from_millis(
        config.silence_check_interval_ms.max(1),
    ));
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut samples = Vec::new();
    let mut resampler: Option<StreamResampler> = None;
    let mut failure = None;

    let reason = loop {
        tokio::select! {
            _ = &mut stop_rx => break StopReason::Manual,
            chunk = stream.chunks.recv() => match chunk {
                Some(chunk) => {
                    let mono = downmix(&chunk.samples, chunk.channels);
                    let level = analyser.push(&mono);
                    volume.set(level);
                    clock.observe(level, Instant::now());
                    let target = config.target_sample_rate;
                    if let Err(e) = convert(&mut resampler, &mono, chunk.sample_rate, target, &mut samples) {
                        failure = Some(e);
                        break StopReason::DeviceLost;
                    }
                }
                None => break StopReason::DeviceLost,
            },
            _ = check.tick() => {
                let now = Instant::now();
                if clock.is_expired(now) {
                    break StopReason::Silence;
                }
                if now.duration_since(started) >= max_len {
                    break StopReason::MaxDuration;
                }
            }
        }
    };

    if let Some(resampler) = resampler {
        samples.extend(resampler.finish());
    }
    stream.tracks.stop().await;
    volume.reset();

    if reason != StopReason::Manual {
        log::info!("recorder: auto-stop ({reason:?})");
        let _ = auto_tx.send(reason);
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(Captured { samples, reason }),
    }
}

/// Resample one mono chunk into `samples`, (re)building the resampler when
/// the device rate is first seen or changes.
fn convert(
    resampler: &mut Option<StreamResampler>,
    mono: &[f32],
    rate: u32,
    target_rate: u32,
    samples: &mut Vec<f32>,
) -> Result<(), RecorderError> {
    if resampler.as_ref().map(StreamResampler::from_rate) != Some(rate) {
        if let Some(previous) = resampler.take() {
            samples.extend(previous.finish());
        }
        let fresh = StreamResampler::new(rate, target_rate)
            .map_err(|e| RecorderError::Unsupported(format!("capture at {rate} Hz: {e}")))?;
        *resampler = Some(fresh);
    }
    if let Some(active) = resampler.as_mut() {
        samples.extend(active.process(mono));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
