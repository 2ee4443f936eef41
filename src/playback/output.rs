//! Audio output.
//!
//! [`AudioOutput`] is the seam the sequencer plays through.  `play()`
//! resolves when the clip has finished; dropping the future stops it at
//! once.  `unlock()` is the capability check run on a user action before
//! the first reply plays.
//!
//! [`CpalOutput`] decodes the asset (MP3 via `minimp3`, WAV via `hound`),
//! converts it to the device layout and plays it on a blocking thread that
//! owns the non-`Send` `cpal::Stream`.  A device that refuses to open or
//! start is reported as [`PlaybackError::Blocked`].

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use thiserror::Error;

use crate::audio::{downmix, resample, upmix};
use crate::config::PlaybackConfig;
use crate::tts::AudioAsset;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum PlaybackError {
    /// The output refused to start.  Retried once, then surfaced.
    #[error("playback was blocked: {0}")]
    Blocked(String),

    #[error("could not decode reply audio: {0}")]
    Decode(String),

    #[error("audio output error: {0}")]
    Device(String),
}

// ---------------------------------------------------------------------------
// AudioOutput trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play a short silent clip so later playback is allowed to start.
    async fn unlock(&self) -> Result<(), PlaybackError>;

    /// Play `asset` to the end.  Dropping the returned future stops it.
    async fn play(&self, asset: &AudioAsset) -> Result<(), PlaybackError>;
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Mono PCM in `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Wav,
    Mp3,
}

fn container(asset: &AudioAsset) -> Option<Container> {
    let mime = asset.mime_type.to_ascii_lowercase();
    if mime.contains("wav") {
        return Some(Container::Wav);
    }
    if mime.contains("mpeg") || mime.contains("mp3") {
        return Some(Container::Mp3);
    }
    let bytes = &asset.bytes;
    if bytes.starts_with(b"RIFF") {
        Some(Container::Wav)
    } else if bytes.starts_with(b"ID3") || (bytes.len() > 1 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0) {
        Some(Container::Mp3)
    } else {
        None
    }
}

/// Decode an asset to mono PCM.
pub fn decode(asset: &AudioAsset) -> Result<DecodedAudio, PlaybackError> {
    match container(asset) {
        Some(Container::Wav) => decode_wav(&asset.bytes),
        Some(Container::Mp3) => decode_mp3(&asset.bytes),
        None => Err(PlaybackError::Decode(format!(
            "unsupported audio type {}",
            asset.mime_type
        ))),
    }
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, PlaybackError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| PlaybackError::Decode(e.to_string()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| PlaybackError::Decode(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| PlaybackError::Decode(e.to_string()))?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, spec.channels),
        sample_rate: spec.sample_rate,
    })
}

fn decode_mp3(bytes: &[u8]) -> Result<DecodedAudio, PlaybackError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.sample_rate > 0 {
                    sample_rate = frame.sample_rate as u32;
                }
                let pcm: Vec<f32> = frame.data.iter().map(|&s| s as f32 / 32_768.0).collect();
                samples.extend(downmix(&pcm, frame.channels as u16));
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => continue,
            Err(e) => return Err(PlaybackError::Decode(e.to_string())),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(PlaybackError::Decode("no MP3 frames found".into()));
    }
    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

/// Default output device via `cpal`.
#[derive(Debug, Clone)]
pub struct CpalOutput {
    playback_rate: f32,
    unlock_clip: Duration,
}

impl CpalOutput {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            playback_rate: if config.playback_rate > 0.0 {
                config.playback_rate
            } else {
                1.0
            },
            unlock_clip: Duration::from_millis(config.unlock_clip_ms),
        }
    }
}

/// Sets the stop flag when the `play()` future is dropped.
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioOutput for CpalOutput {
    async fn unlock(&self) -> Result<(), PlaybackError> {
        let unlock_clip = self.unlock_clip;
        tokio::task::spawn_blocking(move || {
            let (device, config, format) = output_device()?;
            let frames = vec![0.0; (config.sample_rate.0 as u64 * unlock_clip.as_millis() as u64 / 1_000) as usize];
            let done = Arc::new(AtomicBool::new(false));
            let stream = build_output(&device, &config, format, Arc::new(frames), Arc::clone(&done))?;
            stream
                .play()
                .map_err(|e| PlaybackError::Blocked(e.to_string()))?;
            std::thread::sleep(unlock_clip);
            drop(stream);
            log::debug!("output: unlock clip played");
            Ok(())
        })
        .await
        .map_err(|e| PlaybackError::Device(e.to_string()))?
    }

    async fn play(&self, asset: &AudioAsset) -> Result<(), PlaybackError> {
        let decoded = decode(asset)?;
        let rate = self.playback_rate;
        let stop = Arc::new(AtomicBool::new(false));
        let _guard = StopOnDrop(Arc::clone(&stop));

        tokio::task::spawn_blocking(move || play_blocking(decoded, rate, stop))
            .await
            .map_err(|e| PlaybackError::Device(e.to_string()))?
    }
}

fn play_blocking(decoded: DecodedAudio, rate: f32, stop: Arc<AtomicBool>) -> Result<(), PlaybackError> {
    let (device, config, format) = output_device()?;
    let device_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    // Faster playback: treat the source as if it had been recorded slower.
    // This shifts pitch along with speed.
    let source_rate = (decoded.sample_rate as f32 * rate).round().max(1.0) as u32;
    let mono = resample(&decoded.samples, source_rate, device_rate);
    let frames = Arc::new(upmix(&mono, channels));

    let finished = Arc::new(AtomicBool::new(false));
    let stream = build_output(&device, &config, format, frames, Arc::clone(&finished))?;
    stream
        .play()
        .map_err(|e| PlaybackError::Blocked(e.to_string()))?;

    while !finished.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(20));
    }
    // The callback has queued the last samples; let the device play them.
    if !stop.load(Ordering::SeqCst) {
        wait_unless_stopped(&stop, OUTPUT_DRAIN);
    }
    drop(stream);
    Ok(())
}

const OUTPUT_DRAIN: Duration = Duration::from_millis(100);

/// Sleep for up to `limit`, returning early (and `true`) once `stop` is set.
fn wait_unless_stopped(stop: &AtomicBool, limit: Duration) -> bool {
    let deadline = std::time::Instant::now() + limit;
    loop {
        if stop.load(Ordering::SeqCst) {
            return true;
        }
        let now = std::time::Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(10)));
    }
}

fn output_device() -> Result<(cpal::Device, cpal::StreamConfig, cpal::SampleFormat), PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::Device("no output device found".into()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| PlaybackError::Blocked(e.to_string()))?;
    let format = supported.sample_format();
    Ok((device, supported.into(), format))
}

fn build_output(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
    frames: Arc<Vec<f32>>,
    finished: Arc<AtomicBool>,
) -> Result<cpal::Stream, PlaybackError> {
    let stream = match format {
        cpal::SampleFormat::F32 => build_typed::<f32>(device, config, frames, finished),
        cpal::SampleFormat::I16 => build_typed::<i16>(device, config, frames, finished),
        cpal::SampleFormat::U16 => build_typed::<u16>(device, config, frames, finished),
        other => return Err(PlaybackError::Device(format!("output sample format {other:?}"))),
    };
    stream.map_err(|e| PlaybackError::Blocked(e.to_string()))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frames: Arc<Vec<f32>>,
    finished: Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut position = 0usize;
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for slot in data.iter_mut() {
                let value = frames.get(position).copied().unwrap_or(0.0);
                *slot = T::from_sample(value);
                position = position.saturating_add(1);
            }
            if position >= frames.len() {
                finished.store(true, Ordering::SeqCst);
            }
        },
        |err: cpal::StreamError| {
            log::error!("cpal output stream error: {err}");
        },
        None,
    )
}

// ---------------------------------------------------------------------------
// RecordingOutput  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use recording::RecordingOutput;

#[cfg(test)]
mod recording {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::*;

    /// Logs `unlock`, `start:<text>`, `end:<text>` and `cut:<text>` (dropped
    /// mid-clip) for clips made by [`crate::tts::mock_clip`].
    pub struct RecordingOutput {
        events: Arc<Mutex<Vec<String>>>,
        clip_length: Duration,
        blocked_plays: AtomicUsize,
        unlock_blocked: AtomicBool,
        undecodable: Vec<String>,
    }

    impl RecordingOutput {
        pub fn new(clip_length: Duration) -> Self {
            Self {
                events: Arc::new(Mutex::new(Vec::new())),
                clip_length,
                blocked_plays: AtomicUsize::new(0),
                unlock_blocked: AtomicBool::new(false),
                undecodable: Vec::new(),
            }
        }

        /// Reject the next `n` play attempts.
        pub fn block_next(self, n: usize) -> Self {
            self.blocked_plays.store(n, Ordering::SeqCst);
            self
        }

        pub fn block_unlock(self) -> Self {
            self.unlock_blocked.store(true, Ordering::SeqCst);
            self
        }

        pub fn undecodable(mut self, text: &str) -> Self {
            self.undecodable.push(text.to_string());
            self
        }

        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        /// Texts that played to the end, in order.
        pub fn finished(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| e.strip_prefix("end:").map(str::to_string))
                .collect()
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct CutOnDrop {
        events: Arc<Mutex<Vec<String>>>,
        text: String,
        done: bool,
    }

    impl Drop for CutOnDrop {
        fn drop(&mut self) {
            if !self.done {
                self.events.lock().unwrap().push(format!("cut:{}", self.text));
            }
        }
    }

    #[async_trait]
    impl AudioOutput for RecordingOutput {
        async fn unlock(&self) -> Result<(), PlaybackError> {
            if self.unlock_blocked.load(Ordering::SeqCst) {
                return Err(PlaybackError::Blocked("no user gesture".into()));
            }
            self.push("unlock".into());
            Ok(())
        }

        async fn play(&self, asset: &AudioAsset) -> Result<(), PlaybackError> {
            let text = String::from_utf8_lossy(&asset.bytes).into_owned();
            if self.undecodable.contains(&text) {
                return Err(PlaybackError::Decode(format!("bad clip {text}")));
            }
            let blocked = self
                .blocked_plays
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if blocked {
                self.push(format!("blocked:{text}"));
                return Err(PlaybackError::Blocked("not allowed to start".into()));
            }

            self.push(format!("start:{text}"));
            let mut guard = CutOnDrop {
                events: Arc::clone(&self.events),
                text: text.clone(),
                done: false,
            };
            tokio::time::sleep(self.clip_length).await;
            guard.done = true;
            self.push(format!("end:{text}"));
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
