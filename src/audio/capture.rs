//! Microphone access.
//!
//! [`Microphone`] is the seam the recorder talks to: `open()` either yields a
//! live [`CaptureStream`] or fails with [`RecorderError::Permission`] /
//! [`RecorderError::Unsupported`].  The stream owns its [`MediaTracks`];
//! stopping them is awaited so the device is really released before the
//! next recording opens it again.
//!
//! [`CpalMicrophone`] keeps the `cpal::Stream` (which is not `Send`) on a
//! dedicated `mic-capture` thread.  Samples cross to async land over an
//! unbounded tokio channel; "stop all tracks" means signalling that thread
//! and joining it.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use tokio::sync::mpsc;

use super::RecorderError;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the device callback.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// Microphone / CaptureStream / MediaTracks
// ---------------------------------------------------------------------------

/// Handle that releases the capture device.
#[async_trait]
pub trait MediaTracks: Send {
    /// Stop every track and wait until the device is released.  Calling it
    /// twice is harmless.
    async fn stop(&mut self);
}

/// A live microphone stream.
pub struct CaptureStream {
    pub chunks: mpsc::UnboundedReceiver<AudioChunk>,
    pub sample_rate: u32,
    pub channels: u16,
    pub tracks: Box<dyn MediaTracks>,
}

/// Source of microphone streams.
#[async_trait]
pub trait Microphone: Send + Sync {
    async fn open(&self) -> Result<CaptureStream, RecorderError>;
}

// ---------------------------------------------------------------------------
// CpalMicrophone
// ---------------------------------------------------------------------------

/// Default input device via `cpal`.
#[derive(Debug, Default, Clone)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

type Ready = Result<(u32, u16), RecorderError>;

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self) -> Result<CaptureStream, RecorderError> {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Ready>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || run_capture(chunk_tx, ready_tx, stop_rx))
            .map_err(|e| RecorderError::Internal(format!("failed to spawn capture thread: {e}")))?;

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| RecorderError::Internal(e.to_string()))?;

        match ready {
            Ok(Ok((sample_rate, channels))) => {
                log::info!("capture: microphone open ({sample_rate} Hz, {channels} ch)");
                Ok(CaptureStream {
                    chunks: chunk_rx,
                    sample_rate,
                    channels,
                    tracks: Box::new(CpalTracks {
                        stop_tx: Some(stop_tx),
                        thread: Some(thread),
                    }),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RecorderError::Internal(
                "capture thread exited before the device opened".into(),
            )),
        }
    }
}

fn run_capture(
    chunk_tx: mpsc::UnboundedSender<AudioChunk>,
    ready_tx: std_mpsc::Sender<Ready>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let (stream, sample_rate, channels) = match open_input(chunk_tx) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok((sample_rate, channels)));

    // Parked until the tracks are stopped or the handle is dropped.
    let _ = stop_rx.recv();
    drop(stream);
    log::debug!("capture: input stream released");
}

fn open_input(
    chunk_tx: mpsc::UnboundedSender<AudioChunk>,
) -> Result<(cpal::Stream, u32, u16), RecorderError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| RecorderError::Unsupported("no input device found".into()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| RecorderError::Permission(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let stream = match format {
        cpal::SampleFormat::F32 => {
            build_input::<f32>(&device, &config, chunk_tx, sample_rate, channels)
        }
        cpal::SampleFormat::I16 => {
            build_input::<i16>(&device, &config, chunk_tx, sample_rate, channels)
        }
        cpal::SampleFormat::U16 => {
            build_input::<u16>(&device, &config, chunk_tx, sample_rate, channels)
        }
        other => {
            return Err(RecorderError::Unsupported(format!(
                "input sample format {other:?}"
            )))
        }
    }
    .map_err(|e| RecorderError::Permission(e.to_string()))?;

    stream
        .play()
        .map_err(|e| RecorderError::Permission(e.to_string()))?;
    Ok((stream, sample_rate, channels))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: mpsc::UnboundedSender<AudioChunk>,
    sample_rate: u32,
    channels: u16,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let chunk = AudioChunk {
                samples: data.iter().map(|&s| s.to_sample::<f32>()).collect(),
                sample_rate,
                channels,
            };
            // Receiver gone means the recording already ended.
            let _ = tx.send(chunk);
        },
        |err: cpal::StreamError| {
            log::error!("cpal input stream error: {err}");
        },
        None,
    )
}

struct CpalTracks {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

#[async_trait]
impl MediaTracks for CpalTracks {
    async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => log::error!("capture: mic-capture thread panicked"),
                Err(e) => log::error!("capture: failed to join mic-capture thread: {e}"),
            }
        }
    }
}

impl Drop for CpalTracks {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// FakeMicrophone (tests only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use fake::FakeMicrophone;

#[cfg(test)]
mod fake {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::audio::analysis::tests::noise;

    /// Scripted microphone: `loud_chunks` chunks of speech-level noise, then
    /// digital silence until the stream is closed.  One mono chunk every
    /// 50 ms, 800 frames at 16 kHz unless [`FakeMicrophone::at_rate`] says
    /// otherwise.
    pub struct FakeMicrophone {
        denied: bool,
        loud_chunks: usize,
        sample_rate: u32,
        chunk_frames: usize,
        opens: AtomicUsize,
        track_stops: Arc<AtomicUsize>,
        chunks_sent: Arc<AtomicUsize>,
    }

    pub const CHUNK_INTERVAL: Duration = Duration::from_millis(50);

    impl FakeMicrophone {
        pub fn speaking(loud_chunks: usize) -> Self {
            Self {
                denied: false,
                loud_chunks,
                sample_rate: 16_000,
                chunk_frames: 800,
                opens: AtomicUsize::new(0),
                track_stops: Arc::new(AtomicUsize::new(0)),
                chunks_sent: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn at_rate(mut self, sample_rate: u32, chunk_frames: usize) -> Self {
            self.sample_rate = sample_rate;
            self.chunk_frames = chunk_frames;
            self
        }

        pub fn silent() -> Self {
            Self::speaking(0)
        }

        pub fn denied() -> Self {
            Self {
                denied: true,
                ..Self::speaking(0)
            }
        }

        pub fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub fn track_stops(&self) -> usize {
            self.track_stops.load(Ordering::SeqCst)
        }

        /// Chunks delivered to the stream so far, across all opens.
        pub fn chunks_sent(&self) -> usize {
            self.chunks_sent.load(Ordering::SeqCst)
        }
    }

    struct FakeTracks {
        stops: Arc<AtomicUsize>,
        stopped: bool,
    }

    #[async_trait]
    impl MediaTracks for FakeTracks {
        async fn stop(&mut self) {
            if !self.stopped {
                self.stopped = true;
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl Microphone for FakeMicrophone {
        async fn open(&self) -> Result<CaptureStream, RecorderError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.denied {
                return Err(RecorderError::Permission("permission denied".into()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let loud = self.loud_chunks;
            let (rate, frames) = (self.sample_rate, self.chunk_frames);
            let counter = Arc::clone(&self.chunks_sent);
            tokio::spawn(async move {
                let mut sent = 0usize;
                loop {
                    let samples = if sent < loud {
                        noise(frames, 0.5, sent as u32)
                    } else {
                        vec![0.0; frames]
                    };
                    let chunk = AudioChunk {
                        samples,
                        sample_rate: rate,
                        channels: 1,
                    };
                    if tx.send(chunk).is_err() {
                        break;
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    sent += 1;
                    tokio::time::sleep(CHUNK_INTERVAL).await;
                }
            });

            Ok(CaptureStream {
                chunks: rx,
                sample_rate: rate,
                channels: 1,
                tracks: Box::new(FakeTracks {
                    stops: Arc::clone(&self.track_stops),
                    stopped: false,
                }),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
