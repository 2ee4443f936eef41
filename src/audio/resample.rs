//! Channel mixing and sample-rate conversion.
//!
//! Capture hands us interleaved device audio at whatever rate the hardware
//! prefers; the transcription clip wants 16 kHz mono; the output device wants
//! its own rate with every channel filled.
//!
//! Rate conversion uses `rubato`'s FFT resampler.  [`StreamResampler`] keeps
//! its filter state and leftover input between chunks, so a recording fed in
//! device-sized pieces comes out the same as if it had been converted in one
//! go.  [`resample`] is the one-shot form used for decoded replies.

use rubato::{FftFixedIn, Resampler, ResamplerConstructionError};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging each frame.
///
/// ```rust
/// use voice_practice::audio::downmix;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Repeat each mono sample across `channels` interleaved slots.
pub fn upmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .iter()
        .flat_map(|&s| std::iter::repeat(s).take(channels))
        .collect()
}

// ---------------------------------------------------------------------------
// Rate
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("invalid sample rates {from} Hz -> {to} Hz")]
    InvalidRate { from: u32, to: u32 },

    #[error(transparent)]
    Construction(#[from] ResamplerConstructionError),
}

const CHUNK_FRAMES: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Stateful mono resampler for audio that arrives in arbitrary pieces.
///
/// Input is buffered until the resampler has a full chunk; [`finish`]
/// flushes the remainder.  Across a whole stream the output length is
/// `round(input_len * to_rate / from_rate)`, and the filter delay is removed
/// so output sample 0 lines up with input sample 0.
///
/// [`finish`]: StreamResampler::finish
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    /// `None` when the rates match.
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    consumed: u64,
    produced: u64,
    /// Leading output frames still owed to the filter delay.
    skip: usize,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, ResampleError> {
        if from_rate == 0 || to_rate == 0 {
            return Err(ResampleError::InvalidRate {
                from: from_rate,
                to: to_rate,
            });
        }
        let inner = if from_rate == to_rate {
            None
        } else {
            Some(FftFixedIn::<f32>::new(
                from_rate as usize,
                to_rate as usize,
                CHUNK_FRAMES,
                SUB_CHUNKS,
                1,
            )?)
        };
        let skip = inner.as_ref().map_or(0, |r| r.output_delay());
        Ok(Self {
            from_rate,
            to_rate,
            inner,
            pending: Vec::new(),
            consumed: 0,
            produced: 0,
            skip,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Feed `samples`; returns whatever output is ready.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.consumed += samples.len() as u64;
        let Some(inner) = self.inner.as_mut() else {
            self.produced += samples.len() as u64;
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);
        let mut ready = Vec::new();
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let input: [&[f32]; 1] = [&self.pending[..needed]];
            match inner.process(&input[..], None) {
                Ok(mut out) => ready.append(&mut out[0]),
                Err(e) => log::warn!("resample: dropped a chunk: {e}"),
            }
            self.pending.drain(..needed);
        }
        self.emit(ready)
    }

    /// Flush buffered input and the filter tail.
    pub fn finish(mut self) -> Vec<f32> {
        let expected = self.expected_len();
        let Some(inner) = self.inner.as_mut() else {
            return Vec::new();
        };

        let mut tail = Vec::new();
        if !self.pending.is_empty() {
            let input: [&[f32]; 1] = [&self.pending[..]];
            match inner.process_partial(Some(&input[..]), None) {
                Ok(mut out) => tail.append(&mut out[0]),
                Err(e) => log::warn!("resample: dropped the last chunk: {e}"),
            }
            self.pending.clear();
        }
        // Zero-fed rounds push the delayed signal out of the filter.
        let mut rounds = 0;
        while self.produced + (tail.len().saturating_sub(self.skip) as u64) < expected && rounds < 4 {
            match inner.process_partial::<&[f32]>(None, None) {
                Ok(mut out) => tail.append(&mut out[0]),
                Err(e) => {
                    log::warn!("resample: flush failed: {e}");
                    break;
                }
            }
            rounds += 1;
        }

        let mut tail = self.emit(tail);
        let owed = expected.saturating_sub(self.produced - tail.len() as u64);
        tail.truncate(owed as usize);
        tail
    }

    fn expected_len(&self) -> u64 {
        (self.consumed as f64 * self.to_rate as f64 / self.from_rate as f64).round() as u64
    }

    fn emit(&mut self, frames: Vec<f32>) -> Vec<f32> {
        let skip = self.skip.min(frames.len());
        self.skip -= skip;
        let out = frames[skip..].to_vec();
        self.produced += out.len() as u64;
        out
    }
}

/// Resample mono `samples` from `from_rate` Hz to `to_rate` Hz in one go.
///
/// Equal rates (or empty input) return a copy.  The output length is
/// `round(len * to_rate / from_rate)`.
///
/// ```rust
/// use voice_practice::audio::resample;
///
/// let hi = vec![0.5_f32; 480];
/// assert_eq!(resample(&hi, 48_000, 16_000).len(), 160);
/// assert_eq!(resample(&hi, 24_000, 48_000).len(), 960);
/// ```
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    match StreamResampler::new(from_rate, to_rate) {
        Ok(mut resampler) => {
            let mut out = resampler.process(samples);
            out.extend(resampler.finish());
            out
        }
        Err(e) => {
            log::warn!("resample: {from_rate} Hz -> {to_rate} Hz unavailable: {e}");
            samples.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn downmix_mono_is_copy() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(downmix(&input, 1), input);
    }

    #[test]
    fn downmix_averages_frames() {
        let out = downmix(&[1.0_f32, -1.0, 0.5, 0.5], 2);
        assert_eq!(out.len(), 2);
        assert!(out[0].abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_zero_channels_is_empty() {
        assert!(downmix(&[1.0_f32, 2.0], 0).is_empty());
    }

    #[test]
    fn upmix_duplicates_each_sample() {
        assert_eq!(upmix(&[0.1, 0.2], 2), vec![0.1, 0.1, 0.2, 0.2]);
        assert_eq!(upmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn same_rate_is_noop() {
        let input: Vec<f32> = (0..160).map(|i| i as f32 / 160.0).collect();
        assert_eq!(resample(&input, 16_000, 16_000), input);
    }

    #[test]
    fn empty_input_stays_empty() {
        assert!(resample(&[], 48_000, 16_000).is_empty());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            StreamResampler::new(0, 16_000),
            Err(ResampleError::InvalidRate { from: 0, to: 16_000 })
        ));
    }

    #[test]
    fn downsample_44100_one_second() {
        assert_eq!(resample(&vec![0.0_f32; 44_100], 44_100, 16_000).len(), 16_000);
    }

    #[test]
    fn upsample_doubles_length() {
        assert_eq!(resample(&vec![0.0_f32; 80], 8_000, 16_000).len(), 160);
    }

    #[test]
    fn constant_signal_keeps_amplitude() {
        let out = resample(&vec![0.5_f32; 4_800], 48_000, 22_050);
        let middle = &out[out.len() / 4..out.len() * 3 / 4];
        for &s in middle {
            assert!((s - 0.5).abs() < 0.02, "amplitude drift: {s}");
        }
    }

    #[test]
    fn chunked_stream_keeps_exact_length() {
        // 100 device callbacks of 512 frames at 44.1 kHz.
        let mut resampler = StreamResampler::new(44_100, 16_000).expect("resampler");
        let mut out = Vec::new();
        for _ in 0..100 {
            out.extend(resampler.process(&[0.1_f32; 512]));
        }
        out.extend(resampler.finish());
        assert_eq!(out.len(), 18_576);
    }

    #[test]
    fn chunked_stream_matches_one_shot() {
        let input = sine(440.0, 44_100, 44_100, 0.5);
        let whole = resample(&input, 44_100, 16_000);

        let mut resampler = StreamResampler::new(44_100, 16_000).expect("resampler");
        let mut streamed = Vec::new();
        for chunk in input.chunks(512) {
            streamed.extend(resampler.process(chunk));
        }
        streamed.extend(resampler.finish());

        assert_eq!(streamed, whole);
    }

    #[test]
    fn tones_above_the_new_nyquist_are_filtered() {
        // 10 kHz cannot exist at 16 kHz; without a low-pass it would alias
        // to 6 kHz at full strength.
        let out = resample(&sine(10_000.0, 48_000, 9_600, 0.5), 48_000, 16_000);
        let middle = &out[out.len() / 4..out.len() * 3 / 4];
        assert!(rms(middle) < 0.05, "rms {}", rms(middle));
    }

    #[test]
    fn tones_below_nyquist_pass() {
        let out = resample(&sine(1_000.0, 48_000, 9_600, 0.5), 48_000, 16_000);
        let middle = &out[out.len() / 4..out.len() * 3 / 4];
        assert!((rms(middle) - 0.5 / 2.0_f32.sqrt()).abs() < 0.03, "rms {}", rms(middle));
    }
}
