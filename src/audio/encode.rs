//! Finished recordings.
//!
//! The capture buffer is downmixed and resampled on the fly; when the
//! recording ends it is packed into a 16-bit PCM WAV clip with `hound` so the
//! transcription service receives an ordinary audio file.

use std::io::Cursor;
use std::time::Duration;

use super::RecorderError;

/// A playable/uploadable clip produced by one recording.
#[derive(Debug, Clone)]
pub struct FinishedAudio {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub file_name: &'static str,
    pub sample_rate: u32,
    pub duration: Duration,
}

impl FinishedAudio {
    /// Encode mono `samples` at `sample_rate` Hz as WAV.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Result<Self, RecorderError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_error)?;
            for &s in samples {
                let pcm = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer.write_sample(pcm).map_err(encode_error)?;
            }
            writer.finalize().map_err(encode_error)?;
        }

        let duration = if sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64)
        };

        Ok(Self {
            bytes: cursor.into_inner(),
            mime_type: "audio/wav",
            file_name: "recording.wav",
            sample_rate,
            duration,
        })
    }
}

fn encode_error(e: hound::Error) -> RecorderError {
    RecorderError::Encode(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_readable_wav() {
        let samples: Vec<f32> = (0..16_000).map(|i| ((i % 100) as f32 / 100.0) - 0.5).collect();
        let audio = FinishedAudio::from_samples(&samples, 16_000).expect("encode");

        assert_eq!(audio.mime_type, "audio/wav");
        assert_eq!(audio.duration, Duration::from_secs(1));

        let reader = hound::WavReader::new(Cursor::new(audio.bytes)).expect("parse");
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 16_000);
    }

    #[test]
    fn empty_recording_is_still_a_valid_file() {
        let audio = FinishedAudio::from_samples(&[], 16_000).expect("encode");
        assert_eq!(audio.duration, Duration::ZERO);
        assert!(hound::WavReader::new(Cursor::new(audio.bytes)).is_ok());
    }

    #[test]
    fn clipping_is_clamped() {
        let audio = FinishedAudio::from_samples(&[2.0, -2.0], 8_000).expect("encode");
        let mut reader = hound::WavReader::new(Cursor::new(audio.bytes)).expect("parse");
        let pcm: Vec<i16> = reader.samples::<i16>().map(|s| s.expect("sample")).collect();
        assert_eq!(pcm, vec![i16::MAX, -i16::MAX]);
    }
}
