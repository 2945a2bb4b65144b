//! Packaging captured PCM into an upload container.
//!
//! WAV is written in memory with hound. Webm/opus goes through ffmpeg using
//! temporary files, and falls back to WAV when the encoder fails.

use anyhow::{anyhow, Result};
use hound::WavWriter;
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use super::capture::{AudioFormat, CapturedAudio};
use super::ffmpeg::find_ffmpeg;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Audio bytes ready for upload together with their container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

/// Wraps mono 16-bit samples in a WAV container.
pub fn wav_bytes(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let wav_spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, wav_spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Encodes audio in the container negotiated at capture start.
///
/// Blocking: spawns ffmpeg for webm. Call from `spawn_blocking` in async code.
pub fn encode(audio: &CapturedAudio) -> Result<EncodedAudio> {
    let wav = wav_bytes(&audio.samples(), audio.sample_rate())?;

    match audio.format() {
        AudioFormat::Wav => Ok(EncodedAudio {
            bytes: wav,
            format: AudioFormat::Wav,
        }),
        AudioFormat::WebmOpus => match webm_from_wav(&wav) {
            Ok(bytes) => Ok(EncodedAudio {
                bytes,
                format: AudioFormat::WebmOpus,
            }),
            Err(e) => {
                tracing::warn!("Opus encoding failed, uploading wav instead: {}", e);
                Ok(EncodedAudio {
                    bytes: wav,
                    format: AudioFormat::Wav,
                })
            }
        },
    }
}

fn temp_path(extension: &str) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "storyvoice_{}_{}.{}",
        std::process::id(),
        n,
        extension
    ))
}

/// Runs ffmpeg over a temporary WAV file and reads back the webm output.
fn webm_from_wav(wav: &[u8]) -> Result<Vec<u8>> {
    let ffmpeg_path = find_ffmpeg()?;
    let input = temp_path("wav");
    let output = temp_path("webm");
    std::fs::write(&input, wav)?;

    let result = Command::new(&ffmpeg_path)
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(&input)
        .arg("-acodec")
        .arg("libopus")
        .arg("-b:a")
        .arg("32k")
        .arg("-ac")
        .arg("1")
        .arg("-f")
        .arg("webm")
        .arg("-y")
        .arg(&output)
        .output();

    let encoded = match result {
        Ok(out) if out.status.success() => std::fs::read(&output).map_err(Into::into),
        Ok(out) => Err(anyhow!(
            "ffmpeg exited with {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr)
        )),
        Err(e) => Err(anyhow!("Failed to run ffmpeg: {e}")),
    };

    for path in [&input, &output] {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::debug!("Failed to remove temp file {}: {}", path.display(), e);
        }
    }

    let bytes = encoded?;
    tracing::debug!("Encoded {} wav bytes to {} webm bytes", wav.len(), bytes.len());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::capture::samples_to_chunk;

    #[test]
    fn wav_has_riff_header_and_samples() {
        let bytes = wav_bytes(&[1, -1, 300], 16000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -1, 300]);
    }

    #[test]
    fn wav_format_is_kept() {
        let audio = CapturedAudio::assemble(
            vec![samples_to_chunk(&[5; 600])],
            AudioFormat::Wav,
            8000,
        );
        let encoded = encode(&audio).unwrap();
        assert_eq!(encoded.format, AudioFormat::Wav);
        assert_eq!(encoded.bytes.len(), 44 + 1200);
    }
}
