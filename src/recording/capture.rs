//! Capture contract shared by the microphone backend and the recording session.
//!
//! A capture backend turns a live input device into an ordered stream of byte
//! chunks (16-bit little-endian mono PCM) plus a level tap the visualizer can read.
//! The container format used for upload is negotiated when capture starts.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::errors::Result;

/// Number of recent samples kept for visualization (one FFT window).
pub const TAP_CAPACITY: usize = 2048;

/// Container the captured audio is uploaded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Opus in a webm container, encoded through ffmpeg
    WebmOpus,
    /// Uncompressed PCM wav
    Wav,
}

impl AudioFormat {
    /// Picks the upload container: compressed when asked for and an encoder
    /// exists, wav otherwise.
    pub fn negotiate(prefer_compressed: bool, encoder_available: bool) -> Self {
        if prefer_compressed && encoder_available {
            AudioFormat::WebmOpus
        } else {
            AudioFormat::Wav
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            AudioFormat::WebmOpus => "audio/webm;codecs=opus",
            AudioFormat::Wav => "audio/wav",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            AudioFormat::WebmOpus => "recording.webm",
            AudioFormat::Wav => "recording.wav",
        }
    }
}

/// Shared window over the most recent samples of a live capture.
///
/// The audio callback pushes into it; the visualizer takes snapshots. Closing the
/// tap empties it and makes further pushes no-ops.
#[derive(Debug, Clone)]
pub struct LevelTap {
    inner: Arc<Mutex<TapState>>,
}

#[derive(Debug)]
struct TapState {
    samples: VecDeque<i16>,
    capacity: usize,
    closed: bool,
}

impl LevelTap {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TapState {
                samples: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            })),
        }
    }

    pub fn push(&self, data: &[i16]) {
        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        if state.closed {
            return;
        }
        let capacity = state.capacity;
        let skip = data.len().saturating_sub(capacity);
        for &sample in &data[skip..] {
            if state.samples.len() == capacity {
                state.samples.pop_front();
            }
            state.samples.push_back(sample);
        }
    }

    /// Copy of the current window, oldest first.
    pub fn snapshot(&self) -> Vec<i16> {
        self.inner
            .lock()
            .map(|state| state.samples.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn close(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.closed = true;
            state.samples.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|state| state.closed).unwrap_or(true)
    }
}

/// Everything a started capture hands to its owner.
pub struct CaptureStream {
    /// Encoded chunks in arrival order; closed after the final flush
    pub chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    pub tap: LevelTap,
    pub format: AudioFormat,
    pub sample_rate: u32,
}

/// Audio capture backend.
///
/// Implementations own the input device between `start` and `dispose`.
#[async_trait(?Send)]
pub trait AudioCapture {
    /// Opens the input device and begins producing chunks.
    ///
    /// # Errors
    /// - `PermissionDenied` if the OS refuses microphone access
    /// - `Device` if no usable input device exists
    async fn start(&mut self) -> Result<CaptureStream>;

    /// Finalizes the recorder. Resolves once the last chunk has been sent and
    /// the chunk channel is closed.
    async fn stop(&mut self) -> Result<()>;

    /// Releases the input device. Safe before `start` and safe to repeat.
    fn dispose(&mut self);

    fn is_active(&self) -> bool;
}

/// Recording assembled from the captured chunks at stop time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAudio {
    data: Vec<u8>,
    format: AudioFormat,
    sample_rate: u32,
}

impl CapturedAudio {
    /// Concatenates chunks in the order given.
    pub fn assemble<I>(chunks: I, format: AudioFormat, sample_rate: u32) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut data = Vec::new();
        for chunk in chunks {
            data.extend_from_slice(&chunk);
        }
        Self {
            data,
            format,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn meets_minimum(&self, min_bytes: usize) -> bool {
        self.data.len() >= min_bytes
    }

    /// Whether the recording plays for at least `min` at its sample rate.
    pub fn lasts_at_least(&self, min: Duration) -> bool {
        self.duration() >= min
    }

    /// PCM samples decoded from the byte buffer. A trailing odd byte is ignored.
    pub fn samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.data.len() / 2) as f32 / self.sample_rate as f32
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let samples = (self.data.len() / 2) as u64;
        Duration::from_micros(samples * 1_000_000 / u64::from(self.sample_rate))
    }
}

/// Converts mono PCM samples into the chunk byte layout.
pub fn samples_to_chunk(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_preserves_chunk_order() {
        let c1 = vec![1u8, 2, 3];
        let c2 = vec![4u8];
        let c3 = vec![5u8, 6, 7, 8, 9];
        let audio = CapturedAudio::assemble(
            vec![c1.clone(), c2.clone(), c3.clone()],
            AudioFormat::Wav,
            16000,
        );
        let expected: Vec<u8> = [c1, c2, c3].concat();
        assert_eq!(audio.bytes(), expected.as_slice());
    }

    #[test]
    fn assemble_skips_nothing_for_empty_chunks() {
        let audio = CapturedAudio::assemble(
            vec![vec![], vec![9u8, 8], vec![], vec![7u8]],
            AudioFormat::Wav,
            16000,
        );
        assert_eq!(audio.bytes(), &[9u8, 8, 7]);
        assert_eq!(audio.len(), 3);
    }

    #[test]
    fn assemble_of_nothing_is_empty() {
        let audio = CapturedAudio::assemble(Vec::<Vec<u8>>::new(), AudioFormat::WebmOpus, 16000);
        assert!(audio.is_empty());
        assert!(!audio.meets_minimum(1));
        assert!(audio.meets_minimum(0));
    }

    #[test]
    fn minimum_is_inclusive() {
        let audio = CapturedAudio::assemble(vec![vec![0u8; 1000]], AudioFormat::Wav, 16000);
        assert!(audio.meets_minimum(1000));
        assert!(!audio.meets_minimum(1001));
    }

    #[test]
    fn duration_floor_depends_on_sample_rate() {
        let chunk = samples_to_chunk(&[0; 576]);
        let fast = CapturedAudio::assemble(vec![chunk.clone()], AudioFormat::Wav, 48000);
        let slow = CapturedAudio::assemble(vec![chunk], AudioFormat::Wav, 8000);
        assert_eq!(fast.duration(), Duration::from_millis(12));
        assert!(!fast.lasts_at_least(Duration::from_millis(50)));
        assert_eq!(slow.duration(), Duration::from_millis(72));
        assert!(slow.lasts_at_least(Duration::from_millis(50)));
    }

    #[test]
    fn samples_round_trip_through_chunk_layout() {
        let chunk = samples_to_chunk(&[0, -1, i16::MAX, i16::MIN]);
        let audio = CapturedAudio::assemble(vec![chunk], AudioFormat::Wav, 16000);
        assert_eq!(audio.samples(), vec![0, -1, i16::MAX, i16::MIN]);
        assert!((audio.duration_secs() - 4.0 / 16000.0).abs() < 1e-9);
    }

    #[test]
    fn negotiation_falls_back_to_wav() {
        assert_eq!(AudioFormat::negotiate(true, true), AudioFormat::WebmOpus);
        assert_eq!(AudioFormat::negotiate(true, false), AudioFormat::Wav);
        assert_eq!(AudioFormat::negotiate(false, true), AudioFormat::Wav);
        assert_eq!(AudioFormat::WebmOpus.mime(), "audio/webm;codecs=opus");
    }

    #[test]
    fn tap_keeps_most_recent_window() {
        let tap = LevelTap::new(4);
        tap.push(&[1, 2, 3]);
        tap.push(&[4, 5, 6]);
        assert_eq!(tap.snapshot(), vec![3, 4, 5, 6]);
        tap.push(&[7, 8, 9, 10, 11, 12]);
        assert_eq!(tap.snapshot(), vec![9, 10, 11, 12]);
    }

    #[test]
    fn closed_tap_ignores_pushes() {
        let tap = LevelTap::new(4);
        tap.push(&[1, 2]);
        tap.close();
        tap.push(&[3]);
        assert!(tap.snapshot().is_empty());
        assert!(tap.is_closed());
        tap.close();
    }
}
