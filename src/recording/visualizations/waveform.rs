//! Time-domain waveform visualization.
//!
//! Displays the RMS volume of recent audio as a scrolling history.

/// Converts the most recent ~50 ms of samples to a 0-100 volume.
///
/// RMS is taken in dBFS and mapped onto a 40 dB window ending at
/// `reference_level_db`. Silence reads as 0.
pub fn volume_percent(samples: &[i16], sample_rate: u32, reference_level_db: i8) -> u8 {
    if samples.is_empty() {
        return 0;
    }

    let window = ((sample_rate / 20) as usize).clamp(1, samples.len());
    let recent = &samples[samples.len() - window..];

    let sum_of_squares: i64 = recent.iter().map(|&x| (x as i64).pow(2)).sum();
    let mean_square = sum_of_squares / recent.len() as i64;
    let rms = (mean_square as f32).sqrt();

    if rms <= 0.0 {
        return 0;
    }
    let db_fs = 20.0 * (rms / 32767.0).log10();
    let min_db = reference_level_db as f32 - 40.0;
    ((db_fs - min_db) / 40.0 * 100.0).clamp(0.0, 100.0) as u8
}

/// Scrolling volume history, one column per terminal cell.
#[derive(Debug, Clone)]
pub struct Waveform {
    history: Vec<u64>,
    width: usize,
}

impl Waveform {
    pub fn new(width: usize) -> Self {
        Self {
            history: vec![0; width],
            width,
        }
    }

    /// Appends a volume, dropping the oldest column once full.
    pub fn push(&mut self, volume: u8) {
        self.history.push(volume as u64);
        if self.history.len() > self.width {
            self.history.remove(0);
        }
    }

    /// Pads or trims from the left so the newest values stay visible.
    pub fn resize(&mut self, width: usize) {
        self.width = width;
        if self.history.len() > width {
            self.history.drain(..self.history.len() - width);
        } else {
            let missing = width - self.history.len();
            self.history.splice(0..0, std::iter::repeat(0).take(missing));
        }
    }

    pub fn data(&self) -> &[u64] {
        &self.history
    }
}
