//! Frequency spectrum visualization using FFT.
//!
//! Displays audio energy across bands of the speaking-voice range.

use rustfft::{num_complex::Complex, FftPlanner};

const FFT_SIZE: usize = 2048;
const MIN_FREQ: f32 = 100.0;
const MAX_FREQ: f32 = 1500.0;

/// Spectrum analyzer holding the FFT planner and the smoothed bars.
pub struct SpectrumAnalyzer {
    fft_planner: FftPlanner<f32>,
    display_data: Vec<u64>,
    num_bins: usize,
}

impl SpectrumAnalyzer {
    pub fn new(num_bins: usize) -> Self {
        Self {
            fft_planner: FftPlanner::new(),
            display_data: vec![0u64; num_bins],
            num_bins,
        }
    }

    /// Folds a new spectrum into the display with a two-frame moving average.
    pub fn update(&mut self, samples: &[i16], sample_rate: u32, reference_level_db: i8) {
        let new_bins = calculate_spectrum(
            samples,
            sample_rate,
            self.num_bins,
            reference_level_db,
            &mut self.fft_planner,
        );

        for (old_val, new_val) in self.display_data.iter_mut().zip(new_bins.iter()) {
            *old_val = (*old_val + *new_val) / 2;
        }
    }

    /// Changes the bar count; smoothing restarts from zero.
    pub fn resize(&mut self, num_bins: usize) {
        if num_bins != self.num_bins {
            self.num_bins = num_bins;
            self.display_data = vec![0u64; num_bins];
        }
    }

    pub fn data(&self) -> &[u64] {
        &self.display_data
    }
}

/// Calculates the voice-range spectrum (100-1500 Hz) of the most recent samples.
///
/// Returns `num_bins` magnitudes normalized to 0-100, on the same scale as
/// [`super::waveform::volume_percent`]. Bands below a noise gate 35 dB under
/// the reference level read as zero.
pub fn calculate_spectrum(
    samples: &[i16],
    sample_rate: u32,
    num_bins: usize,
    reference_level_db: i8,
    fft_planner: &mut FftPlanner<f32>,
) -> Vec<u64> {
    let mut result = vec![0u64; num_bins];
    if samples.is_empty() || num_bins == 0 || sample_rate == 0 {
        return result;
    }

    let sample_count = samples.len().min(FFT_SIZE);
    let recent_samples = &samples[samples.len() - sample_count..];

    // Hanning window against spectral leakage
    let mut buffer: Vec<Complex<f32>> = recent_samples
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let window = 0.5
                * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / sample_count as f32).cos());
            Complex::new(s as f32 * window / 32768.0, 0.0)
        })
        .collect();
    buffer.resize(FFT_SIZE, Complex::new(0.0, 0.0));

    let fft = fft_planner.plan_fft_forward(FFT_SIZE);
    fft.process(&mut buffer);

    let freq_resolution = sample_rate as f32 / FFT_SIZE as f32;
    let min_bin = (MIN_FREQ / freq_resolution) as usize;
    let max_bin = (MAX_FREQ / freq_resolution).min((FFT_SIZE / 2) as f32) as usize;
    let useful_bins = max_bin.saturating_sub(min_bin);
    if useful_bins == 0 {
        return result;
    }

    let noise_gate_db = reference_level_db as f32 - 35.0;
    let db_range = reference_level_db as f32 - noise_gate_db;

    for (display_idx, result_bin) in result.iter_mut().enumerate() {
        let start_bin = min_bin + display_idx * useful_bins / num_bins;
        let end_bin = (min_bin + (display_idx + 1) * useful_bins / num_bins)
            .min(max_bin)
            .max(start_bin + 1);

        if start_bin >= max_bin {
            break;
        }

        let band = &buffer[start_bin..end_bin.min(FFT_SIZE / 2)];
        if band.is_empty() {
            continue;
        }
        let avg_magnitude = band.iter().map(|c| c.norm()).sum::<f32>() / band.len() as f32;

        let db = if avg_magnitude > 1e-10 {
            20.0 * avg_magnitude.log10()
        } else {
            -100.0
        };

        // FFT energy concentrates in fewer bins than RMS spreads over; 20 dB aligns the scales
        let adjusted_db = db - 20.0;

        if adjusted_db >= noise_gate_db {
            *result_bin =
                ((adjusted_db - noise_gate_db) / db_range * 100.0).clamp(0.0, 100.0) as u64;
        }
    }

    result
}
