//! Live visualizations shown while recording.
//!
//! `spectrum` and `waveform` turn samples into bars; `renderer` schedules them
//! at the configured frame rate and publishes frames for the UI.

pub mod renderer;
pub mod spectrum;
pub mod waveform;

pub use renderer::{VisualFrame, Visualizer, VisualizerSettings};
pub use spectrum::SpectrumAnalyzer;
pub use waveform::{volume_percent, Waveform};
