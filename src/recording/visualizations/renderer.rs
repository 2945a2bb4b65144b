//! Frame scheduling for the live visualization.
//!
//! A render task reads the capture's level tap once per frame, turns it into
//! bars and publishes the result on a watch channel. The UI only ever reads
//! the newest frame.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::spectrum::SpectrumAnalyzer;
use super::waveform::{volume_percent, Waveform};
use crate::config::VisualizationType;
use crate::recording::capture::LevelTap;

/// One rendered visualization frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisualFrame {
    /// Bar heights, 0-100
    pub bars: Vec<u64>,
    /// Current input level, 0-100
    pub level: u8,
    /// Increments every published frame
    pub sequence: u64,
}

#[derive(Debug, Clone)]
pub struct VisualizerSettings {
    pub kind: VisualizationType,
    pub frame_rate: u32,
    pub reference_level_db: i8,
    pub sample_rate: u32,
    pub width: usize,
}

enum Bars {
    Spectrum(SpectrumAnalyzer),
    Waveform(Waveform),
}

/// Handle to a running render task.
pub struct Visualizer {
    frames: watch::Receiver<VisualFrame>,
    width: watch::Sender<usize>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Visualizer {
    /// Spawns the render task. It stops when `token` is cancelled or the tap closes.
    pub fn spawn(tap: LevelTap, settings: VisualizerSettings, token: CancellationToken) -> Self {
        let (frame_tx, frame_rx) = watch::channel(VisualFrame {
            bars: vec![0; settings.width],
            ..VisualFrame::default()
        });
        let (width_tx, width_rx) = watch::channel(settings.width);
        let task = tokio::spawn(render_loop(tap, settings, frame_tx, width_rx, token.clone()));
        Self {
            frames: frame_rx,
            width: width_tx,
            token,
            task: Some(task),
        }
    }

    /// Newest published frame.
    pub fn latest(&self) -> VisualFrame {
        self.frames.borrow().clone()
    }

    pub fn set_width(&self, width: usize) {
        self.width.send_if_modified(|current| {
            if *current == width {
                false
            } else {
                *current = width;
                true
            }
        });
    }

    /// Cancels the render task without waiting for it.
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Visualizer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn render_loop(
    tap: LevelTap,
    settings: VisualizerSettings,
    frames: watch::Sender<VisualFrame>,
    mut width_rx: watch::Receiver<usize>,
    token: CancellationToken,
) {
    let period = Duration::from_secs_f64(1.0 / settings.frame_rate.max(1) as f64);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut width = settings.width;
    let mut bars = match settings.kind {
        VisualizationType::Spectrum => Bars::Spectrum(SpectrumAnalyzer::new(width)),
        VisualizationType::Waveform => Bars::Waveform(Waveform::new(width)),
    };
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if tap.is_closed() {
            break;
        }

        if width_rx.has_changed().unwrap_or(false) {
            width = *width_rx.borrow_and_update();
            match &mut bars {
                Bars::Spectrum(analyzer) => analyzer.resize(width),
                Bars::Waveform(wave) => wave.resize(width),
            }
        }

        let samples = tap.snapshot();
        let level = volume_percent(&samples, settings.sample_rate, settings.reference_level_db);
        let data = match &mut bars {
            Bars::Spectrum(analyzer) => {
                analyzer.update(&samples, settings.sample_rate, settings.reference_level_db);
                analyzer.data().to_vec()
            }
            Bars::Waveform(wave) => {
                wave.push(level);
                wave.data().to_vec()
            }
        };

        sequence += 1;
        let frame = VisualFrame {
            bars: data,
            level,
            sequence,
        };
        if frames.send(frame).is_err() {
            break;
        }
    }
    tracing::debug!("Visualizer stopped after {} frames", sequence);
}
