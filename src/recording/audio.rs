//! Microphone capture through cpal.
//!
//! Opens the configured input device, mixes it down to mono 16-bit PCM and
//! hands the samples to a background flusher that cuts them into chunks at a
//! fixed interval. The same samples feed the level tap used by the visualizer.

use anyhow::anyhow;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::capture::{
    samples_to_chunk, AudioCapture, AudioFormat, CaptureStream, LevelTap, TAP_CAPACITY,
};
use super::ffmpeg::find_ffmpeg;
use crate::config::AudioConfig;
use crate::errors::{FeedbackError, Result};

#[cfg(target_os = "linux")]
use std::fs::OpenOptions;
#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

type PendingSamples = Arc<Mutex<Vec<i16>>>;

/// Captures audio from a specified or default input device.
///
/// The device is opened at its native sample rate; the requested rate is only
/// a hint. Multi-channel input is averaged to mono.
pub struct CpalCapture {
    device_name: String,
    requested_sample_rate: u32,
    chunk_interval: Duration,
    prefer_compressed: bool,
    /// Active audio input stream (kept alive during recording)
    stream: Option<cpal::Stream>,
    /// Samples received since the last chunk was cut
    pending: PendingSamples,
    tap: Option<LevelTap>,
    cancel: Option<CancellationToken>,
    flusher: Option<JoinHandle<()>>,
}

impl CpalCapture {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            device_name: config.device.clone(),
            requested_sample_rate: config.sample_rate,
            chunk_interval: Duration::from_millis(config.chunk_interval_ms),
            prefer_compressed: config.prefer_compressed,
            stream: None,
            pending: Arc::new(Mutex::new(Vec::new())),
            tap: None,
            cancel: None,
            flusher: None,
        }
    }

    fn open_device(&self) -> Result<cpal::Device> {
        suppress_alsa_warnings(|| {
            let host = cpal::default_host();
            if self.device_name == "default" {
                host.default_input_device()
                    .ok_or_else(|| anyhow!("No audio input device available"))
            } else {
                find_device_by_name(&host, &self.device_name)
            }
        })
        .map_err(|e| classify_backend_error(e.to_string()))
    }
}

#[async_trait(?Send)]
impl AudioCapture for CpalCapture {
    async fn start(&mut self) -> Result<CaptureStream> {
        if self.is_active() {
            self.dispose();
        }

        let device = self.open_device()?;
        let device_name = device
            .name()
            .unwrap_or_else(|_| "Unknown device".to_string());
        tracing::info!("Recording device: {}", device_name);

        let device_config = device
            .default_input_config()
            .map_err(|e| classify_backend_error(e.to_string()))?;
        let sample_rate = device_config.sample_rate().0;
        let channels = device_config.channels() as usize;
        let sample_format = device_config.sample_format();

        if sample_rate != self.requested_sample_rate {
            tracing::warn!(
                "Requested sample rate {}Hz but device uses {}Hz. Recording at device rate.",
                self.requested_sample_rate,
                sample_rate
            );
        }
        tracing::debug!(
            "Device configuration: {}Hz, {} channels, {:?}",
            sample_rate,
            channels,
            sample_format
        );

        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        let tap = LevelTap::new(TAP_CAPACITY);
        let stream_config: cpal::StreamConfig = device_config.into();

        let stream = match sample_format {
            cpal::SampleFormat::I16 => build_stream::<i16>(
                &device,
                &stream_config,
                channels,
                Arc::clone(&self.pending),
                tap.clone(),
            ),
            cpal::SampleFormat::F32 => build_stream::<f32>(
                &device,
                &stream_config,
                channels,
                Arc::clone(&self.pending),
                tap.clone(),
            ),
            other => {
                return Err(FeedbackError::Device {
                    detail: format!("Unsupported sample format {other:?}"),
                })
            }
        }
        .map_err(|e| classify_backend_error(e.to_string()))?;

        stream
            .play()
            .map_err(|e| classify_backend_error(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let flusher = tokio::spawn(flush_loop(
            Arc::clone(&self.pending),
            tx,
            self.chunk_interval,
            token.clone(),
        ));

        let format = AudioFormat::negotiate(self.prefer_compressed, find_ffmpeg().is_ok());
        tracing::debug!("Audio stream started, upload format {}", format.mime());

        self.stream = Some(stream);
        self.tap = Some(tap.clone());
        self.cancel = Some(token);
        self.flusher = Some(flusher);

        Ok(CaptureStream {
            chunks: rx,
            tap,
            format,
            sample_rate,
        })
    }

    async fn stop(&mut self) -> Result<()> {
        // No samples arrive once the stream is dropped, so the final flush sees everything.
        self.stream = None;
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        if let Some(flusher) = self.flusher.take() {
            if let Err(e) = flusher.await {
                tracing::warn!("Chunk flusher ended abnormally: {}", e);
            }
        }
        tracing::debug!("Audio stream stopped");
        Ok(())
    }

    fn dispose(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Microphone released");
        }
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        if let Some(flusher) = self.flusher.take() {
            flusher.abort();
        }
        if let Some(tap) = self.tap.take() {
            tap.close();
        }
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    pending: PendingSamples,
    tap: LevelTap,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    i16: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let converted: Vec<i16> = data.iter().map(|&s| i16::from_sample(s)).collect();
            let mono = mix_to_mono(&converted, channels);
            tap.push(&mono);
            if let Ok(mut pending) = pending.lock() {
                pending.extend_from_slice(&mono);
            }
        },
        |err| {
            tracing::error!("Audio stream error: {}", err);
        },
        None,
    )
}

/// Cuts pending samples into chunks until cancelled, then flushes once more and
/// closes the channel by dropping the sender.
async fn flush_loop(
    pending: PendingSamples,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                flush_pending(&pending, &tx);
                break;
            }
            _ = ticker.tick() => {
                flush_pending(&pending, &tx);
            }
        }
    }
}

fn flush_pending(pending: &PendingSamples, tx: &mpsc::UnboundedSender<Vec<u8>>) {
    let samples = match pending.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(_) => return,
    };
    if samples.is_empty() {
        return;
    }
    if tx.send(samples_to_chunk(&samples)).is_err() {
        tracing::debug!("Chunk receiver dropped; discarding {} samples", samples.len());
    }
}

/// Averages interleaved channels into a mono signal.
pub(crate) fn mix_to_mono(data: &[i16], channels: usize) -> Vec<i16> {
    match channels {
        0 | 1 => data.to_vec(),
        2 => data
            .chunks_exact(2)
            .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
            .collect(),
        n => data
            .chunks_exact(n)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / n as i32) as i16
            })
            .collect(),
    }
}

/// Backends report permission problems only as text, so the category is read from it.
fn classify_backend_error(detail: String) -> FeedbackError {
    let lower = detail.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted")
    {
        FeedbackError::PermissionDenied { detail }
    } else {
        FeedbackError::Device { detail }
    }
}

/// Finds an audio input device by name or numeric index.
///
/// # Errors
/// - If no device with the specified name/index is found
fn find_device_by_name(host: &cpal::Host, device_spec: &str) -> anyhow::Result<cpal::Device> {
    let devices: Vec<_> = host
        .input_devices()
        .map_err(|e| anyhow!("Failed to enumerate devices: {e}"))?
        .collect();

    if let Ok(index) = device_spec.parse::<usize>() {
        let count = devices.len();
        return devices.into_iter().nth(index).ok_or_else(|| {
            anyhow!(
                "Device index {} is out of range (0-{})",
                index,
                count.saturating_sub(1)
            )
        });
    }

    devices
        .into_iter()
        .find(|device| device.name().map(|n| n == device_spec).unwrap_or(false))
        .ok_or_else(|| {
            anyhow!(
                "Audio input device '{device_spec}' not found. Use 'storyvoice list-devices' to see available devices."
            )
        })
}

/// Temporarily redirects stderr to /dev/null to suppress ALSA library warnings on Linux.
#[cfg(target_os = "linux")]
pub(crate) fn suppress_alsa_warnings<F, T>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    let dev_null = OpenOptions::new()
        .write(true)
        .open("/dev/null")
        .map_err(|e| anyhow!("Failed to open /dev/null: {e}"))?;

    let dev_null_fd = dev_null.as_raw_fd();

    let old_stderr = unsafe { libc::dup(libc::STDERR_FILENO) };
    if old_stderr == -1 {
        return Err(anyhow!("Failed to duplicate stderr"));
    }

    let redirect_result = unsafe { libc::dup2(dev_null_fd, libc::STDERR_FILENO) };
    if redirect_result == -1 {
        unsafe { libc::close(old_stderr) };
        return Err(anyhow!("Failed to redirect stderr"));
    }

    let result = f();

    unsafe {
        libc::dup2(old_stderr, libc::STDERR_FILENO);
        libc::close(old_stderr);
    }

    result
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn suppress_alsa_warnings<F, T>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    f()
}
