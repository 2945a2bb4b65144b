//! Lifecycle of one pronunciation-practice attempt.
//!
//! A [`RecordingSession`] moves through
//! `Idle -> Recording -> Stopped -> Analyzing -> Result | Error` and owns the
//! capture backend and the visualizer while it does. Analysis runs outside the
//! session; its outcome comes back through [`RecordingSession::apply`] with the
//! ticket issued at stop time, so results for a superseded or torn down attempt
//! are dropped.
//!
//! [`PracticeSurface`] holds at most one session and tears the previous one
//! down before a new one opens the microphone.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::capture::{AudioCapture, AudioFormat, CapturedAudio};
use super::visualizations::{VisualFrame, Visualizer, VisualizerSettings};
use crate::config::{AppConfig, VisualizationType};
use crate::errors::{FeedbackError, Result};
use crate::feedback::model::FeedbackResult;
use crate::feedback::submitter::FeedbackSubmitter;

static NEXT_ATTEMPT: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Stopped,
    Analyzing,
    Result,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Stopped => "stopped",
            SessionState::Analyzing => "analyzing",
            SessionState::Result => "result",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// One sentence of a story to be read aloud.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub id: i64,
    pub text: String,
    pub language: Option<String>,
    /// Position of the sentence in the story's media, if known
    pub start_secs: Option<f64>,
    pub end_secs: Option<f64>,
}

impl Script {
    /// Where the sentence sits in the story's narration, e.g. `0:01.5 to 0:04.0`.
    pub fn time_range(&self) -> Option<String> {
        match (self.start_secs, self.end_secs) {
            (Some(start), Some(end)) => Some(format!("{} to {}", clock(start), clock(end))),
            (Some(start), None) => Some(format!("from {}", clock(start))),
            (None, Some(end)) => Some(format!("until {}", clock(end))),
            (None, None) => None,
        }
    }
}

fn clock(secs: f64) -> String {
    let tenths = (secs.max(0.0) * 10.0).round() as u64;
    format!("{}:{:02}.{}", tenths / 600, tenths / 10 % 60, tenths % 10)
}

/// Who is practicing what. Every field is required for analysis; missing ones
/// are reported by the submitter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: Option<i64>,
    pub content_id: Option<i64>,
    pub script_id: Option<i64>,
    pub language: Option<String>,
    pub target_sentence: Option<String>,
}

impl SessionContext {
    /// Context for practicing `script`, taking script id, language and sentence from it.
    pub fn for_script(user_id: Option<i64>, content_id: Option<i64>, script: &Script) -> Self {
        Self {
            user_id,
            content_id,
            script_id: Some(script.id),
            language: script.language.clone(),
            target_sentence: Some(script.text.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_duration: Duration,
    pub min_audio_bytes: usize,
    pub min_duration: Duration,
    pub visualization: VisualizationType,
    pub frame_rate: u32,
    pub reference_level_db: i8,
    /// Initial number of visualization bars
    pub width: usize,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_duration: config.session.max_duration(),
            min_audio_bytes: config.session.min_audio_bytes,
            min_duration: config.session.min_duration(),
            visualization: config.audio.visualization,
            frame_rate: config.audio.frame_rate,
            reference_level_db: config.audio.reference_level_db,
            width: 64,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Identifies the recording attempt an analysis belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisTicket {
    attempt: u64,
}

/// Audio handed off for analysis at stop time.
#[derive(Debug)]
pub struct PendingAnalysis {
    pub ticket: AnalysisTicket,
    pub audio: CapturedAudio,
    pub context: SessionContext,
}

/// What [`RecordingSession::poll`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    NotRecording,
    Recording { elapsed: Duration },
    /// The auto-stop ceiling has been reached; the caller should stop
    CeilingReached,
}

pub struct RecordingSession {
    script: Script,
    context: SessionContext,
    settings: SessionSettings,
    capture: Box<dyn AudioCapture>,
    state: SessionState,
    chunks: Vec<Vec<u8>>,
    receiver: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    format: AudioFormat,
    sample_rate: u32,
    visualizer: Option<Visualizer>,
    render_token: Option<CancellationToken>,
    started_at: Option<Instant>,
    recorded: Duration,
    attempt: Option<u64>,
    result: Option<FeedbackResult>,
    error: Option<FeedbackError>,
    torn_down: bool,
}

impl RecordingSession {
    pub fn new(
        script: Script,
        context: SessionContext,
        settings: SessionSettings,
        capture: Box<dyn AudioCapture>,
    ) -> Self {
        Self {
            script,
            context,
            settings,
            capture,
            state: SessionState::Idle,
            chunks: Vec::new(),
            receiver: None,
            format: AudioFormat::Wav,
            sample_rate: 0,
            visualizer: None,
            render_token: None,
            started_at: None,
            recorded: Duration::ZERO,
            attempt: None,
            result: None,
            error: None,
            torn_down: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn result(&self) -> Option<&FeedbackResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&FeedbackError> {
        self.error.as_ref()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Time spent recording in the current or last attempt.
    pub fn elapsed(&self) -> Duration {
        match (self.state, self.started_at) {
            (SessionState::Recording, Some(started)) => started.elapsed(),
            _ => self.recorded,
        }
    }

    /// Number of chunks collected so far in this attempt.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Newest visualization frame, while recording.
    pub fn frame(&self) -> Option<VisualFrame> {
        self.visualizer.as_ref().map(Visualizer::latest)
    }

    pub fn set_visual_width(&mut self, width: usize) {
        self.settings.width = width;
        if let Some(visualizer) = &self.visualizer {
            visualizer.set_width(width);
        }
    }

    /// Begins a new recording attempt.
    ///
    /// Ignored while an attempt is already in progress. From `Result` or `Error`
    /// the previous outcome is discarded. A capture failure leaves the session
    /// in `Error` with the microphone released.
    pub async fn start(&mut self) {
        if self.torn_down {
            tracing::warn!("Ignoring start on a torn down session");
            return;
        }
        match self.state {
            SessionState::Recording | SessionState::Stopped | SessionState::Analyzing => {
                tracing::warn!("Ignoring start while {}", self.state);
                return;
            }
            SessionState::Idle | SessionState::Result | SessionState::Error => {}
        }

        self.chunks.clear();
        self.result = None;
        self.error = None;
        self.recorded = Duration::ZERO;
        self.attempt = None;

        let stream = match self.capture.start().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to start capture: {:?}", e);
                self.fail(e);
                return;
            }
        };

        let token = CancellationToken::new();
        let visualizer = Visualizer::spawn(
            stream.tap,
            VisualizerSettings {
                kind: self.settings.visualization,
                frame_rate: self.settings.frame_rate,
                reference_level_db: self.settings.reference_level_db,
                sample_rate: stream.sample_rate,
                width: self.settings.width,
            },
            token.clone(),
        );

        self.receiver = Some(stream.chunks);
        self.format = stream.format;
        self.sample_rate = stream.sample_rate;
        self.visualizer = Some(visualizer);
        self.render_token = Some(token);
        self.started_at = Some(Instant::now());
        self.attempt = Some(NEXT_ATTEMPT.fetch_add(1, Ordering::Relaxed));
        self.state = SessionState::Recording;
        tracing::info!(
            "Recording script {} ({} Hz, {})",
            self.script.id,
            self.sample_rate,
            self.format.mime()
        );
    }

    /// Collects chunks that have arrived and checks the auto-stop ceiling.
    pub fn poll(&mut self) -> PollStatus {
        if self.state != SessionState::Recording {
            return PollStatus::NotRecording;
        }
        if let Some(rx) = self.receiver.as_mut() {
            while let Ok(chunk) = rx.try_recv() {
                self.chunks.push(chunk);
            }
        }
        let elapsed = self.elapsed();
        if elapsed >= self.settings.max_duration {
            tracing::info!("Auto-stop after {:.1}s", elapsed.as_secs_f32());
            PollStatus::CeilingReached
        } else {
            PollStatus::Recording { elapsed }
        }
    }

    /// Ends the recording and assembles the audio.
    ///
    /// Waits for the capture's final chunk. Returns the audio to analyze and the
    /// ticket to apply its outcome with, or `None` when there is nothing to
    /// analyze (not recording, capture failure, or too short).
    pub async fn stop(&mut self) -> Option<PendingAnalysis> {
        if self.state != SessionState::Recording {
            tracing::debug!("Ignoring stop while {}", self.state);
            return None;
        }
        self.state = SessionState::Stopped;
        self.recorded = self.started_at.map(|s| s.elapsed()).unwrap_or_default();
        self.stop_visualizer();

        if let Err(e) = self.capture.stop().await {
            tracing::error!("Failed to finalize capture: {:?}", e);
            self.fail(e);
            return None;
        }
        if let Some(mut rx) = self.receiver.take() {
            while let Some(chunk) = rx.recv().await {
                self.chunks.push(chunk);
            }
        }
        self.capture.dispose();

        let audio = CapturedAudio::assemble(
            std::mem::take(&mut self.chunks),
            self.format,
            self.sample_rate,
        );
        tracing::info!(
            "Recording stopped: {} bytes, {:.2}s",
            audio.len(),
            audio.duration_secs()
        );

        if !audio.meets_minimum(self.settings.min_audio_bytes)
            || !audio.lasts_at_least(self.settings.min_duration)
        {
            self.fail(FeedbackError::TooShort {
                bytes: audio.len(),
                min_bytes: self.settings.min_audio_bytes,
                millis: audio.duration().as_millis() as u64,
                min_millis: self.settings.min_duration.as_millis() as u64,
            });
            return None;
        }

        let Some(attempt) = self.attempt else {
            self.state = SessionState::Idle;
            return None;
        };
        self.state = SessionState::Analyzing;
        Some(PendingAnalysis {
            ticket: AnalysisTicket { attempt },
            audio,
            context: self.context.clone(),
        })
    }

    /// Applies an analysis outcome. Returns `false` and changes nothing when the
    /// ticket does not belong to this session's live attempt.
    pub fn apply(&mut self, ticket: AnalysisTicket, outcome: Result<FeedbackResult>) -> bool {
        if self.torn_down
            || self.state != SessionState::Analyzing
            || self.attempt != Some(ticket.attempt)
        {
            tracing::debug!(
                "Dropping stale analysis result for attempt {} (session {})",
                ticket.attempt,
                self.state
            );
            return false;
        }
        match outcome {
            Ok(result) => {
                self.result = Some(result);
                self.state = SessionState::Result;
            }
            Err(e) => self.fail(e),
        }
        true
    }

    /// Stops, submits and applies the outcome in one step.
    pub async fn analyze(&mut self, submitter: &FeedbackSubmitter) -> SessionState {
        if let Some(pending) = self.stop().await {
            let outcome = submitter.submit(pending.audio, &pending.context).await;
            self.apply(pending.ticket, outcome);
        }
        self.state
    }

    /// Releases the microphone and stops rendering. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.stop_visualizer();
        self.capture.dispose();
        self.receiver = None;
        self.attempt = None;
        if matches!(
            self.state,
            SessionState::Recording | SessionState::Stopped | SessionState::Analyzing
        ) {
            self.state = SessionState::Idle;
        }
        self.torn_down = true;
        tracing::debug!("Session for script {} torn down", self.script.id);
    }

    fn stop_visualizer(&mut self) {
        if let Some(token) = self.render_token.take() {
            token.cancel();
        }
        if let Some(mut visualizer) = self.visualizer.take() {
            visualizer.stop();
        }
    }

    fn fail(&mut self, error: FeedbackError) {
        if let Some(detail) = error.detail() {
            tracing::warn!("Session error ({}): {}", error, detail);
        } else {
            tracing::warn!("Session error: {}", error);
        }
        self.stop_visualizer();
        self.capture.dispose();
        self.receiver = None;
        self.error = Some(error);
        self.state = SessionState::Error;
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Owner of the one active practice session.
#[derive(Default)]
pub struct PracticeSurface {
    active: Option<RecordingSession>,
}

impl PracticeSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active session with `session` and starts it.
    ///
    /// The previous session is torn down first, so its microphone is released
    /// and its pending analysis can no longer be applied.
    pub async fn begin(&mut self, session: RecordingSession) -> &mut RecordingSession {
        if let Some(mut previous) = self.active.take() {
            tracing::info!(
                "Superseding session for script {} ({})",
                previous.script().id,
                previous.state()
            );
            previous.teardown();
        }
        let active = self.active.insert(session);
        active.start().await;
        active
    }

    pub fn active(&self) -> Option<&RecordingSession> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut RecordingSession> {
        self.active.as_mut()
    }

    /// True while the active session is recording or waiting for analysis.
    pub fn is_busy(&self) -> bool {
        self.active.as_ref().is_some_and(|s| {
            matches!(
                s.state(),
                SessionState::Recording | SessionState::Stopped | SessionState::Analyzing
            )
        })
    }

    /// Routes an analysis outcome to the active session.
    pub fn apply(&mut self, ticket: AnalysisTicket, outcome: Result<FeedbackResult>) -> bool {
        match self.active.as_mut() {
            Some(session) => session.apply(ticket, outcome),
            None => false,
        }
    }

    pub fn teardown(&mut self) {
        if let Some(mut session) = self.active.take() {
            session.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::capture::{samples_to_chunk, CaptureStream, LevelTap};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct FakeCapture {
        chunks: Vec<Vec<u8>>,
        fail: Option<FeedbackError>,
        sample_rate: u32,
        sender: Option<mpsc::UnboundedSender<Vec<u8>>>,
        disposals: Arc<AtomicUsize>,
    }

    impl FakeCapture {
        fn new(chunks: Vec<Vec<u8>>) -> (Self, Arc<AtomicUsize>) {
            let disposals = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    chunks,
                    fail: None,
                    sample_rate: 16000,
                    sender: None,
                    disposals: disposals.clone(),
                },
                disposals,
            )
        }
    }

    #[async_trait(?Send)]
    impl AudioCapture for FakeCapture {
        async fn start(&mut self) -> Result<CaptureStream> {
            if let Some(e) = self.fail.clone() {
                return Err(e);
            }
            let (tx, rx) = mpsc::unbounded_channel();
            for chunk in &self.chunks {
                tx.send(chunk.clone()).unwrap();
            }
            self.sender = Some(tx);
            Ok(CaptureStream {
                chunks: rx,
                tap: LevelTap::new(64),
                format: AudioFormat::Wav,
                sample_rate: self.sample_rate,
            })
        }

        async fn stop(&mut self) -> Result<()> {
            self.sender = None;
            Ok(())
        }

        fn dispose(&mut self) {
            self.sender = None;
            self.disposals.fetch_add(1, Ordering::SeqCst);
        }

        fn is_active(&self) -> bool {
            self.sender.is_some()
        }
    }

    fn script() -> Script {
        Script {
            id: 3,
            text: "The fox jumps.".into(),
            language: Some("en-US".into()),
            start_secs: None,
            end_secs: None,
        }
    }

    fn session_with(chunks: Vec<Vec<u8>>) -> (RecordingSession, Arc<AtomicUsize>) {
        let (capture, disposals) = FakeCapture::new(chunks);
        let session = RecordingSession::new(
            script(),
            SessionContext::for_script(Some(1), Some(7), &script()),
            SessionSettings::default(),
            Box::new(capture),
        );
        (session, disposals)
    }

    #[test]
    fn time_range_reads_as_clock_positions() {
        let mut script = script();
        assert_eq!(script.time_range(), None);

        script.start_secs = Some(1.5);
        script.end_secs = Some(65.25);
        assert_eq!(script.time_range().as_deref(), Some("0:01.5 to 1:05.3"));

        script.end_secs = None;
        assert_eq!(script.time_range().as_deref(), Some("from 0:01.5"));
    }

    #[tokio::test]
    async fn start_stop_reaches_analyzing() {
        let (mut session, _) = session_with(vec![vec![1; 1000], vec![2; 1000]]);
        assert_eq!(session.state(), SessionState::Idle);

        session.start().await;
        assert_eq!(session.state(), SessionState::Recording);
        assert!(matches!(session.poll(), PollStatus::Recording { .. }));
        assert_eq!(session.chunk_count(), 2);

        let pending = session.stop().await.expect("enough audio");
        assert_eq!(session.state(), SessionState::Analyzing);
        assert_eq!(pending.audio.len(), 2000);
        assert_eq!(pending.context.script_id, Some(3));

        assert!(session.apply(pending.ticket, Ok(FeedbackResult::new(77))));
        assert_eq!(session.state(), SessionState::Result);
        assert_eq!(session.result().map(|r| r.score), Some(77));
    }

    #[tokio::test]
    async fn tap_at_high_sample_rate_is_too_short() {
        // 576 samples pass the byte floor but last 12 ms at 48 kHz.
        let (mut capture, _) = FakeCapture::new(vec![samples_to_chunk(&[0; 576])]);
        capture.sample_rate = 48000;
        let mut session = RecordingSession::new(
            script(),
            SessionContext::for_script(Some(1), Some(7), &script()),
            SessionSettings::default(),
            Box::new(capture),
        );
        session.start().await;

        assert!(session.stop().await.is_none());
        assert_eq!(session.state(), SessionState::Error);
        assert!(matches!(
            session.error(),
            Some(FeedbackError::TooShort {
                bytes: 1152,
                millis: 12,
                min_millis: 50,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn capture_failure_is_error_state() {
        let (mut capture, disposals) = FakeCapture::new(vec![]);
        capture.fail = Some(FeedbackError::PermissionDenied {
            detail: "denied".into(),
        });
        let mut session = RecordingSession::new(
            script(),
            SessionContext::default(),
            SessionSettings::default(),
            Box::new(capture),
        );
        session.start().await;
        assert_eq!(session.state(), SessionState::Error);
        assert!(matches!(
            session.error(),
            Some(FeedbackError::PermissionDenied { .. })
        ));
        assert!(disposals.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn duplicate_start_is_ignored() {
        let (mut session, _) = session_with(vec![vec![0; 2000]]);
        session.start().await;
        session.poll();
        session.start().await;
        assert_eq!(session.state(), SessionState::Recording);
        assert_eq!(session.chunk_count(), 1);
    }

    #[tokio::test]
    async fn ceiling_is_reported() {
        let (mut session, _) = session_with(vec![]);
        session.settings.max_duration = Duration::from_millis(10);
        session.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.poll(), PollStatus::CeilingReached);
    }

    #[tokio::test]
    async fn restart_after_result_clears_previous_outcome() {
        let (mut session, _) = session_with(vec![vec![0; 2000]]);
        session.start().await;
        let pending = session.stop().await.unwrap();
        session.apply(pending.ticket, Ok(FeedbackResult::new(90)));

        session.start().await;
        assert_eq!(session.state(), SessionState::Recording);
        assert!(session.result().is_none());

        // The old ticket belongs to the finished attempt.
        assert!(!session.apply(pending.ticket, Ok(FeedbackResult::new(10))));
    }

    #[tokio::test]
    async fn apply_outside_analyzing_is_ignored() {
        let (mut session, _) = session_with(vec![vec![0; 2000]]);
        session.start().await;
        let pending = session.stop().await.unwrap();
        assert!(session.apply(pending.ticket, Err(FeedbackError::Timeout)));
        assert_eq!(session.state(), SessionState::Error);
        assert!(!session.apply(pending.ticket, Ok(FeedbackResult::new(99))));
        assert_eq!(session.error(), Some(&FeedbackError::Timeout));
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let (mut session, disposals) = session_with(vec![vec![0; 10]]);
        session.start().await;
        session.teardown();
        let after_first = disposals.load(Ordering::SeqCst);
        session.teardown();
        assert_eq!(disposals.load(Ordering::SeqCst), after_first);
        assert!(session.is_torn_down());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.frame().is_none());
        drop(session);
        assert_eq!(disposals.load(Ordering::SeqCst), after_first);
    }

    #[tokio::test]
    async fn surface_supersedes_active_session() {
        let mut surface = PracticeSurface::new();
        let (first, first_disposals) = session_with(vec![vec![0; 2000]]);
        let ticket = {
            let active = surface.begin(first).await;
            active.stop().await.unwrap().ticket
        };
        assert!(surface.is_busy());

        let (second, _) = session_with(vec![vec![0; 2000]]);
        surface.begin(second).await;
        assert!(first_disposals.load(Ordering::SeqCst) >= 1);
        assert_eq!(
            surface.active().map(RecordingSession::state),
            Some(SessionState::Recording)
        );

        // The superseded attempt's result must not land on the new session.
        assert!(!surface.apply(ticket, Ok(FeedbackResult::new(50))));
        assert_eq!(
            surface.active().map(RecordingSession::state),
            Some(SessionState::Recording)
        );

        surface.teardown();
        assert!(surface.active().is_none());
        surface.teardown();
    }
}
