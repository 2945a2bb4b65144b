//! Interactive pronunciation practice.
//!
//! Shows the sentence, records the reader with a live visualization, uploads the
//! recording for analysis and shows the score. Supports external stop triggers via
//! SIGUSR1 signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio::task::JoinHandle;

use super::ContextArgs;
use crate::config::AppConfig;
use crate::errors::{self, FeedbackError};
use crate::feedback::{
    AnalyzingAnimation, FeedbackHistory, FeedbackPresenter, FeedbackResult, FeedbackSubmitter,
    HttpFeedbackClient,
};
use crate::recording::{
    AnalysisTicket, CpalCapture, PendingAnalysis, PollStatus, PracticeCommand, PracticeSurface,
    PracticeTui, PracticeView, RecordingSession, Script, SessionContext, SessionSettings,
    SessionState,
};
use crate::ui::{ErrorChoice, ErrorScreen};

#[derive(Args, Debug, Clone, Default)]
pub struct PracticeArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// Sentence to read aloud
    #[arg(long, value_name = "SENTENCE")]
    pub text: Option<String>,

    /// Start of the sentence in the story narration, in seconds
    #[arg(long, value_name = "SECS")]
    pub start: Option<f64>,

    /// End of the sentence in the story narration, in seconds
    #[arg(long, value_name = "SECS")]
    pub end: Option<f64>,
}

/// An analysis request in flight, tied to the attempt it was made for.
struct Upload {
    ticket: AnalysisTicket,
    context: SessionContext,
    handle: JoinHandle<errors::Result<FeedbackResult>>,
}

impl Upload {
    fn spawn(submitter: &Arc<FeedbackSubmitter>, pending: PendingAnalysis) -> Self {
        let submitter = Arc::clone(submitter);
        let context = pending.context.clone();
        let PendingAnalysis {
            ticket,
            audio,
            context: submit_context,
        } = pending;
        let handle =
            tokio::spawn(async move { submitter.submit(audio, &submit_context).await });
        Self {
            ticket,
            context,
            handle,
        }
    }
}

/// Everything the practice loop needs besides the terminal.
struct Practice {
    script: Script,
    context: SessionContext,
    config: AppConfig,
    submitter: Arc<FeedbackSubmitter>,
    presenter: FeedbackPresenter,
    history: FeedbackHistory,
}

impl Practice {
    /// Resolves the sentence and its ids before anything touches the terminal.
    fn new(config: AppConfig, args: &PracticeArgs) -> anyhow::Result<Self> {
        let (script, context) = practice_target(&config, args)?;

        let client = HttpFeedbackClient::new(&config.api)?;
        let submitter = Arc::new(FeedbackSubmitter::new(Arc::new(client)));
        let presenter = FeedbackPresenter::new(config.presenter.thresholds()?);
        let history = FeedbackHistory::new(&crate::config::get_data_dir()?, config.history.capacity);

        Ok(Self {
            script,
            context,
            config,
            submitter,
            presenter,
            history,
        })
    }

    fn new_session(&self, width: usize) -> RecordingSession {
        let mut settings = SessionSettings::from_config(&self.config);
        settings.width = width;
        RecordingSession::new(
            self.script.clone(),
            self.context.clone(),
            settings,
            Box::new(CpalCapture::new(&self.config.audio)),
        )
    }

    fn save(&mut self, context: &SessionContext, result: &FeedbackResult) {
        let Ok(submission) = FeedbackSubmitter::validate(context) else {
            return;
        };
        if let Err(e) = self
            .history
            .append(submission.key(), Some(&submission.language), result)
        {
            tracing::warn!("Failed to save feedback to history: {}", e);
        }
    }
}

/// The sentence to read and the context its analysis is submitted with.
///
/// Fails when the sentence is empty, the narration range is inverted, or an id
/// or the language is neither passed as a flag nor set in `[practice]`.
fn practice_target(
    config: &AppConfig,
    args: &PracticeArgs,
) -> anyhow::Result<(Script, SessionContext)> {
    let text = args
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow::anyhow!("No sentence to practice. Pass it with --text."))?
        .to_string();

    if args.start.is_some_and(|s| s < 0.0) || args.end.is_some_and(|e| e < 0.0) {
        return Err(anyhow::anyhow!("--start and --end cannot be negative"));
    }
    if let (Some(start), Some(end)) = (args.start, args.end) {
        if end <= start {
            return Err(anyhow::anyhow!(
                "--end ({end}s) must come after --start ({start}s)"
            ));
        }
    }

    let context = args.context.resolve(&config.practice, Some(&text));
    let submission = FeedbackSubmitter::validate(&context).map_err(|e| match e {
        FeedbackError::Validation { field } => missing_detail(field),
        other => anyhow::anyhow!(other),
    })?;

    let script = Script {
        id: submission.script_id,
        text,
        language: Some(submission.language),
        start_secs: args.start,
        end_secs: args.end,
    };
    Ok((script, context))
}

fn missing_detail(field: &str) -> anyhow::Error {
    let hint = match field {
        "userId" => "Pass it with --user-id or set user_id under [practice] in the config.",
        "contentsId" => "Pass it with --content-id.",
        "scriptId" => "Pass it with --script-id.",
        _ => "Pass it with --lang or set language under [practice] in the config.",
    };
    anyhow::anyhow!("Cannot practice without {field}. {hint}")
}

/// Runs the practice screen for one sentence.
///
/// Unexpected failures show a full-screen fallback offering to restart the whole
/// practice flow.
///
/// # Errors
/// - If the configuration cannot be loaded
/// - If the sentence, one of its ids or the language is missing
/// - If the user quits from the fallback screen after a failure
pub async fn handle_practice(args: PracticeArgs) -> Result<(), anyhow::Error> {
    tracing::info!("=== storyvoice Practice Started ===");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Failed to load configuration: {err}");
            let error_message = format!(
                "Configuration Error:\n\n{err}\n\nPlease check your ~/.config/storyvoice/storyvoice.toml file and try again."
            );
            let mut error_screen = ErrorScreen::new()?;
            error_screen.show_error(&error_message)?;
            error_screen.cleanup()?;
            return Err(anyhow::anyhow!("Configuration error: {err}"));
        }
    };

    tracing::info!(
        "Configuration loaded: device={}, sample_rate={}Hz, ceiling={}s, min_bytes={}, min_duration={}ms, api={}",
        config.audio.device,
        config.audio.sample_rate,
        config.session.max_duration_secs,
        config.session.min_audio_bytes,
        config.session.min_duration_ms,
        config.api.base_url
    );

    let mut practice = Practice::new(config.clone(), &args)?;

    let trigger = register_stop_trigger()?;

    loop {
        let Err(e) = run_practice(practice, &trigger).await else {
            tracing::info!("=== storyvoice Practice Exited Successfully ===");
            return Ok(());
        };

        tracing::error!("Practice failed: {e:?}");
        let mut error_screen = ErrorScreen::new()?;
        let choice = error_screen.show_error(&format!("Something went wrong.\n\n{e}"))?;
        error_screen.cleanup()?;
        match choice {
            ErrorChoice::Restart => {
                tracing::info!("Restarting practice after failure");
                trigger.store(false, Ordering::Relaxed);
                practice = Practice::new(config.clone(), &args)?;
            }
            ErrorChoice::Quit => return Err(e),
        }
    }
}

/// Flag raised by SIGUSR1. Registered once per process run; restarts reuse it.
fn register_stop_trigger() -> anyhow::Result<Arc<AtomicBool>> {
    let trigger = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGUSR1, Arc::clone(&trigger))
        .map_err(|e| anyhow::anyhow!("Failed to register signal handler: {e}"))?;
    Ok(trigger)
}

async fn run_practice(mut practice: Practice, trigger: &AtomicBool) -> anyhow::Result<()> {
    let mut tui = PracticeTui::new().map_err(|e| anyhow::anyhow!("Failed to initialize UI: {e}"))?;

    let mut surface = PracticeSurface::new();
    let result = practice_loop(&mut practice, &mut tui, &mut surface, trigger).await;

    surface.teardown();
    tui.cleanup()
        .map_err(|e| anyhow::anyhow!("Cleanup failed: {e}"))?;
    result
}

async fn practice_loop(
    practice: &mut Practice,
    tui: &mut PracticeTui,
    surface: &mut PracticeSurface,
    trigger: &AtomicBool,
) -> anyhow::Result<()> {
    let tick = Duration::from_millis(1000 / u64::from(practice.config.audio.frame_rate.max(1)));
    let ceiling = practice.config.session.max_duration();
    let mut animation = AnalyzingAnimation::new(24);
    let mut upload: Option<Upload> = None;
    let mut frame_count = 0u64;

    tracing::debug!("Entering practice loop. Press Enter to record, 'q' to quit.");

    loop {
        // Collect a finished upload before anything else can supersede it.
        if upload.as_ref().is_some_and(|u| u.handle.is_finished()) {
            if let Some(done) = upload.take() {
                let outcome = match done.handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(FeedbackError::Failed {
                        status: None,
                        detail: format!("analysis task failed: {e}"),
                    }),
                };
                let saved = outcome.as_ref().ok().cloned();
                if surface.apply(done.ticket, outcome) {
                    if let Some(result) = saved {
                        tracing::info!("Analysis complete: score {}", result.score);
                        practice.save(&done.context, &result);
                    }
                }
            }
        }

        let mut stop_requested = trigger.swap(false, Ordering::Relaxed);
        if stop_requested {
            tracing::info!("Received SIGUSR1: stopping via external trigger");
        }

        if let Some(session) = surface.active_mut() {
            session.set_visual_width(tui.width());
            match session.poll() {
                PollStatus::CeilingReached => stop_requested = true,
                PollStatus::Recording { elapsed } => {
                    frame_count += 1;
                    if frame_count.is_multiple_of(60) {
                        tracing::debug!(
                            "Recording: {:.1}s, {} chunks",
                            elapsed.as_secs_f32(),
                            session.chunk_count()
                        );
                    }
                }
                PollStatus::NotRecording => {}
            }
        }

        if stop_requested {
            if let Some(pending) = stop_active(surface).await {
                upload = Some(Upload::spawn(&practice.submitter, pending));
            }
        }

        let state = surface
            .active()
            .map(RecordingSession::state)
            .unwrap_or(SessionState::Idle);
        if state == SessionState::Analyzing {
            animation.update();
        }
        render(tui, surface, &practice.presenter, &practice.script, ceiling, &animation)?;

        let command = tui
            .handle_input(tick)
            .map_err(|e| anyhow::anyhow!("Input handling error: {e}"))?;

        match command {
            PracticeCommand::Continue => {}
            PracticeCommand::Quit => {
                tracing::debug!("Practice cancelled by user");
                if let Some(pending) = upload.take() {
                    pending.handle.abort();
                }
                return Ok(());
            }
            PracticeCommand::StartStop => match state {
                SessionState::Recording => {
                    if let Some(pending) = stop_active(surface).await {
                        upload = Some(Upload::spawn(&practice.submitter, pending));
                    }
                }
                SessionState::Idle | SessionState::Result | SessionState::Error => {
                    let reusable = surface.active().is_some_and(|s| !s.is_torn_down());
                    match surface.active_mut() {
                        Some(session) if reusable => session.start().await,
                        _ => {
                            surface.begin(practice.new_session(tui.width())).await;
                        }
                    }
                    animation = AnalyzingAnimation::new(24);
                }
                SessionState::Stopped | SessionState::Analyzing => {
                    tracing::debug!("Ignoring start/stop while {}", state);
                }
            },
            PracticeCommand::ReRecord => {
                if let Some(stale) = upload.take() {
                    tracing::info!("Re-recording; dropping analysis in flight");
                    stale.handle.abort();
                }
                surface.begin(practice.new_session(tui.width())).await;
                animation = AnalyzingAnimation::new(24);
            }
        }
    }
}

async fn stop_active(surface: &mut PracticeSurface) -> Option<PendingAnalysis> {
    surface.active_mut()?.stop().await
}

fn render(
    tui: &mut PracticeTui,
    surface: &PracticeSurface,
    presenter: &FeedbackPresenter,
    script: &Script,
    ceiling: Duration,
    animation: &AnalyzingAnimation,
) -> anyhow::Result<()> {
    let session = surface.active();
    let time_range = script.time_range();
    let visual = session.and_then(RecordingSession::frame);
    let presentation = session
        .and_then(RecordingSession::result)
        .map(|r| presenter.present(r));
    let error = session
        .and_then(RecordingSession::error)
        .map(|e| presenter.present_error(e));

    let view = PracticeView {
        state: session
            .map(RecordingSession::state)
            .unwrap_or(SessionState::Idle),
        sentence: &script.text,
        time_range: time_range.as_deref(),
        visual: visual.as_ref(),
        elapsed: session.map(RecordingSession::elapsed).unwrap_or_default(),
        ceiling,
        presentation: presentation.as_ref(),
        error: error.as_ref(),
    };
    tui.render(&view, animation)
        .map_err(|e| anyhow::anyhow!("Render failed: {e}"))
}
