//! Practice flow from microphone chunks to the rendered result, against a mock backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mockito::{Matcher, ServerOpts};
use tokio::sync::mpsc;

use storyvoice::config::ApiConfig;
use storyvoice::errors::{FeedbackError, Result};
use storyvoice::feedback::{
    FeedbackPresenter, FeedbackSubmitter, HttpFeedbackClient, Medal, MessageTier,
};
use storyvoice::recording::{
    AudioCapture, AudioFormat, CaptureStream, LevelTap, PracticeSurface, RecordingSession,
    Script, SessionContext, SessionSettings, SessionState,
};

/// Capture that replays fixed chunks instead of a microphone.
struct ScriptedCapture {
    chunks: Vec<Vec<u8>>,
    sender: Option<mpsc::UnboundedSender<Vec<u8>>>,
    disposals: Arc<AtomicUsize>,
}

impl ScriptedCapture {
    fn new(chunks: Vec<Vec<u8>>) -> (Self, Arc<AtomicUsize>) {
        let disposals = Arc::new(AtomicUsize::new(0));
        let capture = Self {
            chunks,
            sender: None,
            disposals: Arc::clone(&disposals),
        };
        (capture, disposals)
    }
}

#[async_trait(?Send)]
impl AudioCapture for ScriptedCapture {
    async fn start(&mut self) -> Result<CaptureStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        for chunk in &self.chunks {
            tx.send(chunk.clone()).unwrap();
        }
        self.sender = Some(tx);
        Ok(CaptureStream {
            chunks: rx,
            tap: LevelTap::new(256),
            format: AudioFormat::Wav,
            sample_rate: 16000,
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
        text: "The little fox ran home.".to_string(),
        language: Some("en-US".to_string()),
        start_secs: Some(1.5),
        end_secs: Some(4.0),
    }
}

fn session(chunks: Vec<Vec<u8>>) -> (RecordingSession, Arc<AtomicUsize>) {
    let (capture, disposals) = ScriptedCapture::new(chunks);
    let session = RecordingSession::new(
        script(),
        SessionContext::for_script(Some(1), Some(7), &script()),
        SessionSettings::default(),
        Box::new(capture),
    );
    (session, disposals)
}

fn submitter_for(url: String) -> FeedbackSubmitter {
    let client = HttpFeedbackClient::new(&ApiConfig {
        base_url: url,
        timeout_secs: 5,
        connect_timeout_secs: 2,
    })
    .unwrap();
    FeedbackSubmitter::new(Arc::new(client))
}

#[tokio::test]
async fn gold_recording_reaches_result() {
    let mut server = mockito::Server::new_with_opts_async(ServerOpts::default()).await;
    let mock = server
        .mock("POST", "/analyze")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="userId"\r\n\r\n1\r\n"#.into()),
            Matcher::Regex(r#"name="contentsId"\r\n\r\n7\r\n"#.into()),
            Matcher::Regex(r#"name="scriptId"\r\n\r\n3\r\n"#.into()),
            Matcher::Regex(r#"name="lang"\r\n\r\nen-US\r\n"#.into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"finalScore": 92, "medal": "GOLD"}"#)
        .expect(1)
        .create_async()
        .await;

    let submitter = submitter_for(server.url());
    let (mut session, disposals) = session(vec![vec![1; 1000], vec![2; 1000]]);

    session.start().await;
    assert_eq!(session.state(), SessionState::Recording);

    let state = session.analyze(&submitter).await;
    assert_eq!(state, SessionState::Result);
    assert!(disposals.load(Ordering::SeqCst) >= 1);

    let result = session.result().unwrap();
    assert_eq!(result.score, 92);
    assert_eq!(result.medal, Some(Medal::Gold));

    let presentation = FeedbackPresenter::default().present(result);
    assert_eq!(presentation.tier, MessageTier::Perfect);
    assert!(presentation
        .medal_badge
        .as_deref()
        .is_some_and(|b| b.contains("GOLD")));

    mock.assert_async().await;
}

#[tokio::test]
async fn short_recording_never_reaches_backend() {
    let mut server = mockito::Server::new_with_opts_async(ServerOpts::default()).await;
    let mock = server
        .mock("POST", "/analyze")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let submitter = submitter_for(server.url());
    let (mut session, _) = session(vec![vec![9; 50]]);

    session.start().await;
    let state = session.analyze(&submitter).await;

    assert_eq!(state, SessionState::Error);
    assert!(matches!(
        session.error(),
        Some(FeedbackError::TooShort { bytes: 50, .. })
    ));
    assert!(session.result().is_none());
    mock.assert_async().await;
}

#[tokio::test]
async fn chunks_are_uploaded_in_capture_order() {
    let (mut session, _) = session(vec![vec![1; 600], vec![], vec![2; 600], vec![3; 600]]);
    session.start().await;
    let pending = session.stop().await.unwrap();

    let bytes = pending.audio.bytes();
    assert_eq!(bytes.len(), 1800);
    assert!(bytes[..600].iter().all(|&b| b == 1));
    assert!(bytes[600..1200].iter().all(|&b| b == 2));
    assert!(bytes[1200..].iter().all(|&b| b == 3));
}

#[tokio::test]
async fn superseded_analysis_is_dropped() {
    let mut surface = PracticeSurface::new();

    let (first, first_disposals) = session(vec![vec![1; 2000]]);
    let pending = {
        let active = surface.begin(first).await;
        active.stop().await.unwrap()
    };
    assert!(surface.is_busy());

    let (second, _) = session(vec![vec![2; 2000]]);
    surface.begin(second).await;
    assert!(first_disposals.load(Ordering::SeqCst) >= 1);
    assert_eq!(surface.active().map(|s| s.state()), Some(SessionState::Recording));

    let mut late = storyvoice::feedback::FeedbackResult::new(40);
    late.medal = Some(Medal::Bronze);
    assert!(!surface.apply(pending.ticket, Ok(late)));
    assert!(surface.active().unwrap().result().is_none());
    assert_eq!(surface.active().map(|s| s.state()), Some(SessionState::Recording));
}

#[tokio::test]
async fn teardown_twice_releases_once_and_stays_idle() {
    let (mut session, disposals) = session(vec![vec![1; 1500]]);
    session.start().await;

    session.teardown();
    let after_first = disposals.load(Ordering::SeqCst);
    session.teardown();

    assert_eq!(disposals.load(Ordering::SeqCst), after_first);
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.is_torn_down());

    session.start().await;
    assert_eq!(session.state(), SessionState::Idle);
}
