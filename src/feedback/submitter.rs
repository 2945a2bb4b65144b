//! Turns a finished recording into an analysis request.
//!
//! Validation happens before anything is encoded or sent: a context with a
//! missing field never reaches the network.

use std::path::Path;
use std::sync::Arc;

use super::api::{FeedbackApi, SubmissionContext};
use super::model::FeedbackResult;
use crate::errors::{FeedbackError, Result};
use crate::recording::capture::{AudioFormat, CapturedAudio};
use crate::recording::encode::{encode, EncodedAudio};
use crate::recording::session::SessionContext;

pub struct FeedbackSubmitter {
    api: Arc<dyn FeedbackApi>,
}

impl FeedbackSubmitter {
    pub fn new(api: Arc<dyn FeedbackApi>) -> Self {
        Self { api }
    }

    /// Checks that every field the backend requires is present.
    ///
    /// # Errors
    /// - `Validation` naming the first missing field
    pub fn validate(ctx: &SessionContext) -> Result<SubmissionContext> {
        let user_id = ctx.user_id.ok_or(FeedbackError::Validation { field: "userId" })?;
        let content_id = ctx
            .content_id
            .ok_or(FeedbackError::Validation { field: "contentsId" })?;
        let script_id = ctx
            .script_id
            .ok_or(FeedbackError::Validation { field: "scriptId" })?;
        let language = ctx
            .language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or(FeedbackError::Validation { field: "lang" })?
            .to_string();

        Ok(SubmissionContext {
            user_id,
            content_id,
            script_id,
            language,
            target_sentence: ctx.target_sentence.clone(),
        })
    }

    /// Validates, encodes and uploads a recording. One attempt, no retries.
    pub async fn submit(&self, audio: CapturedAudio, ctx: &SessionContext) -> Result<FeedbackResult> {
        let submission = Self::validate(ctx)?;

        let encoded = tokio::task::spawn_blocking(move || encode(&audio))
            .await
            .map_err(|e| FeedbackError::Failed {
                status: None,
                detail: format!("encoder task failed: {e}"),
            })?
            .map_err(|e| FeedbackError::Failed {
                status: None,
                detail: format!("encoding failed: {e}"),
            })?;

        self.submit_payload(&encoded, &submission).await
    }

    /// Uploads audio that is already in an upload container.
    pub async fn submit_payload(
        &self,
        audio: &EncodedAudio,
        ctx: &SubmissionContext,
    ) -> Result<FeedbackResult> {
        let started = std::time::Instant::now();
        let outcome = self.api.analyze(audio, ctx).await;
        match &outcome {
            Ok(result) => tracing::info!(
                "Analysis finished in {:.1}s: score {}",
                started.elapsed().as_secs_f32(),
                result.score
            ),
            Err(e) => tracing::warn!(
                "Analysis failed after {:.1}s: {:?}",
                started.elapsed().as_secs_f32(),
                e
            ),
        }
        outcome
    }

    pub fn api(&self) -> &Arc<dyn FeedbackApi> {
        &self.api
    }
}

/// Reads a pre-recorded webm or wav file for upload.
///
/// # Errors
/// - `UnsupportedFormat` for any other extension
/// - `Failed` if the file cannot be read
pub fn payload_from_file(path: &Path) -> Result<EncodedAudio> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let format = match extension.as_deref() {
        Some("webm") => AudioFormat::WebmOpus,
        Some("wav") => AudioFormat::Wav,
        _ => return Err(FeedbackError::UnsupportedFormat),
    };
    let bytes = std::fs::read(path).map_err(|e| FeedbackError::Failed {
        status: None,
        detail: format!("Failed to read {}: {e}", path.display()),
    })?;
    Ok(EncodedAudio { bytes, format })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::api::{FeedbackKey, TextFeedbackRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingApi {
        calls: AtomicUsize,
        seen: Mutex<Vec<(AudioFormat, SubmissionContext)>>,
    }

    #[async_trait]
    impl FeedbackApi for RecordingApi {
        async fn analyze(
            &self,
            audio: &EncodedAudio,
            ctx: &SubmissionContext,
        ) -> Result<FeedbackResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((audio.format, ctx.clone()));
            Ok(FeedbackResult::new(80))
        }

        async fn latest(&self, _key: FeedbackKey) -> Result<FeedbackResult> {
            Err(FeedbackError::NotFound)
        }

        async fn create_text_feedback(
            &self,
            _request: &TextFeedbackRequest,
        ) -> Result<FeedbackResult> {
            Err(FeedbackError::NotFound)
        }
    }

    fn full_context() -> SessionContext {
        SessionContext {
            user_id: Some(1),
            content_id: Some(7),
            script_id: Some(3),
            language: Some("en-US".into()),
            target_sentence: None,
        }
    }

    fn wav_audio() -> CapturedAudio {
        CapturedAudio::assemble(vec![vec![0u8; 2000]], AudioFormat::Wav, 16000)
    }

    #[tokio::test]
    async fn missing_field_never_calls_backend() {
        let api = Arc::new(RecordingApi::default());
        let submitter = FeedbackSubmitter::new(api.clone());

        let cases: [(fn(&mut SessionContext), &'static str); 4] = [
            (|c| c.user_id = None, "userId"),
            (|c| c.content_id = None, "contentsId"),
            (|c| c.script_id = None, "scriptId"),
            (|c| c.language = Some("  ".into()), "lang"),
        ];
        for (clear, field) in cases {
            let mut ctx = full_context();
            clear(&mut ctx);
            let err = submitter.submit(wav_audio(), &ctx).await.unwrap_err();
            assert_eq!(err, FeedbackError::Validation { field });
        }
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_context_is_forwarded() {
        let api = Arc::new(RecordingApi::default());
        let submitter = FeedbackSubmitter::new(api.clone());

        let result = submitter.submit(wav_audio(), &full_context()).await.unwrap();
        assert_eq!(result.score, 80);

        let seen = api.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, AudioFormat::Wav);
        assert_eq!(seen[0].1.script_id, 3);
        assert_eq!(seen[0].1.language, "en-US");
    }

    #[test]
    fn only_webm_and_wav_files_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mp3 = dir.path().join("take.mp3");
        std::fs::write(&mp3, b"ID3").unwrap();
        assert_eq!(payload_from_file(&mp3), Err(FeedbackError::UnsupportedFormat));

        let webm = dir.path().join("take.WEBM");
        std::fs::write(&webm, b"\x1a\x45\xdf\xa3").unwrap();
        let payload = payload_from_file(&webm).unwrap();
        assert_eq!(payload.format, AudioFormat::WebmOpus);
        assert_eq!(payload.bytes.len(), 4);
    }
}
