//! HTTP client for the pronunciation analysis backend.
//!
//! [`FeedbackApi`] is the seam the submitter talks to; [`HttpFeedbackClient`]
//! is the reqwest implementation. Every non-success outcome leaves this module
//! as a [`FeedbackError`].

use async_trait::async_trait;
use reqwest::multipart;
use serde::Serialize;
use std::time::Duration;

use super::model::{FeedbackResult, RawFeedback};
use crate::config::ApiConfig;
use crate::errors::{FeedbackError, Result};
use crate::recording::encode::EncodedAudio;

/// Metadata sent alongside an uploaded recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionContext {
    pub user_id: i64,
    pub content_id: i64,
    pub script_id: i64,
    pub language: String,
    /// Sentence the user was reading, when known
    pub target_sentence: Option<String>,
}

impl SubmissionContext {
    pub fn key(&self) -> FeedbackKey {
        FeedbackKey {
            user_id: self.user_id,
            content_id: self.content_id,
            script_id: self.script_id,
        }
    }
}

/// Identifies one sentence practiced by one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedbackKey {
    pub user_id: i64,
    pub content_id: i64,
    pub script_id: i64,
}

/// Body of a text-based feedback request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextFeedbackRequest {
    pub user_id: i64,
    pub target_sentence: String,
    pub recorded_file_path: String,
}

#[async_trait]
pub trait FeedbackApi: Send + Sync {
    /// Uploads a recording for pronunciation analysis.
    async fn analyze(&self, audio: &EncodedAudio, ctx: &SubmissionContext)
        -> Result<FeedbackResult>;

    /// Fetches the most recent stored feedback for a sentence.
    async fn latest(&self, key: FeedbackKey) -> Result<FeedbackResult>;

    /// Asks the backend to create feedback from an already stored recording.
    async fn create_text_feedback(&self, request: &TextFeedbackRequest)
        -> Result<FeedbackResult>;
}

pub struct HttpFeedbackClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFeedbackClient {
    /// # Errors
    /// - If the HTTP client cannot be built
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Turns a response into a result, mapping non-success statuses.
    async fn read_feedback(resp: reqwest::Response) -> Result<FeedbackResult> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!("Backend returned HTTP {}: {}", status, body);
            return Err(FeedbackError::from_status(status.as_u16(), &body));
        }

        let body = resp.text().await.map_err(|e| FeedbackError::from_transport(&e))?;
        let raw: RawFeedback =
            serde_json::from_str(&body).map_err(|e| FeedbackError::Failed {
                status: Some(status.as_u16()),
                detail: format!("unreadable response: {e}"),
            })?;
        raw.normalize()
    }
}

#[async_trait]
impl FeedbackApi for HttpFeedbackClient {
    async fn analyze(
        &self,
        audio: &EncodedAudio,
        ctx: &SubmissionContext,
    ) -> Result<FeedbackResult> {
        let file_part = multipart::Part::bytes(audio.bytes.clone())
            .file_name(audio.format.file_name())
            .mime_str(audio.format.mime())
            .map_err(|e| FeedbackError::Failed {
                status: None,
                detail: format!("MIME error: {e}"),
            })?;

        let mut form = multipart::Form::new()
            .part("file", file_part)
            .text("userId", ctx.user_id.to_string())
            .text("contentsId", ctx.content_id.to_string())
            .text("scriptId", ctx.script_id.to_string())
            .text("lang", ctx.language.clone());
        if let Some(ref sentence) = ctx.target_sentence {
            form = form.text("targetSentence", sentence.clone());
        }

        tracing::info!(
            "Uploading {} bytes ({}) for user {} content {} script {}",
            audio.bytes.len(),
            audio.format.mime(),
            ctx.user_id,
            ctx.content_id,
            ctx.script_id
        );

        let resp = self
            .client
            .post(self.url("analyze"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| FeedbackError::from_transport(&e))?;

        Self::read_feedback(resp).await
    }

    async fn latest(&self, key: FeedbackKey) -> Result<FeedbackResult> {
        let resp = self
            .client
            .get(self.url("feedback/latest"))
            .query(&[
                ("userId", key.user_id),
                ("contentsId", key.content_id),
                ("scriptId", key.script_id),
            ])
            .send()
            .await
            .map_err(|e| FeedbackError::from_transport(&e))?;

        Self::read_feedback(resp).await
    }

    async fn create_text_feedback(
        &self,
        request: &TextFeedbackRequest,
    ) -> Result<FeedbackResult> {
        let resp = self
            .client
            .post(self.url("feedback"))
            .json(request)
            .send()
            .await
            .map_err(|e| FeedbackError::from_transport(&e))?;

        Self::read_feedback(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::model::Medal;
    use crate::recording::capture::AudioFormat;
    use mockito::{Matcher, ServerOpts};

    fn client_for(url: String) -> HttpFeedbackClient {
        HttpFeedbackClient::new(&ApiConfig {
            base_url: url,
            timeout_secs: 5,
            connect_timeout_secs: 2,
        })
        .unwrap()
    }

    fn ctx() -> SubmissionContext {
        SubmissionContext {
            user_id: 1,
            content_id: 7,
            script_id: 3,
            language: "en-US".into(),
            target_sentence: Some("The fox jumps.".into()),
        }
    }

    fn audio() -> EncodedAudio {
        EncodedAudio {
            bytes: vec![0u8; 64],
            format: AudioFormat::Wav,
        }
    }

    #[tokio::test]
    async fn analyze_posts_form_and_normalizes() {
        let mut server = mockito::Server::new_with_opts_async(ServerOpts::default()).await;
        let mock = server
            .mock("POST", "/api/tutor/analyze")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="userId"\r\n\r\n1\r\n"#.into()),
                Matcher::Regex(r#"name="contentsId"\r\n\r\n7\r\n"#.into()),
                Matcher::Regex(r#"name="scriptId"\r\n\r\n3\r\n"#.into()),
                Matcher::Regex(r#"name="lang"\r\n\r\nen-US\r\n"#.into()),
                Matcher::Regex(r#"filename="recording.wav""#.into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"finalScore": 92, "medal": "GOLD", "feedbackText": "Lovely"}"#)
            .create_async()
            .await;

        let client = client_for(server.url() + "/api/tutor");
        let result = client.analyze(&audio(), &ctx()).await.unwrap();

        assert_eq!(result.score, 92);
        assert_eq!(result.medal, Some(Medal::Gold));
        assert_eq!(result.feedback_text.as_deref(), Some("Lovely"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn status_422_maps_to_analysis_failure() {
        let mut server = mockito::Server::new_with_opts_async(ServerOpts::default()).await;
        server
            .mock("POST", "/analyze")
            .with_status(422)
            .with_body("speech-to-text failed")
            .create_async()
            .await;

        let err = client_for(server.url())
            .analyze(&audio(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::AnalysisFailure { .. }));
    }

    #[tokio::test]
    async fn status_502_maps_to_upstream_failure() {
        let mut server = mockito::Server::new_with_opts_async(ServerOpts::default()).await;
        server
            .mock("POST", "/analyze")
            .with_status(502)
            .create_async()
            .await;

        let err = client_for(server.url())
            .analyze(&audio(), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err, FeedbackError::UpstreamServiceFailure);
    }

    #[tokio::test]
    async fn unreachable_server_is_network_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client_for(format!("http://{addr}"))
            .analyze(&audio(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::NetworkFailure { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        // The kernel completes the handshake; nobody ever answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = HttpFeedbackClient::new(&ApiConfig {
            base_url: format!("http://{addr}"),
            timeout_secs: 1,
            connect_timeout_secs: 1,
        })
        .unwrap();

        let err = client.latest(ctx().key()).await.unwrap_err();
        assert_eq!(err, FeedbackError::Timeout);
        drop(listener);
    }

    #[tokio::test]
    async fn latest_sends_query_and_maps_404() {
        let mut server = mockito::Server::new_with_opts_async(ServerOpts::default()).await;
        let mock = server
            .mock("GET", "/feedback/latest")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("userId".into(), "1".into()),
                Matcher::UrlEncoded("contentsId".into(), "7".into()),
                Matcher::UrlEncoded("scriptId".into(), "3".into()),
            ]))
            .with_status(404)
            .create_async()
            .await;

        let err = client_for(server.url())
            .latest(ctx().key())
            .await
            .unwrap_err();
        assert_eq!(err, FeedbackError::NotFound);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn text_feedback_posts_json() {
        let mut server = mockito::Server::new_with_opts_async(ServerOpts::default()).await;
        let mock = server
            .mock("POST", "/feedback")
            .match_body(Matcher::Json(serde_json::json!({
                "userId": 1,
                "targetSentence": "The fox jumps.",
                "recordedFilePath": "uploads/1.webm"
            })))
            .with_status(200)
            .with_body(r#"{"finalScore": 64.5, "medal": "bronze"}"#)
            .create_async()
            .await;

        let result = client_for(server.url())
            .create_text_feedback(&TextFeedbackRequest {
                user_id: 1,
                target_sentence: "The fox jumps.".into(),
                recorded_file_path: "uploads/1.webm".into(),
            })
            .await
            .unwrap();
        assert_eq!(result.score, 65);
        assert_eq!(result.medal, Some(Medal::Bronze));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn garbage_body_is_generic_failure() {
        let mut server = mockito::Server::new_with_opts_async(ServerOpts::default()).await;
        server
            .mock("GET", "/feedback/latest")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let err = client_for(server.url())
            .latest(ctx().key())
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::Failed { status: Some(200), .. }));
    }
}
