//! Voice recording for practice sessions.
//!
//! Provides microphone capture, upload packaging, live visualization, the
//! session lifecycle, and the practice screen.

pub mod audio;
pub mod capture;
pub mod encode;
pub mod ffmpeg;
pub mod session;
pub mod ui;
pub mod visualizations;

pub use audio::CpalCapture;
pub use capture::{AudioCapture, AudioFormat, CaptureStream, CapturedAudio, LevelTap};
pub use encode::EncodedAudio;
pub use ffmpeg::find_ffmpeg;
pub use session::{
    AnalysisTicket, PendingAnalysis, PollStatus, PracticeSurface, RecordingSession, Script,
    SessionContext, SessionSettings, SessionState,
};
pub use ui::{PracticeCommand, PracticeTui, PracticeView};
