//! storyvoice: pronunciation practice for story sentences.
//!
//! Records the reader with a live visualization, uploads the recording for
//! analysis and shows the scored feedback in the terminal.

pub mod app;
pub mod commands;
pub mod config;
pub mod errors;
pub mod feedback;
pub mod logging;
pub mod recording;
pub mod ui;
