//! Configuration management for storyvoice.
//!
//! Handles loading and saving the TOML configuration file in the user's config
//! directory and locating the data directory used for feedback history.

pub mod file;

pub use file::{
    get_config_path, get_data_dir, ApiConfig, AppConfig, AudioConfig, HistoryConfig,
    PracticeConfig, PresenterConfig, SessionConfig, VisualizationType,
};
