// Library interface for the spectral line reduction pipeline

pub mod casa;
pub mod config;
pub mod error;
pub mod fits;
pub mod guard;
pub mod lines;
pub mod locator;
pub mod pipeline;
pub mod run_log;
pub mod tools;
pub mod utils;

// Fake external toolchain for driving the sequencer in tests
pub mod test_fixtures;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{ConfigError, LocatorError, PipelineError, Result, ToolError};
pub use lines::SpectralLine;
pub use locator::{locate, ChannelWindow, FrequencyAxis};
pub use pipeline::{PipelineSequencer, RunOptions, RunReport};
