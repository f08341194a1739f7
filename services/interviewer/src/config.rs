//! Application configuration, loaded once from the environment at startup.

use std::env;
use tracing::Level;

/// Size of each audio chunk for the output stream.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// Target latency of the output ring buffer in milliseconds.
pub const OUTPUT_LATENCY_MS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVar(String),
    #[error("invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

/// Holds all configuration loaded from the environment.
///
/// * `GEMINI_API_KEY`: required, the Gemini API key.
/// * `GEMINI_MODEL`: optional, overrides the default realtime model.
/// * `AUDIO_INPUT_DEVICE` / `AUDIO_OUTPUT_DEVICE`: optional device names.
/// * `RUST_LOG`: optional log level, defaults to INFO.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub model: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub log_level: Level,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // .env is a local-development convenience; absence is fine.
        dotenvy::dotenv().ok();

        let gemini_api_key = env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;
        let model = env::var("GEMINI_MODEL").ok();
        let input_device = env::var("AUDIO_INPUT_DEVICE").ok();
        let output_device = env::var("AUDIO_OUTPUT_DEVICE").ok();

        let log_level_str = env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            gemini_api_key,
            model,
            input_device,
            output_device,
            log_level,
        })
    }
}
