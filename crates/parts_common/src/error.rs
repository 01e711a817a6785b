//! Error types for the parts assistant.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PartsError {
    #[error("Failed to load catalog data from {path}: {reason}")]
    DataLoad { path: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PartsError {
    pub fn data_load(path: impl Into<String>, reason: impl ToString) -> Self {
        PartsError::DataLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable short code for logs and operator output
    pub fn code(&self) -> &'static str {
        match self {
            PartsError::DataLoad { .. } => "data_load",
            PartsError::Config(_) => "config",
            PartsError::Io(_) => "io",
        }
    }
}
