use thiserror::Error;

use crate::align::AlignError;
use crate::analyzer::AnalyzerError;
use crate::capture::CaptureError;
use crate::config::ConfigError;
use crate::samples::SampleError;

#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Alignment error: {0}")]
    Alignment(#[from] AlignError),

    #[error("Analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("Sample error: {0}")]
    Sample(#[from] SampleError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("History error: {0}")]
    History(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<InspectorError> for String {
    fn from(err: InspectorError) -> Self {
        err.to_string()
    }
}

pub type Result<T> = std::result::Result<T, InspectorError>;
