//! AI vision description of suspect board regions.

pub mod image_prep;
pub mod prompts;
pub mod types;
pub mod vision;

use std::future::Future;

use thiserror::Error;

use crate::config::ConfigError;

pub use image_prep::{prepare_image, prepare_region_pair, prepare_rgb};
pub use types::*;
pub use vision::{parse_analysis_response, VisionClient};

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Failed to load image: {0}. Ensure it's a valid JPEG/PNG/WebP.")]
    Decode(String),

    #[error("Image too small for reliable analysis: {width}x{height}. Minimum dimension is {min}px.")]
    TooSmall { width: u32, height: u32, min: u32 },

    #[error("Failed to encode image to JPEG: {0}")]
    Encode(String),

    #[error("Region {0:?} does not overlap the image")]
    EmptyRegion(crate::imaging::BoundingBox),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("LLM API timeout after {secs}s for provider '{provider}'")]
    Timeout { provider: &'static str, secs: u64 },

    #[error("LLM API request failed for {provider}: {message}")]
    Request {
        provider: &'static str,
        message: String,
    },

    #[error("LLM API error: {status} from {provider} - {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to parse {provider} API response wrapper: {message}")]
    Wrapper {
        provider: &'static str,
        message: String,
    },

    #[error("No content in {0} API response")]
    MissingContent(&'static str),
}

/// Something that can turn an image (and optional reference) into a
/// structured defect description.
///
/// [`VisionClient`] talks to a hosted vision-language model; tests and
/// offline runs plug in their own implementation.
pub trait DefectDescriber: Send + Sync {
    fn describe(
        &self,
        request: &DescribeRequest,
    ) -> impl Future<Output = Result<AiAnalysis, AnalyzerError>> + Send;
}
