//! Reference-sample visual inspection for printed circuit boards.
//!
//! A candidate board image is aligned to a stored known-good sample,
//! compared region by region, optionally described by a vision model, and
//! folded into a PASS / FAIL / UNCERTAIN report.

pub mod align;
pub mod analyzer;
pub mod capture;
pub mod compare;
pub mod config;
pub mod error;
pub mod history;
pub mod imaging;
pub mod inspection;
pub mod samples;

#[cfg(test)]
mod test_support;

pub use config::InspectorConfig;
pub use error::{InspectorError, Result};
pub use history::{InspectionHistory, InspectionRecord, InspectionSummary};
pub use inspection::{InspectionReport, InspectionRequest, Inspector, Verdict};
pub use samples::{BoardSide, QaSample, SampleStore};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
