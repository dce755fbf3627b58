use serde::Serialize;

use crate::inspection::{InspectionReport, Verdict};

/// One row of the inspection list.
#[derive(Debug, Clone, Serialize)]
pub struct InspectionSummary {
    pub inspection_id: String,
    pub sample_id: String,
    pub board_name: String,
    pub side: String,
    pub verdict: Verdict,
    pub similarity_score: f64,
    pub created_at: String,
}

/// A stored inspection with its full report.
#[derive(Debug, Clone, Serialize)]
pub struct InspectionRecord {
    pub summary: InspectionSummary,
    pub report: InspectionReport,
}
