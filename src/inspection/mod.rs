//! The inspection pipeline and result aggregation.
//!
//! Align, compare, classify and (optionally) describe, then fold it all into
//! an [`InspectionReport`]. Image work runs on the blocking pool; only the
//! describer calls are awaited on the async runtime.

pub mod defects;
pub mod report;

use std::path::PathBuf;

use chrono::Local;
use image::RgbImage;
use tracing::{info, warn};

use crate::align::{align_images, resize_to_reference, AlignmentInfo};
use crate::analyzer::{
    prepare_region_pair, prepare_rgb, prompts, AiAnalysis, AnalysisType, DefectDescriber,
    DescribeRequest, VisionClient,
};
use crate::capture::enhance_image;
use crate::compare::{compare_images, ComparisonResult};
use crate::config::InspectorConfig;
use crate::error::{InspectorError, Result};
use crate::samples::BoardSide;

pub use defects::{
    ai_defects, calculate_severity, classify_region, classify_similarity, generate_recommendations,
    local_defects, Defect, DefectSource, DefectType, Severity,
};
pub use report::{decide_verdict, new_inspection_id, InspectionReport, Verdict, VerdictInputs};

/// One board to inspect against its reference image.
#[derive(Debug, Clone)]
pub struct InspectionRequest {
    pub sample_id: String,
    pub board_name: String,
    pub side: BoardSide,
    pub reference: RgbImage,
    pub candidate: RgbImage,
    pub candidate_path: Option<PathBuf>,
}

impl InspectionRequest {
    /// Run capture enhancement on both images so they stay comparable.
    pub fn enhanced(mut self) -> Self {
        self.reference = enhance_image(&self.reference);
        self.candidate = enhance_image(&self.candidate);
        self
    }
}

/// Result of the image stage, before any AI calls.
struct LocalStage {
    alignment: Option<AlignmentInfo>,
    alignment_error: Option<String>,
    comparison: ComparisonResult,
    defects: Vec<Defect>,
    describe: Vec<DescribeRequest>,
}

/// Runs inspections with the given configuration and optional describer.
pub struct Inspector<D = VisionClient> {
    config: InspectorConfig,
    describer: Option<D>,
}

impl Inspector {
    /// Inspector without AI description.
    pub fn new(config: InspectorConfig) -> Self {
        Self {
            config,
            describer: None,
        }
    }
}

impl<D: DefectDescriber> Inspector<D> {
    pub fn with_describer(config: InspectorConfig, describer: D) -> Self {
        Self {
            config,
            describer: Some(describer),
        }
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    pub fn describer(&self) -> Option<&D> {
        self.describer.as_ref()
    }

    pub async fn inspect(&self, request: InspectionRequest) -> Result<InspectionReport> {
        let timestamp = Local::now();
        let inspection_id = new_inspection_id(&timestamp);
        info!(
            "Inspection {}: sample {} ({})",
            inspection_id,
            request.sample_id,
            request.side.as_str()
        );

        let InspectionRequest {
            sample_id,
            board_name,
            side,
            reference,
            candidate,
            candidate_path,
        } = request;

        let config = self.config.clone();
        let want_description = self.describer.is_some();
        let local = tokio::task::spawn_blocking(move || {
            run_local_stage(&reference, &candidate, &config, want_description)
        })
        .await
        .map_err(|e| InspectorError::Task(format!("Image analysis task panicked: {}", e)))??;

        let (ai_analysis, ai_error) = match &self.describer {
            Some(describer) if !local.describe.is_empty() => {
                describe_all(describer, &local.describe).await
            }
            _ => (None, None),
        };

        let report = aggregate(
            AggregateInput {
                inspection_id,
                sample_id,
                board_name,
                side,
                timestamp,
                candidate_path,
            },
            local,
            ai_analysis,
            ai_error,
            self.config.comparison.region_defect_threshold,
        );
        info!(
            "Inspection {} verdict {} (severity {}, {} defects)",
            report.inspection_id,
            report.verdict,
            report.severity.as_str(),
            report.defects.len()
        );
        Ok(report)
    }
}

fn run_local_stage(
    reference: &RgbImage,
    candidate: &RgbImage,
    config: &InspectorConfig,
    want_description: bool,
) -> Result<LocalStage> {
    let (aligned, valid_mask, alignment, alignment_error) =
        match align_images(reference, candidate, &config.alignment) {
            Ok(a) => (a.image, Some(a.valid_mask), Some(a.info), None),
            Err(e) => {
                warn!("Alignment failed, comparing unaligned capture: {}", e);
                (
                    resize_to_reference(candidate, reference),
                    None,
                    None,
                    Some(e.to_string()),
                )
            }
        };

    let comparison = compare_images(reference, &aligned, valid_mask.as_ref(), &config.comparison);
    let threshold = config.comparison.region_defect_threshold;
    let defects = local_defects(&comparison.regions_of_interest, threshold);

    let describe = if want_description {
        describe_requests(reference, &aligned, &comparison, config)?
    } else {
        Vec::new()
    };

    Ok(LocalStage {
        alignment,
        alignment_error,
        comparison,
        defects,
        describe,
    })
}

/// Region pairs for the worst regions; the whole board when the comparison
/// failed without any region standing out.
fn describe_requests(
    reference: &RgbImage,
    aligned: &RgbImage,
    comparison: &ComparisonResult,
    config: &InspectorConfig,
) -> Result<Vec<DescribeRequest>> {
    let suspects = comparison.defective_regions(config.comparison.region_defect_threshold);
    let mut requests = Vec::new();

    for region in suspects.into_iter().take(config.ai.max_regions) {
        let image_base64 =
            prepare_region_pair(reference, aligned, &region.bbox, config.ai.region_padding)?;
        requests.push(DescribeRequest {
            analysis_type: AnalysisType::Comparison,
            image_base64,
            reference_base64: None,
            context: Some(prompts::region_context(
                region,
                reference.width(),
                reference.height(),
            )),
        });
    }

    if requests.is_empty() && !comparison.passed {
        requests.push(DescribeRequest {
            analysis_type: AnalysisType::Comparison,
            image_base64: prepare_rgb(aligned)?,
            reference_base64: Some(prepare_rgb(reference)?),
            context: None,
        });
    }
    Ok(requests)
}

/// Ask about each request in turn. Returns the merged answer and, if any
/// call failed, the last error.
async fn describe_all<D: DefectDescriber>(
    describer: &D,
    requests: &[DescribeRequest],
) -> (Option<AiAnalysis>, Option<String>) {
    let mut answers = Vec::with_capacity(requests.len());
    let mut last_error = None;
    for (i, request) in requests.iter().enumerate() {
        match describer.describe(request).await {
            Ok(analysis) => answers.push(analysis),
            Err(e) => {
                warn!("AI description {}/{} failed: {}", i + 1, requests.len(), e);
                last_error = Some(e.to_string());
            }
        }
    }
    (AiAnalysis::merge(answers), last_error)
}

struct AggregateInput {
    inspection_id: String,
    sample_id: String,
    board_name: String,
    side: BoardSide,
    timestamp: chrono::DateTime<Local>,
    candidate_path: Option<PathBuf>,
}

fn aggregate(
    meta: AggregateInput,
    local: LocalStage,
    ai_analysis: Option<AiAnalysis>,
    ai_error: Option<String>,
    region_threshold: f64,
) -> InspectionReport {
    let has_local_defects = local
        .defects
        .iter()
        .any(|d| d.similarity.is_some_and(|s| s < region_threshold));

    let mut defects = local.defects;
    if let Some(ai) = &ai_analysis {
        defects.extend(ai_defects(&ai.defects_found, ai.confidence_score));
    }
    let severity = calculate_severity(&defects);

    let verdict = decide_verdict(&VerdictInputs {
        comparison_passed: local.comparison.passed,
        severity,
        aligned: local.alignment.is_some(),
        ai: ai_analysis.as_ref(),
        ai_failed: ai_error.is_some() && ai_analysis.is_none(),
        has_local_defects,
    });

    let mut recommendations = generate_recommendations(&defects, severity);
    if let Some(ai) = &ai_analysis {
        for rec in &ai.recommendations {
            if !rec.trim().is_empty() && !recommendations.contains(rec) {
                recommendations.push(rec.clone());
            }
        }
    }

    let confidence = match &ai_analysis {
        Some(ai) => ai.confidence_score,
        None => defects
            .iter()
            .map(|d| d.confidence)
            .reduce(f64::max)
            .unwrap_or(local.comparison.similarity_score),
    }
    .clamp(0.0, 1.0);

    InspectionReport {
        inspection_id: meta.inspection_id,
        sample_id: meta.sample_id,
        board_name: meta.board_name,
        side: meta.side,
        timestamp: meta.timestamp,
        candidate_path: meta.candidate_path,
        alignment: local.alignment,
        alignment_error: local.alignment_error,
        similarity_score: local.comparison.similarity_score,
        difference_percentage: local.comparison.difference_percentage,
        comparison_passed: local.comparison.passed,
        total_regions: local.comparison.total_regions,
        regions: local.comparison.regions_of_interest,
        defects,
        severity,
        ai_analysis,
        ai_error,
        verdict,
        confidence,
        recommendations,
    }
}
