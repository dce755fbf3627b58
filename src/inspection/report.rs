use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Local, Timelike};
use serde::{Deserialize, Serialize};

use super::defects::{Defect, Severity};
use crate::align::AlignmentInfo;
use crate::analyzer::{AiAnalysis, OverallQuality};
use crate::compare::RegionOfInterest;
use crate::samples::BoardSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
    Uncertain,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Uncertain => "UNCERTAIN",
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PASS" => Ok(Verdict::Pass),
            "FAIL" => Ok(Verdict::Fail),
            "UNCERTAIN" => Ok(Verdict::Uncertain),
            other => Err(format!("Unknown verdict '{}'", other)),
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the verdict depends on.
#[derive(Debug, Clone, Copy)]
pub struct VerdictInputs<'a> {
    pub comparison_passed: bool,
    pub severity: Severity,
    pub aligned: bool,
    pub ai: Option<&'a AiAnalysis>,
    /// The AI was asked and every call failed.
    pub ai_failed: bool,
    pub has_local_defects: bool,
}

/// FAIL on a failed comparison, a critical/high defect or an AI "fail";
/// otherwise UNCERTAIN when alignment failed, the AI wants review, or the AI
/// could not be reached while local defects exist; otherwise PASS.
pub fn decide_verdict(inputs: &VerdictInputs<'_>) -> Verdict {
    let ai_quality = inputs.ai.map(|a| a.overall_quality);

    if !inputs.comparison_passed
        || inputs.severity >= Severity::High
        || ai_quality == Some(OverallQuality::Fail)
    {
        return Verdict::Fail;
    }
    if !inputs.aligned
        || ai_quality == Some(OverallQuality::NeedsReview)
        || (inputs.ai_failed && inputs.has_local_defects)
    {
        return Verdict::Uncertain;
    }
    Verdict::Pass
}

/// `insp_<YYYYmmdd_HHMMSS>_<millis>`
pub fn new_inspection_id(now: &DateTime<Local>) -> String {
    format!(
        "insp_{}_{:03}",
        now.format("%Y%m%d_%H%M%S"),
        now.nanosecond() / 1_000_000 % 1000
    )
}

/// Outcome of one inspection run. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionReport {
    pub inspection_id: String,
    pub sample_id: String,
    pub board_name: String,
    pub side: BoardSide,
    pub timestamp: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<AlignmentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment_error: Option<String>,

    pub similarity_score: f64,
    pub difference_percentage: f64,
    pub comparison_passed: bool,
    pub total_regions: usize,
    pub regions: Vec<RegionOfInterest>,

    pub defects: Vec<Defect>,
    pub severity: Severity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<AiAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_error: Option<String>,

    pub verdict: Verdict,
    pub confidence: f64,
    pub recommendations: Vec<String>,
}

impl InspectionReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "PCB Inspection Report")?;
        writeln!(out, "=====================")?;
        writeln!(out, "Board: {} ({})", self.board_name, self.side.as_str())?;
        writeln!(out, "Sample: {}", self.sample_id)?;
        writeln!(out, "Inspection ID: {}", self.inspection_id)?;
        writeln!(out, "Date: {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(out)?;
        writeln!(out, "Overall Result: {}", self.verdict)?;
        writeln!(out, "Severity: {}", self.severity.as_str())?;
        writeln!(out, "Confidence Score: {:.2}", self.confidence)?;
        writeln!(out, "Similarity Score: {:.4}", self.similarity_score)?;
        writeln!(out, "Difference: {:.2}%", self.difference_percentage)?;
        match (&self.alignment, &self.alignment_error) {
            (Some(a), _) => writeln!(
                out,
                "Alignment: {} matches, {} inliers, rotation {:.1} deg",
                a.matches_count, a.inlier_count, a.rotation_degrees
            )?,
            (None, Some(e)) => writeln!(out, "Alignment: failed ({})", e)?,
            (None, None) => writeln!(out, "Alignment: not performed")?,
        }
        if let Some(ai) = &self.ai_analysis {
            writeln!(
                out,
                "AI Assessment: {} (confidence {:.2})",
                ai.overall_quality.as_str(),
                ai.confidence_score
            )?;
        } else if let Some(e) = &self.ai_error {
            writeln!(out, "AI Assessment: unavailable ({})", e)?;
        }

        writeln!(out, "\nDEFECTS FOUND:")?;
        if self.defects.is_empty() {
            writeln!(out, "No defects detected.")?;
        }
        for (i, d) in self.defects.iter().enumerate() {
            writeln!(out, "\n{}. Type: {}", i + 1, d.defect_type)?;
            let location = match (&d.location, &d.bbox) {
                (Some(l), _) => l.clone(),
                (None, Some(b)) => format!("x={}, y={}, {}x{}", b.x, b.y, b.width, b.height),
                (None, None) => "Unknown".to_string(),
            };
            writeln!(out, "   Location: {}", location)?;
            writeln!(out, "   Severity: {}", d.severity.as_str())?;
            writeln!(out, "   Confidence: {:.2}", d.confidence)?;
            if let Some(sim) = d.similarity {
                writeln!(out, "   Similarity: {:.3}", sim)?;
            }
            if let Some(desc) = &d.description {
                writeln!(out, "   Description: {}", desc)?;
            }
        }

        writeln!(out, "\nCOMPONENTS IDENTIFIED:")?;
        let components = self
            .ai_analysis
            .as_ref()
            .map(|a| a.components_identified.as_slice())
            .unwrap_or_default();
        if components.is_empty() {
            writeln!(out, "No components identified.")?;
        }
        for (i, c) in components.iter().enumerate() {
            writeln!(out, "\n{}. Type: {}", i + 1, c.component_type)?;
            writeln!(out, "   Location: {}", c.location)?;
            writeln!(out, "   Status: {}", c.status)?;
        }

        writeln!(out, "\nRECOMMENDATIONS:")?;
        if self.recommendations.is_empty() {
            writeln!(out, "No specific recommendations.")?;
        }
        for (i, rec) in self.recommendations.iter().enumerate() {
            writeln!(out, "{}. {}", i + 1, rec)?;
        }

        if let Some(notes) = self.ai_analysis.as_ref().and_then(|a| a.comparison_notes.as_ref()) {
            writeln!(out, "\nNOTES:\n{}", notes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn inputs() -> VerdictInputs<'static> {
        VerdictInputs {
            comparison_passed: true,
            severity: Severity::None,
            aligned: true,
            ai: None,
            ai_failed: false,
            has_local_defects: false,
        }
    }

    #[test]
    fn test_clean_run_passes() {
        assert_eq!(decide_verdict(&inputs()), Verdict::Pass);
        let low = VerdictInputs {
            severity: Severity::Medium,
            has_local_defects: true,
            ..inputs()
        };
        assert_eq!(decide_verdict(&low), Verdict::Pass);
    }

    #[test]
    fn test_hard_failures() {
        let failed_compare = VerdictInputs {
            comparison_passed: false,
            ..inputs()
        };
        assert_eq!(decide_verdict(&failed_compare), Verdict::Fail);

        let high = VerdictInputs {
            severity: Severity::High,
            aligned: false,
            ..inputs()
        };
        assert_eq!(decide_verdict(&high), Verdict::Fail);

        let mut ai = AiAnalysis::needs_review("x");
        ai.overall_quality = OverallQuality::Fail;
        let ai_fail = VerdictInputs {
            ai: Some(&ai),
            ..inputs()
        };
        assert_eq!(decide_verdict(&ai_fail), Verdict::Fail);
    }

    #[test]
    fn test_uncertain_cases() {
        let unaligned = VerdictInputs {
            aligned: false,
            ..inputs()
        };
        assert_eq!(decide_verdict(&unaligned), Verdict::Uncertain);

        let ai = AiAnalysis::needs_review("blurry");
        let review = VerdictInputs {
            ai: Some(&ai),
            ..inputs()
        };
        assert_eq!(decide_verdict(&review), Verdict::Uncertain);

        let unreachable = VerdictInputs {
            ai_failed: true,
            has_local_defects: true,
            severity: Severity::Low,
            ..inputs()
        };
        assert_eq!(decide_verdict(&unreachable), Verdict::Uncertain);

        let unreachable_clean = VerdictInputs {
            ai_failed: true,
            ..inputs()
        };
        assert_eq!(decide_verdict(&unreachable_clean), Verdict::Pass);
    }

    #[test]
    fn test_inspection_id_format() {
        let now = Local
            .with_ymd_and_hms(2026, 3, 1, 14, 22, 33)
            .unwrap()
            .with_nanosecond(45_000_000)
            .unwrap();
        assert_eq!(new_inspection_id(&now), "insp_20260301_142233_045");
    }

    #[test]
    fn test_verdict_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Verdict::Uncertain).unwrap(), "\"UNCERTAIN\"");
    }
}
