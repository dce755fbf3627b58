//! Structured output of a vision analysis.

use serde::{Deserialize, Serialize};

/// What the model is asked to focus on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    /// Inspected board against the reference.
    Comparison,
    Defect,
    Component,
    General,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Comparison => "comparison",
            AnalysisType::Defect => "defect",
            AnalysisType::Component => "component",
            AnalysisType::General => "general",
        }
    }
}

impl std::str::FromStr for AnalysisType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "comparison" => Ok(AnalysisType::Comparison),
            "defect" => Ok(AnalysisType::Defect),
            "component" => Ok(AnalysisType::Component),
            "general" => Ok(AnalysisType::General),
            other => Err(format!(
                "Unknown analysis type '{}'. Expected comparison, defect, component or general",
                other
            )),
        }
    }
}

/// The model's overall call on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum OverallQuality {
    Pass,
    Fail,
    #[default]
    NeedsReview,
}

impl OverallQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallQuality::Pass => "pass",
            OverallQuality::Fail => "fail",
            OverallQuality::NeedsReview => "needs_review",
        }
    }

    /// Ordering used when merging several answers: fail beats needs_review
    /// beats pass.
    fn rank(&self) -> u8 {
        match self {
            OverallQuality::Pass => 0,
            OverallQuality::NeedsReview => 1,
            OverallQuality::Fail => 2,
        }
    }
}

/// Models sometimes answer "PASS", "Needs Review" or the template text
/// "pass/fail/needs_review"; anything unrecognised needs review.
impl From<String> for OverallQuality {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "pass" | "passed" => OverallQuality::Pass,
            "fail" | "failed" => OverallQuality::Fail,
            _ => OverallQuality::NeedsReview,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AiDefect {
    #[serde(rename = "type")]
    pub defect_type: String,
    pub location: String,
    /// critical, high, medium or low.
    pub severity: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AiComponent {
    #[serde(rename = "type")]
    pub component_type: String,
    pub location: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysis {
    #[serde(default)]
    pub overall_quality: OverallQuality,
    #[serde(default)]
    pub defects_found: Vec<AiDefect>,
    #[serde(default)]
    pub components_identified: Vec<AiComponent>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison_notes: Option<String>,
}

impl AiAnalysis {
    /// The answer used when the model's reply cannot be parsed.
    pub fn needs_review(raw_text: &str) -> Self {
        Self {
            overall_quality: OverallQuality::NeedsReview,
            defects_found: Vec::new(),
            components_identified: Vec::new(),
            recommendations: vec![raw_text.trim().to_string()],
            confidence_score: 0.5,
            comparison_notes: None,
        }
    }

    /// Fold several region answers into one.
    ///
    /// The worst quality wins, lists are concatenated (recommendations
    /// deduplicated), confidence is the lowest seen and notes are joined.
    pub fn merge(analyses: Vec<AiAnalysis>) -> Option<AiAnalysis> {
        let mut iter = analyses.into_iter();
        let mut merged = iter.next()?;
        for next in iter {
            if next.overall_quality.rank() > merged.overall_quality.rank() {
                merged.overall_quality = next.overall_quality;
            }
            merged.defects_found.extend(next.defects_found);
            merged.components_identified.extend(next.components_identified);
            for rec in next.recommendations {
                if !merged.recommendations.contains(&rec) {
                    merged.recommendations.push(rec);
                }
            }
            merged.confidence_score = merged.confidence_score.min(next.confidence_score);
            merged.comparison_notes = match (merged.comparison_notes.take(), next.comparison_notes)
            {
                (Some(a), Some(b)) => Some(format!("{} {}", a, b)),
                (a, b) => a.or(b),
            };
        }
        Some(merged)
    }
}

/// One request to a [`super::DefectDescriber`].
#[derive(Debug, Clone)]
pub struct DescribeRequest {
    pub analysis_type: AnalysisType,
    /// Base64 JPEG of the image under inspection.
    pub image_base64: String,
    /// Base64 JPEG of the reference, sent as a second image when present.
    pub reference_base64: Option<String>,
    /// Extra text appended to the prompt (e.g. where the region sits).
    pub context: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_deserialize_full() {
        let json = r#"{
            "overall_quality": "fail",
            "defects_found": [
                {"type": "missing_component", "location": "near U3", "severity": "critical",
                 "description": "Capacitor C12 is absent"}
            ],
            "components_identified": [
                {"type": "capacitor", "location": "near U3", "status": "missing"}
            ],
            "recommendations": ["Rework C12"],
            "confidence_score": 0.9,
            "comparison_notes": "One part missing"
        }"#;

        let analysis: AiAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.overall_quality, OverallQuality::Fail);
        assert_eq!(analysis.defects_found[0].defect_type, "missing_component");
        assert_eq!(analysis.components_identified[0].status, "missing");
        assert_eq!(analysis.comparison_notes.as_deref(), Some("One part missing"));
    }

    #[test]
    fn test_analysis_deserialize_sparse() {
        let analysis: AiAnalysis =
            serde_json::from_str(r#"{"overall_quality": "Needs Review"}"#).unwrap();
        assert_eq!(analysis.overall_quality, OverallQuality::NeedsReview);
        assert!(analysis.defects_found.is_empty());
        assert_eq!(analysis.confidence_score, 0.0);
    }

    #[test]
    fn test_overall_quality_is_lenient() {
        assert_eq!(OverallQuality::from("PASS".to_string()), OverallQuality::Pass);
        assert_eq!(OverallQuality::from("failed".to_string()), OverallQuality::Fail);
        assert_eq!(
            OverallQuality::from("pass/fail/needs_review".to_string()),
            OverallQuality::NeedsReview
        );
        let json = serde_json::to_string(&OverallQuality::NeedsReview).unwrap();
        assert_eq!(json, "\"needs_review\"");
    }

    #[test]
    fn test_merge_takes_worst_quality_and_lowest_confidence() {
        let mut a = AiAnalysis::needs_review("check region 1");
        a.overall_quality = OverallQuality::Pass;
        a.confidence_score = 0.9;
        let mut b = AiAnalysis::needs_review("check region 1");
        b.overall_quality = OverallQuality::Fail;
        b.confidence_score = 0.7;
        b.defects_found.push(AiDefect {
            defect_type: "misaligned".into(),
            severity: "high".into(),
            ..Default::default()
        });

        let merged = AiAnalysis::merge(vec![a, b]).unwrap();
        assert_eq!(merged.overall_quality, OverallQuality::Fail);
        assert_eq!(merged.confidence_score, 0.7);
        assert_eq!(merged.defects_found.len(), 1);
        assert_eq!(merged.recommendations, vec!["check region 1".to_string()]);
        assert!(AiAnalysis::merge(Vec::new()).is_none());
    }

    #[test]
    fn test_analysis_type_from_str() {
        assert_eq!("Defect".parse::<AnalysisType>().unwrap(), AnalysisType::Defect);
        assert!("layout".parse::<AnalysisType>().is_err());
    }
}
