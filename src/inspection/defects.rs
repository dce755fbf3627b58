//! Turning scored regions and AI findings into a defect list.

use serde::{Deserialize, Serialize};

use crate::analyzer::AiDefect;
use crate::compare::{RegionOfInterest, RegionSource};
use crate::imaging::BoundingBox;

/// Defect categories inferred locally from region similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectType {
    MissingComponent,
    MisalignedComponent,
    SolderingDefect,
    Unknown,
}

impl DefectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefectType::MissingComponent => "missing_component",
            DefectType::MisalignedComponent => "misaligned_component",
            DefectType::SolderingDefect => "soldering_defect",
            DefectType::Unknown => "unknown",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            DefectType::MissingComponent => Severity::Critical,
            DefectType::MisalignedComponent => Severity::High,
            DefectType::SolderingDefect => Severity::Medium,
            DefectType::Unknown => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Map a model-supplied severity word; unrecognised words count as low.
    pub fn from_ai(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" | "moderate" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefectSource {
    /// Found by region comparison.
    Local,
    /// Reported by the vision model.
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    pub defect_type: String,
    pub severity: Severity,
    pub confidence: f64,
    pub source: DefectSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Defect {
    fn from_ai(defect: &AiDefect, confidence: f64) -> Self {
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());
        Self {
            defect_type: non_empty(&defect.defect_type).unwrap_or_else(|| "other".to_string()),
            severity: Severity::from_ai(&defect.severity),
            confidence,
            source: DefectSource::Ai,
            region_id: None,
            bbox: None,
            similarity: None,
            location: non_empty(&defect.location),
            description: non_empty(&defect.description),
        }
    }
}

/// Similarity bands: < 0.3 missing, < 0.7 misaligned, < 0.9 soldering.
pub fn classify_similarity(similarity: f64) -> DefectType {
    if similarity < 0.3 {
        DefectType::MissingComponent
    } else if similarity < 0.7 {
        DefectType::MisalignedComponent
    } else if similarity < 0.9 {
        DefectType::SolderingDefect
    } else {
        DefectType::Unknown
    }
}

/// Local defect for one region.
pub fn classify_region(region: &RegionOfInterest) -> Defect {
    let defect_type = classify_similarity(region.similarity);
    Defect {
        defect_type: defect_type.as_str().to_string(),
        severity: defect_type.severity(),
        confidence: (1.0 - region.similarity).clamp(0.0, 1.0),
        source: DefectSource::Local,
        region_id: Some(region.id),
        bbox: Some(region.bbox),
        similarity: Some(region.similarity),
        location: None,
        description: None,
    }
}

/// Local defects for a comparison.
///
/// Every difference region is a defect. Grid cells only count when they
/// score below `grid_threshold`.
pub fn local_defects(regions: &[RegionOfInterest], grid_threshold: f64) -> Vec<Defect> {
    regions
        .iter()
        .filter(|r| match r.source {
            RegionSource::Difference => true,
            RegionSource::Grid => r.similarity < grid_threshold,
        })
        .map(classify_region)
        .collect()
}

/// Defects reported by the vision model, with its overall confidence.
pub fn ai_defects(defects: &[AiDefect], confidence: f64) -> Vec<Defect> {
    defects
        .iter()
        .map(|d| Defect::from_ai(d, confidence))
        .collect()
}

/// Overall severity: the worst single defect, `none` when there are none.
pub fn calculate_severity(defects: &[Defect]) -> Severity {
    defects
        .iter()
        .map(|d| d.severity)
        .max()
        .unwrap_or(Severity::None)
}

/// Operator guidance for a defect list.
pub fn generate_recommendations(defects: &[Defect], severity: Severity) -> Vec<String> {
    if defects.is_empty() {
        return vec!["Board passes inspection - no defects detected".to_string()];
    }

    let mut recommendations = Vec::new();
    let headline = match severity {
        Severity::Critical => Some("CRITICAL: Missing components detected - board requires rework"),
        Severity::High => Some("HIGH: Component misalignment detected - manual inspection recommended"),
        Severity::Medium => Some("MEDIUM: Soldering defects detected - review soldering quality"),
        Severity::Low => Some("LOW: Minor defects detected - board may be acceptable"),
        Severity::None => None,
    };
    if let Some(headline) = headline {
        recommendations.push(headline.to_string());
    }
    recommendations.push(format!("Total defects found: {}", defects.len()));
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: usize, similarity: f64, source: RegionSource) -> RegionOfInterest {
        RegionOfInterest {
            id,
            bbox: BoundingBox::new(0, 0, 10, 10),
            area: 100,
            center: (5, 5),
            similarity,
            source,
        }
    }

    #[test]
    fn test_classify_similarity_bands() {
        assert_eq!(classify_similarity(0.1), DefectType::MissingComponent);
        assert_eq!(classify_similarity(0.3), DefectType::MisalignedComponent);
        assert_eq!(classify_similarity(0.69), DefectType::MisalignedComponent);
        assert_eq!(classify_similarity(0.85), DefectType::SolderingDefect);
        assert_eq!(classify_similarity(0.95), DefectType::Unknown);
    }

    #[test]
    fn test_classify_region_confidence() {
        let d = classify_region(&region(3, 0.25, RegionSource::Difference));
        assert_eq!(d.defect_type, "missing_component");
        assert_eq!(d.severity, Severity::Critical);
        assert!((d.confidence - 0.75).abs() < 1e-12);
        assert_eq!(d.region_id, Some(3));

        // Anti-correlated regions still cap at full confidence.
        let d = classify_region(&region(0, -0.4, RegionSource::Difference));
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn test_grid_cells_only_count_below_threshold() {
        let regions = vec![
            region(0, 0.95, RegionSource::Difference),
            region(1, 0.99, RegionSource::Grid),
            region(2, 0.5, RegionSource::Grid),
        ];
        let defects = local_defects(&regions, 0.9);
        let ids: Vec<_> = defects.iter().map(|d| d.region_id.unwrap()).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_severity_is_worst_defect() {
        let defects = vec![
            classify_region(&region(0, 0.8, RegionSource::Difference)),
            classify_region(&region(1, 0.5, RegionSource::Difference)),
        ];
        assert_eq!(calculate_severity(&defects), Severity::High);
        assert_eq!(calculate_severity(&[]), Severity::None);

        let only_unknown = vec![classify_region(&region(0, 0.97, RegionSource::Difference))];
        assert_eq!(calculate_severity(&only_unknown), Severity::Low);
    }

    #[test]
    fn test_ai_defects_map_severity() {
        let defects = ai_defects(
            &[AiDefect {
                defect_type: "missing_component".into(),
                location: "top left".into(),
                severity: "Critical".into(),
                description: String::new(),
            }],
            0.8,
        );
        assert_eq!(defects[0].severity, Severity::Critical);
        assert_eq!(defects[0].source, DefectSource::Ai);
        assert_eq!(defects[0].location.as_deref(), Some("top left"));
        assert!(defects[0].description.is_none());
        assert_eq!(Severity::from_ai("whatever"), Severity::Low);
    }

    #[test]
    fn test_recommendations() {
        assert_eq!(
            generate_recommendations(&[], Severity::None),
            vec!["Board passes inspection - no defects detected"]
        );

        let defects = vec![classify_region(&region(0, 0.1, RegionSource::Difference))];
        let recs = generate_recommendations(&defects, calculate_severity(&defects));
        assert_eq!(
            recs,
            vec![
                "CRITICAL: Missing components detected - board requires rework",
                "Total defects found: 1"
            ]
        );
    }
}
