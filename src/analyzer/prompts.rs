//! Prompts for PCB vision analysis.

use super::types::AnalysisType;
use crate::compare::RegionOfInterest;

/// System prompt shared by every provider that supports one.
pub const SYSTEM_PROMPT: &str = "You are a PCB inspection assistant. Always respond with valid JSON only, no markdown formatting or code blocks.";

const COMPARISON_PROMPT: &str = r#"You are a PCB (Printed Circuit Board) inspection expert. You are comparing a reference image (the known good board) with a current image (the board being inspected).

Compare the two and identify ANY differences.

RULES:
1. If the current board is a different board from the reference, mark it "fail".
2. If components are missing, mark it "fail".
3. If components are in different positions or rotated, mark it "fail".
4. Only mark it "pass" if the boards are essentially identical.
5. If image quality prevents a decision, mark it "needs_review".

Respond in this JSON format:
{
    "overall_quality": "pass|fail|needs_review",
    "defects_found": [
        {
            "type": "missing_component|misaligned|soldering_defect|different_board|other",
            "location": "description of location",
            "severity": "critical|high|medium|low",
            "description": "detailed description of the defect or difference"
        }
    ],
    "components_identified": [
        {
            "type": "resistor|capacitor|ic|connector|other",
            "location": "description of location",
            "status": "present|missing|misaligned|different"
        }
    ],
    "recommendations": ["specific recommendations"],
    "confidence_score": 0.95,
    "comparison_notes": "Brief summary of what you compared and why you decided"
}"#;

const SINGLE_IMAGE_PROMPT: &str = r#"You are a PCB (Printed Circuit Board) inspection expert. Analyze this PCB image and provide a detailed assessment.

Respond in this JSON format:
{
    "overall_quality": "pass|fail|needs_review",
    "defects_found": [
        {
            "type": "missing_component|misaligned|soldering_defect|other",
            "location": "description of location",
            "severity": "critical|high|medium|low",
            "description": "detailed description of the defect"
        }
    ],
    "components_identified": [
        {
            "type": "resistor|capacitor|ic|connector|other",
            "location": "description of location",
            "status": "present|missing|misaligned"
        }
    ],
    "recommendations": ["specific recommendations"],
    "confidence_score": 0.95
}"#;

/// Prompt text for `analysis_type`, with optional trailing context.
pub fn build_analysis_prompt(analysis_type: AnalysisType, context: Option<&str>) -> String {
    let mut prompt = match analysis_type {
        AnalysisType::Comparison => COMPARISON_PROMPT.to_string(),
        _ => SINGLE_IMAGE_PROMPT.to_string(),
    };

    match analysis_type {
        AnalysisType::Defect => prompt.push_str(
            "\n\nFocus specifically on identifying defects, missing components, and quality issues.",
        ),
        AnalysisType::Component => prompt.push_str(
            "\n\nFocus on identifying and cataloging all components present on the board.",
        ),
        AnalysisType::Comparison | AnalysisType::General => {}
    }

    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("\n\n");
        prompt.push_str(context.trim());
    }
    prompt
}

/// Context line for a side-by-side region crop.
pub fn region_context(region: &RegionOfInterest, board_width: u32, board_height: u32) -> String {
    format!(
        "The image shows one region of the board: the LEFT half is the reference, the RIGHT half is the board under inspection. \
         The region is at x={}, y={} ({}x{} px) on a {}x{} px board, roughly in the {} part of the board. \
         Its local structural similarity to the reference is {:.2}.",
        region.bbox.x,
        region.bbox.y,
        region.bbox.width,
        region.bbox.height,
        board_width,
        board_height,
        board_location(region.center, board_width, board_height),
        region.similarity
    )
}

/// Coarse name for where `point` sits on the board ("top-left", "center", ...).
pub fn board_location(point: (u32, u32), width: u32, height: u32) -> &'static str {
    let third = |v: u32, size: u32| {
        if size == 0 {
            1
        } else {
            (v.saturating_mul(3) / size).min(2)
        }
    };
    match (third(point.1, height), third(point.0, width)) {
        (0, 0) => "top-left",
        (0, 1) => "top",
        (0, _) => "top-right",
        (1, 0) => "left",
        (1, 1) => "center",
        (1, _) => "right",
        (_, 0) => "bottom-left",
        (_, 1) => "bottom",
        _ => "bottom-right",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::RegionSource;
    use crate::imaging::BoundingBox;

    #[test]
    fn test_prompts_request_the_json_shape() {
        for t in [
            AnalysisType::Comparison,
            AnalysisType::Defect,
            AnalysisType::Component,
            AnalysisType::General,
        ] {
            let prompt = build_analysis_prompt(t, None);
            assert!(prompt.contains("overall_quality"));
            assert!(prompt.contains("defects_found"));
            assert!(prompt.contains("confidence_score"));
        }
        assert!(build_analysis_prompt(AnalysisType::Comparison, None).contains("comparison_notes"));
        assert!(build_analysis_prompt(AnalysisType::Defect, None).contains("Focus specifically"));
        assert!(build_analysis_prompt(AnalysisType::Component, None).contains("cataloging"));
    }

    #[test]
    fn test_context_is_appended() {
        let prompt = build_analysis_prompt(AnalysisType::General, Some("Board: X1 front"));
        assert!(prompt.ends_with("Board: X1 front"));
        let bare = build_analysis_prompt(AnalysisType::General, Some("   "));
        assert_eq!(bare, build_analysis_prompt(AnalysisType::General, None));
    }

    #[test]
    fn test_region_context_mentions_position() {
        let region = RegionOfInterest {
            id: 0,
            bbox: BoundingBox::new(10, 10, 20, 20),
            area: 400,
            center: (20, 20),
            similarity: 0.42,
            source: RegionSource::Difference,
        };
        let text = region_context(&region, 300, 300);
        assert!(text.contains("top-left"));
        assert!(text.contains("0.42"));
        assert!(text.contains("LEFT half is the reference"));
    }

    #[test]
    fn test_board_location() {
        assert_eq!(board_location((150, 150), 300, 300), "center");
        assert_eq!(board_location((299, 299), 300, 300), "bottom-right");
        assert_eq!(board_location((150, 0), 300, 300), "top");
    }
}
