//! Coarse component finder based on edge outlines.

use image::RgbImage;
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::morphology::dilate;
use imageproc::region_labelling::Connectivity;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::imaging::{mask_components, to_gray, BoundingBox};

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
const MIN_COMPONENT_AREA: u64 = 500;
const MAX_COMPONENT_AREA: u64 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    IcOrResistor,
    CapacitorOrConnector,
    Unknown,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::IcOrResistor => "ic_or_resistor",
            ComponentKind::CapacitorOrConnector => "capacitor_or_connector",
            ComponentKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedComponent {
    pub id: usize,
    pub bbox: BoundingBox,
    pub area: u64,
    pub aspect_ratio: f64,
    pub kind: ComponentKind,
}

/// Square-ish parts are usually ICs or resistors, elongated ones capacitors
/// or connectors.
pub fn classify_aspect(aspect_ratio: f64) -> ComponentKind {
    if aspect_ratio > 0.8 && aspect_ratio < 1.2 {
        ComponentKind::IcOrResistor
    } else if aspect_ratio > 2.0 || aspect_ratio < 0.5 {
        ComponentKind::CapacitorOrConnector
    } else {
        ComponentKind::Unknown
    }
}

/// Find component-sized outlines in `image`.
pub fn detect_components(image: &RgbImage) -> Vec<DetectedComponent> {
    // Close single-pixel gaps so each outline labels as one component.
    let edges = dilate(&canny(&to_gray(image), CANNY_LOW, CANNY_HIGH), Norm::LInf, 1);

    let components: Vec<DetectedComponent> = mask_components(&edges, Connectivity::Eight)
        .into_iter()
        .filter(|c| {
            let area = c.bbox.area();
            area > MIN_COMPONENT_AREA && area < MAX_COMPONENT_AREA
        })
        .enumerate()
        .map(|(id, c)| {
            let aspect_ratio = c.bbox.aspect_ratio();
            DetectedComponent {
                id,
                bbox: c.bbox,
                area: c.bbox.area(),
                aspect_ratio,
                kind: classify_aspect(aspect_ratio),
            }
        })
        .collect();

    debug!("Detected {} components", components.len());
    components
}
