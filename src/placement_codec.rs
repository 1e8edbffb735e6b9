// Compact string forms for placement settings, as stored in project files.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PredefinedPosition {
    TopLeft,
    TopSlightlyLeft,
    TopMiddle,
    TopSlightlyRight,
    TopRight,
    MiddleLeft,
    MiddleRight,
    BottomLeft,
    BottomSlightlyLeft,
    BottomMiddle,
    BottomSlightlyRight,
    BottomRight,
}

const POSITION_TOKENS: [(PredefinedPosition, &str); 12] = [
    (PredefinedPosition::TopLeft, "TL"),
    (PredefinedPosition::TopSlightlyLeft, "TSL"),
    (PredefinedPosition::TopMiddle, "T"),
    (PredefinedPosition::TopSlightlyRight, "TSR"),
    (PredefinedPosition::TopRight, "TR"),
    (PredefinedPosition::MiddleLeft, "L"),
    (PredefinedPosition::MiddleRight, "R"),
    (PredefinedPosition::BottomLeft, "BL"),
    (PredefinedPosition::BottomSlightlyLeft, "BSL"),
    (PredefinedPosition::BottomMiddle, "B"),
    (PredefinedPosition::BottomSlightlyRight, "BSR"),
    (PredefinedPosition::BottomRight, "BR"),
];

/// Cartographic preference order used when a layer does not configure one.
pub const DEFAULT_POSITION_ORDER: [PredefinedPosition; 8] = [
    PredefinedPosition::TopRight,
    PredefinedPosition::TopLeft,
    PredefinedPosition::BottomRight,
    PredefinedPosition::BottomLeft,
    PredefinedPosition::MiddleRight,
    PredefinedPosition::MiddleLeft,
    PredefinedPosition::TopSlightlyRight,
    PredefinedPosition::BottomSlightlyLeft,
];

impl PredefinedPosition {
    pub fn token(self) -> &'static str {
        POSITION_TOKENS
            .iter()
            .find(|(pos, _)| *pos == self)
            .map(|(_, token)| *token)
            .unwrap_or("")
    }

    pub fn from_token(token: &str) -> Option<Self> {
        let cleaned = token.trim().to_ascii_uppercase();
        POSITION_TOKENS
            .iter()
            .find(|(_, t)| *t == cleaned)
            .map(|(pos, _)| *pos)
    }

    /// Offset of the label centre from the anchor point, in label widths
    /// and heights.
    pub fn center_offset(self) -> (f64, f64) {
        match self {
            PredefinedPosition::TopLeft => (-0.5, 0.5),
            PredefinedPosition::TopSlightlyLeft => (-0.25, 0.5),
            PredefinedPosition::TopMiddle => (0.0, 0.5),
            PredefinedPosition::TopSlightlyRight => (0.25, 0.5),
            PredefinedPosition::TopRight => (0.5, 0.5),
            PredefinedPosition::MiddleLeft => (-0.5, 0.0),
            PredefinedPosition::MiddleRight => (0.5, 0.0),
            PredefinedPosition::BottomLeft => (-0.5, -0.5),
            PredefinedPosition::BottomSlightlyLeft => (-0.25, -0.5),
            PredefinedPosition::BottomMiddle => (0.0, -0.5),
            PredefinedPosition::BottomSlightlyRight => (0.25, -0.5),
            PredefinedPosition::BottomRight => (0.5, -0.5),
        }
    }
}

pub fn encode_predefined_position_order(positions: &[PredefinedPosition]) -> String {
    positions
        .iter()
        .map(|p| p.token())
        .collect::<Vec<_>>()
        .join(",")
}

/// Unknown tokens are skipped.
pub fn decode_predefined_position_order(value: &str) -> Vec<PredefinedPosition> {
    value
        .split(',')
        .filter_map(PredefinedPosition::from_token)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinePlacementFlags {
    pub on_line: bool,
    pub above_line: bool,
    pub below_line: bool,
    pub map_orientation: bool,
}

pub fn encode_line_placement_flags(flags: LinePlacementFlags) -> String {
    let mut parts = Vec::new();
    if flags.on_line {
        parts.push("OL");
    }
    if flags.above_line {
        parts.push("AL");
    }
    if flags.below_line {
        parts.push("BL");
    }
    if !flags.map_orientation {
        parts.push("LO");
    }
    parts.join(",")
}

pub fn decode_line_placement_flags(value: &str) -> LinePlacementFlags {
    let mut flags = LinePlacementFlags::default();
    let mut line_orientation = false;
    for part in value.split(',') {
        match part.trim().to_ascii_uppercase().as_str() {
            "OL" => flags.on_line = true,
            "AL" => flags.above_line = true,
            "BL" => flags.below_line = true,
            "LO" => line_orientation = true,
            _ => {}
        }
    }
    flags.map_orientation = !line_orientation;
    flags
}
