//! Strip Geometry - Layout Tiers and Dimensions
//!
//! The interactive preview computes the same geometry independently. Any
//! change here must be mirrored there, or raster output and preview diverge.
//!
//! Tier thresholds are tuned by eye. Keep them as literal data.

use serde::{Deserialize, Serialize};

/// Strip width in points at 1x.
pub const STRIP_WIDTH: u32 = 375;
/// Strip height in points at 1x.
pub const STRIP_HEIGHT: u32 = 144;
/// 12.5% margin top and bottom; the safe area is the middle 75%.
pub const SAFE_AREA_TOP: u32 = STRIP_HEIGHT / 8;
pub const SAFE_AREA_HEIGHT: u32 = STRIP_HEIGHT - 2 * SAFE_AREA_TOP;

pub const MIN_STAMPS: u32 = 1;
pub const MAX_STAMPS: u32 = 30;

const MIN_STAMP_DIAMETER: u32 = 10;
const MAX_STAMP_DIAMETER: u32 = 80;

#[derive(Debug, Clone, Copy)]
enum TierShape {
    /// One row holding every stamp.
    SingleRow,
    Grid(u32, u32),
}

/// Ordered `(max stamp count, shape)` tiers; first match wins.
const LAYOUT_TIERS: [(u32, TierShape); 9] = [
    (1, TierShape::SingleRow),
    (5, TierShape::SingleRow),
    (10, TierShape::Grid(2, 5)),
    (12, TierShape::Grid(2, 6)),
    (15, TierShape::Grid(2, 8)),
    (18, TierShape::Grid(2, 9)),
    (20, TierShape::Grid(3, 7)),
    (24, TierShape::Grid(3, 8)),
    (27, TierShape::Grid(3, 9)),
];
const OVERFLOW_SHAPE: (u32, u32) = (3, 10);

/// `(max stamp count, gap px at 1x)`; counts above the last tier use the fallback.
const GAP_TIERS: [(u32, u32); 2] = [(10, 12), (20, 8)];
const GAP_FALLBACK: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutResult {
    pub rows: u32,
    pub cols: u32,
    pub stamp_count: u32,
}

impl LayoutResult {
    pub fn capacity(&self) -> u32 {
        self.rows * self.cols
    }
}

/// Output resolution multiplier required by the wallet platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scale {
    X1,
    X2,
    X3,
}

impl Scale {
    pub const ALL: [Scale; 3] = [Scale::X1, Scale::X2, Scale::X3];

    pub fn factor(self) -> u32 {
        match self {
            Scale::X1 => 1,
            Scale::X2 => 2,
            Scale::X3 => 3,
        }
    }

    pub fn from_factor(factor: u32) -> Option<Self> {
        match factor {
            1 => Some(Scale::X1),
            2 => Some(Scale::X2),
            3 => Some(Scale::X3),
            _ => None,
        }
    }

    /// Bundle filename suffix, e.g. `strip@2x.png`.
    pub fn file_suffix(self) -> &'static str {
        match self {
            Scale::X1 => "",
            Scale::X2 => "@2x",
            Scale::X3 => "@3x",
        }
    }
}

/// Map a stamp count onto the tier table.
///
/// Anything outside `1..=30` is clamped to the nearest tier.
pub fn calculate_layout(stamp_count: u32) -> LayoutResult {
    let n = stamp_count.clamp(MIN_STAMPS, MAX_STAMPS);

    let (rows, cols) = LAYOUT_TIERS
        .iter()
        .find(|(max, _)| n <= *max)
        .map(|(_, shape)| match shape {
            TierShape::SingleRow => (1, n),
            TierShape::Grid(rows, cols) => (*rows, *cols),
        })
        .unwrap_or(OVERFLOW_SHAPE);

    LayoutResult {
        rows,
        cols,
        stamp_count: n,
    }
}

fn gap_for(stamp_count: u32) -> u32 {
    GAP_TIERS
        .iter()
        .find(|(max, _)| stamp_count <= *max)
        .map(|(_, gap)| *gap)
        .unwrap_or(GAP_FALLBACK)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionResult {
    pub strip_width: u32,
    pub strip_height: u32,
    pub safe_area_top: u32,
    pub safe_area_height: u32,
    pub stamp_diameter: u32,
    pub gap: u32,
    pub scale: u32,
    pub rows: u32,
    pub cols: u32,
    /// Top-left corner of the stamp grid.
    pub origin_x: f64,
    pub origin_y: f64,
}

impl DimensionResult {
    pub fn grid_width(&self) -> u32 {
        self.stamp_diameter * self.cols + self.gap * self.cols.saturating_sub(1)
    }

    pub fn grid_height(&self) -> u32 {
        self.stamp_diameter * self.rows + self.gap * self.rows.saturating_sub(1)
    }

    /// Center of stamp `index`, row-major.
    pub fn cell_center(&self, index: u32) -> (f64, f64) {
        let cols = self.cols.max(1);
        let row = index / cols;
        let col = index % cols;
        let pitch = f64::from(self.stamp_diameter + self.gap);
        let radius = f64::from(self.stamp_diameter) / 2.0;
        (
            self.origin_x + f64::from(col) * pitch + radius,
            self.origin_y + f64::from(row) * pitch + radius,
        )
    }

    fn scaled(self, scale: Scale) -> Self {
        let n = scale.factor();
        let nf = f64::from(n);
        Self {
            strip_width: self.strip_width * n,
            strip_height: self.strip_height * n,
            safe_area_top: self.safe_area_top * n,
            safe_area_height: self.safe_area_height * n,
            stamp_diameter: self.stamp_diameter * n,
            gap: self.gap * n,
            scale: n,
            rows: self.rows,
            cols: self.cols,
            origin_x: self.origin_x * nf,
            origin_y: self.origin_y * nf,
        }
    }
}

/// Concrete strip geometry for a layout at the given scale.
///
/// Computed once at 1x and multiplied, so every scale is exactly proportional.
pub fn calculate_dimensions(layout: &LayoutResult, scale: Scale) -> DimensionResult {
    base_dimensions(layout).scaled(scale)
}

fn base_dimensions(layout: &LayoutResult) -> DimensionResult {
    let rows = layout.rows.max(1);
    let cols = layout.cols.max(1);
    let gap = gap_for(layout.stamp_count);

    let by_width = f64::from(STRIP_WIDTH.saturating_sub(gap * (cols - 1))) / f64::from(cols);
    let by_height =
        f64::from(SAFE_AREA_HEIGHT.saturating_sub(gap * (rows - 1))) / f64::from(rows);
    let diameter = (by_width.min(by_height).floor() as u32)
        .clamp(MIN_STAMP_DIAMETER, MAX_STAMP_DIAMETER);

    let grid_width = diameter * cols + gap * (cols - 1);
    let grid_height = diameter * rows + gap * (rows - 1);

    // Horizontal centering uses the full strip, vertical centering only the safe area.
    let origin_x = (f64::from(STRIP_WIDTH) - f64::from(grid_width)) / 2.0;
    let origin_y =
        f64::from(SAFE_AREA_TOP) + (f64::from(SAFE_AREA_HEIGHT) - f64::from(grid_height)) / 2.0;

    tracing::debug!(rows, cols, gap, diameter, origin_x, origin_y, "strip geometry");

    DimensionResult {
        strip_width: STRIP_WIDTH,
        strip_height: STRIP_HEIGHT,
        safe_area_top: SAFE_AREA_TOP,
        safe_area_height: SAFE_AREA_HEIGHT,
        stamp_diameter: diameter,
        gap,
        scale: 1,
        rows,
        cols,
        origin_x,
        origin_y,
    }
}
