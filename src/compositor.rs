//! Stamp Compositor - Strip Rasters at 1x, 2x, 3x
//!
//! One logical composition per request. The 1x strip is drawn directly; 2x
//! and 3x are resamples of it, never recomposed, so all three stay
//! proportional. Output dimensions are asserted before anything is accepted.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::layout::{
    calculate_dimensions, DimensionResult, LayoutResult, Scale, STRIP_HEIGHT, STRIP_WIDTH,
};
use crate::raster::{self, Canvas, CanvasSizeError};

/// Unredeemed stamps are drawn at this opacity.
pub const UNREDEEMED_OPACITY: f32 = 0.3;
/// Custom strip textures sit under the grid at this opacity.
pub const TEXTURE_OPACITY: f32 = 0.35;
const MUTED_FILL_OPACITY: f32 = 0.15;
const OUTLINE_OPACITY: f32 = 0.6;
const SHADOW_OPACITY: f32 = 0.25;
/// Milestone ring width as a fraction of the stamp diameter.
const MILESTONE_RING_RATIO: f64 = 0.1;
const MIN_MILESTONE_RING: f64 = 3.0;
const OUTLINE_WIDTH: f64 = 2.0;

pub const DEFAULT_ACCENT: Rgb = Rgb::new(255, 196, 0);

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("strip at {scale}x is {actual_w}x{actual_h}, expected {expected_w}x{expected_h}")]
    DimensionMismatch {
        scale: u32,
        expected_w: u32,
        expected_h: u32,
        actual_w: u32,
        actual_h: u32,
    },

    #[error(transparent)]
    Canvas(#[from] CanvasSizeError),

    #[error("failed to encode strip at {scale}x: {source}")]
    Encode {
        scale: u32,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StampState {
    Unredeemed,
    Earned,
    Milestone,
}

/// State per index `0..stamps_required`: milestone first, then earned.
pub fn derive_stamp_states(
    stamps_required: u32,
    stamps_earned: u32,
    milestones: &[u32],
) -> Vec<StampState> {
    (0..stamps_required)
        .map(|index| {
            if milestones.contains(&(index + 1)) {
                StampState::Milestone
            } else if index < stamps_earned {
                StampState::Earned
            } else {
                StampState::Unredeemed
            }
        })
        .collect()
}

/// One drawn stamp, in 1x coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampCell {
    pub index: u32,
    pub state: StampState,
    /// Earned opacity applies; independent of milestone styling.
    pub earned: bool,
    pub center_x: f64,
    pub center_y: f64,
    pub diameter: u32,
}

#[derive(Debug, Clone)]
pub enum StripBackground {
    Solid(Rgb),
    /// Texture drawn over `base`, cover-fitted to the strip.
    Texture { base: Rgb, image: RgbaImage },
}

impl StripBackground {
    fn paint(
        &self,
        width: u32,
        height: u32,
        texture_opacity: f32,
    ) -> Result<Canvas, CanvasSizeError> {
        let mut canvas = Canvas::new(width, height)?;
        match self {
            StripBackground::Solid(color) => canvas.fill(*color),
            StripBackground::Texture { base, image } => {
                canvas.fill(*base);
                let texture = raster::cover_fit(image, width, height);
                canvas.draw_full(&texture, texture_opacity)?;
            }
        }
        Ok(canvas)
    }
}

#[derive(Debug, Clone)]
pub enum StampArtwork {
    Icon(RgbaImage),
    /// Plain circle glyph drawn from the palette.
    Fallback,
}

impl StampArtwork {
    pub fn from_optional(icon: Option<RgbaImage>) -> Self {
        icon.map_or(StampArtwork::Fallback, StampArtwork::Icon)
    }

    fn sized(&self, diameter: u32) -> Self {
        match self {
            StampArtwork::Icon(img) => {
                StampArtwork::Icon(raster::contain_fit(img, diameter, diameter))
            }
            StampArtwork::Fallback => StampArtwork::Fallback,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StampArtworkSet {
    pub unredeemed: StampArtwork,
    pub earned: StampArtwork,
    /// Replaces the state artwork on milestone positions when present.
    pub milestone: Option<StampArtwork>,
}

impl Default for StampArtworkSet {
    fn default() -> Self {
        Self {
            unredeemed: StampArtwork::Fallback,
            earned: StampArtwork::Fallback,
            milestone: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StampPalette {
    pub fill: Rgb,
    pub outline: Rgb,
    pub accent: Rgb,
    pub shadow: Rgb,
}

#[derive(Debug, Clone)]
pub struct StampGridSpec {
    pub background: StripBackground,
    pub layout: LayoutResult,
    pub stamps_earned: u32,
    pub milestones: Vec<u32>,
    pub artwork: StampArtworkSet,
    pub palette: StampPalette,
}

/// What the strip shows; chosen explicitly by the template.
#[derive(Debug, Clone)]
pub enum StripPlan {
    StampGrid(StampGridSpec),
    Static(StripBackground),
}

#[derive(Debug, Clone)]
pub struct StripRasters {
    /// Ordered 1x, 2x, 3x.
    pub images: Vec<(Scale, RgbaImage)>,
    /// Empty for static strips.
    pub cells: Vec<StampCell>,
}

impl StripRasters {
    pub fn image(&self, scale: Scale) -> Option<&RgbaImage> {
        self.images.iter().find(|(s, _)| *s == scale).map(|(_, img)| img)
    }

    pub fn encode_png(&self) -> Result<Vec<(Scale, Vec<u8>)>, RasterError> {
        self.images
            .iter()
            .map(|(scale, img)| {
                raster::encode_png(img)
                    .map(|bytes| (*scale, bytes))
                    .map_err(|source| RasterError::Encode {
                        scale: scale.factor(),
                        source,
                    })
            })
            .collect()
    }
}

pub struct StampCompositor;

impl StampCompositor {
    #[tracing::instrument(skip_all)]
    pub fn compose(plan: &StripPlan) -> Result<StripRasters, RasterError> {
        match plan {
            StripPlan::StampGrid(spec) => Self::compose_grid(spec),
            StripPlan::Static(background) => Self::compose_static(background),
        }
    }

    fn compose_grid(spec: &StampGridSpec) -> Result<StripRasters, RasterError> {
        let dims = calculate_dimensions(&spec.layout, Scale::X1);
        let cells = plan_cells(spec, &dims);

        let mut canvas = spec
            .background
            .paint(dims.strip_width, dims.strip_height, TEXTURE_OPACITY)?;

        let artwork = StampArtworkSet {
            unredeemed: spec.artwork.unredeemed.sized(dims.stamp_diameter),
            earned: spec.artwork.earned.sized(dims.stamp_diameter),
            milestone: spec.artwork.milestone.as_ref().map(|a| a.sized(dims.stamp_diameter)),
        };
        for cell in &cells {
            render_cell(&mut canvas, cell, &artwork, &spec.palette)?;
        }

        let images = upscale_from_base(canvas.finish())?;
        tracing::debug!(stamps = cells.len(), "stamp strip composed");
        Ok(StripRasters {
            images,
            cells,
        })
    }

    fn compose_static(background: &StripBackground) -> Result<StripRasters, RasterError> {
        let mut images = Vec::with_capacity(Scale::ALL.len());
        for scale in Scale::ALL {
            let k = scale.factor();
            let img = background.paint(STRIP_WIDTH * k, STRIP_HEIGHT * k, 1.0)?.finish();
            check_dimensions(scale, &img)?;
            images.push((scale, img));
        }
        Ok(StripRasters {
            images,
            cells: Vec::new(),
        })
    }
}

fn plan_cells(spec: &StampGridSpec, dims: &DimensionResult) -> Vec<StampCell> {
    let required = spec.layout.stamp_count;
    let drawn = spec.layout.capacity().min(required);
    let states = derive_stamp_states(required, spec.stamps_earned, &spec.milestones);
    states
        .into_iter()
        .take(drawn as usize)
        .zip(0u32..)
        .map(|(state, index)| {
            let (center_x, center_y) = dims.cell_center(index);
            StampCell {
                index,
                state,
                earned: index < spec.stamps_earned,
                center_x,
                center_y,
                diameter: dims.stamp_diameter,
            }
        })
        .collect()
}

fn render_cell(
    canvas: &mut Canvas,
    cell: &StampCell,
    artwork: &StampArtworkSet,
    palette: &StampPalette,
) -> Result<(), CanvasSizeError> {
    let r = f64::from(cell.diameter) / 2.0;
    let (cx, cy) = (cell.center_x, cell.center_y);

    let state_art = if cell.earned {
        &artwork.earned
    } else {
        &artwork.unredeemed
    };
    let art = match (cell.state, &artwork.milestone) {
        (StampState::Milestone, Some(milestone)) => milestone,
        _ => state_art,
    };

    match art {
        StampArtwork::Icon(icon) => {
            let opacity = if cell.earned { 1.0 } else { UNREDEEMED_OPACITY };
            // Whole-pixel origin keeps the icon unresampled.
            canvas.draw_image(icon, (cx - r).round(), (cy - r).round(), opacity)?;
        }
        StampArtwork::Fallback if cell.earned => {
            let offset = (r * 0.08).max(1.0);
            let shadow_r = r - offset;
            canvas.fill_circle(cx, cy + offset, shadow_r, palette.shadow, SHADOW_OPACITY);
            canvas.fill_circle(cx, cy, r, palette.fill, 1.0);
        }
        StampArtwork::Fallback => {
            canvas.fill_circle(cx, cy, r, palette.outline, MUTED_FILL_OPACITY);
            canvas.stroke_ring(cx, cy, r, OUTLINE_WIDTH, palette.outline, OUTLINE_OPACITY);
        }
    }

    // Ring goes on top so milestones read regardless of earned state.
    if cell.state == StampState::Milestone {
        let width = (f64::from(cell.diameter) * MILESTONE_RING_RATIO)
            .round()
            .max(MIN_MILESTONE_RING);
        canvas.stroke_ring(cx, cy, r, width, palette.accent, 1.0);
    }
    Ok(())
}

fn upscale_from_base(base: RgbaImage) -> Result<Vec<(Scale, RgbaImage)>, RasterError> {
    check_dimensions(Scale::X1, &base)?;
    let mut images = Vec::with_capacity(Scale::ALL.len());
    for scale in [Scale::X2, Scale::X3] {
        let k = scale.factor();
        let img = raster::resample(&base, STRIP_WIDTH * k, STRIP_HEIGHT * k);
        check_dimensions(scale, &img)?;
        images.push((scale, img));
    }
    images.insert(0, (Scale::X1, base));
    Ok(images)
}

fn check_dimensions(scale: Scale, img: &RgbaImage) -> Result<(), RasterError> {
    let k = scale.factor();
    let (expected_w, expected_h) = (STRIP_WIDTH * k, STRIP_HEIGHT * k);
    let (actual_w, actual_h) = img.dimensions();
    if (actual_w, actual_h) != (expected_w, expected_h) {
        return Err(RasterError::DimensionMismatch {
            scale: k,
            expected_w,
            expected_h,
            actual_w,
            actual_h,
        });
    }
    Ok(())
}
