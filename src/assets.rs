//! Asset Resolution - Decode, Default, Scale
//!
//! Asset failures are the only recoverable errors in generation: a missing or
//! corrupt image is replaced by a deterministic default and reported as a
//! warning. Nothing here touches the filesystem beyond the path it was given.

use base64::Engine;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::color::Rgb;
use crate::layout::Scale;
use crate::raster::{self, Canvas};
use crate::templates::{AssetSource, ImageAssets};

/// Icon box at 1x.
pub const ICON_SIZE: (u32, u32) = (29, 29);
/// Logo bounding box at 1x.
pub const LOGO_BOX: (u32, u32) = (160, 50);
/// Decoded images larger than this on either side are refused.
pub const MAX_ASSET_DIMENSION: u32 = 4096;
/// Logos wider than this ratio fill the header; logo text is dropped.
pub const WIDE_LOGO_RATIO: f64 = 1.5;
/// Default glyphs are drawn at the 3x size and scaled down.
const LOGO_GLYPH_SIDE: u16 = 150;
const ICON_GLYPH_SIDE: u16 = 87;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("asset path escapes the asset root: {0}")]
    OutsideRoot(String),

    #[error("failed to read asset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid base64 asset data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image has unusable dimensions {0}x{1}")]
    Dimensions(u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    Logo,
    Icon,
    Strip,
    StampUnredeemed,
    StampEarned,
    StampMilestone,
}

impl AssetRole {
    pub fn name(self) -> &'static str {
        match self {
            AssetRole::Logo => "logo",
            AssetRole::Icon => "icon",
            AssetRole::Strip => "strip",
            AssetRole::StampUnredeemed => "stamp_unredeemed",
            AssetRole::StampEarned => "stamp_earned",
            AssetRole::StampMilestone => "stamp_milestone",
        }
    }

    pub fn source(self, images: &ImageAssets) -> Option<&AssetSource> {
        match self {
            AssetRole::Logo => images.logo.as_ref(),
            AssetRole::Icon => images.icon.as_ref(),
            AssetRole::Strip => images.strip.as_ref(),
            AssetRole::StampUnredeemed => images.stamp_unredeemed.as_ref(),
            AssetRole::StampEarned => images.stamp_earned.as_ref(),
            AssetRole::StampMilestone => images.stamp_milestone.as_ref(),
        }
    }

    /// Icon and logo must always be present in a bundle.
    pub fn is_required(self) -> bool {
        matches!(self, AssetRole::Logo | AssetRole::Icon)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetWarning {
    pub role: AssetRole,
    pub message: String,
}

/// Loads asset bytes, confining relative paths to an optional root.
#[derive(Debug, Clone, Default)]
pub struct AssetResolver {
    root: Option<PathBuf>,
}

impl AssetResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Only inline (base64) sources resolve.
    pub fn inline_only() -> Self {
        Self { root: None }
    }

    pub fn load(&self, source: &AssetSource) -> Result<Vec<u8>, AssetError> {
        match source {
            AssetSource::Base64 { base64 } => {
                Ok(base64::engine::general_purpose::STANDARD.decode(base64.trim())?)
            }
            AssetSource::Path { path } => {
                let full = self.resolve_path(path)?;
                fs::read(&full).map_err(|source| {
                    if source.kind() == std::io::ErrorKind::NotFound {
                        AssetError::NotFound(path.clone())
                    } else {
                        AssetError::Io {
                            path: path.clone(),
                            source,
                        }
                    }
                })
            }
        }
    }

    pub fn decode(&self, source: &AssetSource) -> Result<RgbaImage, AssetError> {
        let bytes = self.load(source)?;
        let img = image::load_from_memory(&bytes)?.to_rgba8();
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 || w > MAX_ASSET_DIMENSION || h > MAX_ASSET_DIMENSION {
            return Err(AssetError::Dimensions(w, h));
        }
        Ok(img)
    }

    fn resolve_path(&self, path: &str) -> Result<PathBuf, AssetError> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| AssetError::NotFound(path.to_string()))?;
        let rel = Path::new(path);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(AssetError::OutsideRoot(path.to_string()));
        }
        Ok(root.join(rel))
    }
}

/// Decoded template images, with defaults already substituted.
#[derive(Debug, Clone)]
pub struct ResolvedAssets {
    pub logo: RgbaImage,
    pub icon: RgbaImage,
    pub strip: Option<RgbaImage>,
    pub stamp_unredeemed: Option<RgbaImage>,
    pub stamp_earned: Option<RgbaImage>,
    pub stamp_milestone: Option<RgbaImage>,
    pub warnings: Vec<AssetWarning>,
}

impl ResolvedAssets {
    pub fn logo_aspect_ratio(&self) -> f64 {
        f64::from(self.logo.width()) / f64::from(self.logo.height().max(1))
    }

    pub fn has_wide_logo(&self) -> bool {
        self.logo_aspect_ratio() > WIDE_LOGO_RATIO
    }
}

/// Decode every referenced image. Failures become warnings plus defaults.
pub fn resolve_assets(
    images: &ImageAssets,
    resolver: &AssetResolver,
    glyph: Rgb,
    backdrop: Rgb,
) -> ResolvedAssets {
    let mut warnings = Vec::new();
    let mut take = |role: AssetRole| -> Option<RgbaImage> {
        let source = role.source(images)?;
        match resolver.decode(source) {
            Ok(img) => Some(img),
            Err(err) => {
                tracing::warn!(role = role.name(), error = %err, "asset unusable, falling back");
                warnings.push(AssetWarning {
                    role,
                    message: format!("{} unusable ({err}); default substituted", role.name()),
                });
                None
            }
        }
    };

    let logo = take(AssetRole::Logo);
    let icon = take(AssetRole::Icon);
    let strip = take(AssetRole::Strip);
    let stamp_unredeemed = take(AssetRole::StampUnredeemed);
    let stamp_earned = take(AssetRole::StampEarned);
    let stamp_milestone = take(AssetRole::StampMilestone);

    let logo = logo.unwrap_or_else(|| {
        if images.logo.is_none() {
            warnings.push(missing_warning(AssetRole::Logo));
        }
        default_glyph(LOGO_GLYPH_SIDE, glyph, backdrop)
    });
    let icon = icon.unwrap_or_else(|| {
        if images.icon.is_none() {
            warnings.push(missing_warning(AssetRole::Icon));
        }
        default_glyph(ICON_GLYPH_SIDE, glyph, backdrop)
    });

    ResolvedAssets {
        logo,
        icon,
        strip,
        stamp_unredeemed,
        stamp_earned,
        stamp_milestone,
        warnings,
    }
}

fn missing_warning(role: AssetRole) -> AssetWarning {
    AssetWarning {
        role,
        message: format!("{} not provided; default substituted", role.name()),
    }
}

/// Square placeholder: a filled disc on a rounded backdrop. Same inputs, same pixels.
pub fn default_glyph(side: u16, glyph: Rgb, backdrop: Rgb) -> RgbaImage {
    let mut canvas = Canvas::square(side);
    let c = f64::from(canvas.width()) / 2.0;
    canvas.fill_circle(c, c, c, backdrop, 1.0);
    canvas.fill_circle(c, c, c * 0.55, glyph, 1.0);
    canvas.finish()
}

/// Icon at every scale, each exactly `ICON_SIZE * scale`.
pub fn icon_set(icon: &RgbaImage) -> Vec<(Scale, RgbaImage)> {
    Scale::ALL
        .into_iter()
        .map(|scale| {
            let k = scale.factor();
            (scale, raster::contain_fit(icon, ICON_SIZE.0 * k, ICON_SIZE.1 * k))
        })
        .collect()
}

/// Logo at every scale; the 1x size is fitted once and multiplied.
pub fn logo_set(logo: &RgbaImage) -> Vec<(Scale, RgbaImage)> {
    let (w, h) = raster::fit_dimensions(logo.width(), logo.height(), LOGO_BOX.0, LOGO_BOX.1);
    Scale::ALL
        .into_iter()
        .map(|scale| {
            let k = scale.factor();
            (scale, raster::resample(logo, w * k, h * k))
        })
        .collect()
}
