//! Raster Primitives
//!
//! Shapes and image layers are rasterized by `vello_cpu` into a premultiplied
//! pixmap, then handed back as straight-alpha `image` buffers for resampling
//! and PNG output.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use kurbo::{Affine, BezPath, Circle, Rect, Shape};
use std::io::Cursor;
use std::sync::Arc;
use vello_cpu::peniko::color::{PremulRgba8, Rgba8};
use vello_cpu::peniko::{Color, Fill, ImageSampler};

use crate::color::Rgb;

/// Filter used for every resample; fixed so output bytes are reproducible.
pub const RESAMPLE_FILTER: FilterType = FilterType::Lanczos3;

/// Curve flattening tolerance in pixels.
const TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("canvas size {width}x{height} is outside 1..=65535")]
pub struct CanvasSizeError {
    pub width: u32,
    pub height: u32,
}

fn checked_size(width: u32, height: u32) -> Result<(u16, u16), CanvasSizeError> {
    let err = CanvasSizeError { width, height };
    let w = u16::try_from(width).map_err(|_| err)?;
    let h = u16::try_from(height).map_err(|_| err)?;
    if w == 0 || h == 0 {
        return Err(err);
    }
    Ok((w, h))
}

pub fn solid(width: u32, height: u32, color: Rgb) -> RgbaImage {
    RgbaImage::from_pixel(width, height, color.to_rgba(255))
}

fn paint_color(color: Rgb, opacity: f32) -> Color {
    let alpha = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    Color::from_rgba8(color.r, color.g, color.b, alpha)
}

fn premultiply(px: &Rgba<u8>) -> PremulRgba8 {
    let a = u16::from(px[3]);
    let scale = |c: u8| ((u16::from(c) * a + 127) / 255) as u8;
    PremulRgba8 {
        r: scale(px[0]),
        g: scale(px[1]),
        b: scale(px[2]),
        a: px[3],
    }
}

fn to_pixmap(img: &RgbaImage) -> Result<vello_cpu::Pixmap, CanvasSizeError> {
    let (w, h) = checked_size(img.width(), img.height())?;
    let pixels: Vec<PremulRgba8> = img.pixels().map(premultiply).collect();
    let may_have_opacities = pixels.iter().any(|px| px.a != 255);
    Ok(vello_cpu::Pixmap::from_parts_with_opacity(pixels, w, h, may_have_opacities))
}

/// Drawing surface for one strip or glyph.
pub struct Canvas {
    ctx: vello_cpu::RenderContext,
    width: u16,
    height: u16,
}

impl Canvas {
    /// Transparent canvas.
    pub fn new(width: u32, height: u32) -> Result<Self, CanvasSizeError> {
        let (width, height) = checked_size(width, height)?;
        Ok(Self {
            ctx: vello_cpu::RenderContext::new(width, height),
            width,
            height,
        })
    }

    /// Transparent square canvas; a zero side becomes one pixel.
    pub fn square(side: u16) -> Self {
        let side = side.max(1);
        Self {
            ctx: vello_cpu::RenderContext::new(side, side),
            width: side,
            height: side,
        }
    }

    pub fn width(&self) -> u32 {
        u32::from(self.width)
    }

    pub fn height(&self) -> u32 {
        u32::from(self.height)
    }

    fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, f64::from(self.width), f64::from(self.height))
    }

    pub fn fill(&mut self, color: Rgb) {
        self.ctx.set_paint(paint_color(color, 1.0));
        let bounds = self.bounds();
        self.ctx.fill_rect(&bounds);
    }

    fn fill_path(&mut self, path: &BezPath, rule: Fill, color: Rgb, opacity: f32) {
        self.ctx.set_fill_rule(rule);
        self.ctx.set_paint(paint_color(color, opacity));
        self.ctx.fill_path(path);
        self.ctx.set_fill_rule(Fill::NonZero);
    }

    pub fn fill_circle(&mut self, cx: f64, cy: f64, r: f64, color: Rgb, opacity: f32) {
        if r <= 0.0 {
            return;
        }
        let path = Circle::new((cx, cy), r).to_path(TOLERANCE);
        self.fill_path(&path, Fill::NonZero, color, opacity);
    }

    /// Ring whose outer edge sits at `outer_r`, `width` pixels thick.
    pub fn stroke_ring(
        &mut self,
        cx: f64,
        cy: f64,
        outer_r: f64,
        width: f64,
        color: Rgb,
        opacity: f32,
    ) {
        if outer_r <= 0.0 || width <= 0.0 {
            return;
        }
        let inner_r = (outer_r - width).max(0.0);
        let mut path = Circle::new((cx, cy), outer_r).to_path(TOLERANCE);
        if inner_r > 0.0 {
            path.extend(Circle::new((cx, cy), inner_r).path_elements(TOLERANCE));
        }
        self.fill_path(&path, Fill::EvenOdd, color, opacity);
    }

    /// Draw `src` with its top-left at `(left, top)`, scaling its alpha by `opacity`.
    pub fn draw_image(
        &mut self,
        src: &RgbaImage,
        left: f64,
        top: f64,
        opacity: f32,
    ) -> Result<(), CanvasSizeError> {
        let opacity = opacity.clamp(0.0, 1.0);
        if opacity <= 0.0 {
            return Ok(());
        }
        let pixmap = to_pixmap(src)?;
        self.ctx.set_paint(vello_cpu::Image {
            image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap)),
            sampler: ImageSampler::default(),
        });
        self.ctx.set_transform(Affine::translate((left, top)));
        if opacity < 1.0 {
            self.ctx.push_opacity_layer(opacity);
        }
        let extent = Rect::new(0.0, 0.0, f64::from(src.width()), f64::from(src.height()));
        self.ctx.fill_rect(&extent);
        if opacity < 1.0 {
            self.ctx.pop_layer();
        }
        self.ctx.reset_transform();
        Ok(())
    }

    /// Draw `src` over the whole canvas (same dimensions) at `opacity`.
    pub fn draw_full(&mut self, src: &RgbaImage, opacity: f32) -> Result<(), CanvasSizeError> {
        self.draw_image(src, 0.0, 0.0, opacity)
    }

    /// Rasterize everything drawn so far into a straight-alpha image.
    pub fn finish(mut self) -> RgbaImage {
        self.ctx.flush();
        let mut pixmap = vello_cpu::Pixmap::new(self.width, self.height);
        self.ctx.render_to_pixmap(&mut pixmap);
        let pixels: Vec<Rgba8> = pixmap.take_unpremultiplied();
        let width = u32::from(self.width);
        RgbaImage::from_fn(width, u32::from(self.height), |x, y| {
            let px = pixels[(y * width + x) as usize];
            Rgba([px.r, px.g, px.b, px.a])
        })
    }
}

pub fn resample(img: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    image::imageops::resize(img, width, height, RESAMPLE_FILTER)
}

/// Scale and center-crop so the image covers exactly `width x height`.
pub fn cover_fit(img: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    DynamicImage::ImageRgba8(img.clone())
        .resize_to_fill(width, height, RESAMPLE_FILTER)
        .to_rgba8()
}

/// Largest `(w, h)` with the source aspect ratio that fits inside the box.
pub fn fit_dimensions(src_w: u32, src_h: u32, box_w: u32, box_h: u32) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (box_w, box_h);
    }
    let scale = (f64::from(box_w) / f64::from(src_w)).min(f64::from(box_h) / f64::from(src_h));
    let w = (f64::from(src_w) * scale).round().clamp(1.0, f64::from(box_w)) as u32;
    let h = (f64::from(src_h) * scale).round().clamp(1.0, f64::from(box_h)) as u32;
    (w, h)
}

/// Fit inside `width x height` and center on a transparent canvas of exactly that size.
pub fn contain_fit(img: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (w, h) = fit_dimensions(img.width(), img.height(), width, height);
    let scaled = resample(img, w, h);
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    let left = i64::from((width - w) / 2);
    let top = i64::from((height - h) / 2);
    image::imageops::replace(&mut canvas, &scaled, left, top);
    canvas
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img.clone()).write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filled_circle_covers_center_not_corner() {
        let mut canvas = Canvas::new(20, 20).unwrap();
        canvas.fill(Rgb::BLACK);
        canvas.fill_circle(10.0, 10.0, 6.0, Rgb::WHITE, 1.0);
        let img = canvas.finish();
        assert_eq!(img.get_pixel(10, 10).0, [255, 255, 255, 255]);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 255]);
        // The edge is anti-aliased rather than stepped.
        let edge = img.get_pixel(15, 10)[0];
        assert!(edge > 0 && edge < 255, "edge pixel {edge}");
    }

    #[test]
    fn ring_leaves_center_untouched() {
        let mut canvas = Canvas::new(40, 40).unwrap();
        canvas.fill(Rgb::BLACK);
        canvas.stroke_ring(20.0, 20.0, 15.0, 3.0, Rgb::WHITE, 1.0);
        let img = canvas.finish();
        assert_eq!(img.get_pixel(20, 20)[0], 0);
        // Pixel center (33.5, 20.5) sits 13.5 from center: inside the band.
        assert_eq!(img.get_pixel(33, 20)[0], 255);
    }

    #[test]
    fn translucent_fill_over_transparent_keeps_color() {
        let mut canvas = Canvas::new(4, 4).unwrap();
        canvas.fill_circle(2.0, 2.0, 10.0, Rgb::new(255, 0, 0), 0.3);
        let px = *canvas.finish().get_pixel(1, 1);
        assert_eq!(px[3], 77);
        assert!(px[0] >= 253 && px[1] == 0 && px[2] == 0, "{px:?}");
    }

    #[test]
    fn image_layer_respects_offset_and_opacity() {
        let mut canvas = Canvas::new(20, 20).unwrap();
        canvas.fill(Rgb::BLACK);
        canvas.draw_image(&solid(4, 4, Rgb::WHITE), 10.0, 10.0, 0.5).unwrap();
        let img = canvas.finish();
        assert_eq!(img.get_pixel(5, 5)[0], 0);
        let half = img.get_pixel(11, 11)[0];
        assert!((126..=129).contains(&half), "half-opacity pixel {half}");
    }

    #[test]
    fn zero_sized_canvas_is_rejected() {
        assert!(Canvas::new(0, 10).is_err());
        assert!(Canvas::new(70_000, 10).is_err());
    }

    #[test]
    fn contain_fit_produces_exact_box() {
        let wide = solid(300, 100, Rgb::WHITE);
        let out = contain_fit(&wide, 29, 29);
        assert_eq!(out.dimensions(), (29, 29));
        assert_eq!(out.get_pixel(14, 0)[3], 0);
    }

    #[test]
    fn fit_dimensions_preserves_aspect() {
        assert_eq!(fit_dimensions(400, 100, 160, 50), (160, 40));
        assert_eq!(fit_dimensions(100, 100, 160, 50), (50, 50));
    }

    #[test]
    fn png_encoding_is_deterministic() {
        let img = solid(8, 8, Rgb::new(1, 2, 3));
        assert_eq!(encode_png(&img).unwrap(), encode_png(&img).unwrap());
    }
}
