use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ImageEncoder, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect as PixelRect;

use crate::catalog::OverlayImage;
use crate::compositor::Surface;
use crate::error::{BoothError, Result};
use crate::face_detector::VideoFrame;
use crate::geometry::{PlacementResult, Point, Rect, SurfaceSize};

/// Outline width used by [`Surface::stroke_rect`].
const STROKE_WIDTH: i32 = 2;

/// Shown in place of frames that carry no pixels.
const BLANK_FRAME: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// In-memory RGBA output surface.
///
/// Frames are scaled to the surface with a triangle filter. Upright, fully
/// opaque overlays are resized and blitted; rotated or faded ones are
/// sampled nearest-neighbour through the inverse rotation and alpha
/// composited over the frame.
#[derive(Debug, Clone)]
pub struct RasterSurface {
    canvas: RgbaImage,
}

impl RasterSurface {
    /// Create a transparent surface.
    pub fn new(size: SurfaceSize) -> Self {
        Self {
            canvas: RgbaImage::new(size.width, size.height),
        }
    }

    /// The composited pixels.
    pub fn image(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Consume the surface, returning its pixels.
    pub fn into_image(self) -> RgbaImage {
        self.canvas
    }

    /// Encode the current contents as PNG.
    pub fn snapshot_png(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        PngEncoder::new(&mut buffer)
            .write_image(
                self.canvas.as_raw(),
                self.canvas.width(),
                self.canvas.height(),
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| BoothError::Surface(format!("PNG encoding failed: {e}")))?;
        Ok(buffer)
    }

    fn blend_at(&mut self, x: i64, y: i64, src: Rgba<u8>, opacity: f64) {
        if x < 0 || y < 0 || x >= self.canvas.width() as i64 || y >= self.canvas.height() as i64 {
            return;
        }
        let dst = self.canvas.get_pixel_mut(x as u32, y as u32);
        *dst = source_over(*dst, src, opacity);
    }

    /// Pixel index range `[start, end)` covering `[lo, hi)`, clipped to `limit`.
    fn span(lo: f64, hi: f64, limit: u32) -> (i64, i64) {
        let start = lo.floor().max(0.0) as i64;
        let end = (hi.ceil() as i64).min(limit as i64);
        (start, end)
    }
}

/// Porter-Duff source-over with an extra opacity multiplier on `src`.
fn source_over(dst: Rgba<u8>, src: Rgba<u8>, opacity: f64) -> Rgba<u8> {
    let sa = src[3] as f64 / 255.0 * opacity.clamp(0.0, 1.0);
    let da = dst[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |i: usize| {
        let c = (src[i] as f64 * sa + dst[i] as f64 * da * (1.0 - sa)) / out_a;
        c.round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round() as u8,
    ])
}

impl Surface for RasterSurface {
    fn size(&self) -> SurfaceSize {
        SurfaceSize::new(self.canvas.width(), self.canvas.height())
    }

    fn resize(&mut self, size: SurfaceSize) -> Result<()> {
        self.canvas = RgbaImage::new(size.width, size.height);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
        Ok(())
    }

    fn draw_frame(&mut self, frame: &VideoFrame<'_>) -> Result<()> {
        let (w, h) = (self.canvas.width(), self.canvas.height());
        let expected = frame.width as usize * frame.height as usize * 4;
        let pixels = match frame.rgba {
            Some(rgba) if rgba.len() >= expected => {
                RgbaImage::from_raw(frame.width, frame.height, rgba[..expected].to_vec())
            }
            Some(rgba) => {
                return Err(BoothError::Surface(format!(
                    "frame buffer holds {} bytes, {}x{} RGBA needs {expected}",
                    rgba.len(),
                    frame.width,
                    frame.height
                )))
            }
            None => None,
        };
        match pixels {
            Some(img) if (img.width(), img.height()) == (w, h) => self.canvas = img,
            Some(img) => self.canvas = image::imageops::resize(&img, w, h, FilterType::Triangle),
            None => {
                for pixel in self.canvas.pixels_mut() {
                    *pixel = BLANK_FRAME;
                }
            }
        }
        Ok(())
    }

    fn draw_image(&mut self, image: &OverlayImage, placement: &PlacementResult) -> Result<()> {
        if !placement.is_drawable() {
            return Ok(());
        }
        let src = image.pixels();
        let (iw, ih) = (src.width() as f64, src.height() as f64);
        if iw == 0.0 || ih == 0.0 {
            return Ok(());
        }

        if placement.rotation == 0.0 && placement.opacity >= 1.0 {
            let (w, h) = (placement.width.round() as u32, placement.height.round() as u32);
            if w == 0 || h == 0 {
                return Ok(());
            }
            let scaled = image::imageops::resize(src, w, h, FilterType::Triangle);
            let (x, y) = (placement.x.round() as i64, placement.y.round() as i64);
            image::imageops::overlay(&mut self.canvas, &scaled, x, y);
            return Ok(());
        }

        let center = placement.rect().center();
        let (w, h) = (placement.width, placement.height);
        let (sin, cos) = placement.rotation.sin_cos();
        // Axis-aligned extent of the rotated rectangle.
        let half_x = (w * cos.abs() + h * sin.abs()) / 2.0;
        let half_y = (w * sin.abs() + h * cos.abs()) / 2.0;
        let (x0, x1) = Self::span(center.x - half_x, center.x + half_x, self.canvas.width());
        let (y0, y1) = Self::span(center.y - half_y, center.y + half_y, self.canvas.height());

        for py in y0..y1 {
            for px in x0..x1 {
                let dx = px as f64 + 0.5 - center.x;
                let dy = py as f64 + 0.5 - center.y;
                // Inverse of a clockwise rotation in y-down coordinates.
                let lx = dx * cos + dy * sin;
                let ly = -dx * sin + dy * cos;
                let u = (lx / w + 0.5) * iw;
                let v = (ly / h + 0.5) * ih;
                if u < 0.0 || v < 0.0 || u >= iw || v >= ih {
                    continue;
                }
                let texel = *src.get_pixel(u as u32, v as u32);
                self.blend_at(px, py, texel, placement.opacity);
            }
        }
        Ok(())
    }

    fn stroke_rect(&mut self, rect: Rect, color: [u8; 4]) -> Result<()> {
        let (x, y) = (rect.x.round() as i32, rect.y.round() as i32);
        let (w, h) = (rect.width.round() as i32, rect.height.round() as i32);
        for inset in 0..STROKE_WIDTH {
            let (iw, ih) = (w - 2 * inset, h - 2 * inset);
            if iw <= 0 || ih <= 0 {
                break;
            }
            let outline = PixelRect::at(x + inset, y + inset).of_size(iw as u32, ih as u32);
            draw_hollow_rect_mut(&mut self.canvas, outline, Rgba(color));
        }
        Ok(())
    }

    fn fill_point(&mut self, at: Point, radius: f64, color: [u8; 4]) -> Result<()> {
        let center = (at.x.round() as i32, at.y.round() as i32);
        draw_filled_circle_mut(&mut self.canvas, center, radius.round() as i32, Rgba(color));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn placement(x: f64, y: f64, w: f64, h: f64, rotation: f64, opacity: f64) -> PlacementResult {
        PlacementResult {
            x,
            y,
            width: w,
            height: h,
            rotation,
            opacity,
        }
    }

    #[test]
    fn frame_is_scaled_to_surface() {
        let mut surface = RasterSurface::new(SurfaceSize::new(8, 8));
        let pixels: Vec<u8> = RED.0.repeat(16);
        surface
            .draw_frame(&VideoFrame::with_rgba(4, 4, &pixels))
            .unwrap();
        assert_eq!(surface.image().get_pixel(7, 7), &RED);
    }

    #[test]
    fn short_frame_buffer_is_an_error() {
        let mut surface = RasterSurface::new(SurfaceSize::new(4, 4));
        let err = surface
            .draw_frame(&VideoFrame::with_rgba(4, 4, &[0u8; 10]))
            .unwrap_err();
        assert!(matches!(err, BoothError::Surface(_)));
    }

    #[test]
    fn opaque_frame_draws_blank() {
        let mut surface = RasterSurface::new(SurfaceSize::new(4, 4));
        surface.draw_frame(&VideoFrame::opaque(640, 480)).unwrap();
        assert_eq!(surface.image().get_pixel(0, 0), &BLANK_FRAME);
    }

    #[test]
    fn overlay_lands_in_its_rectangle() {
        let mut surface = RasterSurface::new(SurfaceSize::new(20, 20));
        let overlay = OverlayImage::new(RgbaImage::from_pixel(4, 4, RED));
        surface
            .draw_image(&overlay, &placement(5.0, 5.0, 10.0, 10.0, 0.0, 1.0))
            .unwrap();
        assert_eq!(surface.image().get_pixel(10, 10), &RED);
        assert_eq!(surface.image().get_pixel(2, 2)[3], 0);
        assert_eq!(surface.image().get_pixel(15, 15)[3], 0);
    }

    #[test]
    fn rotation_turns_clockwise() {
        // Left half red, right half blue; a quarter turn puts red on top.
        let mut src = RgbaImage::new(2, 1);
        src.put_pixel(0, 0, RED);
        src.put_pixel(1, 0, BLUE);
        let mut surface = RasterSurface::new(SurfaceSize::new(40, 40));
        surface
            .draw_image(
                &OverlayImage::new(src),
                &placement(10.0, 15.0, 20.0, 10.0, FRAC_PI_2, 1.0),
            )
            .unwrap();
        assert_eq!(surface.image().get_pixel(20, 12), &RED);
        assert_eq!(surface.image().get_pixel(20, 27), &BLUE);
    }

    #[test]
    fn opacity_blends_over_frame() {
        let mut surface = RasterSurface::new(SurfaceSize::new(4, 4));
        surface.draw_frame(&VideoFrame::opaque(4, 4)).unwrap();
        let overlay = OverlayImage::new(RgbaImage::from_pixel(1, 1, RED));
        surface
            .draw_image(&overlay, &placement(0.0, 0.0, 4.0, 4.0, 0.0, 0.5))
            .unwrap();
        assert_eq!(surface.image().get_pixel(1, 1), &Rgba([128, 0, 0, 255]));
    }

    #[test]
    fn stroke_outlines_without_filling() {
        let mut surface = RasterSurface::new(SurfaceSize::new(20, 20));
        surface
            .stroke_rect(Rect::new(2.0, 2.0, 10.0, 10.0), [0, 255, 0, 255])
            .unwrap();
        assert_eq!(surface.image().get_pixel(2, 6)[1], 255);
        assert_eq!(surface.image().get_pixel(11, 6)[1], 255);
        assert_eq!(surface.image().get_pixel(6, 6)[3], 0);
        assert_eq!(surface.image().get_pixel(3, 6)[1], 255);
        assert_eq!(surface.image().get_pixel(4, 6)[3], 0);
    }

    #[test]
    fn landmark_dot_is_filled() {
        let mut surface = RasterSurface::new(SurfaceSize::new(10, 10));
        surface.fill_point(Point::new(5.0, 5.0), 2.0, BLUE.0).unwrap();
        for (x, y) in [(5, 5), (3, 5), (7, 5), (5, 3), (5, 7), (4, 4)] {
            assert_eq!(surface.image().get_pixel(x, y), &BLUE, "({x}, {y})");
        }
        assert_eq!(surface.image().get_pixel(2, 2)[3], 0);
    }

    #[test]
    fn snapshot_is_a_decodable_png() {
        let mut surface = RasterSurface::new(SurfaceSize::new(6, 3));
        surface.fill_point(Point::new(3.0, 1.0), 1.0, RED.0).unwrap();
        let png = surface.snapshot_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (6, 3));
        assert_eq!(decoded.get_pixel(3, 1), &RED);
        assert_eq!(decoded.get_pixel(2, 1), &RED);
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
    }
}
