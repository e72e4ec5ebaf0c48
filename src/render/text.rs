use anyhow::{Context, Result};
use fontdue::{Font, FontSettings};
use image::RgbImage;
use std::path::Path;

/// Monospace or sans fonts commonly present on desktop systems, tried in order
/// when no font is configured.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/liberation-mono/LiberationMono-Regular.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/System/Library/Fonts/Supplemental/Courier New.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Align {
    Start,
    Center,
    End,
}

/// Point a line of text is placed against, and which of its edges (or
/// centre) sits on that point along each axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Anchor {
    pub x: i32,
    pub y: i32,
    pub h_align: Align,
    pub v_align: Align,
}

impl Anchor {
    pub fn new(x: i32, y: i32, h_align: Align, v_align: Align) -> Self {
        Self { x, y, h_align, v_align }
    }

    pub fn centered(x: i32, y: i32) -> Self {
        Self::new(x, y, Align::Center, Align::Center)
    }

    /// Top-left corner of a `width` x `height` box placed on this anchor.
    pub fn top_left(&self, width: i32, height: i32) -> (i32, i32) {
        let offset = |align, size: i32| match align {
            Align::Start => 0,
            Align::Center => size / 2,
            Align::End => size,
        };
        (self.x - offset(self.h_align, width), self.y - offset(self.v_align, height))
    }
}

pub struct TextOverlay {
    font: Font,
    font_size: f32,
}

impl TextOverlay {
    pub fn from_bytes(bytes: &[u8], font_size: f32) -> Result<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| anyhow::anyhow!("Failed to parse font: {}", e))?;
        Ok(Self { font, font_size })
    }

    pub fn from_file(path: &Path, font_size: f32) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read font: {}", path.display()))?;
        Self::from_bytes(&bytes, font_size)
    }

    /// Load the configured font, or the first system font that parses.
    /// Returns `None` (with a warning) when nothing usable is found.
    pub fn load(configured: Option<&Path>, font_size: f32) -> Option<Self> {
        if let Some(path) = configured {
            match Self::from_file(path, font_size) {
                Ok(overlay) => return Some(overlay),
                Err(err) => log::warn!("{:#}", err),
            }
        }
        for candidate in FONT_CANDIDATES {
            let path = Path::new(candidate);
            if !path.exists() {
                continue;
            }
            if let Ok(overlay) = Self::from_file(path, font_size) {
                log::debug!("Using font {}", path.display());
                return Some(overlay);
            }
        }
        log::warn!("No usable font found; chart text will be omitted (use --font)");
        None
    }

    pub fn line_height(&self) -> u32 {
        self.font_size.ceil() as u32
    }

    /// Measure the width of rendered text in pixels.
    pub fn measure_width(&self, text: &str) -> u32 {
        let width: f32 = text
            .chars()
            .map(|ch| self.font.metrics(ch, self.font_size).advance_width)
            .sum();
        width.ceil() as u32
    }

    pub fn draw(&self, img: &mut RgbImage, text: &str, anchor: Anchor, color: [u8; 3]) {
        let width = self.measure_width(text) as i32;
        let height = self.line_height() as i32;
        let (left, top) = anchor.top_left(width, height);
        self.composite(img, text, left, top, color);
    }

    /// Alpha-blend glyph coverage onto an RGB image with the line's top-left
    /// corner at (`x`, `y`).
    pub fn composite(&self, img: &mut RgbImage, text: &str, x: i32, y: i32, color: [u8; 3]) {
        let (width, height) = (img.width() as i32, img.height() as i32);
        let mut cursor_x = x;
        for ch in text.chars() {
            let (metrics, bitmap) = self.font.rasterize(ch, self.font_size);
            let glyph_x = cursor_x + metrics.xmin;
            let glyph_y = y + self.font_size as i32 - metrics.height as i32 - metrics.ymin;

            for gy in 0..metrics.height {
                for gx in 0..metrics.width {
                    let alpha = bitmap[gy * metrics.width + gx];
                    if alpha == 0 {
                        continue;
                    }

                    let px = glyph_x + gx as i32;
                    let py = glyph_y + gy as i32;
                    if px < 0 || py < 0 || px >= width || py >= height {
                        continue;
                    }

                    let a = alpha as f32 / 255.0;
                    let inv_a = 1.0 - a;
                    let pixel = img.get_pixel_mut(px as u32, py as u32);
                    for c in 0..3 {
                        pixel.0[c] = (color[c] as f32 * a + pixel.0[c] as f32 * inv_a) as u8;
                    }
                }
            }

            cursor_x += metrics.advance_width.round() as i32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_places_box_by_alignment() {
        assert_eq!(Anchor::new(100, 50, Align::Start, Align::Start).top_left(40, 20), (100, 50));
        assert_eq!(Anchor::centered(100, 50).top_left(40, 20), (80, 40));
        assert_eq!(Anchor::new(100, 50, Align::End, Align::Center).top_left(40, 20), (60, 40));
        assert_eq!(Anchor::new(100, 50, Align::Center, Align::End).top_left(41, 20), (80, 30));
    }

    #[test]
    fn rejects_non_font_bytes() {
        assert!(TextOverlay::from_bytes(b"definitely not a font", 20.0).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = TextOverlay::from_file(Path::new("/nonexistent/font.ttf"), 20.0)
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("/nonexistent/font.ttf"));
    }
}
