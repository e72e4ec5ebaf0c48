use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use std::path::Path;

use super::text::{Align, Anchor, TextOverlay};

pub const WIDTH: u32 = 1920;
pub const HEIGHT: u32 = 1080;
pub const LEFT_MARGIN: i32 = 200;
pub const RIGHT_MARGIN: i32 = 50;
pub const TOP_MARGIN: i32 = 100;
pub const BOTTOM_MARGIN: i32 = 100;

pub const DB_CEILING: f64 = 0.0;
pub const DB_FLOOR: f64 = -140.0;

pub const TITLE: &str = "CODEC Loopback Frequency Spectrum";

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const TRACE: Rgb<u8> = Rgb([255, 0, 0]);
const INK: [u8; 3] = [0, 0, 0];

/// Grid lines every 10 dB, labels every 20 dB.
const GRID_STEPS: i32 = 14;

/// Horizontal pixel for data point `index` of `count`.
pub fn plot_x(index: usize, count: usize) -> i32 {
    let span = (WIDTH as i32 - LEFT_MARGIN - RIGHT_MARGIN - 1) as i64;
    (span * index as i64 / count.max(1) as i64) as i32 + LEFT_MARGIN
}

/// Vertical pixel for a dB value, clipped to the display range. NaN plots on
/// the floor.
pub fn plot_y(db: f64) -> i32 {
    let d = if db.is_nan() { DB_FLOOR } else { db.clamp(DB_FLOOR, DB_CEILING) };
    let bottom = HEIGHT as i32 - BOTTOM_MARGIN - 1;
    let span = (HEIGHT as i32 - TOP_MARGIN - BOTTOM_MARGIN - 1) as f64;
    bottom - (span * (d - DB_FLOOR) / (DB_CEILING - DB_FLOOR)) as i32
}

fn set_pixel(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x < 0 || y < 0 || x >= img.width() as i32 || y >= img.height() as i32 {
        return;
    }
    img.put_pixel(x as u32, y as u32, color);
}

fn hline(img: &mut RgbImage, y: i32, color: Rgb<u8>) {
    for x in LEFT_MARGIN..WIDTH as i32 - RIGHT_MARGIN {
        set_pixel(img, x, y, color);
    }
}

/// Line chart of a dB spectrum with a fixed 0 to -140 dB scale.
pub struct ChartRenderer {
    text: Option<TextOverlay>,
}

impl ChartRenderer {
    pub fn new(text: Option<TextOverlay>) -> Self {
        Self { text }
    }

    pub fn render(&self, values: &[f64], caption: &str) -> RgbImage {
        let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, WHITE);
        let w = WIDTH as i32;
        let h = HEIGHT as i32;
        let plot_h = h - TOP_MARGIN - BOTTOM_MARGIN;

        if let Some(ref text) = self.text {
            text.draw(&mut img, TITLE, Anchor::centered(w / 2, TOP_MARGIN / 2), INK);
            text.draw(&mut img, caption, Anchor::centered(w / 2, h - BOTTOM_MARGIN / 2), INK);
            for step in 0..=GRID_STEPS / 2 {
                let label = format!("{}dB ", -20 * step);
                let y = TOP_MARGIN + step * plot_h / (GRID_STEPS / 2);
                let anchor = Anchor::new(LEFT_MARGIN, y, Align::End, Align::Center);
                text.draw(&mut img, &label, anchor, INK);
            }
        }

        for step in 1..GRID_STEPS {
            hline(&mut img, TOP_MARGIN + step * plot_h / GRID_STEPS, BLACK);
        }

        let mut last = None;
        for (i, &db) in values.iter().enumerate() {
            let x = plot_x(i, values.len());
            let y = plot_y(db);
            let from = last.unwrap_or(y);
            for py in from.min(y)..=from.max(y) {
                set_pixel(&mut img, x, py, TRACE);
            }
            last = Some(y);
        }

        for y in [TOP_MARGIN, TOP_MARGIN - 1, h - BOTTOM_MARGIN, h - BOTTOM_MARGIN + 1] {
            hline(&mut img, y, BLACK);
        }
        for y in TOP_MARGIN..h - BOTTOM_MARGIN {
            for x in [LEFT_MARGIN, LEFT_MARGIN - 1, w - RIGHT_MARGIN, w - RIGHT_MARGIN + 1] {
                set_pixel(&mut img, x, y, BLACK);
            }
        }

        img
    }

    /// Render and persist. The image format follows the file extension.
    pub fn render_to_file(&self, values: &[f64], caption: &str, path: &Path) -> Result<()> {
        let img = self.render(values, caption);
        img.save(path)
            .with_context(|| format!("Failed to write chart: {}", path.display()))?;
        log::info!("Chart written to {}", path.display());
        Ok(())
    }
}
