// Sampler Module - Turns a captured frame into one representative color per tick
use anyhow::Result;
use image::imageops::{self, FilterType};
use image::{GenericImageView, RgbImage};

use crate::types::{Rgb, Zone};

// Working resolution for whole-frame averaging
pub const AVERAGE_WIDTH: u32 = 160;
pub const AVERAGE_HEIGHT: u32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    Edge,
    Average,
}

/// Result of a sampling step: either computed from this tick's frame or carried over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampled<T> {
    Fresh(T),
    Fallback(T),
}

impl<T> Sampled<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Sampled::Fallback(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Sampled::Fresh(v) | Sampled::Fallback(v) => v,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sampled<U> {
        match self {
            Sampled::Fresh(v) => Sampled::Fresh(f(v)),
            Sampled::Fallback(v) => Sampled::Fallback(f(v)),
        }
    }
}

// Running per-channel sums
#[derive(Default)]
struct ChannelSums {
    r: u64,
    g: u64,
    b: u64,
    count: u64,
}

impl ChannelSums {
    fn add(&mut self, pixel: &image::Rgb<u8>) {
        self.r += pixel[0] as u64;
        self.g += pixel[1] as u64;
        self.b += pixel[2] as u64;
        self.count += 1;
    }

    fn mean(&self) -> Option<Rgb> {
        if self.count == 0 {
            return None;
        }
        Some(Rgb::new(
            (self.r / self.count) as u8,
            (self.g / self.count) as u8,
            (self.b / self.count) as u8,
        ))
    }
}

/// Mean color of every pixel of the frame
pub fn average_color(frame: &RgbImage) -> Option<Rgb> {
    let mut sums = ChannelSums::default();
    if frame.width() > AVERAGE_WIDTH || frame.height() > AVERAGE_HEIGHT {
        let small = imageops::resize(frame, AVERAGE_WIDTH, AVERAGE_HEIGHT, FilterType::Triangle);
        small.pixels().for_each(|p| sums.add(p));
    } else {
        frame.pixels().for_each(|p| sums.add(p));
    }
    sums.mean()
}

/// Mean color over the union of the four border bands of width `edge_width`.
/// Corner pixels belong to two bands but are counted once.
pub fn edge_color(frame: &RgbImage, edge_width: u32) -> Option<Rgb> {
    let (width, height) = frame.dimensions();
    let band = edge_width.max(1);
    let mut sums = ChannelSums::default();

    for (x, y, pixel) in frame.enumerate_pixels() {
        let on_edge = y < band
            || y >= height.saturating_sub(band)
            || x < band
            || x >= width.saturating_sub(band);
        if on_edge {
            sums.add(pixel);
        }
    }

    sums.mean()
}

/// Mean color over several rectangles pooled together. Rectangles are clipped to the
/// frame, and a pixel covered by two rectangles counts twice.
pub fn zones_mean(frame: &RgbImage, zones: &[Zone]) -> Option<Rgb> {
    let mut sums = ChannelSums::default();
    for zone in zones {
        let view = imageops::crop_imm(frame, zone.x, zone.y, zone.width, zone.height);
        for (_, _, pixel) in view.pixels() {
            sums.add(&pixel);
        }
    }
    sums.mean()
}

/// Whole-screen color sampler with last-known-color fallback
pub struct FrameSampler {
    mode: SamplingMode,
    edge_width: u32,
    last_color: Rgb,
}

impl FrameSampler {
    pub fn new(mode: SamplingMode, edge_width: u32) -> Self {
        FrameSampler {
            mode,
            edge_width,
            last_color: Rgb::BLACK,
        }
    }

    pub fn color_of(&self, frame: &RgbImage) -> Option<Rgb> {
        match self.mode {
            SamplingMode::Edge => edge_color(frame, self.edge_width),
            SamplingMode::Average => average_color(frame),
        }
    }

    /// Sample this tick's capture. A failed capture or an empty frame yields the last
    /// known color instead of an error.
    pub fn sample(&mut self, capture: Result<&RgbImage>) -> Sampled<Rgb> {
        let color = capture.ok().and_then(|frame| self.color_of(frame));
        match color {
            Some(color) => {
                self.last_color = color;
                Sampled::Fresh(color)
            }
            None => Sampled::Fallback(self.last_color),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, image::Rgb(color))
    }

    #[test]
    fn test_edge_uniform_frame_any_width() {
        let frame = solid(64, 36, [10, 20, 30]);
        for edge_width in [1, 5, 17, 50, 500] {
            assert_eq!(edge_color(&frame, edge_width), Some(Rgb::new(10, 20, 30)));
        }
    }

    #[test]
    fn test_edge_ignores_center() {
        let mut frame = solid(20, 20, [0, 0, 200]);
        for y in 4..16 {
            for x in 4..16 {
                frame.put_pixel(x, y, image::Rgb([255, 255, 255]));
            }
        }
        assert_eq!(edge_color(&frame, 4), Some(Rgb::new(0, 0, 200)));
    }

    #[test]
    fn test_edge_counts_corners_once() {
        // 4x4 frame, band 1: 12 border pixels, one red corner
        let mut frame = solid(4, 4, [0, 0, 0]);
        frame.put_pixel(0, 0, image::Rgb([240, 0, 0]));
        assert_eq!(edge_color(&frame, 1), Some(Rgb::new(20, 0, 0)));
    }

    #[test]
    fn test_average_small_frame() {
        let mut frame = solid(2, 1, [0, 0, 0]);
        frame.put_pixel(1, 0, image::Rgb([100, 51, 255]));
        assert_eq!(average_color(&frame), Some(Rgb::new(50, 25, 127)));
    }

    #[test]
    fn test_average_downsamples_large_frame() {
        let frame = solid(640, 360, [80, 80, 80]);
        let color = average_color(&frame).unwrap();
        assert!(color.distance(&Rgb::new(80, 80, 80)) <= 3);
    }

    #[test]
    fn test_empty_frame_has_no_color() {
        let frame = RgbImage::new(0, 0);
        assert_eq!(edge_color(&frame, 5), None);
        assert_eq!(average_color(&frame), None);
    }

    #[test]
    fn test_zones_mean_pools_rectangles() {
        let mut frame = solid(10, 10, [0, 0, 0]);
        frame.put_pixel(9, 9, image::Rgb([90, 90, 90]));
        let zones = [Zone::new(0, 0, 1, 1), Zone::new(9, 9, 5, 5)];
        assert_eq!(zones_mean(&frame, &zones), Some(Rgb::new(45, 45, 45)));
    }

    #[test]
    fn test_sampler_falls_back_to_last_color() {
        let mut sampler = FrameSampler::new(SamplingMode::Edge, 3);
        let frame = solid(12, 12, [7, 8, 9]);
        assert_eq!(sampler.sample(Ok(&frame)), Sampled::Fresh(Rgb::new(7, 8, 9)));

        let failed = sampler.sample(Err(anyhow!("capture failed")));
        assert!(failed.is_fallback());
        assert_eq!(failed.into_inner(), Rgb::new(7, 8, 9));
    }

    #[test]
    fn test_sampler_initial_fallback_is_black() {
        let mut sampler = FrameSampler::new(SamplingMode::Average, 3);
        assert_eq!(sampler.sample(Err(anyhow!("no display"))), Sampled::Fallback(Rgb::BLACK));
    }
}
