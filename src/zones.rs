// Zones Module - Left/right super-zone extraction for dual-lamp mode
//
// Each side pools its vertical edge band with its half of the top and bottom bands,
// so content near a top or bottom corner goes to the lamp on that side.
use anyhow::Result;
use image::RgbImage;

use crate::sampler::{zones_mean, Sampled};
use crate::types::{ColorPair, Rgb, Zone};

/// The three rectangles making up each side's zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneLayout {
    pub left: [Zone; 3],
    pub right: [Zone; 3],
}

impl ZoneLayout {
    /// Lay out both zones for a frame. The band width is clamped to half the frame in
    /// each direction so the two sides never overlap.
    pub fn for_frame(width: u32, height: u32, edge_width: u32) -> Self {
        let band = edge_width.min(width / 2).min(height / 2).max(1);
        let half = width / 2;
        let bottom_y = height.saturating_sub(band);

        let left = [
            Zone::new(0, 0, band, height),
            Zone::new(0, 0, half, band),
            Zone::new(0, bottom_y, half, band),
        ];
        let right = [
            Zone::new(width.saturating_sub(band), 0, band, height),
            Zone::new(half, 0, width - half, band),
            Zone::new(half, bottom_y, width - half, band),
        ];

        ZoneLayout { left, right }
    }
}

pub struct ZoneExtractor {
    edge_width: u32,
}

impl ZoneExtractor {
    pub fn new(edge_width: u32) -> Self {
        ZoneExtractor { edge_width }
    }

    /// Average each side's zone. `None` when the frame has no pixels to sample.
    pub fn extract(&self, frame: &RgbImage) -> Option<ColorPair> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        let layout = ZoneLayout::for_frame(width, height, self.edge_width);
        let left = zones_mean(frame, &layout.left)?;
        let right = zones_mean(frame, &layout.right)?;
        Some(ColorPair { left, right })
    }

    /// Sample this tick's capture; any failure yields neutral gray on both sides
    pub fn sample(&self, capture: Result<&RgbImage>) -> Sampled<ColorPair> {
        match capture.ok().and_then(|frame| self.extract(frame)) {
            Some(pair) => Sampled::Fresh(pair),
            None => Sampled::Fallback(ColorPair::splat(Rgb::NEUTRAL_GRAY)),
        }
    }
}
