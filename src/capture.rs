// Capture Module - Screen frame sources (external screenshot command or refreshed image file)
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use image::{imageops, RgbImage};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use crate::types::Zone;

/// Produces the pixels of a screen region. `None` means the whole primary display.
#[async_trait]
pub trait FrameSource: Send {
    async fn capture(&mut self, region: Option<Zone>) -> Result<RgbImage>;
}

// Crop to the requested region; a region outside the frame is an error, not an empty image
fn crop_to_region(frame: RgbImage, region: Option<Zone>) -> Result<RgbImage> {
    let Some(zone) = region else {
        return Ok(frame);
    };
    let (width, height) = frame.dimensions();
    if zone.x >= width || zone.y >= height {
        bail!("Region {} lies outside the {}x{} frame", zone, width, height);
    }
    Ok(imageops::crop_imm(&frame, zone.x, zone.y, zone.width, zone.height).to_image())
}

/// Runs a screenshot tool that writes an encoded image (PNG, PPM, BMP...) to stdout
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
}

impl CommandCapture {
    /// `command` is split on whitespace, e.g. `grim -t ppm -`
    pub fn new(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(|s| s.to_string());
        let program = parts.next().context("Capture command is empty")?;
        Ok(CommandCapture {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl FrameSource for CommandCapture {
    async fn capture(&mut self, region: Option<Zone>) -> Result<RgbImage> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;

        if !output.status.success() {
            bail!("{} exited with {}", self.program, output.status);
        }

        let frame = image::load_from_memory(&output.stdout)
            .with_context(|| format!("{} did not produce a readable image", self.program))?
            .to_rgb8();
        crop_to_region(frame, region)
    }
}

/// Reads an image file that another tool keeps overwriting with the latest screen
pub struct ImageFileCapture {
    path: PathBuf,
}

impl ImageFileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ImageFileCapture { path: path.into() }
    }
}

#[async_trait]
impl FrameSource for ImageFileCapture {
    async fn capture(&mut self, region: Option<Zone>) -> Result<RgbImage> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let frame = image::load_from_memory(&bytes)?.to_rgb8();
        crop_to_region(frame, region)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Plays back a fixed list of capture results, repeating the last one
    #[derive(Clone)]
    pub struct ScriptedSource {
        frames: Arc<Mutex<VecDeque<Option<RgbImage>>>>,
        pub regions: Arc<Mutex<Vec<Option<Zone>>>>,
    }

    impl ScriptedSource {
        // `None` entries play back as capture failures
        pub fn new(frames: Vec<Option<RgbImage>>) -> Self {
            ScriptedSource {
                frames: Arc::new(Mutex::new(frames.into())),
                regions: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn solid(width: u32, height: u32, color: [u8; 3]) -> Self {
            Self::new(vec![Some(RgbImage::from_pixel(width, height, image::Rgb(color)))])
        }

        pub fn capture_calls(&self) -> usize {
            self.regions.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn capture(&mut self, region: Option<Zone>) -> Result<RgbImage> {
            self.regions.lock().unwrap().push(region);
            let mut frames = self.frames.lock().unwrap();
            let next = if frames.len() > 1 {
                frames.pop_front().flatten()
            } else {
                frames.front().cloned().flatten()
            };
            next.ok_or_else(|| anyhow!("display unavailable"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_to_region() {
        let mut frame = RgbImage::from_pixel(10, 10, image::Rgb([0, 0, 0]));
        frame.put_pixel(5, 5, image::Rgb([255, 0, 0]));

        let cropped = crop_to_region(frame.clone(), Some(Zone::new(5, 5, 2, 2))).unwrap();
        assert_eq!(cropped.dimensions(), (2, 2));
        assert_eq!(cropped.get_pixel(0, 0), &image::Rgb([255, 0, 0]));

        // clipped at the frame edge
        let cropped = crop_to_region(frame.clone(), Some(Zone::new(8, 8, 10, 10))).unwrap();
        assert_eq!(cropped.dimensions(), (2, 2));

        assert!(crop_to_region(frame.clone(), Some(Zone::new(10, 0, 1, 1))).is_err());
        assert_eq!(crop_to_region(frame, None).unwrap().dimensions(), (10, 10));
    }

    #[test]
    fn test_command_parsing() {
        let capture = CommandCapture::new("grim -t ppm -").unwrap();
        assert_eq!(capture.program, "grim");
        assert_eq!(capture.args, vec!["-t", "ppm", "-"]);
        assert!(CommandCapture::new("   ").is_err());
    }

    #[tokio::test]
    async fn test_image_file_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screen.png");
        RgbImage::from_pixel(4, 3, image::Rgb([1, 2, 3])).save(&path).unwrap();

        let mut source = ImageFileCapture::new(&path);
        let frame = source.capture(None).await.unwrap();
        assert_eq!(frame.dimensions(), (4, 3));
        assert_eq!(frame.get_pixel(3, 2), &image::Rgb([1, 2, 3]));

        let frame = source.capture(Some(Zone::new(1, 1, 2, 2))).await.unwrap();
        assert_eq!(frame.dimensions(), (2, 2));
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let mut source = ImageFileCapture::new("/nonexistent/screen.png");
        assert!(source.capture(None).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_is_error() {
        let mut source = CommandCapture::new("false").unwrap();
        assert!(source.capture(None).await.is_err());
    }
}
