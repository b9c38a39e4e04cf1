// Shared types module - Colors, zone rectangles and loop exit reasons used across modules

use anyhow::{anyhow, bail, Result};
use std::fmt;
use std::str::FromStr;

// Why the ambient loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    UserQuit,     // Operator pressed the exit key
    Interrupted,  // Ctrl+C / SIGTERM
}

// RGB color representation, every channel already within 0-255
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    /// Fallback for both zones when a dual-zone capture cannot be used
    pub const NEUTRAL_GRAY: Rgb = Rgb::new(50, 50, 50);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }

    /// Build a color from wide intermediate values, clamping each channel to 0-255
    pub fn from_clamped(r: i32, g: i32, b: i32) -> Self {
        Rgb {
            r: r.clamp(0, 255) as u8,
            g: g.clamp(0, 255) as u8,
            b: b.clamp(0, 255) as u8,
        }
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("Invalid hex color: {}", hex);
        }
        Ok(Rgb {
            r: u8::from_str_radix(&hex[0..2], 16)?,
            g: u8::from_str_radix(&hex[2..4], 16)?,
            b: u8::from_str_radix(&hex[4..6], 16)?,
        })
    }

    /// Named colors offered by the manual color mode
    pub fn from_name(name: &str) -> Option<Self> {
        let color = match name.trim().to_lowercase().as_str() {
            "red" => Rgb::new(255, 0, 0),
            "green" => Rgb::new(0, 255, 0),
            "blue" => Rgb::new(0, 0, 255),
            "white" => Rgb::WHITE,
            "purple" => Rgb::new(128, 0, 128),
            "orange" => Rgb::new(255, 165, 0),
            "yellow" => Rgb::new(255, 255, 0),
            "cyan" => Rgb::new(0, 255, 255),
            "off" | "black" => Rgb::BLACK,
            _ => return None,
        };
        Some(color)
    }

    /// Parse operator input: a color name, `RRGGBB` hex or `r,g,b` decimals.
    /// Decimal channels outside 0-255 are rejected rather than clamped.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Some(color) = Rgb::from_name(input) {
            return Ok(color);
        }

        if input.contains(',') {
            let parts: Vec<&str> = input.split(',').map(|s| s.trim()).collect();
            if parts.len() != 3 {
                bail!("Expected three comma-separated values, got '{}'", input);
            }
            let mut channels = [0u8; 3];
            for (slot, part) in channels.iter_mut().zip(parts.iter()) {
                let value: i64 = part
                    .parse()
                    .map_err(|_| anyhow!("Invalid channel value '{}'", part))?;
                if !(0..=255).contains(&value) {
                    bail!("RGB values must be between 0 and 255, got {}", value);
                }
                *slot = value as u8;
            }
            return Ok(Rgb::new(channels[0], channels[1], channels[2]));
        }

        Rgb::from_hex(input)
    }

    /// Sum of absolute per-channel differences
    pub fn distance(&self, other: &Rgb) -> u32 {
        self.r.abs_diff(other.r) as u32 + self.g.abs_diff(other.g) as u32 + self.b.abs_diff(other.b) as u32
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.r, self.g, self.b)
    }
}

impl From<image::Rgb<u8>> for Rgb {
    fn from(pixel: image::Rgb<u8>) -> Self {
        Rgb::new(pixel[0], pixel[1], pixel[2])
    }
}

// Colors for the left and right lamp in dual-zone mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorPair {
    pub left: Rgb,
    pub right: Rgb,
}

impl ColorPair {
    pub fn splat(color: Rgb) -> Self {
        ColorPair { left: color, right: color }
    }
}

// Rectangular pixel region: offset + size
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Zone {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Zone {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Zone { x, y, width, height }
    }
}

impl FromStr for Zone {
    type Err = anyhow::Error;

    // Accepts "x,y,width,height"
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
        if parts.len() != 4 {
            bail!("Region must be 'x,y,width,height', got '{}'", s);
        }
        let mut values = [0u32; 4];
        for (slot, part) in values.iter_mut().zip(parts.iter()) {
            *slot = part
                .parse()
                .map_err(|_| anyhow!("Invalid region value '{}'", part))?;
        }
        if values[2] == 0 || values[3] == 0 {
            bail!("Region width and height must be non-zero");
        }
        Ok(Zone::new(values[0], values[1], values[2], values[3]))
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}
