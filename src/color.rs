// Color Module - Saturation shaping, brightness floor and smoothing math for lamp colors
use crate::types::Rgb;

/// Colors whose brightest channel is below this are left alone (boosting them amplifies noise)
pub const DARK_THRESHOLD: u8 = 40;

/// Effective saturation factor cap for colors that are already strongly saturated
const SATURATED_FACTOR_CAP: f64 = 1.2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Dominant {
    Red,
    Green,
    Blue,
}

// Cyan, yellow and magenta are already pure; pushing them further only clips them
fn is_pure_secondary(r: i32, g: i32, b: i32) -> bool {
    let cyan = b > 200 && g > 200 && r < 100;
    let yellow = r > 200 && g > 200 && b < 100;
    let magenta = r > 200 && b > 200 && g < 100;
    cyan || yellow || magenta
}

/// Amplify the separation between the dominant channel and the other two.
///
/// Dark colors, pure secondaries and near-white are returned unchanged. Strongly
/// saturated colors get a capped factor. Otherwise the two weaker channels are divided
/// by the enhancement and a dominant channel below 220 gets a small boost.
pub fn enhance_saturation(color: Rgb, factor: f64) -> Rgb {
    let (r, g, b) = (color.r as i32, color.g as i32, color.b as i32);
    let max_val = r.max(g).max(b);
    let min_val = r.min(g).min(b);

    if max_val < DARK_THRESHOLD as i32 {
        return color;
    }

    if is_pure_secondary(r, g, b) {
        return color;
    }

    let color_range = max_val - min_val;

    let mut factor = factor;
    if color_range > 150 {
        factor = factor.min(SATURATED_FACTOR_CAP);
    }

    // Near-white stays untinted
    if min_val > 220 && color_range < 35 {
        return color;
    }

    // Ties go to red, then green
    let dominant = if max_val == r {
        Dominant::Red
    } else if max_val == g {
        Dominant::Green
    } else {
        Dominant::Blue
    };

    if color_range <= 20 {
        return color;
    }

    let enhancement = factor.min(1.0 + color_range as f64 / 255.0);
    let reduce = |channel: i32| ((channel as f64 / enhancement) as i32).max(0);

    let (mut r, mut g, mut b) = (r, g, b);
    match dominant {
        Dominant::Red => {
            g = reduce(g);
            b = reduce(b);
        }
        Dominant::Green => {
            r = reduce(r);
            b = reduce(b);
        }
        Dominant::Blue => {
            r = reduce(r);
            g = reduce(g);
        }
    }

    if max_val < 220 {
        let boost = 1.1f64.min(1.0 + (255 - max_val) as f64 / 500.0);
        let lift = |channel: i32| ((channel as f64 * boost) as i32).min(255);
        match dominant {
            Dominant::Red => r = lift(r),
            Dominant::Green => g = lift(g),
            Dominant::Blue => b = lift(b),
        }
    }

    Rgb::from_clamped(r, g, b)
}

/// Move `current` toward `target` by `factor` of the remaining distance.
/// With no current color the target is returned verbatim (no fade-in from black).
pub fn lerp_color(current: Option<Rgb>, target: Rgb, factor: f64) -> Rgb {
    let Some(current) = current else {
        return target;
    };

    let step = |c: u8, t: u8| -> i32 {
        let c = c as f64;
        let t = t as f64;
        (c + (t - c) * factor) as i32
    };

    Rgb::from_clamped(
        step(current.r, target.r),
        step(current.g, target.g),
        step(current.b, target.b),
    )
}

/// Raise every channel to at least `floor` so the lamp never looks switched off
pub fn apply_brightness_floor(color: Rgb, floor: u8) -> Rgb {
    Rgb::new(color.r.max(floor), color.g.max(floor), color.b.max(floor))
}

/// Full shaping step of the pipeline: brightness floor, then saturation
pub fn shape(color: Rgb, floor: u8, saturation: f64) -> Rgb {
    enhance_saturation(apply_brightness_floor(color, floor), saturation)
}
