// Transition Module - Exponential smoothing of current colors toward their targets
use crate::color::lerp_color;
use crate::types::Rgb;

#[derive(Debug, Clone, Copy)]
struct Track {
    current: Option<Rgb>, // None until the first advance
    target: Rgb,
}

/// Holds current and target color per lamp zone and steps them together each tick.
///
/// Unseeded tracks jump straight to their target on the first `advance`, so the lamp
/// never fades in from black. A smoothing factor of 0 or 1 sends targets unchanged.
pub struct Transitioner {
    factor: f64,
    tracks: Vec<Track>,
}

impl Transitioner {
    pub fn new(factor: f64) -> Self {
        Transitioner {
            factor: factor.clamp(0.0, 1.0),
            tracks: Vec::new(),
        }
    }

    /// Takes effect from the next `advance`
    pub fn set_factor(&mut self, factor: f64) {
        self.factor = factor.clamp(0.0, 1.0);
    }

    pub fn is_seeded(&self) -> bool {
        !self.tracks.is_empty() && self.tracks.iter().all(|t| t.current.is_some())
    }

    /// Replace the targets. A change in zone count starts over unseeded.
    pub fn set_targets(&mut self, targets: &[Rgb]) {
        if targets.len() != self.tracks.len() {
            self.tracks = targets
                .iter()
                .map(|&target| Track { current: None, target })
                .collect();
            return;
        }
        for (track, &target) in self.tracks.iter_mut().zip(targets) {
            track.target = target;
        }
    }

    /// Step every track toward its target and return the colors to send this tick
    pub fn advance(&mut self) -> Vec<Rgb> {
        let factor = self.factor;
        let instant = factor <= 0.0 || factor >= 1.0;

        self.tracks
            .iter_mut()
            .map(|track| {
                let next = match track.current {
                    Some(current) if !instant => step_toward(current, track.target, factor),
                    _ => lerp_color(None, track.target, factor),
                };
                track.current = Some(next);
                next
            })
            .collect()
    }

    /// Force every current color to `color`; targets are kept
    pub fn reset(&mut self, color: Rgb) {
        for track in &mut self.tracks {
            track.current = Some(color);
        }
    }

    /// True when every track is seeded and within `threshold` (sum of channel
    /// differences) of its target
    pub fn is_converged(&self, threshold: u32) -> bool {
        self.is_seeded()
            && self.tracks.iter().all(|track| match track.current {
                Some(current) => current.distance(&track.target) < threshold,
                None => false,
            })
    }
}

// Interpolate, then nudge any channel that truncation left stuck one unit closer
fn step_toward(current: Rgb, target: Rgb, factor: f64) -> Rgb {
    let next = lerp_color(Some(current), target, factor);
    Rgb::new(
        unstick(current.r, next.r, target.r),
        unstick(current.g, next.g, target.g),
        unstick(current.b, next.b, target.b),
    )
}

fn unstick(current: u8, next: u8, target: u8) -> u8 {
    if next != current || current == target {
        next
    } else if target > current {
        current + 1
    } else {
        current - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_advance_seeds_without_interpolation() {
        let mut transitioner = Transitioner::new(0.2);
        assert!(!transitioner.is_seeded());
        transitioner.set_targets(&[Rgb::new(200, 100, 0)]);
        assert_eq!(transitioner.advance(), vec![Rgb::new(200, 100, 0)]);
        assert!(transitioner.is_seeded());
        assert!(transitioner.is_converged(1));
    }

    #[test]
    fn test_advance_interpolates_after_seed() {
        let mut transitioner = Transitioner::new(0.5);
        transitioner.set_targets(&[Rgb::BLACK]);
        transitioner.advance();
        transitioner.set_targets(&[Rgb::new(100, 200, 50)]);
        assert_eq!(transitioner.advance(), vec![Rgb::new(50, 100, 25)]);
        assert!(!transitioner.is_converged(10));
    }

    #[test]
    fn test_zero_factor_is_instant() {
        let mut transitioner = Transitioner::new(0.0);
        transitioner.set_targets(&[Rgb::BLACK]);
        transitioner.advance();
        transitioner.set_targets(&[Rgb::WHITE]);
        assert_eq!(transitioner.advance(), vec![Rgb::WHITE]);
    }

    #[test]
    fn test_converges_within_log_bound() {
        let factor: f64 = 0.5;
        let start = Rgb::BLACK;
        let target = Rgb::new(255, 128, 64);
        let threshold = 4u32;

        let mut transitioner = Transitioner::new(factor);
        transitioner.set_targets(&[start]);
        transitioner.advance();
        transitioner.set_targets(&[target]);

        let initial = start.distance(&target) as f64;
        let steps = ((threshold as f64 / initial).ln() / (1.0 - factor).ln()).ceil() as usize;
        for _ in 0..steps {
            transitioner.advance();
        }
        assert!(transitioner.is_converged(threshold));

        // and keeps going all the way
        for _ in 0..20 {
            transitioner.advance();
        }
        assert_eq!(transitioner.advance(), vec![target]);
    }

    #[test]
    fn test_two_tracks_are_independent() {
        let mut transitioner = Transitioner::new(0.5);
        transitioner.set_targets(&[Rgb::BLACK, Rgb::WHITE]);
        transitioner.advance();
        transitioner.set_targets(&[Rgb::new(100, 0, 0), Rgb::WHITE]);
        let colors = transitioner.advance();
        assert_eq!(colors[0], Rgb::new(50, 0, 0));
        assert_eq!(colors[1], Rgb::WHITE);
        assert!(!transitioner.is_converged(5));
    }

    #[test]
    fn test_reset_and_zone_count_change() {
        let mut transitioner = Transitioner::new(0.5);
        transitioner.set_targets(&[Rgb::WHITE]);
        transitioner.advance();
        assert!(transitioner.is_converged(1));

        transitioner.reset(Rgb::BLACK);
        assert!(transitioner.is_seeded());
        assert!(!transitioner.is_converged(100));
        // fades up from black rather than jumping
        assert_eq!(transitioner.advance(), vec![Rgb::new(127, 127, 127)]);

        transitioner.set_targets(&[Rgb::WHITE, Rgb::WHITE]);
        assert!(!transitioner.is_seeded());
        assert!(!transitioner.is_converged(1000));
        assert_eq!(transitioner.advance(), vec![Rgb::WHITE, Rgb::WHITE]);
    }

    #[test]
    fn test_factor_change_affects_next_tick_only() {
        let mut transitioner = Transitioner::new(0.1);
        transitioner.set_targets(&[Rgb::BLACK]);
        transitioner.advance();
        transitioner.set_targets(&[Rgb::new(200, 200, 200)]);
        assert_eq!(transitioner.advance(), vec![Rgb::new(20, 20, 20)]);
        transitioner.set_factor(1.0);
        assert_eq!(transitioner.advance(), vec![Rgb::new(200, 200, 200)]);
    }
}
