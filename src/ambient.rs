// Ambient Module - Per-tick capture, sample, shape, smooth and dispatch loop
use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::capture::FrameSource;
use crate::color::shape;
use crate::config::{AmbientConfig, Profile, ZoneMode};
use crate::lamps::{ChannelOutcome, LampManager};
use crate::sampler::{FrameSampler, Sampled, SamplingMode};
use crate::transition::Transitioner;
use crate::types::{Rgb, Zone};
use crate::zones::ZoneExtractor;

// Sum of channel differences below which a fade counts as finished in status lines
const SETTLED_DISTANCE: u32 = 6;

/// "Has the operator asked to stop", polled once per tick boundary
pub trait ExitSignal {
    fn exit_requested(&mut self) -> bool;
}

// Values that may change while the loop runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub fps: f64,  // 0 = unthrottled
    pub smoothing: f64,
    pub brightness_floor: u8,
    pub saturation: f64,
}

impl Tuning {
    pub fn from_config(config: &AmbientConfig, profile: Profile) -> Self {
        match profile {
            Profile::Standard => Tuning {
                fps: config.fps,
                smoothing: config.smoothing,
                brightness_floor: config.brightness_floor,
                saturation: config.saturation,
            },
            Profile::Ultra => Tuning {
                fps: 0.0,
                smoothing: config.ultra_smoothing,
                brightness_floor: config.brightness_floor,
                saturation: config.ultra_saturation,
            },
        }
    }

    /// Sleep after a tick that took `elapsed`: max(min_tick, 1/fps - elapsed)
    pub fn tick_delay(&self, elapsed: Duration, min_tick: Duration) -> Duration {
        if self.fps <= 0.0 {
            return min_tick;
        }
        match Duration::try_from_secs_f64(1.0 / self.fps) {
            Ok(interval) => interval.saturating_sub(elapsed).max(min_tick),
            Err(_) => min_tick,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AmbientSettings {
    pub profile: Profile,
    pub zone_mode: ZoneMode,
    pub sampling: SamplingMode,
    pub edge_width: u32,
    pub region: Option<Zone>,
    pub min_tick: Duration,
    pub status_interval: u64,  // 0 = no periodic status
    pub tuning: Tuning,
}

impl AmbientSettings {
    pub fn from_config(config: &AmbientConfig) -> Result<Self> {
        let profile = config.profile()?;
        let zone_mode = config.zone_mode()?;
        let edge_width = match zone_mode {
            ZoneMode::Single => config.edge_width,
            ZoneMode::Dual => config.dual_edge_width,
        };

        Ok(AmbientSettings {
            profile,
            zone_mode,
            sampling: config.sampling_mode()?,
            edge_width,
            region: config.region()?,
            min_tick: Duration::from_millis(config.min_tick_ms),
            status_interval: config.status_interval,
            tuning: Tuning::from_config(config, profile),
        })
    }
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub ticks: u64,
    pub sends: u64,
    pub send_failures: u64,
    pub fallbacks: u64,
    pub reloads: u64,
}

enum ColorSource {
    Single(FrameSampler),
    Dual(ZoneExtractor),
}

pub struct AmbientLoop {
    settings: AmbientSettings,
    source: Box<dyn FrameSource>,
    colors: ColorSource,
    transitioner: Transitioner,
    updates: Option<mpsc::Receiver<AmbientConfig>>,
    summary: LoopSummary,
    in_fallback: bool,
}

impl AmbientLoop {
    pub fn new(settings: AmbientSettings, source: Box<dyn FrameSource>) -> Self {
        let colors = match settings.zone_mode {
            ZoneMode::Single => ColorSource::Single(FrameSampler::new(settings.sampling, settings.edge_width)),
            ZoneMode::Dual => ColorSource::Dual(ZoneExtractor::new(settings.edge_width)),
        };
        let transitioner = Transitioner::new(settings.tuning.smoothing);

        AmbientLoop {
            settings,
            source,
            colors,
            transitioner,
            updates: None,
            summary: LoopSummary::default(),
            in_fallback: false,
        }
    }

    /// Receive reloaded configurations; their tuning applies at the next tick boundary
    pub fn with_updates(mut self, updates: mpsc::Receiver<AmbientConfig>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Run until `exit` asks to stop, then turn every lamp off
    pub async fn run(&mut self, lamps: &mut LampManager, exit: &mut dyn ExitSignal) -> LoopSummary {
        info!(
            "Ambient mode: {:?} zones, {:?} sampling, {:?} profile, {} lamp(s)",
            self.settings.zone_mode,
            self.settings.sampling,
            self.settings.profile,
            lamps.connected_count()
        );

        loop {
            if exit.exit_requested() {
                break;
            }
            self.apply_updates();

            let started = Instant::now();
            self.tick(lamps).await;

            let delay = self.settings.tuning.tick_delay(started.elapsed(), self.settings.min_tick);
            tokio::time::sleep(delay).await;
        }

        let off = lamps.turn_off_all().await;
        if off.iter().any(|o| *o == ChannelOutcome::Failed) {
            warn!("Some lamps did not acknowledge the off command");
        }
        self.transitioner.reset(Rgb::BLACK);

        let s = &self.summary;
        info!(
            "Stopped after {} ticks: {} sends, {} failed, {} capture fallbacks, {} reloads",
            s.ticks, s.sends, s.send_failures, s.fallbacks, s.reloads
        );
        self.summary.clone()
    }

    /// One pass of the pipeline; returns the colors that were dispatched
    pub async fn tick(&mut self, lamps: &mut LampManager) -> Vec<Rgb> {
        let capture = self.source.capture(self.settings.region).await;
        let capture_error = capture.as_ref().err().map(|e| format!("{:#}", e));
        let frame = capture.as_ref().map_err(|e| anyhow!("{:#}", e));

        let sampled: Sampled<Vec<Rgb>> = match &mut self.colors {
            ColorSource::Single(sampler) => sampler.sample(frame).map(|c| vec![c]),
            ColorSource::Dual(extractor) => extractor.sample(frame).map(|p| vec![p.left, p.right]),
        };

        if sampled.is_fallback() {
            self.summary.fallbacks += 1;
            if !self.in_fallback {
                warn!(
                    "Capture unavailable ({}), holding fallback color",
                    capture_error.as_deref().unwrap_or("empty frame")
                );
                self.in_fallback = true;
            }
        } else if self.in_fallback {
            info!("Capture recovered");
            self.in_fallback = false;
        }
        let raw = sampled.into_inner();

        let tuning = self.settings.tuning;
        let targets: Vec<Rgb> = raw
            .iter()
            .map(|&c| shape(c, tuning.brightness_floor, tuning.saturation))
            .collect();
        self.transitioner.set_targets(&targets);
        let colors = self.transitioner.advance();

        let outcomes = lamps.dispatch(&colors).await;
        for outcome in &outcomes {
            match outcome {
                ChannelOutcome::Sent => self.summary.sends += 1,
                ChannelOutcome::Failed => self.summary.send_failures += 1,
                ChannelOutcome::Offline => {}
            }
        }
        self.summary.ticks += 1;

        if self.settings.status_interval > 0 && self.summary.ticks % self.settings.status_interval == 0 {
            self.log_status(lamps, &colors, &outcomes);
        }

        colors
    }

    fn log_status(&self, lamps: &LampManager, colors: &[Rgb], outcomes: &[ChannelOutcome]) {
        let lamp_states: Vec<String> = lamps
            .channels()
            .iter()
            .zip(outcomes)
            .enumerate()
            .map(|(i, (channel, outcome))| {
                let color = colors.get(i).or(colors.first()).copied().unwrap_or(Rgb::BLACK);
                format!("{} {} {:?}", channel.name(), color, outcome)
            })
            .collect();
        let state = if self.transitioner.is_converged(SETTLED_DISTANCE) { "settled" } else { "fading" };
        info!(
            "tick {} | {} | {} | failures {} | fallbacks {}",
            self.summary.ticks,
            lamp_states.join(", "),
            state,
            self.summary.send_failures,
            self.summary.fallbacks
        );
    }

    // Take the newest pending reload, if any
    fn apply_updates(&mut self) {
        let latest = match &self.updates {
            Some(updates) => updates.try_iter().last(),
            None => None,
        };
        if let Some(config) = latest {
            self.apply_tuning(Tuning::from_config(&config, self.settings.profile));
        }
    }

    pub fn apply_tuning(&mut self, tuning: Tuning) {
        if tuning == self.settings.tuning {
            debug!("Config reloaded, tuning unchanged");
            return;
        }
        info!(
            "Config reloaded: fps {}, smoothing {}, brightness floor {}, saturation {}",
            tuning.fps, tuning.smoothing, tuning.brightness_floor, tuning.saturation
        );
        self.transitioner.set_factor(tuning.smoothing);
        self.settings.tuning = tuning;
        self.summary.reloads += 1;
    }
}
