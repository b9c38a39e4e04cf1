// Config Module - Configuration file, command-line arguments and live reload
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::{debug, warn};
use notify::{Config, Event as NotifyEvent, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use crate::sampler::SamplingMode;
use crate::types::{Rgb, Zone};

#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Ambient screen lighting for one or two wireless LED lamps",
    long_about = "Samples the screen edges in real time and drives one or two LED lamps with the\n\
                  dominant color. In dual mode the left lamp follows the left side of the screen\n\
                  and the right lamp the right side. Press End, q or Esc to stop."
)]
pub struct Args {
    /// Config file path or name (e.g., --cfg /full/path or --cfg tv for ~/.config/ambilamp/tv.conf)
    #[arg(long)]
    pub cfg: Option<String>,

    /// What to do: ambient, color, off, test
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Ambient profile: standard or ultra (unthrottled, stronger saturation)
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Shortcut for --profile ultra
    #[arg(long)]
    pub ultra: bool,

    /// Zone mode: single (one color for all lamps) or dual (left/right)
    #[arg(short, long)]
    pub zones: Option<String>,

    /// Sampling: edge or average
    #[arg(short, long)]
    pub sampling: Option<String>,

    /// Target frames per second (0 = as fast as the link allows)
    #[arg(long)]
    pub fps: Option<f64>,

    /// Edge band width in pixels
    #[arg(short, long)]
    pub edge_width: Option<u32>,

    /// Smoothing factor 0.0-1.0 (0 = instant)
    #[arg(long)]
    pub smoothing: Option<f64>,

    /// Minimum channel value sent to the lamps (0-255)
    #[arg(short, long)]
    pub brightness_floor: Option<u8>,

    /// Saturation enhancement factor (>= 1.0)
    #[arg(long)]
    pub saturation: Option<f64>,

    /// Screen region to sample as x,y,width,height (default: whole display)
    #[arg(short, long)]
    pub region: Option<String>,

    /// Screenshot command writing an image to stdout
    #[arg(long)]
    pub capture_command: Option<String>,

    /// Read frames from this image file instead of running a command
    #[arg(long)]
    pub capture_file: Option<String>,

    /// Color for --mode color: name, RRGGBB or r,g,b
    #[arg(short, long)]
    pub color: Option<String>,

    /// Address of the left (or only) lamp
    #[arg(long)]
    pub left: Option<String>,

    /// Address of the right lamp (enables it)
    #[arg(long)]
    pub right: Option<String>,

    /// Log packets instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Do not poll the keyboard for the exit key (Ctrl+C still works)
    #[arg(long)]
    pub no_keyboard: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LampConfig {
    pub name: String,
    pub address: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Ambient,
    Color,
    Off,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Standard,
    Ultra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneMode {
    Single,
    Dual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackend {
    Command,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    DryRun,
}

fn parse_choice<T: Copy>(field: &str, value: &str, choices: &[(&str, T)]) -> Result<T> {
    choices
        .iter()
        .find(|(name, _)| *name == value)
        .map(|(_, v)| *v)
        .ok_or_else(|| {
            let names: Vec<&str> = choices.iter().map(|(name, _)| *name).collect();
            anyhow!("Invalid {} '{}' (expected one of: {})", field, value, names.join(", "))
        })
}

// Slowest throttled rate; 0 means unthrottled
const MIN_FPS: f64 = 0.1;

fn default_capture_command() -> String {
    if cfg!(target_os = "macos") {
        "screencapture -x -t png /dev/stdout".to_string()
    } else {
        "grim -t ppm -".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientConfig {
    #[serde(skip)]
    pub config_path: Option<PathBuf>,  // Where this config came from (not serialized)

    pub mode: String,              // ambient, color, off, test
    pub profile: String,           // standard, ultra
    pub zone_mode: String,         // single, dual
    pub sampling: String,          // edge, average
    pub fps: f64,                  // 0 = unthrottled
    pub edge_width: u32,
    pub dual_edge_width: u32,
    pub smoothing: f64,            // 0 = instant
    pub ultra_smoothing: f64,
    pub brightness_floor: u8,
    pub saturation: f64,
    pub ultra_saturation: f64,
    pub min_tick_ms: u64,
    pub status_interval: u64,      // ticks between status lines, 0 = never
    pub region: String,            // x,y,width,height or empty for the whole display
    pub color: String,             // used by mode = color
    pub capture_backend: String,   // command, file
    pub capture_command: String,
    pub capture_file: String,
    pub transport: String,         // udp, dry-run
    pub send_parallel: bool,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
    pub lamps: Vec<LampConfig>,
}

impl Default for AmbientConfig {
    fn default() -> Self {
        AmbientConfig {
            config_path: None,
            mode: "ambient".to_string(),
            profile: "standard".to_string(),
            zone_mode: "single".to_string(),
            sampling: "edge".to_string(),
            fps: 60.0,
            edge_width: 50,
            dual_edge_width: 80,
            smoothing: 0.2,
            ultra_smoothing: 0.35,
            brightness_floor: 40,
            saturation: 1.5,
            ultra_saturation: 2.0,
            min_tick_ms: 1,
            status_interval: 60,  // about once a second at 60 fps
            region: "".to_string(),
            color: "white".to_string(),
            capture_backend: "command".to_string(),
            capture_command: default_capture_command(),
            capture_file: "".to_string(),
            transport: "udp".to_string(),
            send_parallel: true,
            connect_attempts: 3,
            connect_backoff_ms: 1000,
            lamps: vec![
                LampConfig {
                    name: "left".to_string(),
                    address: "lamp-left.local:5577".to_string(),
                    enabled: true,
                },
                LampConfig {
                    name: "right".to_string(),
                    address: "lamp-right.local:5577".to_string(),
                    enabled: false,
                },
            ],
        }
    }
}

impl AmbientConfig {
    /// Apply explicit command-line values; returns true if any were given
    pub fn merge_with_args(&mut self, args: &Args) -> bool {
        let mut args_provided = false;

        if let Some(ref mode) = args.mode {
            self.mode = mode.clone();
            args_provided = true;
        }

        // --profile wins over --ultra
        if let Some(ref profile) = args.profile {
            self.profile = profile.clone();
            args_provided = true;
        } else if args.ultra {
            self.profile = "ultra".to_string();
            args_provided = true;
        }

        if let Some(ref zones) = args.zones {
            self.zone_mode = zones.clone();
            args_provided = true;
        }

        if let Some(ref sampling) = args.sampling {
            self.sampling = sampling.clone();
            args_provided = true;
        }

        if let Some(fps) = args.fps {
            self.fps = fps;
            args_provided = true;
        }

        if let Some(edge_width) = args.edge_width {
            self.edge_width = edge_width;
            self.dual_edge_width = edge_width;
            args_provided = true;
        }

        if let Some(smoothing) = args.smoothing {
            self.smoothing = smoothing;
            self.ultra_smoothing = smoothing;
            args_provided = true;
        }

        if let Some(floor) = args.brightness_floor {
            self.brightness_floor = floor;
            args_provided = true;
        }

        if let Some(saturation) = args.saturation {
            self.saturation = saturation;
            self.ultra_saturation = saturation;
            args_provided = true;
        }

        if let Some(ref region) = args.region {
            self.region = region.clone();
            args_provided = true;
        }

        if let Some(ref command) = args.capture_command {
            self.capture_backend = "command".to_string();
            self.capture_command = command.clone();
            args_provided = true;
        }

        if let Some(ref file) = args.capture_file {
            self.capture_backend = "file".to_string();
            self.capture_file = file.clone();
            args_provided = true;
        }

        if let Some(ref color) = args.color {
            self.color = color.clone();
            args_provided = true;
        }

        if let Some(ref left) = args.left {
            self.set_lamp(0, "left", left);
            args_provided = true;
        }

        if let Some(ref right) = args.right {
            self.set_lamp(1, "right", right);
            args_provided = true;
        }

        if args.dry_run {
            self.transport = "dry-run".to_string();
            args_provided = true;
        }

        args_provided
    }

    // Point lamp slot `index` at `address` and enable it, creating the slot if needed
    fn set_lamp(&mut self, index: usize, name: &str, address: &str) {
        while self.lamps.len() <= index {
            let slot = self.lamps.len();
            self.lamps.push(LampConfig {
                name: if slot == 0 { "left".to_string() } else { "right".to_string() },
                address: String::new(),
                enabled: false,
            });
        }
        let lamp = &mut self.lamps[index];
        if lamp.name.is_empty() {
            lamp.name = name.to_string();
        }
        lamp.address = address.to_string();
        lamp.enabled = true;
    }

    pub fn config_path(cfg_arg: Option<&str>) -> Result<PathBuf> {
        if let Some(cfg) = cfg_arg {
            let path = PathBuf::from(cfg);
            if path.is_absolute() || cfg.contains('/') || cfg.contains('\\') {
                return Ok(path);
            }

            // Otherwise treat as config name in config directory
            let filename = if cfg.ends_with(".conf") {
                cfg.to_string()
            } else {
                format!("{}.conf", cfg)
            };
            Ok(Self::config_dir()?.join(filename))
        } else {
            Ok(Self::config_dir()?.join("config.conf"))
        }
    }

    fn config_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home).join(".config").join("ambilamp"))
    }

    /// Load the named config. A missing default file means built-in defaults; a missing
    /// explicitly named file is an error.
    pub fn load_with_path(cfg_arg: Option<&str>) -> Result<Self> {
        let path = Self::config_path(cfg_arg)?;
        if !path.exists() {
            if cfg_arg.is_some() {
                bail!("Config file not found: {}", path.display());
            }
            debug!("No config at {}, using defaults", path.display());
            let mut config = AmbientConfig::default();
            config.config_path = Some(path);
            return Ok(config);
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&contents, path)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self> {
        let mut parsed: Self = toml::from_str(contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        parsed.config_path = Some(path.to_path_buf());
        parsed.sanitize();
        Ok(parsed)
    }

    /// Trim and normalise string values
    pub fn sanitize(&mut self) {
        self.mode = self.mode.trim().to_lowercase();
        self.profile = self.profile.trim().to_lowercase();
        self.zone_mode = self.zone_mode.trim().to_lowercase();
        self.sampling = self.sampling.trim().to_lowercase();
        self.capture_backend = self.capture_backend.trim().to_lowercase();
        self.transport = self.transport.trim().to_lowercase();
        self.region = self.region.trim().to_string();
        self.color = self.color.trim().to_string();
        self.capture_command = self.capture_command.trim().to_string();
        self.capture_file = self.capture_file.trim().to_string();
        for lamp in &mut self.lamps {
            lamp.name = lamp.name.trim().to_string();
            lamp.address = lamp.address.trim().to_string();
        }
    }

    /// Reject anything the ambient loop cannot run with
    pub fn validate(&self) -> Result<()> {
        let mode = self.run_mode()?;
        self.profile()?;
        let zone_mode = self.zone_mode()?;
        self.sampling_mode()?;
        let backend = self.capture_backend()?;
        self.transport_kind()?;
        self.region()?;

        if !self.fps.is_finite() || !(0.0..=240.0).contains(&self.fps) {
            bail!("fps must be between 0 and 240, got {}", self.fps);
        }
        if self.fps > 0.0 && self.fps < MIN_FPS {
            bail!("fps must be 0 (unthrottled) or at least {}, got {}", MIN_FPS, self.fps);
        }
        for (name, value) in [("smoothing", self.smoothing), ("ultra_smoothing", self.ultra_smoothing)] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be between 0.0 and 1.0, got {}", name, value);
            }
        }
        for (name, value) in [("saturation", self.saturation), ("ultra_saturation", self.ultra_saturation)] {
            if !value.is_finite() || value < 1.0 {
                bail!("{} must be at least 1.0, got {}", name, value);
            }
        }
        if self.edge_width == 0 || self.dual_edge_width == 0 {
            bail!("edge_width and dual_edge_width must be at least 1");
        }

        let enabled = self.enabled_lamps().len();
        if enabled == 0 {
            bail!("No lamps enabled");
        }
        if enabled > 2 {
            bail!("At most two lamps are supported, {} are enabled", enabled);
        }
        if zone_mode == ZoneMode::Dual && enabled != 2 {
            bail!("Dual zone mode needs two enabled lamps, {} enabled", enabled);
        }
        if let Some(lamp) = self.enabled_lamps().iter().find(|l| l.address.is_empty()) {
            bail!("Lamp '{}' has no address", lamp.name);
        }

        if mode == RunMode::Ambient {
            match backend {
                CaptureBackend::Command if self.capture_command.is_empty() => {
                    bail!("capture_command is empty")
                }
                CaptureBackend::File if self.capture_file.is_empty() => {
                    bail!("capture_file is empty")
                }
                _ => {}
            }
        }
        if mode == RunMode::Color {
            self.color_value()?;
        }

        Ok(())
    }

    pub fn enabled_lamps(&self) -> Vec<&LampConfig> {
        self.lamps.iter().filter(|l| l.enabled).collect()
    }

    pub fn run_mode(&self) -> Result<RunMode> {
        parse_choice(
            "mode",
            &self.mode,
            &[
                ("ambient", RunMode::Ambient),
                ("color", RunMode::Color),
                ("off", RunMode::Off),
                ("test", RunMode::Test),
            ],
        )
    }

    pub fn profile(&self) -> Result<Profile> {
        parse_choice("profile", &self.profile, &[("standard", Profile::Standard), ("ultra", Profile::Ultra)])
    }

    pub fn zone_mode(&self) -> Result<ZoneMode> {
        parse_choice("zone_mode", &self.zone_mode, &[("single", ZoneMode::Single), ("dual", ZoneMode::Dual)])
    }

    pub fn sampling_mode(&self) -> Result<SamplingMode> {
        parse_choice("sampling", &self.sampling, &[("edge", SamplingMode::Edge), ("average", SamplingMode::Average)])
    }

    pub fn capture_backend(&self) -> Result<CaptureBackend> {
        parse_choice(
            "capture_backend",
            &self.capture_backend,
            &[("command", CaptureBackend::Command), ("file", CaptureBackend::File)],
        )
    }

    pub fn transport_kind(&self) -> Result<TransportKind> {
        parse_choice(
            "transport",
            &self.transport,
            &[("udp", TransportKind::Udp), ("dry-run", TransportKind::DryRun)],
        )
    }

    pub fn region(&self) -> Result<Option<Zone>> {
        if self.region.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.region.parse()?))
        }
    }

    pub fn color_value(&self) -> Result<Rgb> {
        Rgb::parse(&self.color)
    }
}

/// Watch the config file and deliver every edit that still validates. The returned
/// watcher must be kept alive for as long as updates are wanted.
pub fn watch_config(path: &Path) -> Result<(RecommendedWatcher, mpsc::Receiver<AmbientConfig>)> {
    let (config_tx, config_rx) = mpsc::channel::<AmbientConfig>();
    let watched = path.to_path_buf();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<NotifyEvent>| {
            let Ok(event) = res else {
                return;
            };
            if !matches!(event.kind, notify::EventKind::Modify(_) | notify::EventKind::Create(_)) {
                return;
            }
            let contents = match std::fs::read_to_string(&watched) {
                Ok(contents) => contents,
                Err(e) => {
                    warn!("Ignoring config change: {}", e);
                    return;
                }
            };
            // Rewrites truncate first; an empty read is a save in progress, not a reset to defaults
            if contents.trim().is_empty() {
                return;
            }
            match AmbientConfig::parse(&contents, &watched).and_then(|c| c.validate().map(|_| c)) {
                Ok(config) => {
                    let _ = config_tx.send(config);
                }
                Err(e) => warn!("Ignoring config change: {:#}", e),
            }
        },
        Config::default(),
    )?;

    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok((watcher, config_rx))
}
