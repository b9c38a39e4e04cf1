// Ambilamp - Ambient screen lighting for one or two wireless LED lamps
// Modes: live ambient sync, fixed color, off, and a lamp self-test
use anyhow::{bail, Context, Result};
use clap::Parser;
use crossterm::event::{poll, read, Event, KeyCode, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use log::{debug, info, warn};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod ambient;
mod capture;
mod color;
mod config;
mod lamps;
mod sampler;
mod transition;
mod transport;
mod types;
mod zones;

use ambient::{AmbientLoop, AmbientSettings, ExitSignal};
use capture::{CommandCapture, FrameSource, ImageFileCapture};
use config::{watch_config, AmbientConfig, Args, CaptureBackend, RunMode, TransportKind};
use lamps::{ChannelOutcome, LampManager};
use transport::{DryRunTransport, Transport, UdpBridgeTransport};
use types::{ExitReason, Rgb};

// Restores the terminal on every exit path
struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    fn enable() -> Self {
        match enable_raw_mode() {
            Ok(()) => RawModeGuard { active: true },
            Err(e) => {
                warn!("Keyboard control unavailable: {}", e);
                RawModeGuard { active: false }
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            disable_raw_mode().ok();
        }
    }
}

/// Exit requested by Ctrl+C / SIGTERM or, when enabled, by End, q or Esc
struct OperatorExit {
    interrupted: Arc<AtomicBool>,
    keyboard: bool,
    reason: Option<ExitReason>,
}

impl OperatorExit {
    fn new(interrupted: Arc<AtomicBool>, keyboard: bool) -> Self {
        OperatorExit {
            interrupted,
            keyboard,
            reason: None,
        }
    }

    fn reason(&self) -> Option<ExitReason> {
        self.reason
    }
}

impl ExitSignal for OperatorExit {
    fn exit_requested(&mut self) -> bool {
        if self.reason.is_some() {
            return true;
        }
        if self.interrupted.load(Ordering::Relaxed) {
            self.reason = Some(ExitReason::Interrupted);
        } else if self.keyboard && exit_key_pressed() {
            self.reason = Some(ExitReason::UserQuit);
        }
        self.reason.is_some()
    }
}

// Drain pending key events without blocking
fn exit_key_pressed() -> bool {
    while let Ok(true) = poll(Duration::ZERO) {
        if let Ok(Event::Key(key)) = read() {
            match key.code {
                KeyCode::End | KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => return true,
                // Raw mode swallows SIGINT
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
                _ => {}
            }
        }
    }
    false
}

// Sleep in short slices so an exit request cuts the wait short; true if exit was requested
async fn pause(exit: &mut dyn ExitSignal, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if exit.exit_requested() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep((deadline - now).min(Duration::from_millis(50))).await;
    }
}

fn init_logging(args: &Args) {
    let level = if args.quiet {
        log::LevelFilter::Warn
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        // Explicit \r so lines stay aligned while the terminal is in raw mode
        .format(|buf, record| writeln!(buf, "[{:<5}] {}\r", record.level(), record.args()))
        .init();
}

fn build_lamps(config: &AmbientConfig) -> Result<LampManager> {
    let kind = config.transport_kind()?;
    LampManager::from_config(&config.lamps, config.send_parallel, || -> Box<dyn Transport> {
        match kind {
            TransportKind::Udp => Box::new(UdpBridgeTransport::new()),
            TransportKind::DryRun => Box::new(DryRunTransport::new()),
        }
    })
}

fn build_source(config: &AmbientConfig) -> Result<Box<dyn FrameSource>> {
    Ok(match config.capture_backend()? {
        CaptureBackend::Command => Box::new(CommandCapture::new(&config.capture_command)?),
        CaptureBackend::File => Box::new(ImageFileCapture::new(&config.capture_file)),
    })
}

async fn run_ambient(config: &AmbientConfig, lamps: &mut LampManager, exit: &mut OperatorExit) -> Result<()> {
    let settings = AmbientSettings::from_config(config)?;
    let mut ambient = AmbientLoop::new(settings, build_source(config)?);

    // Keep the watcher alive for the whole loop
    let _watcher = match config.config_path.as_deref().filter(|p| p.exists()) {
        Some(path) => match watch_config(path) {
            Ok((watcher, updates)) => {
                debug!("Watching {} for changes", path.display());
                ambient = ambient.with_updates(updates);
                Some(watcher)
            }
            Err(e) => {
                warn!("Config hot reload disabled: {}", e);
                None
            }
        },
        None => None,
    };

    ambient.run(lamps, exit).await;
    match exit.reason() {
        Some(ExitReason::UserQuit) => info!("Stopped by user"),
        Some(ExitReason::Interrupted) => info!("Interrupted"),
        None => {}
    }
    Ok(())
}

async fn run_color(color: Rgb, lamps: &mut LampManager) -> Result<()> {
    let outcomes = lamps.set_all(color).await;
    let accepted = outcomes.iter().filter(|o| **o == ChannelOutcome::Sent).count();
    if accepted == 0 {
        bail!("No lamp accepted color {}", color);
    }
    info!("Set {} lamp(s) to {}", accepted, color);
    Ok(())
}

fn test_colors() -> [(&'static str, Rgb); 7] {
    [
        ("red", Rgb::new(255, 0, 0)),
        ("green", Rgb::new(0, 255, 0)),
        ("blue", Rgb::new(0, 0, 255)),
        ("yellow", Rgb::new(255, 255, 0)),
        ("purple", Rgb::new(255, 0, 255)),
        ("cyan", Rgb::new(0, 255, 255)),
        ("white", Rgb::WHITE),
    ]
}

// Returns false if the operator stopped it early
async fn test_sequence(lamps: &mut LampManager, exit: &mut dyn ExitSignal, step: Duration) -> bool {
    info!("Cycling test colors");
    for (name, color) in test_colors() {
        info!("  {}", name);
        lamps.set_all(color).await;
        if pause(exit, step).await {
            return false;
        }
    }

    if lamps.connected_count() == 2 {
        info!("Left red, right blue");
        let red = Rgb::new(255, 0, 0);
        lamps.dispatch(&[red, Rgb::BLACK]).await;
        if pause(exit, step / 3).await {
            return false;
        }
        lamps.dispatch(&[red, Rgb::new(0, 0, 255)]).await;
        if pause(exit, step * 4 / 3).await {
            return false;
        }
    }
    true
}

/// Lamp self-test; always ends with every lamp off. Returns the lamps that lost
/// their connection along the way.
async fn run_test(lamps: &mut LampManager, exit: &mut dyn ExitSignal, step: Duration) -> Vec<String> {
    let connected_before: Vec<bool> = lamps.channels().iter().map(|c| c.is_connected()).collect();

    let completed = test_sequence(lamps, exit, step).await;
    lamps.turn_off_all().await;

    let dropped: Vec<String> = lamps
        .channels()
        .iter()
        .zip(connected_before)
        .filter(|(channel, was_connected)| *was_connected && !channel.is_connected())
        .map(|(channel, _)| channel.name().to_string())
        .collect();

    if !completed {
        info!("Lamp test stopped early");
    }
    if dropped.is_empty() {
        info!("Lamp test finished, all lamps still connected");
    } else {
        warn!("Lamps that dropped during the test: {}", dropped.join(", "));
    }
    dropped
}

async fn run(config: AmbientConfig, keyboard: bool, interrupted: Arc<AtomicBool>) -> Result<()> {
    let mode = config.run_mode()?;
    let mut lamps = build_lamps(&config)?;

    let backoff = Duration::from_millis(config.connect_backoff_ms);
    let connected = lamps.connect_all(config.connect_attempts, backoff).await;
    let connected_count = connected.iter().filter(|ok| **ok).count();
    if connected_count == 0 {
        bail!("Could not connect to any lamp");
    }
    info!("{} of {} lamp(s) connected", connected_count, lamps.channel_count());

    let interactive = keyboard && matches!(mode, RunMode::Ambient | RunMode::Test);
    let _raw_mode = if interactive {
        info!("Press End, q or Esc to stop");
        Some(RawModeGuard::enable())
    } else {
        None
    };
    let mut exit = OperatorExit::new(interrupted, interactive);

    let result = match mode {
        RunMode::Ambient => run_ambient(&config, &mut lamps, &mut exit).await,
        RunMode::Color => match config.color_value() {
            Ok(color) => run_color(color, &mut lamps).await,
            Err(e) => Err(e),
        },
        RunMode::Off => {
            lamps.turn_off_all().await;
            info!("Lamps off");
            Ok(())
        }
        RunMode::Test => {
            run_test(&mut lamps, &mut exit, Duration::from_millis(1500)).await;
            Ok(())
        }
    };

    lamps.disconnect_all().await;
    info!("Disconnected");
    result
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let mut config = AmbientConfig::load_with_path(args.cfg.as_deref())?;
    if config.merge_with_args(&args) {
        debug!("Command-line overrides applied");
    }
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
        .context("Failed to install Ctrl+C handler")?;

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(run(config, !args.no_keyboard, interrupted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lamps::{color_packet, LampChannel};
    use crate::transport::testing::{MockTransport, SendBehavior};

    struct StopAfter {
        polls: usize,
    }

    impl ExitSignal for StopAfter {
        fn exit_requested(&mut self) -> bool {
            if self.polls == 0 {
                return true;
            }
            self.polls -= 1;
            false
        }
    }

    async fn connected_lamps(count: usize) -> (LampManager, Vec<MockTransport>) {
        let mocks: Vec<MockTransport> = (0..count).map(|_| MockTransport::new()).collect();
        let channels = mocks
            .iter()
            .enumerate()
            .map(|(i, mock)| LampChannel::new(["left", "right"][i], "test", Box::new(mock.clone())))
            .collect();
        let mut lamps = LampManager::new(channels, false);
        lamps.connect_all(1, Duration::ZERO).await;
        (lamps, mocks)
    }

    #[test]
    fn test_interrupt_flag_requests_exit() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut exit = OperatorExit::new(flag.clone(), false);
        assert!(!exit.exit_requested());
        flag.store(true, Ordering::Relaxed);
        assert!(exit.exit_requested());
        assert_eq!(exit.reason(), Some(ExitReason::Interrupted));
        // sticky
        flag.store(false, Ordering::Relaxed);
        assert!(exit.exit_requested());
    }

    #[tokio::test]
    async fn test_pause_stops_early_on_exit() {
        let started = Instant::now();
        assert!(pause(&mut StopAfter { polls: 1 }, Duration::from_secs(10)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!pause(&mut StopAfter { polls: 100 }, Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_color_mode_sends_to_all_lamps() {
        let (mut lamps, mocks) = connected_lamps(2).await;
        run_color(Rgb::new(255, 165, 0), &mut lamps).await.unwrap();
        for mock in &mocks {
            assert_eq!(mock.sent(), vec![color_packet(Rgb::new(255, 165, 0)).to_vec()]);
        }
    }

    #[tokio::test]
    async fn test_color_mode_fails_when_nothing_accepts() {
        let (mut lamps, mocks) = connected_lamps(1).await;
        mocks[0].set_behavior(SendBehavior::Reject);
        assert!(run_color(Rgb::WHITE, &mut lamps).await.is_err());
    }

    #[tokio::test]
    async fn test_lamp_test_full_sequence() {
        let (mut lamps, mocks) = connected_lamps(2).await;
        let dropped = run_test(&mut lamps, &mut StopAfter { polls: usize::MAX }, Duration::from_millis(3)).await;

        assert!(dropped.is_empty());
        let left = mocks[0].sent();
        let right = mocks[1].sent();
        // seven colors, the split step, then off
        assert_eq!(left.len(), 10);
        assert_eq!(right.len(), 10);
        assert_eq!(left[0], color_packet(Rgb::new(255, 0, 0)).to_vec());
        assert_eq!(right[8], color_packet(Rgb::new(0, 0, 255)).to_vec());
        assert_eq!(left[9], color_packet(Rgb::BLACK).to_vec());
    }

    #[tokio::test]
    async fn test_lamp_test_reports_dropped_lamp() {
        let (mut lamps, mocks) = connected_lamps(2).await;
        mocks[1].set_behavior(SendBehavior::Fault);
        let dropped = run_test(&mut lamps, &mut StopAfter { polls: usize::MAX }, Duration::from_millis(1)).await;
        assert_eq!(dropped, vec!["right".to_string()]);
        // single-lamp path: no split step
        assert_eq!(mocks[0].sent().len(), 8);
    }

    #[tokio::test]
    async fn test_lamp_test_stopped_early_still_turns_off() {
        let (mut lamps, mocks) = connected_lamps(1).await;
        run_test(&mut lamps, &mut StopAfter { polls: 0 }, Duration::from_secs(10)).await;
        assert_eq!(
            mocks[0].sent(),
            vec![color_packet(Rgb::new(255, 0, 0)).to_vec(), color_packet(Rgb::BLACK).to_vec()]
        );
    }

    #[test]
    fn test_build_lamps_uses_enabled_entries() {
        let mut config = AmbientConfig::default();
        config.transport = "dry-run".to_string();
        let lamps = build_lamps(&config).unwrap();
        assert_eq!(lamps.channel_count(), 1);
        assert_eq!(lamps.channels()[0].name(), "left");
    }
}
