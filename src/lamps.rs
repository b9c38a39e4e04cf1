// Lamps Module - Per-lamp channels with isolated failure handling and multi-lamp dispatch
use anyhow::{anyhow, Result};
use futures::future::join_all;
use log::{info, warn};
use std::time::Duration;

use crate::config::LampConfig;
use crate::transport::Transport;
use crate::types::Rgb;

/// Encode a color command for the lamp.
///
/// The device reads green before red, so bytes 4 and 5 (0-based) carry G then R. This is
/// the lamp's wire format and must not be "corrected".
pub fn color_packet(color: Rgb) -> [u8; 9] {
    [0x7E, 0x00, 0x05, 0x03, color.g, color.r, color.b, 0x00, 0xEF]
}

/// One physical lamp and its connection state
pub struct LampChannel {
    name: String,
    address: String,
    transport: Box<dyn Transport>,
    connected: bool,
}

impl LampChannel {
    pub fn new(name: &str, address: &str, transport: Box<dyn Transport>) -> Self {
        LampChannel {
            name: name.to_string(),
            address: address.to_string(),
            transport,
            connected: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn connect(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        let ok = self.transport.connect(&self.address).await;
        self.connected = ok && self.transport.is_connected();
        self.connected
    }

    /// Try up to `attempts` times with `backoff` between tries
    pub async fn connect_with_retry(&mut self, attempts: u32, backoff: Duration) -> bool {
        let attempts = attempts.max(1);
        for attempt in 0..attempts {
            if self.connect().await {
                return true;
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(backoff).await;
            }
        }
        false
    }

    pub async fn disconnect(&mut self) -> bool {
        if !self.is_connected() {
            self.connected = false;
            return true;
        }
        let ok = self.transport.disconnect().await;
        if ok {
            self.connected = false;
        }
        ok
    }

    /// Live state: the channel's own flag and the transport must both agree
    pub fn is_connected(&self) -> bool {
        self.connected && self.transport.is_connected()
    }

    /// Send a color. A disconnected channel returns false without touching the link; a
    /// link fault marks the channel disconnected until `connect` succeeds again.
    pub async fn set_color(&mut self, color: Rgb) -> bool {
        if !self.is_connected() {
            return false;
        }

        match self.transport.send(&color_packet(color)).await {
            Ok(true) => true,
            Ok(false) => {
                if !self.transport.is_connected() {
                    warn!("{} lamp disconnected during color update", self.name);
                    self.connected = false;
                } else {
                    warn!("{} lamp rejected color {} but link looks up", self.name, color);
                }
                false
            }
            Err(e) => {
                warn!("{} lamp send failed: {}", self.name, e);
                self.connected = false;
                false
            }
        }
    }
}

/// What happened to one channel during a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    Sent,
    Failed,
    Offline, // not connected, nothing attempted
}

/// The one or two lamps driven together
pub struct LampManager {
    channels: Vec<LampChannel>,
    send_parallel: bool,
}

impl LampManager {
    pub fn new(channels: Vec<LampChannel>, send_parallel: bool) -> Self {
        LampManager { channels, send_parallel }
    }

    /// Build channels for every enabled lamp, each with its own transport
    pub fn from_config<F>(lamps: &[LampConfig], send_parallel: bool, mut make_transport: F) -> Result<Self>
    where
        F: FnMut() -> Box<dyn Transport>,
    {
        let channels: Vec<LampChannel> = lamps
            .iter()
            .filter(|lamp| lamp.enabled)
            .map(|lamp| LampChannel::new(&lamp.name, &lamp.address, make_transport()))
            .collect();

        if channels.is_empty() {
            return Err(anyhow!("No lamps configured"));
        }

        Ok(LampManager::new(channels, send_parallel))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[LampChannel] {
        &self.channels
    }

    pub fn connected_count(&self) -> usize {
        self.channels.iter().filter(|c| c.is_connected()).count()
    }

    /// Connect every channel with retries and report which ones came up
    pub async fn connect_all(&mut self, attempts: u32, backoff: Duration) -> Vec<bool> {
        let mut results = Vec::with_capacity(self.channels.len());
        for channel in &mut self.channels {
            info!("Connecting to {} lamp ({})...", channel.name, channel.address);
            let ok = channel.connect_with_retry(attempts, backoff).await;
            if ok {
                info!("{} lamp connected", channel.name);
            } else {
                warn!("{} lamp failed to connect after {} attempts", channel.name, attempts.max(1));
            }
            results.push(ok);
        }

        let connected = results.iter().filter(|ok| **ok).count();
        if connected == 0 {
            warn!("No lamps connected");
        } else if connected < results.len() {
            warn!("Only {} of {} lamps connected, running limited", connected, results.len());
        }
        results
    }

    pub async fn disconnect_all(&mut self) -> Vec<bool> {
        let mut results = Vec::with_capacity(self.channels.len());
        for channel in &mut self.channels {
            results.push(channel.disconnect().await);
        }
        results
    }

    /// Send one color per channel. A single color goes to every channel. A failing
    /// channel never stops the others from being attempted.
    pub async fn dispatch(&mut self, colors: &[Rgb]) -> Vec<ChannelOutcome> {
        if colors.is_empty() {
            return vec![ChannelOutcome::Offline; self.channels.len()];
        }

        let jobs: Vec<(&mut LampChannel, Rgb)> = self
            .channels
            .iter_mut()
            .enumerate()
            .map(|(i, channel)| {
                let color = if colors.len() == 1 { colors[0] } else { colors[i.min(colors.len() - 1)] };
                (channel, color)
            })
            .collect();

        if self.send_parallel {
            join_all(jobs.into_iter().map(|(channel, color)| send_one(channel, color))).await
        } else {
            let mut outcomes = Vec::with_capacity(jobs.len());
            for (channel, color) in jobs {
                outcomes.push(send_one(channel, color).await);
            }
            outcomes
        }
    }

    pub async fn set_all(&mut self, color: Rgb) -> Vec<ChannelOutcome> {
        self.dispatch(&[color]).await
    }

    /// Turn off every connected channel
    pub async fn turn_off_all(&mut self) -> Vec<ChannelOutcome> {
        self.set_all(Rgb::BLACK).await
    }
}

async fn send_one(channel: &mut LampChannel, color: Rgb) -> ChannelOutcome {
    if !channel.is_connected() {
        return ChannelOutcome::Offline;
    }
    if channel.set_color(color).await {
        ChannelOutcome::Sent
    } else {
        ChannelOutcome::Failed
    }
}
