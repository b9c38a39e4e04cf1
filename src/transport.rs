// Transport Module - Link to a lamp's command endpoint (UDP radio bridge or dry run)
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use tokio::net::UdpSocket;

/// One lamp's wireless link.
///
/// `connect`, `disconnect` and `is_connected` never fail past this boundary: problems
/// become `false`. `send` returns `Ok(false)` for a rejected packet and `Err` for a
/// link fault, which the lamp channel treats as a lost connection.
#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self, identity: &str) -> bool;
    async fn disconnect(&mut self) -> bool;
    fn is_connected(&self) -> bool;
    async fn send(&mut self, packet: &[u8]) -> Result<bool>;
}

/// Sends each command as one datagram to a `host:port` bridge that relays it over the air
#[derive(Default)]
pub struct UdpBridgeTransport {
    socket: Option<UdpSocket>,
}

impl UdpBridgeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open(identity: &str) -> Result<UdpSocket> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(identity).await?;
        Ok(socket)
    }
}

#[async_trait]
impl Transport for UdpBridgeTransport {
    async fn connect(&mut self, identity: &str) -> bool {
        match Self::open(identity).await {
            Ok(socket) => {
                self.socket = Some(socket);
                true
            }
            Err(e) => {
                debug!("UDP bridge {} unreachable: {}", identity, e);
                self.socket = None;
                false
            }
        }
    }

    async fn disconnect(&mut self) -> bool {
        self.socket = None;
        true
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn send(&mut self, packet: &[u8]) -> Result<bool> {
        let socket = self.socket.as_ref().ok_or_else(|| anyhow!("socket closed"))?;
        let written = socket.send(packet).await?;
        Ok(written == packet.len())
    }
}

/// Accepts every packet and only logs it
#[derive(Default)]
pub struct DryRunTransport {
    identity: Option<String>,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for DryRunTransport {
    async fn connect(&mut self, identity: &str) -> bool {
        self.identity = Some(identity.to_string());
        true
    }

    async fn disconnect(&mut self) -> bool {
        self.identity = None;
        true
    }

    fn is_connected(&self) -> bool {
        self.identity.is_some()
    }

    async fn send(&mut self, packet: &[u8]) -> Result<bool> {
        debug!(
            "dry-run {} <- {:02X?}",
            self.identity.as_deref().unwrap_or("?"),
            packet
        );
        Ok(true)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// How the next sends should behave
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SendBehavior {
        Deliver,
        Reject,     // Ok(false), link stays up
        RejectDrop, // Ok(false), link goes down
        Fault,      // Err
    }

    #[derive(Debug)]
    pub struct MockState {
        pub connected: bool,
        pub connect_results: Vec<bool>, // consumed front to back, then true
        pub connect_calls: usize,
        pub disconnect_calls: usize,
        pub sent: Vec<Vec<u8>>,
        pub send_calls: usize,
        pub behavior: SendBehavior,
    }

    /// Recording transport whose state stays inspectable after it is boxed
    #[derive(Clone)]
    pub struct MockTransport {
        pub state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            MockTransport {
                state: Arc::new(Mutex::new(MockState {
                    connected: false,
                    connect_results: Vec::new(),
                    connect_calls: 0,
                    disconnect_calls: 0,
                    sent: Vec::new(),
                    send_calls: 0,
                    behavior: SendBehavior::Deliver,
                })),
            }
        }

        pub fn with_connect_results(results: &[bool]) -> Self {
            let mock = Self::new();
            mock.state.lock().unwrap().connect_results = results.to_vec();
            mock
        }

        pub fn set_behavior(&self, behavior: SendBehavior) {
            self.state.lock().unwrap().behavior = behavior;
        }

        pub fn send_calls(&self) -> usize {
            self.state.lock().unwrap().send_calls
        }

        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().sent.clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self, _identity: &str) -> bool {
            let mut state = self.state.lock().unwrap();
            state.connect_calls += 1;
            let ok = if state.connect_results.is_empty() {
                true
            } else {
                state.connect_results.remove(0)
            };
            state.connected = ok;
            ok
        }

        async fn disconnect(&mut self) -> bool {
            let mut state = self.state.lock().unwrap();
            state.disconnect_calls += 1;
            state.connected = false;
            true
        }

        fn is_connected(&self) -> bool {
            self.state.lock().unwrap().connected
        }

        async fn send(&mut self, packet: &[u8]) -> Result<bool> {
            let mut state = self.state.lock().unwrap();
            state.send_calls += 1;
            match state.behavior {
                SendBehavior::Deliver => {
                    state.sent.push(packet.to_vec());
                    Ok(true)
                }
                SendBehavior::Reject => Ok(false),
                SendBehavior::RejectDrop => {
                    state.connected = false;
                    Ok(false)
                }
                SendBehavior::Fault => Err(anyhow!("write characteristic failed")),
            }
        }
    }
}
