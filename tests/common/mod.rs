// Common test utilities for integration tests
// In-memory transport, scripted location platform and event helpers shared by all suites

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::LevelFilter;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;

use beaconlink::codec::LineTerminator;
use beaconlink::config::Config;
use beaconlink::error::LocationError;
use beaconlink::location::{Fix, LocationPlatform, LocationSource};
use beaconlink::terminal::TerminalEvent;
use beaconlink::transport::{BoxedLink, Transport};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// Transport backed by `tokio::io::duplex`; the far end of every opened link
/// is handed to the test through the returned receiver
pub struct DuplexTransport {
    peers: mpsc::UnboundedSender<DuplexStream>,
    refuse: AtomicBool,
}

impl DuplexTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self { peers, refuse: AtomicBool::new(false) });
        (transport, rx)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn open(&self, _endpoint: &str) -> std::io::Result<BoxedLink> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
        }
        let (local, peer) = tokio::io::duplex(4096);
        let _ = self.peers.send(peer);
        Ok(Box::new(local))
    }
}

/// Location platform with one optional GPS position and no cache
pub struct ScriptedLocation {
    pub permission: bool,
    pub position: Option<(f64, f64)>,
    pub delay: Duration,
}

impl ScriptedLocation {
    pub fn at(latitude: f64, longitude: f64) -> Arc<Self> {
        Arc::new(Self {
            permission: true,
            position: Some((latitude, longitude)),
            delay: Duration::from_millis(10),
        })
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self { permission: false, position: None, delay: Duration::ZERO })
    }
}

#[async_trait]
impl LocationPlatform for ScriptedLocation {
    fn has_permission(&self) -> bool {
        self.permission
    }

    fn is_enabled(&self, source: LocationSource) -> bool {
        source == LocationSource::Gps
    }

    fn last_known(&self, _source: LocationSource) -> Option<Fix> {
        None
    }

    async fn request_once(&self, source: LocationSource) -> Result<Fix, LocationError> {
        tokio::time::sleep(self.delay).await;
        let (latitude, longitude) = self
            .position
            .ok_or_else(|| LocationError::Source("no satellites".to_string()))?;
        Ok(Fix { latitude, longitude, time_ms: Utc::now().timestamp_millis(), source })
    }
}

pub fn test_config() -> Config {
    Config {
        endpoint: Some("bridge".to_string()),
        line_terminator: LineTerminator::Lf,
        ..Config::default()
    }
}

/// Wait for the first event matching `pred`, skipping the rest
pub async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<TerminalEvent>, pred: F) -> TerminalEvent
where
    F: Fn(&TerminalEvent) -> bool,
{
    let search = async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(60), search)
        .await
        .expect("timed out waiting for event")
}

/// Read one frame written by the terminal, without its line ending
pub async fn read_frame(peer: &mut DuplexStream) -> String {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = peer.read(&mut byte).await.expect("peer read failed");
        assert!(n > 0, "link closed before a full frame arrived");
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    String::from_utf8(line).expect("frame is not UTF-8").trim_end_matches('\r').to_string()
}
