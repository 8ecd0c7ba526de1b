// Best-effort coordinate acquisition for outgoing distress messages
// Fallback chain: permission, enabled sources, a fresh-enough cached fix, then a
// timeout-bounded race between the enabled sources

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{select_ok, BoxFuture, FutureExt};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::LocationError;

pub const DEFAULT_MAX_FIX_AGE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_FIX_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationSource {
    /// Satellite positioning
    Gps,
    /// Cell/Wi-Fi positioning
    Network,
}

impl LocationSource {
    pub const ALL: [LocationSource; 2] = [LocationSource::Gps, LocationSource::Network];
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Acquisition time, epoch milliseconds
    pub time_ms: i64,
    pub source: LocationSource,
}

impl Fix {
    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.time_ms).max(0) as u64)
    }
}

#[async_trait]
pub trait LocationPlatform: Send + Sync {
    fn has_permission(&self) -> bool;
    fn is_enabled(&self, source: LocationSource) -> bool;
    fn last_known(&self, source: LocationSource) -> Option<Fix>;
    async fn request_once(&self, source: LocationSource) -> Result<Fix, LocationError>;
}

/// Identifies one logical location request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(pub u64);

pub struct LocationProvider {
    platform: Arc<dyn LocationPlatform>,
    max_age: Duration,
    timeout: Duration,
    next_token: AtomicU64,
}

impl LocationProvider {
    pub fn new(platform: Arc<dyn LocationPlatform>) -> Self {
        Self::with_limits(platform, DEFAULT_MAX_FIX_AGE, DEFAULT_FIX_TIMEOUT)
    }

    pub fn with_limits(platform: Arc<dyn LocationPlatform>, max_age: Duration, timeout: Duration) -> Self {
        Self {
            platform,
            max_age,
            timeout,
            next_token: AtomicU64::new(1),
        }
    }

    /// Checks that must pass before any source is queried
    fn enabled_sources(&self) -> Result<Vec<LocationSource>, LocationError> {
        if !self.platform.has_permission() {
            return Err(LocationError::Permission);
        }
        let sources: Vec<LocationSource> = LocationSource::ALL
            .iter()
            .copied()
            .filter(|s| self.platform.is_enabled(*s))
            .collect();
        if sources.is_empty() {
            return Err(LocationError::HardwareDisabled);
        }
        Ok(sources)
    }

    /// Newest cached fix younger than the age limit
    fn cached_fix(&self, sources: &[LocationSource]) -> Option<Fix> {
        let now_ms = Utc::now().timestamp_millis();
        sources
            .iter()
            .filter_map(|s| self.platform.last_known(*s))
            .filter(|fix| fix.age(now_ms) < self.max_age)
            .max_by_key(|fix| fix.time_ms)
    }

    fn fresh_fix(&self, sources: Vec<LocationSource>) -> BoxFuture<'static, Result<Fix, LocationError>> {
        let platform = self.platform.clone();
        let timeout = self.timeout;
        async move {
            let requests = sources.into_iter().map(|source| {
                let platform = platform.clone();
                async move { platform.request_once(source).await }.boxed()
            });
            // first success wins; the losing request is dropped with the race
            match tokio::time::timeout(timeout, select_ok(requests)).await {
                Ok(Ok((fix, _rest))) => Ok(fix),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(LocationError::Timeout(timeout)),
            }
        }
        .boxed()
    }

    /// Resolve a single fix through the full fallback chain
    pub async fn current_location(&self) -> Result<Fix, LocationError> {
        let sources = self.enabled_sources()?;
        if let Some(fix) = self.cached_fix(&sources) {
            debug!("Using cached {:?} fix", fix.source);
            return Ok(fix);
        }
        info!("Requesting fresh fix from {:?}", sources);
        self.fresh_fix(sources).await
    }

    /// Callback form of [`current_location`](Self::current_location).
    ///
    /// Permission, hardware and cached outcomes call back before returning;
    /// fresh requests call back from a spawned task. The callback runs exactly
    /// once and receives the token returned here.
    pub fn get_current_location<F>(&self, callback: F) -> RequestToken
    where
        F: FnOnce(RequestToken, Result<Fix, LocationError>) + Send + 'static,
    {
        let token = RequestToken(self.next_token.fetch_add(1, Ordering::Relaxed));

        let sources = match self.enabled_sources() {
            Ok(sources) => sources,
            Err(e) => {
                warn!("Location request {:?} rejected: {}", token, e);
                callback(token, Err(e));
                return token;
            }
        };
        if let Some(fix) = self.cached_fix(&sources) {
            callback(token, Ok(fix));
            return token;
        }

        let fresh = self.fresh_fix(sources);
        tokio::spawn(async move {
            callback(token, fresh.await);
        });
        token
    }
}

/// Platform with a single configured position and no live sources
#[derive(Debug, Clone, Default)]
pub struct FixedLocationPlatform {
    position: Option<(f64, f64)>,
}

impl FixedLocationPlatform {
    pub fn new(position: Option<(f64, f64)>) -> Self {
        Self { position }
    }
}

#[async_trait]
impl LocationPlatform for FixedLocationPlatform {
    fn has_permission(&self) -> bool {
        self.position.is_some()
    }

    fn is_enabled(&self, source: LocationSource) -> bool {
        source == LocationSource::Gps
    }

    fn last_known(&self, source: LocationSource) -> Option<Fix> {
        let (latitude, longitude) = self.position?;
        (source == LocationSource::Gps).then(|| Fix {
            latitude,
            longitude,
            time_ms: Utc::now().timestamp_millis(),
            source,
        })
    }

    async fn request_once(&self, source: LocationSource) -> Result<Fix, LocationError> {
        self.last_known(source)
            .ok_or_else(|| LocationError::Source(format!("{:?} has no position", source)))
    }
}
