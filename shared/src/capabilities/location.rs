use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::LocationFix;

/// Why a single fix attempt failed. Callers treat every variant as fatal for
/// the current trigger but can still tell the user what to do about it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum LocationError {
    #[error("location unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("location request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("location permission denied")]
    Denied,
}

impl LocationError {
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixRequest {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached position the platform may return. Zero forces a fresh fix.
    pub maximum_age: Duration,
}

impl FixRequest {
    #[must_use]
    pub const fn fresh_high_accuracy(timeout: Duration) -> Self {
        Self {
            high_accuracy: true,
            timeout,
            maximum_age: Duration::ZERO,
        }
    }
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn get_fix(&self, request: &FixRequest) -> Result<LocationFix, LocationError>;
}

/// Failure codes reported by a device geolocation API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformFailure {
    PermissionDenied,
    PositionUnavailable(String),
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlatformReading {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    /// Age of the reading when it was handed over.
    pub age: Duration,
}

/// The raw device geolocation API a shell bridges in.
#[async_trait]
pub trait PlatformGeolocation: Send + Sync {
    async fn current_position(&self, request: &FixRequest)
        -> Result<PlatformReading, PlatformFailure>;
}

/// Single-attempt provider over an optional device API. A shell without
/// geolocation passes `None` and every request fails as unavailable.
#[derive(Clone, Default)]
pub struct GeolocationProvider {
    platform: Option<Arc<dyn PlatformGeolocation>>,
}

impl GeolocationProvider {
    #[must_use]
    pub fn new(platform: Option<Arc<dyn PlatformGeolocation>>) -> Self {
        Self { platform }
    }

    #[must_use]
    pub fn unsupported() -> Self {
        Self { platform: None }
    }
}

#[async_trait]
impl LocationProvider for GeolocationProvider {
    async fn get_fix(&self, request: &FixRequest) -> Result<LocationFix, LocationError> {
        let Some(platform) = &self.platform else {
            warn!("geolocation requested on a platform without support");
            return Err(LocationError::Unavailable {
                reason: "geolocation is not supported".into(),
            });
        };

        let reading = match tokio::time::timeout(request.timeout, platform.current_position(request))
            .await
        {
            Err(_elapsed) => return Err(LocationError::timeout(request.timeout)),
            Ok(Err(PlatformFailure::Timeout)) => return Err(LocationError::timeout(request.timeout)),
            Ok(Err(PlatformFailure::PermissionDenied)) => return Err(LocationError::Denied),
            Ok(Err(PlatformFailure::PositionUnavailable(reason))) => {
                return Err(LocationError::Unavailable { reason })
            }
            Ok(Ok(reading)) => reading,
        };

        // `maximum_age` is a request to the platform; a fresh fix still
        // arrives a few ms old. Only positions older than the lookup itself
        // are treated as cached.
        if reading.age > request.timeout {
            return Err(LocationError::Unavailable {
                reason: format!(
                    "platform returned a cached position {}ms old",
                    reading.age.as_millis()
                ),
            });
        }

        debug!(accuracy_m = ?reading.accuracy_m, "location fix acquired");
        LocationFix::new(reading.latitude, reading.longitude).map_err(|e| {
            LocationError::Unavailable {
                reason: e.to_string(),
            }
        })
    }
}
