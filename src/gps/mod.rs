// Device location capture used to bind workflow actions to a place and time

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default one-shot location timeout
pub const DEFAULT_GPS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpsError {
    #[error("GPS is not available: {0}")]
    Unavailable(String),

    #[error("Location permission denied")]
    Denied,

    #[error("Location request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Parameters of a single location request. Every transition issues a fresh
/// request; fixes are never reused across transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationRequest {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: DEFAULT_GPS_TIMEOUT,
            maximum_age: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl GpsFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters: None,
            captured_at: Utc::now(),
        }
    }
}

/// One-shot location provider consumed by the workflow controller
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait GpsProvider: Send + Sync {
    async fn current_position(&self, request: &LocationRequest) -> Result<GpsFix, GpsError>;
}

/// Raw platform positioning (device API, browser bridge, etc.).
/// It does not enforce the request timeout itself.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn locate(&self, high_accuracy: bool, maximum_age: Duration) -> Result<GpsFix, GpsError>;
}

/// Wraps a `LocationSource` and applies the request timeout
pub struct DeviceGps<S> {
    source: S,
}

impl<S: LocationSource> DeviceGps<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: LocationSource> GpsProvider for DeviceGps<S> {
    async fn current_position(&self, request: &LocationRequest) -> Result<GpsFix, GpsError> {
        let started = std::time::Instant::now();
        let result = timeout(
            request.timeout,
            self.source.locate(request.high_accuracy, request.maximum_age),
        )
        .await
        .map_err(|_| GpsError::Timeout(request.timeout))?;

        match &result {
            Ok(fix) => debug!(
                latitude = fix.latitude,
                longitude = fix.longitude,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Location acquired"
            ),
            Err(e) => warn!(error = %e, "Location request failed"),
        }
        result
    }
}

/// A source that always answers with the same outcome. Used by the
/// simulator and tests.
#[derive(Debug, Clone)]
pub struct FixedLocation {
    outcome: Result<(f64, f64), GpsError>,
}

impl FixedLocation {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            outcome: Ok((latitude, longitude)),
        }
    }

    pub fn failing(error: GpsError) -> Self {
        Self { outcome: Err(error) }
    }
}

#[async_trait]
impl LocationSource for FixedLocation {
    async fn locate(
        &self,
        _high_accuracy: bool,
        _maximum_age: Duration,
    ) -> Result<GpsFix, GpsError> {
        self.outcome
            .clone()
            .map(|(latitude, longitude)| GpsFix::new(latitude, longitude))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverResolves;

    #[async_trait]
    impl LocationSource for NeverResolves {
        async fn locate(
            &self,
            _high_accuracy: bool,
            _maximum_age: Duration,
        ) -> Result<GpsFix, GpsError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_fixed_location_returns_coordinates() {
        let gps = DeviceGps::new(FixedLocation::at(4.05, 9.76));
        let fix = gps.current_position(&LocationRequest::default()).await.unwrap();
        assert_eq!(fix.latitude, 4.05);
        assert_eq!(fix.longitude, 9.76);
    }

    #[tokio::test]
    async fn test_denied_location_is_reported() {
        let gps = DeviceGps::new(FixedLocation::failing(GpsError::Denied));
        let err = gps.current_position(&LocationRequest::default()).await.unwrap_err();
        assert_eq!(err, GpsError::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out() {
        let gps = DeviceGps::new(NeverResolves);
        let request = LocationRequest::default();
        let err = gps.current_position(&request).await.unwrap_err();
        assert_eq!(err, GpsError::Timeout(DEFAULT_GPS_TIMEOUT));
    }

    #[test]
    fn test_default_request_is_high_accuracy_without_cache() {
        let request = LocationRequest::default();
        assert!(request.high_accuracy);
        assert_eq!(request.timeout, Duration::from_secs(10));
        assert_eq!(request.maximum_age, Duration::ZERO);
    }
}
