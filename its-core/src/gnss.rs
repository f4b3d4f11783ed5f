//! GNSS position report cache.
//!
//! The report shape and validation rules are specified here; the external
//! GNSS daemon protocol (gpsd-style, TCP, line-oriented JSON) that feeds it
//! is out of scope — we only specify the in-process cache.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::{CoreError, Result};

/// An immutable GNSS fix. All fields but `capture_timestamp` are optional;
/// degrees/radians pairs, when both given, must be exactly equivalent —
/// we only store degrees and derive radians on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct GnssReport {
    pub capture_timestamp: f64,
    pub source_time: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub acceleration: Option<f64>,
    pub track: Option<f64>,
    pub heading_true: Option<f64>,
    pub heading_magnetic: Option<f64>,
    pub horizontal_error: Option<f64>,
    pub altitude_error: Option<f64>,
}

impl GnssReport {
    /// Validate field ranges. Latitude in `[-90, 90]`, longitude in
    /// `(-180, 180]`, headings in `[0, 360)`.
    pub fn new(capture_timestamp: f64) -> Builder {
        Builder {
            capture_timestamp,
            source_time: None,
            latitude: None,
            longitude: None,
            altitude: None,
            speed: None,
            acceleration: None,
            track: None,
            heading_true: None,
            heading_magnetic: None,
            horizontal_error: None,
            altitude_error: None,
        }
    }

    pub fn latitude_radians(&self) -> Option<f64> {
        self.latitude.map(f64::to_radians)
    }

    pub fn longitude_radians(&self) -> Option<f64> {
        self.longitude.map(f64::to_radians)
    }
}

/// Builder enforcing the range invariants at construction.
pub struct Builder {
    capture_timestamp: f64,
    source_time: Option<f64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
    speed: Option<f64>,
    acceleration: Option<f64>,
    track: Option<f64>,
    heading_true: Option<f64>,
    heading_magnetic: Option<f64>,
    horizontal_error: Option<f64>,
    altitude_error: Option<f64>,
}

impl Builder {
    pub fn source_time(mut self, v: f64) -> Self {
        self.source_time = Some(v);
        self
    }
    pub fn latitude(mut self, v: f64) -> Self {
        self.latitude = Some(v);
        self
    }
    pub fn longitude(mut self, v: f64) -> Self {
        self.longitude = Some(v);
        self
    }
    pub fn altitude(mut self, v: f64) -> Self {
        self.altitude = Some(v);
        self
    }
    pub fn speed(mut self, v: f64) -> Self {
        self.speed = Some(v);
        self
    }
    pub fn acceleration(mut self, v: f64) -> Self {
        self.acceleration = Some(v);
        self
    }
    pub fn track(mut self, v: f64) -> Self {
        self.track = Some(v);
        self
    }
    pub fn heading_true(mut self, v: f64) -> Self {
        self.heading_true = Some(v);
        self
    }
    pub fn heading_magnetic(mut self, v: f64) -> Self {
        self.heading_magnetic = Some(v);
        self
    }
    pub fn horizontal_error(mut self, v: f64) -> Self {
        self.horizontal_error = Some(v);
        self
    }
    pub fn altitude_error(mut self, v: f64) -> Self {
        self.altitude_error = Some(v);
        self
    }

    pub fn build(self) -> Result<GnssReport> {
        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(CoreError::LatitudeOutOfRange(lat));
            }
        }
        if let Some(lon) = self.longitude {
            if !(-180.0..=180.0).contains(&lon) || lon == -180.0 {
                return Err(CoreError::LongitudeOutOfRange(lon));
            }
        }
        for h in [self.heading_true, self.heading_magnetic, self.track] {
            if let Some(h) = h {
                if !(0.0..360.0).contains(&h) {
                    return Err(CoreError::HeadingOutOfRange(h));
                }
            }
        }
        Ok(GnssReport {
            capture_timestamp: self.capture_timestamp,
            source_time: self.source_time,
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            speed: self.speed,
            acceleration: self.acceleration,
            track: self.track,
            heading_true: self.heading_true,
            heading_magnetic: self.heading_magnetic,
            horizontal_error: self.horizontal_error,
            altitude_error: self.altitude_error,
        })
    }
}

/// Holds the most recent `GnssReport`, replaced whole on arrival of a
/// newer sample. Readers observe either the previous or the new report,
/// never a partial one.
#[derive(Clone, Default)]
pub struct GnssCache {
    inner: Arc<RwLock<Option<GnssReport>>>,
}

impl GnssCache {
    pub fn new() -> Self {
        GnssCache { inner: Arc::new(RwLock::new(None)) }
    }

    /// Replace the cached report if `report` is newer than what's held.
    pub fn update(&self, report: GnssReport) {
        let mut guard = self.inner.write();
        if guard.as_ref().map(|r| report.capture_timestamp > r.capture_timestamp).unwrap_or(true) {
            *guard = Some(report);
        }
    }

    pub fn current(&self) -> Option<GnssReport> {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_latitude() {
        let err = GnssReport::new(0.0).latitude(91.0).build();
        assert!(err.is_err());
    }

    #[test]
    fn cache_keeps_newest_report() {
        let cache = GnssCache::new();
        cache.update(GnssReport::new(1.0).latitude(1.0).build().unwrap());
        cache.update(GnssReport::new(0.5).latitude(2.0).build().unwrap());
        assert_eq!(cache.current().unwrap().latitude, Some(1.0));
        cache.update(GnssReport::new(2.0).latitude(3.0).build().unwrap());
        assert_eq!(cache.current().unwrap().latitude, Some(3.0));
    }
}
