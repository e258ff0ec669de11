//! Device position from independently polled sources.
//!
//! Each `LocationSource` runs on its own thread and publishes into its own
//! `FixCell`. `LocationManager::current_location` only reads those cells, so it
//! never blocks on a sensor and one source can never disturb the other's fix.

pub mod gps;
mod poller;
pub mod wifi;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub use gps::{nmea_to_decimal, parse_gga, GpsSource};
pub use poller::PollerHandle;
pub use wifi::{parse_geolocation, WifiSource};

/// A resolved geographic coordinate in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
}

impl Fix {
    /// Returned when no source has ever produced a fix.
    pub const UNKNOWN: Fix = Fix {
        latitude: 0.0,
        longitude: 0.0,
    };

    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

/// Last published fix of one source.
///
/// A write replaces the whole value, so readers see either the previous fix or
/// the new one, never a mix of both.
#[derive(Clone, Debug, Default)]
pub struct FixCell(Arc<RwLock<Option<Fix>>>);

impl FixCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, fix: Fix) {
        match self.0.write() {
            Ok(mut guard) => *guard = Some(fix),
            Err(poisoned) => *poisoned.into_inner() = Some(fix),
        }
    }

    pub fn latest(&self) -> Option<Fix> {
        match self.0.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// A sensor that can resolve the device position.
///
/// `poll` returns `Ok(None)` when no fix is currently available. Errors are
/// logged by the poller and treated the same way; they never reach the manager.
pub trait LocationSource: Send {
    fn name(&self) -> &'static str;

    /// How long to wait between polls.
    fn poll_interval(&self) -> Duration;

    fn poll(&mut self) -> Result<Option<Fix>>;

    /// Release any transport the source holds. Must be idempotent.
    fn close(&mut self) {}
}

/// Arbitrates between the GPS and WiFi fixes.
pub struct LocationManager {
    gps_fix: FixCell,
    wifi_fix: FixCell,
    pollers: Vec<PollerHandle>,
}

impl LocationManager {
    /// A manager with no running sources. Fixes can still be published directly.
    pub fn new() -> Self {
        Self {
            gps_fix: FixCell::new(),
            wifi_fix: FixCell::new(),
            pollers: Vec::new(),
        }
    }

    /// Spawn one poller per configured source.
    pub fn start(
        gps: Option<Box<dyn LocationSource>>,
        wifi: Option<Box<dyn LocationSource>>,
    ) -> Result<Self> {
        let mut manager = Self::new();
        if let Some(source) = gps {
            let handle = poller::spawn(source, manager.gps_fix.clone())?;
            manager.pollers.push(handle);
        }
        if let Some(source) = wifi {
            let handle = poller::spawn(source, manager.wifi_fix.clone())?;
            manager.pollers.push(handle);
        }
        Ok(manager)
    }

    /// Best-effort position: GPS, else WiFi, else `(0, 0)`.
    pub fn current_location(&self) -> Fix {
        self.gps_fix
            .latest()
            .or_else(|| self.wifi_fix.latest())
            .unwrap_or(Fix::UNKNOWN)
    }

    pub fn gps_fix(&self) -> Option<Fix> {
        self.gps_fix.latest()
    }

    pub fn wifi_fix(&self) -> Option<Fix> {
        self.wifi_fix.latest()
    }

    pub fn publish_gps(&self, fix: Fix) {
        self.gps_fix.publish(fix);
    }

    pub fn publish_wifi(&self, fix: Fix) {
        self.wifi_fix.publish(fix);
    }

    /// Stop every poller and release the source transports. Safe to call twice.
    pub fn close(&mut self) {
        for handle in self.pollers.iter_mut() {
            handle.stop();
            log::debug!("{} location source closed", handle.name());
        }
        self.pollers.clear();
    }
}

impl Default for LocationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocationManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_from_gps_to_wifi_to_sentinel() {
        let manager = LocationManager::new();
        assert_eq!(manager.current_location(), Fix::UNKNOWN);

        manager.publish_wifi(Fix::new(14.5, 121.0));
        assert_eq!(manager.current_location(), Fix::new(14.5, 121.0));

        manager.publish_gps(Fix::new(14.12345, 121.98765));
        assert_eq!(manager.current_location(), Fix::new(14.12345, 121.98765));
    }

    #[test]
    fn sources_do_not_disturb_each_other() {
        let manager = LocationManager::new();
        manager.publish_gps(Fix::new(1.0, 2.0));
        manager.publish_wifi(Fix::new(3.0, 4.0));

        manager.publish_gps(Fix::new(5.0, 6.0));
        assert_eq!(manager.wifi_fix(), Some(Fix::new(3.0, 4.0)));

        manager.publish_wifi(Fix::new(7.0, 8.0));
        assert_eq!(manager.gps_fix(), Some(Fix::new(5.0, 6.0)));
    }

    #[test]
    fn close_is_idempotent() {
        let mut manager = LocationManager::new();
        manager.close();
        manager.close();
        assert_eq!(manager.current_location(), Fix::UNKNOWN);
    }

    #[test]
    fn fix_validity_bounds() {
        assert!(Fix::new(-90.0, 180.0).is_valid());
        assert!(!Fix::new(91.0, 0.0).is_valid());
        assert!(!Fix::new(0.0, f64::NAN).is_valid());
    }
}
