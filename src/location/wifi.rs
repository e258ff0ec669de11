//! IP-based geolocation over the WiFi uplink.
//!
//! Coarse, but available whenever the trap has connectivity and the GPS has no
//! sky view. The WiFi source holds no releasable handle.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::time::Duration;

use super::{Fix, LocationSource};

pub const DEFAULT_ENDPOINT: &str = "https://ipinfo.io/json";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct WifiSource {
    endpoint: String,
    agent: ureq::Agent,
    poll_interval: Duration,
}

impl WifiSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            poll_interval,
        }
    }
}

impl LocationSource for WifiSource {
    fn name(&self) -> &'static str {
        "wifi"
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn poll(&mut self) -> Result<Option<Fix>> {
        let response = self
            .agent
            .get(&self.endpoint)
            .call()
            .map_err(|e| anyhow!("geolocation lookup {} failed: {}", self.endpoint, e))?;
        let body = response
            .into_string()
            .context("read geolocation response")?;
        Ok(parse_geolocation(&body))
    }
}

/// Extract a fix from common IP-geolocation response shapes:
/// `{"loc": "lat,lon"}`, `{"latitude": .., "longitude": ..}` or
/// `{"lat": .., "lon": ..}`. A `"status": "fail"` body means unavailable.
pub fn parse_geolocation(body: &str) -> Option<Fix> {
    let value: Value = serde_json::from_str(body).ok()?;
    if value.get("status").and_then(Value::as_str) == Some("fail") {
        return None;
    }

    let fix = if let Some(loc) = value.get("loc").and_then(Value::as_str) {
        let (lat, lon) = loc.split_once(',')?;
        Fix::new(lat.trim().parse().ok()?, lon.trim().parse().ok()?)
    } else {
        let lat = number(&value, &["latitude", "lat"])?;
        let lon = number(&value, &["longitude", "lon", "lng"])?;
        Fix::new(lat, lon)
    };
    fix.is_valid().then_some(fix)
}

fn number(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
