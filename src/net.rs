//! Connectivity facts for the status panel.

use std::net::{IpAddr, UdpSocket};
use std::process::Command;
use std::time::{Duration, Instant};

pub const DEFAULT_REFRESH: Duration = Duration::from_secs(30);

/// Address of the interface that would route to the internet. Connecting a UDP
/// socket only selects a route; no packet is sent.
pub fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// SSID of the associated wireless network, if any.
pub fn wifi_ssid() -> Option<String> {
    let output = Command::new("iwgetid").arg("-r").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let ssid = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!ssid.is_empty()).then_some(ssid)
}

/// Cached IP and SSID, refreshed at most once per refresh period.
#[derive(Debug)]
pub struct Connectivity {
    refresh: Duration,
    checked_at: Option<Instant>,
    ip: Option<String>,
    ssid: Option<String>,
}

impl Connectivity {
    pub fn new(refresh: Duration) -> Self {
        Self {
            refresh,
            checked_at: None,
            ip: None,
            ssid: None,
        }
    }

    /// Current `(ssid, ip)`, probing the system when the cache is stale.
    pub fn current(&mut self, now: Instant) -> (Option<String>, Option<String>) {
        let stale = self
            .checked_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.refresh);
        if stale {
            self.ip = local_ip().map(|ip| ip.to_string());
            self.ssid = wifi_ssid();
            self.checked_at = Some(now);
            log::debug!("connectivity: ssid={:?} ip={:?}", self.ssid, self.ip);
        }
        (self.ssid.clone(), self.ip.clone())
    }
}
