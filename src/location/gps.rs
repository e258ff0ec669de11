//! GPS receiver on a serial line.
//!
//! The receiver streams NMEA sentences. Only GGA sentences carrying both a
//! latitude and a longitude produce a fix; everything else is skipped.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use super::{Fix, LocationSource};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_BAUD: u32 = 9600;

/// Lines read per poll before giving up until the next one.
const MAX_LINES_PER_POLL: usize = 16;

pub struct GpsSource {
    label: String,
    reader: Option<Box<dyn BufRead + Send>>,
    poll_interval: Duration,
}

impl GpsSource {
    /// Open a serial device. `/dev/` paths are switched to raw mode with a
    /// half-second read timeout so a silent receiver cannot wedge the poller.
    pub fn open(device: &Path, baud: u32, poll_interval: Duration) -> Result<Self> {
        if device.starts_with("/dev") {
            configure_serial_port(device, baud);
        }
        let file =
            File::open(device).with_context(|| format!("open gps device {}", device.display()))?;
        log::info!("GPS connected on {} ({} baud)", device.display(), baud);
        Ok(Self::from_reader(
            device.display().to_string(),
            BufReader::new(file),
            poll_interval,
        ))
    }

    /// Wrap any line reader (tests, recorded NMEA logs).
    pub fn from_reader<R: BufRead + Send + 'static>(
        label: impl Into<String>,
        reader: R,
        poll_interval: Duration,
    ) -> Self {
        Self {
            label: label.into(),
            reader: Some(Box::new(reader)),
            poll_interval,
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}

impl LocationSource for GpsSource {
    fn name(&self) -> &'static str {
        "gps"
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn poll(&mut self) -> Result<Option<Fix>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let mut raw = Vec::with_capacity(128);
        for _ in 0..MAX_LINES_PER_POLL {
            raw.clear();
            let read = reader
                .read_until(b'\n', &mut raw)
                .with_context(|| format!("read nmea from {}", self.label))?;
            if read == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&raw);
            if let Some(fix) = parse_gga(&line) {
                return Ok(Some(fix));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            log::info!("GPS transport {} closed", self.label);
        }
    }
}

/// Parse one NMEA line, returning a fix for GGA sentences with a position.
pub fn parse_gga(line: &str) -> Option<Fix> {
    let sentence = line.trim().strip_prefix('$')?;
    let body = match sentence.split_once('*') {
        Some((body, checksum)) => {
            if !checksum_matches(body, checksum) {
                return None;
            }
            body
        }
        None => sentence,
    };

    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 6 || !fields[0].ends_with("GGA") {
        return None;
    }
    let (lat, lat_dir, lon, lon_dir) = (fields[2], fields[3], fields[4], fields[5]);
    if lat.is_empty() || lon.is_empty() {
        return None;
    }
    let latitude = nmea_to_decimal(lat.parse().ok()?, hemisphere(lat_dir)?);
    let longitude = nmea_to_decimal(lon.parse().ok()?, hemisphere(lon_dir)?);
    let fix = Fix::new(latitude, longitude);
    fix.is_valid().then_some(fix)
}

/// Convert `DDDMM.MMMM` to decimal degrees, negative for the southern and
/// western hemispheres.
pub fn nmea_to_decimal(raw: f64, hemisphere: char) -> f64 {
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        'S' | 'W' => -decimal,
        _ => decimal,
    }
}

fn hemisphere(field: &str) -> Option<char> {
    let mut chars = field.chars();
    let dir = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !matches!(dir, 'N' | 'S' | 'E' | 'W') {
        return None;
    }
    Some(dir)
}

fn checksum_matches(body: &str, checksum: &str) -> bool {
    let Ok(expected) = u8::from_str_radix(checksum.trim(), 16) else {
        return false;
    };
    body.bytes().fold(0u8, |acc, b| acc ^ b) == expected
}

fn configure_serial_port(device: &Path, baud: u32) {
    let baud = baud.to_string();
    let result = Command::new("stty")
        .arg("-F")
        .arg(device)
        .args([baud.as_str(), "raw", "-echo", "min", "0", "time", "5"])
        .status();
    match result {
        Ok(status) if status.success() => {}
        Ok(status) => log::warn!(
            "stty on {} exited with {}; using current port settings",
            device.display(),
            status
        ),
        Err(err) => log::warn!(
            "stty unavailable for {}: {}; using current port settings",
            device.display(),
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    #[test]
    fn converts_southern_hemisphere_to_negative() {
        let decimal = nmea_to_decimal(1234.56, 'S');
        assert!((decimal - -12.576).abs() < 1e-9);
        assert!((nmea_to_decimal(1234.56, 'N') - 12.576).abs() < 1e-9);
        assert!((nmea_to_decimal(12158.0, 'W') - -121.966_666_666).abs() < 1e-6);
    }

    #[test]
    fn parses_gga_with_checksum() {
        let fix = parse_gga(GGA).expect("fix");
        assert!((fix.latitude - 48.1173).abs() < 1e-4);
        assert!((fix.longitude - 11.516_666).abs() < 1e-4);
    }

    #[test]
    fn rejects_bad_checksum_and_empty_position() {
        assert!(parse_gga(&GGA.replace("*47", "*48")).is_none());
        assert!(parse_gga("$GNGGA,123519,,,,,0,00,,,M,,M,,").is_none());
        assert!(parse_gga("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,,").is_none());
        assert!(parse_gga("garbage").is_none());
    }

    #[test]
    fn accepts_any_talker_without_checksum() {
        let fix = parse_gga("$GNGGA,000000,1407.4070,N,12159.2590,E,1,05,1.0,10.0,M,,M,,")
            .expect("fix");
        assert!((fix.latitude - 14.12345).abs() < 1e-6);
        assert!((fix.longitude - 121.98765).abs() < 1e-6);
    }

    #[test]
    fn poll_skips_until_fix_and_close_releases_reader() {
        let stream = format!(
            "$GPGSV,3,1,11,03,03,111,00*74\n$GPGGA,123519,,,,,0,00,,,M,,M,,\n{}\n",
            GGA
        );
        let mut source =
            GpsSource::from_reader("test", Cursor::new(stream.into_bytes()), DEFAULT_POLL_INTERVAL);
        assert!(source.poll().unwrap().is_some());
        assert!(source.poll().unwrap().is_none());

        source.close();
        assert!(!source.is_open());
        assert!(source.poll().unwrap().is_none());
        source.close();
    }
}
