use chrono::NaiveTime;
use std::fmt;

use super::Status;

pub const BRAND: &str = "TRAPMOS";

/// Text content of one redraw, one entry per panel line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Screen {
    pub lines: Vec<String>,
}

impl Screen {
    fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

/// Lay out a status for the panel. `now` is the wall-clock time shown on the
/// live screens.
pub fn compose(status: &Status, now: NaiveTime) -> Screen {
    let clock = format!("Time: {}", now.format("%H:%M"));
    match status {
        Status::Startup => Screen {
            lines: vec![
                BRAND.to_string(),
                "Mosquito trap".to_string(),
                "Starting...".to_string(),
            ],
        },
        Status::Detecting(live) => Screen {
            lines: vec![
                format!("Mosquitoes: {}", live.count),
                format!("FPS: {:.1}", live.fps),
                format!("WiFi: {}", live.wifi.as_deref().unwrap_or("Disconnected")),
                format!("IP: {}", live.ip.as_deref().unwrap_or("N/A")),
                clock,
            ],
        },
        Status::Message(text) => Screen::from_text(text),
        Status::Sleeping => Screen {
            lines: vec!["Sleeping...".to_string(), clock],
        },
        Status::Stopping(text) if text.trim().is_empty() => Screen {
            lines: vec![BRAND.to_string(), "Stopped".to_string()],
        },
        Status::Stopping(text) => Screen::from_text(text),
    }
}
