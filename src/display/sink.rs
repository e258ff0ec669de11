use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use super::Screen;

/// Whatever physically shows the composed screen.
pub trait DisplaySink: Send {
    fn name(&self) -> &'static str;
    fn render(&mut self, screen: &Screen) -> Result<()>;
}

/// Logs each new screen at debug level; unchanged redraws are silent.
#[derive(Debug, Default)]
pub struct LogSink {
    last: Option<Screen>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplaySink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn render(&mut self, screen: &Screen) -> Result<()> {
        if self.last.as_ref() != Some(screen) {
            log::debug!("display: {}", screen.lines.join(" | "));
            self.last = Some(screen.clone());
        }
        Ok(())
    }
}

/// Rewrites a text file on every tick for an external panel driver. The file
/// is replaced atomically so readers never see a partial screen.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    staging: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        Self {
            path,
            staging: PathBuf::from(staging),
        }
    }
}

impl DisplaySink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn render(&mut self, screen: &Screen) -> Result<()> {
        let mut text = screen.to_string();
        text.push('\n');
        fs::write(&self.staging, text)
            .with_context(|| format!("write {}", self.staging.display()))?;
        fs::rename(&self.staging, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.txt");
        let mut sink = FileSink::new(&path);
        sink.render(&Screen {
            lines: vec!["a".into(), "b".into()],
        })
        .unwrap();
        sink.render(&Screen {
            lines: vec!["c".into()],
        })
        .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "c\n");
        assert!(!dir.path().join("panel.txt.tmp").exists());
    }
}
