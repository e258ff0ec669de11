//! Device status panel.
//!
//! Writers replace the single current [`Status`]; there is no history. A render
//! thread redraws from whatever is current on a fixed interval, so the
//! orchestrator and the upload worker can both post status without
//! coordinating. [`StatusDisplay::stop`] is the only way out: it shows the
//! terminal message, waits until that message has actually been drawn, then
//! halts the render thread.

mod screen;
mod sink;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub use screen::{compose, Screen, BRAND};
pub use sink::{DisplaySink, FileSink, LogSink};

pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_STOP_LINGER: Duration = Duration::from_millis(1500);

/// Live numbers shown while the trap is sensing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveStatus {
    pub count: usize,
    pub fps: f32,
    pub wifi: Option<String>,
    pub ip: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Status {
    Startup,
    Detecting(LiveStatus),
    Message(String),
    Sleeping,
    Stopping(String),
}

#[derive(Clone, Copy, Debug)]
pub struct DisplaySettings {
    pub render_interval: Duration,
    /// Minimum time the terminal message stays up before the panel halts.
    pub stop_linger: Duration,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            render_interval: DEFAULT_RENDER_INTERVAL,
            stop_linger: DEFAULT_STOP_LINGER,
        }
    }
}

#[derive(Debug)]
struct PanelState {
    status: Status,
    /// Bumped on every accepted write.
    generation: u64,
    /// Generation of the status most recently handed to the sink.
    drawn: u64,
    redraw: bool,
    halt: bool,
}

#[derive(Debug)]
struct Panel {
    state: Mutex<PanelState>,
    changed: Condvar,
    render_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Panel {
    fn lock(&self) -> MutexGuard<'_, PanelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle to the panel; every clone drives the same render thread.
#[derive(Clone, Debug)]
pub struct StatusDisplay {
    panel: Arc<Panel>,
    settings: DisplaySettings,
}

impl StatusDisplay {
    /// Show `Startup` and begin rendering into `sink`.
    pub fn start(sink: Box<dyn DisplaySink>, settings: DisplaySettings) -> Result<Self> {
        let panel = Arc::new(Panel {
            state: Mutex::new(PanelState {
                status: Status::Startup,
                generation: 0,
                drawn: 0,
                redraw: false,
                halt: false,
            }),
            changed: Condvar::new(),
            render_thread: Mutex::new(None),
        });
        let thread_panel = Arc::clone(&panel);
        let interval = settings.render_interval;
        let sink_name = sink.name();
        let join = std::thread::Builder::new()
            .name("status-display".to_string())
            .spawn(move || render_loop(&thread_panel, sink, interval))
            .context("spawn display render thread")?;
        *panel
            .render_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(join);
        log::info!("status display started (sink={})", sink_name);
        Ok(Self { panel, settings })
    }

    /// Replace the current status. Ignored once the panel is stopping.
    pub fn set(&self, status: Status) {
        let mut state = self.panel.lock();
        if matches!(state.status, Status::Stopping(_)) {
            return;
        }
        state.status = status;
        state.generation += 1;
    }

    pub fn show_message(&self, text: impl Into<String>) {
        self.set(Status::Message(text.into()));
    }

    pub fn status(&self) -> Status {
        self.panel.lock().status.clone()
    }

    /// Redraw now and wait until the current status is on the panel.
    ///
    /// Returns `false` when the panel is halted or the render thread did not
    /// get to it in time.
    pub fn flush(&self) -> bool {
        let target = {
            let mut state = self.panel.lock();
            if state.halt {
                return false;
            }
            state.redraw = true;
            state.generation
        };
        self.panel.changed.notify_all();
        self.wait_drawn(target)
    }

    fn wait_drawn(&self, target: u64) -> bool {
        let deadline = self.settings.render_interval * 2 + Duration::from_secs(1);
        let state = self.panel.lock();
        let (_state, wait) = self
            .panel
            .changed
            .wait_timeout_while(state, deadline, |s| s.drawn < target && !s.halt)
            .unwrap_or_else(PoisonError::into_inner);
        !wait.timed_out()
    }

    /// Show `message` as the terminal screen, wait until it has been drawn at
    /// least once and the linger time has passed, then halt the render
    /// thread. Later calls return immediately.
    pub fn stop(&self, message: impl Into<String>) -> Result<()> {
        let posted = Instant::now();
        let target = {
            let mut state = self.panel.lock();
            if state.halt {
                return Ok(());
            }
            if !matches!(state.status, Status::Stopping(_)) {
                state.status = Status::Stopping(message.into());
                state.generation += 1;
            }
            state.redraw = true;
            state.generation
        };
        self.panel.changed.notify_all();

        if !self.wait_drawn(target) {
            log::warn!("display did not render the stop message in time");
        }

        let shown = posted.elapsed();
        if shown < self.settings.stop_linger {
            std::thread::sleep(self.settings.stop_linger - shown);
        }

        self.panel.lock().halt = true;
        self.panel.changed.notify_all();

        let join = self
            .panel
            .render_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            join.join()
                .map_err(|_| anyhow!("display render thread panicked"))?;
            log::info!("status display halted");
        }
        Ok(())
    }
}

fn render_loop(panel: &Panel, mut sink: Box<dyn DisplaySink>, interval: Duration) {
    let mut sink_failing = false;
    loop {
        let (status, generation) = {
            let mut state = panel.lock();
            state.redraw = false;
            (state.status.clone(), state.generation)
        };
        let screen = compose(&status, Local::now().time());
        match sink.render(&screen) {
            Ok(()) => sink_failing = false,
            Err(err) => {
                if !sink_failing {
                    log::warn!("display sink {} failed: {:#}", sink.name(), err);
                }
                sink_failing = true;
            }
        }

        let mut state = panel.lock();
        state.drawn = generation;
        panel.changed.notify_all();
        let (state, _) = panel
            .changed
            .wait_timeout_while(state, interval, |s| !s.halt && !s.redraw)
            .unwrap_or_else(PoisonError::into_inner);
        if state.halt {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Screen>>>);

    impl DisplaySink for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn render(&mut self, screen: &Screen) -> Result<()> {
            self.0.lock().unwrap().push(screen.clone());
            Ok(())
        }
    }

    fn fast() -> DisplaySettings {
        DisplaySettings {
            render_interval: Duration::from_millis(20),
            stop_linger: Duration::from_millis(10),
        }
    }

    #[test]
    fn last_write_wins() {
        let display = StatusDisplay::start(Box::new(Recorder::default()), fast()).unwrap();
        display.show_message("one");
        display.set(Status::Sleeping);
        assert_eq!(display.status(), Status::Sleeping);
        display.stop("bye").unwrap();
    }

    #[test]
    fn stop_renders_terminal_message_before_halting() {
        let recorder = Recorder::default();
        let display = StatusDisplay::start(
            Box::new(recorder.clone()),
            DisplaySettings {
                render_interval: Duration::from_secs(60),
                stop_linger: Duration::ZERO,
            },
        )
        .unwrap();
        display.stop("Shutting down").unwrap();

        let screens = recorder.0.lock().unwrap();
        assert_eq!(
            screens.last().map(|s| s.lines.clone()),
            Some(vec!["Shutting down".to_string()])
        );
    }

    #[test]
    fn writes_after_stop_are_ignored_and_stop_is_idempotent() {
        let display = StatusDisplay::start(Box::new(Recorder::default()), fast()).unwrap();
        let other = display.clone();
        display.stop("done").unwrap();
        other.show_message("late");
        assert_eq!(other.status(), Status::Stopping("done".into()));
        other.stop("again").unwrap();
    }

    #[test]
    fn flush_draws_current_status_without_waiting_for_the_tick() {
        let recorder = Recorder::default();
        let display = StatusDisplay::start(
            Box::new(recorder.clone()),
            DisplaySettings {
                render_interval: Duration::from_secs(60),
                stop_linger: Duration::ZERO,
            },
        )
        .unwrap();
        display.show_message("Upload OK");
        assert!(display.flush());
        assert_eq!(
            recorder.0.lock().unwrap().last().map(|s| s.lines.clone()),
            Some(vec!["Upload OK".to_string()])
        );
        display.stop("bye").unwrap();
        assert!(!display.flush());
    }

    #[test]
    fn stop_lingers_for_configured_time() {
        let display = StatusDisplay::start(
            Box::new(Recorder::default()),
            DisplaySettings {
                render_interval: Duration::from_millis(20),
                stop_linger: Duration::from_millis(120),
            },
        )
        .unwrap();
        let started = Instant::now();
        display.stop("bye").unwrap();
        assert!(started.elapsed() >= Duration::from_millis(120));
    }
}
