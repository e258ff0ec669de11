use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{FixCell, LocationSource};

const SHUTDOWN_CHECK: Duration = Duration::from_millis(50);

/// Running poller thread for one location source.
#[derive(Debug)]
pub struct PollerHandle {
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the poller and wait for it to close its source.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("{} poller thread panicked", self.name);
            }
        }
    }
}

pub(crate) fn spawn(source: Box<dyn LocationSource>, cell: FixCell) -> Result<PollerHandle> {
    let name = source.name();
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_thread = shutdown.clone();
    let join = std::thread::Builder::new()
        .name(format!("location-{}", name))
        .spawn(move || run(source, cell, shutdown_thread))
        .with_context(|| format!("spawn {} poller", name))?;
    Ok(PollerHandle {
        name,
        shutdown,
        join: Some(join),
    })
}

fn run(mut source: Box<dyn LocationSource>, cell: FixCell, shutdown: Arc<AtomicBool>) {
    let name = source.name();
    let interval = source.poll_interval();
    log::info!("{} location poller started (every {:?})", name, interval);
    while !shutdown.load(Ordering::SeqCst) {
        match source.poll() {
            Ok(Some(fix)) if fix.is_valid() => {
                log::debug!("{} fix {:.5},{:.5}", name, fix.latitude, fix.longitude);
                cell.publish(fix);
            }
            Ok(Some(fix)) => {
                log::warn!("{} produced out-of-range fix {:?}; ignored", name, fix);
            }
            Ok(None) => {}
            Err(err) => {
                log::debug!("{} fix unavailable: {:#}", name, err);
            }
        }
        sleep_unless_shutdown(interval, &shutdown);
    }
    source.close();
    log::info!("{} location poller stopped", name);
}

fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_CHECK));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Fix;
    use anyhow::anyhow;

    struct CountingSource {
        polls: u32,
        closed: Arc<AtomicBool>,
    }

    impl LocationSource for CountingSource {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        fn poll(&mut self) -> Result<Option<Fix>> {
            self.polls += 1;
            match self.polls % 3 {
                0 => Err(anyhow!("sensor busy")),
                1 => Ok(None),
                _ => Ok(Some(Fix::new(self.polls as f64, 10.0))),
            }
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn poller_publishes_and_closes_source_on_stop() {
        let closed = Arc::new(AtomicBool::new(false));
        let cell = FixCell::new();
        let mut handle = spawn(
            Box::new(CountingSource {
                polls: 0,
                closed: closed.clone(),
            }),
            cell.clone(),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while cell.latest().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(cell.latest().is_some());

        handle.stop();
        assert!(closed.load(Ordering::SeqCst));
        handle.stop();
    }
}
