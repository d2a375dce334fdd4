//! Controller Handle - lifecycle of the joystick input thread
//!
//! The input pipeline owns a dedicated OS thread because its only suspension
//! point is a blocking `read(2)` on the device node. It cycles through two
//! states until stopped:
//!
//! ```text
//!            locate + open ok
//! Locating ────────────────────► Reading
//!    ▲  │                          │
//!    │  └─ backoff, retry          │ truncated record / EOF / read error
//!    └─────────────────────────────┘
//! ```
//!
//! Failures here never reach the sampling scheduler. When retries run out the
//! thread logs and exits, everything else keeps running.

use super::device_locator::{DeviceLocator, LocatorError, SENSE_HAT_DEVICE_NAME};
use super::device_locator::{DEFAULT_DEVICE_DIR, DEFAULT_REGISTRY_DIR};
use super::event_collector::{CollectorError, EventReader};
use super::event_processor::EventDispatcher;
use crate::node::NodeStore;
use statum::{machine, state};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const INPUT_THREAD_NAME: &str = "stick-input";
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors that can occur while running the input pipeline
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Locator error: {0}")]
    LocatorError(#[from] LocatorError),

    #[error("Collector error: {0}")]
    CollectorError(#[from] CollectorError),

    #[error("Failed to spawn input thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    #[error("Giving up after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Backoff applied when the device cannot be located or opened
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 0 retries forever
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th consecutive failure (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }
}

/// Configuration of the input subsystem
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub device_name: String,
    pub registry_dir: PathBuf,
    pub device_dir: PathBuf,
    pub retry: RetryPolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            device_name: SENSE_HAT_DEVICE_NAME.to_string(),
            registry_dir: PathBuf::from(DEFAULT_REGISTRY_DIR),
            device_dir: PathBuf::from(DEFAULT_DEVICE_DIR),
            retry: RetryPolicy::default(),
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum InputState {
    Locating,
    Reading,
}

#[machine]
pub struct InputPipeline<S: InputState> {
    locator: DeviceLocator,
    retry: RetryPolicy,
    dispatcher: EventDispatcher,
    reader: Option<EventReader<File>>,
    device_path: Option<PathBuf>,
    stop: CancellationToken,
}

impl InputPipeline<Locating> {
    pub fn create(
        settings: &ControllerSettings,
        store: Arc<dyn NodeStore>,
        stop: CancellationToken,
    ) -> Self {
        let locator = DeviceLocator::with_dirs(
            settings.device_name.clone(),
            settings.registry_dir.clone(),
            settings.device_dir.clone(),
        );
        Self::new(
            locator,
            settings.retry.clone(),
            EventDispatcher::new(store),
            None, // reader
            None, // device_path
            stop,
        )
    }

    /// Locate and open the device, backing off between failed attempts
    ///
    /// `Ok(None)` means the stop token fired while waiting.
    pub fn acquire(mut self) -> Result<Option<InputPipeline<Reading>>, ControllerError> {
        let mut attempts = 0;

        loop {
            if self.stop.is_cancelled() {
                return Ok(None);
            }

            match self.try_open() {
                Ok((path, reader)) => {
                    info!("Input device ready at {}", path.display());
                    self.device_path = Some(path);
                    self.reader = Some(reader);
                    return Ok(Some(self.transition()));
                }
                Err(e) => {
                    attempts += 1;
                    if self.retry.exhausted(attempts) {
                        return Err(ControllerError::RetriesExhausted {
                            attempts,
                            last: e.to_string(),
                        });
                    }
                    let delay = self.retry.backoff(attempts);
                    warn!(
                        "Input device unavailable ({}), retrying in {:?} (attempt {})",
                        e, delay, attempts
                    );
                    if wait_or_stop(&self.stop, delay) {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn try_open(&self) -> Result<(PathBuf, EventReader<File>), ControllerError> {
        let path = self.locator.locate()?;
        let reader = EventReader::open(&path)?;
        Ok((path, reader))
    }
}

impl InputPipeline<Reading> {
    /// Read and dispatch until stopped or the device session fails
    ///
    /// Returns `None` when stopped, otherwise the pipeline back in `Locating`
    /// with the handle closed. Key states carry over to the next session.
    pub fn read_session(mut self) -> Option<InputPipeline<Locating>> {
        let path = self
            .device_path
            .take()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let Some(mut reader) = self.reader.take() else {
            warn!("Reading state without an open device, relocating");
            return Some(self.transition());
        };

        let result = self.dispatcher.run(&mut reader, &self.stop);
        reader.close();

        match result {
            Ok(()) => None,
            Err(e) => {
                warn!("Input session on {} ended: {}", path, e);
                if wait_or_stop(&self.stop, self.retry.initial_backoff) {
                    return None;
                }
                Some(self.transition())
            }
        }
    }
}

/// Drive the pipeline until stopped or retries run out
pub fn run_input_pipeline(
    settings: &ControllerSettings,
    store: Arc<dyn NodeStore>,
    stop: CancellationToken,
) -> Result<(), ControllerError> {
    let mut locating = InputPipeline::create(settings, store, stop);

    loop {
        let Some(reading) = locating.acquire()? else {
            break;
        };
        match reading.read_session() {
            Some(next) => locating = next,
            None => break,
        }
    }

    info!("Input pipeline stopped");
    Ok(())
}

/// Sleep for `delay` unless `stop` fires first; true when stopped
fn wait_or_stop(stop: &CancellationToken, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if stop.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
    }
}

/// Handle for the input thread
///
/// Stopping is cooperative: the thread notices the token between reads, so a
/// thread parked in a read only exits after the next record arrives.
pub struct ControllerHandle {
    thread: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

impl ControllerHandle {
    pub fn spawn(
        settings: Option<ControllerSettings>,
        store: Arc<dyn NodeStore>,
        stop: CancellationToken,
    ) -> Result<Self, ControllerError> {
        let settings = settings.unwrap_or_default();
        info!("Spawning input pipeline with settings: {:?}", settings);

        let thread_stop = stop.clone();
        let thread = thread::Builder::new()
            .name(INPUT_THREAD_NAME.to_string())
            .spawn(move || {
                if let Err(e) = run_input_pipeline(&settings, store, thread_stop) {
                    error!("Input pipeline terminated: {}", e);
                }
            })
            .map_err(ControllerError::ThreadSpawn)?;

        debug!("Input thread {} started", INPUT_THREAD_NAME);
        Ok(Self {
            thread: Some(thread),
            stop,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal stop and wait up to `grace` for the thread to exit
    ///
    /// A thread still blocked in a read after `grace` is left detached.
    pub fn shutdown(mut self, grace: Duration) {
        self.stop.cancel();

        let deadline = Instant::now() + grace;
        while !self.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        match self.thread.take() {
            Some(thread) if thread.is_finished() => {
                if thread.join().is_err() {
                    error!("Input thread panicked");
                }
            }
            Some(_) => warn!("Input thread still blocked on read, detaching"),
            None => {}
        }
    }
}
