//! Key debounce and event dispatch
//!
//! The kernel reports each joystick direction as press (1), autorepeat hold (2)
//! and release (0). Subscribers only care about UP/DOWN, so every logical key
//! runs the same two-state machine:
//!
//! ```text
//!            press / hold
//!     UP ───────────────────► DOWN
//!      ▲                       │
//!      └───────── release ─────┘
//! ```
//!
//! Signals that do not cross a state boundary (hold while DOWN, release while UP)
//! are swallowed. Events for keys without subscribers never reach the machine.

use crate::controller::event_collector::{CollectorError, EventReader, RawEvent};
use crate::node::{publish_if_subscribed, NodeStore};
use chrono::{DateTime, Local};
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

pub const KEY_ENTER: u16 = 28;
pub const KEY_UP: u16 = 103;
pub const KEY_LEFT: u16 = 105;
pub const KEY_RIGHT: u16 = 106;
pub const KEY_DOWN: u16 = 108;

const STATE_RELEASE: i32 = 0;
const STATE_PRESS: i32 = 1;
const STATE_HOLD: i32 = 2;

const STATS_INTERVAL_SECS: i64 = 10;

// Logical joystick key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyIdentity {
    Up,
    Down,
    Left,
    Right,
    Button,
}

impl KeyIdentity {
    pub const ALL: [KeyIdentity; 5] = [
        KeyIdentity::Up,
        KeyIdentity::Down,
        KeyIdentity::Left,
        KeyIdentity::Right,
        KeyIdentity::Button,
    ];

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            KEY_UP => Some(KeyIdentity::Up),
            KEY_DOWN => Some(KeyIdentity::Down),
            KEY_LEFT => Some(KeyIdentity::Left),
            KEY_RIGHT => Some(KeyIdentity::Right),
            KEY_ENTER => Some(KeyIdentity::Button),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            KeyIdentity::Up => KEY_UP,
            KeyIdentity::Down => KEY_DOWN,
            KeyIdentity::Left => KEY_LEFT,
            KeyIdentity::Right => KEY_RIGHT,
            KeyIdentity::Button => KEY_ENTER,
        }
    }

    pub fn node_path(self) -> &'static str {
        match self {
            KeyIdentity::Up => "/stick/up",
            KeyIdentity::Down => "/stick/down",
            KeyIdentity::Left => "/stick/left",
            KeyIdentity::Right => "/stick/right",
            KeyIdentity::Button => "/stick/button",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            KeyIdentity::Up => "Up",
            KeyIdentity::Down => "Down",
            KeyIdentity::Left => "Left",
            KeyIdentity::Right => "Right",
            KeyIdentity::Button => "Button",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Public two-state view of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyState {
    #[default]
    Up,
    Down,
}

impl KeyState {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyState::Up => "UP",
            KeyState::Down => "DOWN",
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw signal carried in the value field of a key record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySignal {
    Release,
    Press,
    Hold,
}

impl KeySignal {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            STATE_RELEASE => Some(KeySignal::Release),
            STATE_PRESS => Some(KeySignal::Press),
            STATE_HOLD => Some(KeySignal::Hold),
            _ => None,
        }
    }
}

/// Shared transition function; `Some` only when the state changes
pub fn transition(current: KeyState, signal: KeySignal) -> Option<KeyState> {
    match (current, signal) {
        (KeyState::Up, KeySignal::Press | KeySignal::Hold) => Some(KeyState::Down),
        (KeyState::Down, KeySignal::Release) => Some(KeyState::Up),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDebounce {
    state: KeyState,
}

impl KeyDebounce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> KeyState {
        self.state
    }

    /// Feed one signal; returns the new state on a crossing
    pub fn apply(&mut self, signal: KeySignal) -> Option<KeyState> {
        let next = transition(self.state, signal)?;
        self.state = next;
        Some(next)
    }
}

/// One debounce instance per logical key
#[derive(Debug, Clone, Default)]
pub struct KeyBoard {
    keys: [KeyDebounce; 5],
}

impl KeyBoard {
    pub fn state(&self, key: KeyIdentity) -> KeyState {
        self.keys[key.index()].state()
    }

    pub fn apply(&mut self, key: KeyIdentity, signal: KeySignal) -> Option<KeyState> {
        self.keys[key.index()].apply(signal)
    }
}

/// Feeds decoded events through the debounce table and publishes crossings
pub struct EventDispatcher {
    keys: KeyBoard,
    store: Arc<dyn NodeStore>,
    events_seen: u64,
}

impl EventDispatcher {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self {
            keys: KeyBoard::default(),
            store,
            events_seen: 0,
        }
    }

    pub fn key_state(&self, key: KeyIdentity) -> KeyState {
        self.keys.state(key)
    }

    /// Handle one event; returns the key and its new state if it changed
    pub fn dispatch(&mut self, event: &RawEvent) -> Option<(KeyIdentity, KeyState)> {
        self.events_seen += 1;

        let Some(key) = KeyIdentity::from_code(event.key_code) else {
            debug!("Ignoring unmapped key code {}", event.key_code);
            return None;
        };
        let Some(signal) = KeySignal::from_code(event.state_code) else {
            debug!(
                "Ignoring unknown state {} for {:?}",
                event.state_code, key
            );
            return None;
        };

        // Unwatched keys do not advance their debounce state
        if !self.store.is_subscribed(key.node_path()) {
            trace!("{} has no subscribers, skipping {:?}", key.node_path(), signal);
            return None;
        }

        let Some(state) = self.keys.apply(key, signal) else {
            trace!("{:?} {:?} suppressed", key, signal);
            return None;
        };

        info!(
            "Key {:?} -> {} at {}",
            key,
            state,
            event
                .local_time()
                .map(|t| t.format("%H:%M:%S.%3f").to_string())
                .unwrap_or_else(|| format!("{:.6}", event.timestamp))
        );

        if !publish_if_subscribed(self.store.as_ref(), key.node_path(), state.as_str()) {
            debug!("{} lost its last subscriber, not publishing", key.node_path());
        }

        Some((key, state))
    }

    /// Blocking read/dispatch loop
    ///
    /// Returns `Ok(())` once `stop` is cancelled. The token is only checked
    /// between reads; a read that never completes keeps the thread parked.
    pub fn run<R: Read>(
        &mut self,
        reader: &mut EventReader<R>,
        stop: &CancellationToken,
    ) -> Result<(), CollectorError> {
        info!("Starting input dispatch loop");

        let mut last_log_time = Local::now();
        let mut seen_at_last_log = self.events_seen;
        let log_interval = chrono::Duration::seconds(STATS_INTERVAL_SECS);

        while !stop.is_cancelled() {
            let event = reader.read_event()?;
            self.dispatch(&event);

            let now = Local::now();
            if let Some(elapsed_secs) = stats_due(last_log_time, now, log_interval) {
                let count = self.events_seen - seen_at_last_log;
                info!(
                    "Input stats: {} key events in last {} seconds",
                    count, elapsed_secs
                );
                seen_at_last_log = self.events_seen;
                last_log_time = now;
            }
        }

        info!("Input dispatch loop stopped");
        Ok(())
    }
}

/// Seconds since the last stats line, once more than `interval` has passed
///
/// Stats are only checked when an event arrives, so after an idle stretch the
/// window is longer than `interval`.
fn stats_due(last: DateTime<Local>, now: DateTime<Local>, interval: chrono::Duration) -> Option<i64> {
    let elapsed = now - last;
    (elapsed > interval).then(|| elapsed.num_seconds())
}
