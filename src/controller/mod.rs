//! Controller subsystem for joystick input handling
//!
//! Implements the input half of the link:
//!
//! 1. [`device_locator`] - Find the joystick among the enumerated input devices
//! 2. [`event_collector`] - Decode the binary input-event stream
//! 3. [`event_processor`] - Debounce keys into UP/DOWN and publish changes
//! 4. [`controller_handle`] - Input thread lifecycle and recovery
//!
//! # Architecture
//!
//! ```text
//! /sys/class/input ──► Locator ──► /dev/input/eventN ──► EventReader ──► EventDispatcher ──► NodeStore
//!                                                        (RawEvent)      (KeyState changes)
//! ```
//!
//! Everything runs on one dedicated thread that blocks in `read`.

pub mod controller_handle;
pub mod device_locator;
pub mod event_collector;
pub mod event_processor;

pub use controller_handle::{ControllerError, ControllerHandle, ControllerSettings, RetryPolicy};
pub use device_locator::{DeviceLocator, LocatorError, SENSE_HAT_DEVICE_NAME};
pub use event_collector::{CollectorError, EventReader, InputRecord, RawEvent, EVENT_SIZE, EV_KEY};
pub use event_processor::{EventDispatcher, KeyBoard, KeyDebounce, KeyIdentity, KeySignal, KeyState};
