//! Finds the joystick's event node among all enumerated input devices
//!
//! Every `eventN` entry of the input class directory exposes the kernel's
//! device name under `eventN/device/name`. The first entry whose name matches
//! exactly resolves to `<device_dir>/eventN`.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name the Sense HAT joystick driver registers with the input subsystem
pub const SENSE_HAT_DEVICE_NAME: &str = "Raspberry Pi Sense HAT Joystick";
pub const DEFAULT_REGISTRY_DIR: &str = "/sys/class/input";
pub const DEFAULT_DEVICE_DIR: &str = "/dev/input";

const EVENT_PREFIX: &str = "event";

#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("No input device named {name:?} under {}", registry.display())]
    DeviceNotFound { name: String, registry: PathBuf },

    #[error("Failed to enumerate {}: {source}", path.display())]
    Registry {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct DeviceLocator {
    device_name: String,
    registry_dir: PathBuf,
    device_dir: PathBuf,
}

impl DeviceLocator {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self::with_dirs(device_name, DEFAULT_REGISTRY_DIR, DEFAULT_DEVICE_DIR)
    }

    pub fn with_dirs(
        device_name: impl Into<String>,
        registry_dir: impl Into<PathBuf>,
        device_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            registry_dir: registry_dir.into(),
            device_dir: device_dir.into(),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Resolve the device node path of the first matching input device
    ///
    /// Entries are visited in ascending event number, so duplicates resolve to
    /// the lowest-numbered device. Entries whose name cannot be read are skipped.
    pub fn locate(&self) -> Result<PathBuf, LocatorError> {
        debug!(
            "Scanning {} for {:?}",
            self.registry_dir.display(),
            self.device_name
        );

        for event_dir in self.event_entries()? {
            let Some(file_name) = event_dir.file_name() else {
                continue;
            };

            match read_device_name(&event_dir) {
                Ok(name) if name == self.device_name => {
                    let path = self.device_dir.join(file_name);
                    info!("Found {:?} at {}", self.device_name, path.display());
                    return Ok(path);
                }
                Ok(name) => debug!("Skipping {} ({:?})", event_dir.display(), name),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{} vanished during scan", event_dir.display());
                }
                Err(e) => warn!("Cannot inspect {}: {}", event_dir.display(), e),
            }
        }

        Err(LocatorError::DeviceNotFound {
            name: self.device_name.clone(),
            registry: self.registry_dir.clone(),
        })
    }

    /// `eventN` entries sorted by N
    fn event_entries(&self) -> Result<Vec<PathBuf>, LocatorError> {
        let entries = fs::read_dir(&self.registry_dir).map_err(|source| LocatorError::Registry {
            path: self.registry_dir.clone(),
            source,
        })?;

        let mut events: Vec<(Option<u32>, OsString, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let file_name = entry.file_name();
                let suffix = file_name.to_str()?.strip_prefix(EVENT_PREFIX)?;
                Some((suffix.parse().ok(), file_name.clone(), entry.path()))
            })
            .collect();
        events.sort();

        Ok(events.into_iter().map(|(_, _, path)| path).collect())
    }
}

fn read_device_name(event_dir: &Path) -> io::Result<String> {
    let raw = fs::read_to_string(event_dir.join("device").join("name"))?;
    Ok(raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FakeRegistry {
        root: TempDir,
    }

    impl FakeRegistry {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            fs::create_dir_all(root.path().join("class")).unwrap();
            Self { root }
        }

        fn add(&self, event: &str, name: &str) -> &Self {
            let dir = self.root.path().join("class").join(event).join("device");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("name"), format!("{}\n", name)).unwrap();
            self
        }

        fn add_nameless(&self, event: &str) -> &Self {
            fs::create_dir_all(self.root.path().join("class").join(event)).unwrap();
            self
        }

        fn locator(&self) -> DeviceLocator {
            DeviceLocator::with_dirs(
                SENSE_HAT_DEVICE_NAME,
                self.root.path().join("class"),
                "/dev/input",
            )
        }
    }

    #[test]
    fn finds_the_single_matching_device() {
        let registry = FakeRegistry::new();
        registry
            .add("event0", "gpio-keys")
            .add("event1", SENSE_HAT_DEVICE_NAME)
            .add("event2", "vc4-hdmi");

        let path = registry.locator().locate().unwrap();
        assert_eq!(path, PathBuf::from("/dev/input/event1"));
    }

    #[test]
    fn missing_device_is_device_not_found() {
        let registry = FakeRegistry::new();
        registry.add("event0", "gpio-keys");

        let err = registry.locator().locate().unwrap_err();
        assert!(matches!(err, LocatorError::DeviceNotFound { .. }));
    }

    #[test]
    fn duplicates_resolve_to_lowest_event_number() {
        let registry = FakeRegistry::new();
        registry
            .add("event10", SENSE_HAT_DEVICE_NAME)
            .add("event2", SENSE_HAT_DEVICE_NAME)
            .add("event3", "gpio-keys");

        let path = registry.locator().locate().unwrap();
        assert_eq!(path, PathBuf::from("/dev/input/event2"));
    }

    #[test]
    fn uninspectable_entries_are_skipped() {
        let registry = FakeRegistry::new();
        registry
            .add_nameless("event0")
            .add("event1", SENSE_HAT_DEVICE_NAME);
        fs::create_dir_all(registry.root.path().join("class").join("mouse0")).unwrap();

        let path = registry.locator().locate().unwrap();
        assert_eq!(path, PathBuf::from("/dev/input/event1"));
    }

    #[test]
    fn name_must_match_exactly() {
        let registry = FakeRegistry::new();
        registry.add("event0", "Raspberry Pi Sense HAT Joystick v2");

        assert!(registry.locator().locate().is_err());
    }

    #[test]
    fn unreadable_registry_is_reported() {
        let locator = DeviceLocator::with_dirs(
            SENSE_HAT_DEVICE_NAME,
            "/definitely/not/a/registry",
            "/dev/input",
        );
        assert!(matches!(
            locator.locate(),
            Err(LocatorError::Registry { .. })
        ));
    }
}
