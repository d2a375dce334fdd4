use sensehat_link::controller::{
    ControllerHandle, ControllerSettings, EventDispatcher, EventReader, InputRecord, RetryPolicy,
};
use sensehat_link::node::{paths, NodeError, NodeStore, NodeTree, NodeUpdate, Value};
use sensehat_link::sampling::{FastCycle, RecurringCycle, SimulatedSensors};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;

const KEY_UP: u16 = 103;
const KEY_ENTER: u16 = 28;
const EV_SYN: u16 = 0x00;

fn stream(records: &[InputRecord]) -> Vec<u8> {
    records.iter().flat_map(|r| r.to_bytes()).collect()
}

fn drain(updates: &mut Receiver<NodeUpdate>) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    loop {
        match updates.try_recv() {
            Ok(update) => out.push((update.path, update.value)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
}

fn stick_tree(subscribed: &[&str]) -> Arc<NodeTree> {
    let tree = Arc::new(NodeTree::with_default_nodes(0.05));
    for path in subscribed {
        tree.subscribe(path).unwrap();
    }
    tree
}

#[test]
fn press_hold_release_publishes_down_then_up() {
    let tree = stick_tree(&["/stick/up"]);
    let mut updates = tree.updates();

    let bytes = stream(&[
        InputRecord::key(100, 0, KEY_UP, 1),
        InputRecord::key(100, 250_000, KEY_UP, 2),
        InputRecord::key(100, 500_000, KEY_UP, 0),
    ]);
    let mut reader = EventReader::new(Cursor::new(bytes));
    let mut dispatcher = EventDispatcher::new(tree.clone());

    // The stream ends after three records, which surfaces as an error.
    assert!(dispatcher.run(&mut reader, &CancellationToken::new()).is_err());

    assert_eq!(
        drain(&mut updates),
        vec![
            ("/stick/up".to_string(), Value::from("DOWN")),
            ("/stick/up".to_string(), Value::from("UP")),
        ]
    );
    assert_eq!(tree.get_value("/stick/up"), Some(Value::from("UP")));
}

#[test]
fn non_key_records_and_unwatched_keys_are_not_published() {
    let tree = stick_tree(&["/stick/up"]);
    let mut updates = tree.updates();

    let sync = InputRecord {
        seconds: 5,
        microseconds: 0,
        class: EV_SYN,
        code: 0,
        value: 0,
    };
    let bytes = stream(&[
        sync,
        InputRecord::key(5, 1, KEY_ENTER, 1),
        sync,
        InputRecord::key(5, 2, KEY_UP, 1),
        InputRecord::key(5, 3, KEY_ENTER, 0),
    ]);
    let mut reader = EventReader::new(Cursor::new(bytes));
    let mut dispatcher = EventDispatcher::new(tree.clone());

    let mut seen = Vec::new();
    for event in reader.events() {
        let event = event.unwrap();
        seen.push(dispatcher.dispatch(&event).map(|(_, state)| state.as_str()));
    }

    assert_eq!(seen, vec![None, Some("DOWN"), None]);
    assert_eq!(
        drain(&mut updates),
        vec![("/stick/up".to_string(), Value::from("DOWN"))]
    );
}

#[test]
fn fast_interval_written_through_the_tree_reaches_the_cycle() {
    let tree = stick_tree(&[]);
    let mut cycle = FastCycle::new(
        tree.clone(),
        Arc::new(SimulatedSensors::new()),
        Duration::from_millis(50),
    );
    assert_eq!(cycle.tick(), Duration::from_millis(50));

    tree.set_value(paths::FAST_INTERVAL, Value::Number(0.25)).unwrap();
    assert_eq!(cycle.tick(), Duration::from_millis(250));

    assert!(matches!(
        tree.set_value(paths::FAST_INTERVAL, Value::from("fast")),
        Err(NodeError::InvalidValue { .. })
    ));
    assert!(matches!(
        tree.set_value(paths::COMPASS, Value::Number(1.0)),
        Err(NodeError::NotWritable(_))
    ));
    assert_eq!(cycle.tick(), Duration::from_millis(250));
}

#[test]
fn input_thread_finds_device_and_publishes() {
    let registry = tempfile::TempDir::new().unwrap();
    let devices = tempfile::TempDir::new().unwrap();

    for (n, name) in [(0, "Power Button"), (3, "Raspberry Pi Sense HAT Joystick")] {
        let device = registry.path().join(format!("event{n}")).join("device");
        std::fs::create_dir_all(&device).unwrap();
        std::fs::write(device.join("name"), format!("{name}\n")).unwrap();
    }
    std::fs::write(
        devices.path().join("event3"),
        stream(&[
            InputRecord::key(1, 0, KEY_UP, 1),
            InputRecord::key(1, 100_000, KEY_UP, 0),
        ]),
    )
    .unwrap();

    let tree = stick_tree(&["/stick/up"]);
    let mut updates = tree.updates();
    let stop = CancellationToken::new();
    let settings = ControllerSettings {
        registry_dir: registry.path().to_path_buf(),
        device_dir: devices.path().to_path_buf(),
        retry: RetryPolicy {
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(100),
            max_attempts: 0,
        },
        ..ControllerSettings::default()
    };

    let handle = ControllerHandle::spawn(Some(settings), tree.clone(), stop).unwrap();

    let first = updates.blocking_recv().unwrap();
    let second = updates.blocking_recv().unwrap();
    handle.shutdown(Duration::from_secs(2));

    assert_eq!((first.path.as_str(), first.value), ("/stick/up", Value::from("DOWN")));
    assert_eq!((second.path.as_str(), second.value), ("/stick/up", Value::from("UP")));
}
