//! Integration tests against the portable polling backend
//!
//! Runs on every host OS regardless of which native backend it has, so
//! these scenarios double as the CI-portable equivalent of the native
//! backend's own test suite.

use std::fs;
use std::time::{Duration, Instant};

use fswatch::{Config, EventKind, Monitor, WatchFlags};
use tempfile::TempDir;

fn polling_monitor() -> Monitor<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = Config::default()
        .force_polling(true)
        .polling_interval(Duration::from_millis(50));
    Monitor::with_config(config).expect("failed to create polling monitor")
}

/// Polls until either `deadline` passes or `pred` is satisfied by the
/// accumulated event batch, returning everything collected so far.
fn collect_events<T>(monitor: &Monitor<T>, deadline: Instant, mut pred: impl FnMut(&[fswatch::Event<T>]) -> bool) -> Vec<fswatch::Event<T>> {
    let mut all = Vec::new();
    while Instant::now() < deadline {
        let batch = monitor
            .read_events(Some(Duration::from_millis(100)))
            .expect("read_events failed");
        all.extend(batch);
        if pred(&all) {
            break;
        }
    }
    all
}

#[test]
fn s1_round_trip_create_then_delete() {
    let dir = TempDir::new().unwrap();
    let monitor = polling_monitor();
    monitor
        .add_dir_watch(dir.path(), WatchFlags::ALL, ())
        .unwrap();

    let file = dir.path().join("x");
    fs::write(&file, b"hi").unwrap();
    fs::remove_file(&file).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let events = collect_events(&monitor, deadline, |events| {
        events.iter().any(|e| e.action() == EventKind::Create && e.name() == "x")
            && events.iter().any(|e| e.action() == EventKind::Delete && e.name() == "x")
    });

    assert!(events.iter().any(|e| e.action() == EventKind::Create && e.name() == "x"));
    assert!(events.iter().any(|e| e.action() == EventKind::Delete && e.name() == "x"));
}

#[test]
fn s2_removal_stops_delivery() {
    let dir = TempDir::new().unwrap();
    let monitor = polling_monitor();
    let watch = monitor
        .add_dir_watch(dir.path(), WatchFlags::ALL, ())
        .unwrap();

    fs::write(dir.path().join("x"), b"hi").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let before = collect_events(&monitor, deadline, |events| {
        events.iter().any(|e| e.action() == EventKind::Create && e.name() == "x")
    });
    assert!(before.iter().any(|e| e.action() == EventKind::Create && e.name() == "x"));

    monitor.remove_watch(&watch).unwrap();
    fs::remove_file(dir.path().join("x")).unwrap();

    let deadline = Instant::now() + Duration::from_millis(500);
    let after = collect_events(&monitor, deadline, |_| false);
    assert!(after.is_empty(), "no events should be delivered for a removed watch");
}

#[test]
fn s3_nonexistent_path_is_enoent() {
    let monitor = polling_monitor();
    let err = monitor
        .add_dir_watch("/this/path/does/not/exist", WatchFlags::ALL, ())
        .unwrap_err();

    // ENOENT is 2 on every platform this crate supports (Unix and Windows
    // both keep the POSIX value for this code).
    assert_eq!(err.errno(), Some(2));
}

#[test]
fn s4_delete_self_is_always_observable() {
    let dir = TempDir::new().unwrap();
    let watched = dir.path().join("watched");
    fs::create_dir(&watched).unwrap();

    let monitor = polling_monitor();
    // Subscribing to Modify only; DeleteSelf must still be forced on.
    monitor.add_dir_watch(&watched, WatchFlags::MODIFY, ()).unwrap();

    fs::remove_dir(&watched).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let events = collect_events(&monitor, deadline, |events| {
        events.iter().any(|e| e.action() == EventKind::DeleteSelf)
    });

    let delete_self: Vec<_> = events.iter().filter(|e| e.action() == EventKind::DeleteSelf).collect();
    assert_eq!(delete_self.len(), 1);
    assert_eq!(delete_self[0].name(), "");
}

#[test]
fn s5_only_subscribed_flags_are_delivered() {
    let dir = TempDir::new().unwrap();
    let monitor = polling_monitor();
    monitor
        .add_dir_watch(dir.path(), WatchFlags::CREATE | WatchFlags::DELETE, ())
        .unwrap();

    let file = dir.path().join("x");
    fs::write(&file, b"hi").unwrap();
    // A second write after the first scan would normally also emit Modify,
    // which is not in the subscribed mask and must never appear.
    std::thread::sleep(Duration::from_millis(120));
    fs::write(&file, b"more content").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let events = collect_events(&monitor, deadline, |events| {
        events.iter().any(|e| e.action() == EventKind::Create)
    });

    assert!(events.iter().any(|e| e.action() == EventKind::Create));
    assert!(events.iter().all(|e| matches!(e.action(), EventKind::Create | EventKind::Delete | EventKind::DeleteSelf)));
}

#[test]
fn file_watch_is_supported_on_polling_backend() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, b"initial").unwrap();

    let monitor = polling_monitor();
    monitor.add_file_watch(&file, WatchFlags::MODIFY, ()).unwrap();

    std::thread::sleep(Duration::from_millis(120));
    fs::write(&file, b"changed").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let events = collect_events(&monitor, deadline, |events| {
        events.iter().any(|e| e.action() == EventKind::Modify)
    });
    assert!(events.iter().any(|e| e.action() == EventKind::Modify));
}

#[test]
fn disabled_watch_produces_no_events() {
    let dir = TempDir::new().unwrap();
    let monitor = polling_monitor();
    let watch = monitor.add_dir_watch(dir.path(), WatchFlags::ALL, ()).unwrap();
    monitor.disable_watch(&watch).unwrap();

    fs::write(dir.path().join("x"), b"hi").unwrap();

    let deadline = Instant::now() + Duration::from_millis(400);
    let events = collect_events(&monitor, deadline, |_| false);
    assert!(events.is_empty());
}
