#![cfg(target_os = "linux")]

//! Integration tests against the native inotify backend
//!
//! Mirrors the scenarios in `tests/polling.rs`, exercised here against the
//! real kernel facility instead of the portable fallback.

use std::fs;
use std::time::{Duration, Instant};

use fswatch::{EventKind, Monitor, WatchFlags};
use tempfile::TempDir;

fn native_monitor() -> Monitor<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    Monitor::new().expect("failed to open inotify instance")
}

fn collect_events<T>(monitor: &Monitor<T>, deadline: Instant, mut pred: impl FnMut(&[fswatch::Event<T>]) -> bool) -> Vec<fswatch::Event<T>> {
    let mut all = Vec::new();
    while Instant::now() < deadline {
        let batch = monitor
            .read_events(Some(Duration::from_millis(200)))
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
    let monitor = native_monitor();
    monitor.add_dir_watch(dir.path(), WatchFlags::ALL, ()).unwrap();

    fs::write(dir.path().join("x"), b"hi").unwrap();
    fs::remove_file(dir.path().join("x")).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
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
    let monitor = native_monitor();
    let watch = monitor.add_dir_watch(dir.path(), WatchFlags::ALL, ()).unwrap();

    fs::write(dir.path().join("x"), b"hi").unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    let before = collect_events(&monitor, deadline, |events| {
        events.iter().any(|e| e.action() == EventKind::Create)
    });
    assert!(before.iter().any(|e| e.action() == EventKind::Create));

    monitor.remove_watch(&watch).unwrap();
    fs::remove_file(dir.path().join("x")).unwrap();

    let deadline = Instant::now() + Duration::from_millis(500);
    let after = collect_events(&monitor, deadline, |_| false);
    assert!(after.iter().all(|e| e.watch() != &watch));
}

#[test]
fn s3_nonexistent_path_is_enoent() {
    let monitor = native_monitor();
    let err = monitor
        .add_dir_watch("/this/path/does/not/exist", WatchFlags::ALL, ())
        .unwrap_err();
    assert_eq!(err.errno(), Some(libc::ENOENT));
}

#[test]
fn s4_delete_self_is_always_observable() {
    let dir = TempDir::new().unwrap();
    let watched = dir.path().join("watched");
    fs::create_dir(&watched).unwrap();

    let monitor = native_monitor();
    monitor.add_dir_watch(&watched, WatchFlags::MODIFY, ()).unwrap();

    fs::remove_dir(&watched).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    let events = collect_events(&monitor, deadline, |events| {
        events.iter().any(|e| e.action() == EventKind::DeleteSelf)
    });

    assert!(events.iter().any(|e| e.action() == EventKind::DeleteSelf && e.name() == ""));
}

#[test]
fn flag_filtering_drops_unsubscribed_kinds() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("a");
    fs::write(&file, b"initial").unwrap();

    let monitor = native_monitor();
    monitor
        .add_dir_watch(dir.path(), WatchFlags::CREATE | WatchFlags::DELETE, ())
        .unwrap();

    // Touching the file generates Modify/Access/Attrib at the kernel level;
    // none of those are subscribed, so only Create/Delete may surface.
    fs::write(&file, b"changed again").unwrap();
    fs::remove_file(&file).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    let events = collect_events(&monitor, deadline, |events| {
        events.iter().any(|e| e.action() == EventKind::Delete)
    });

    assert!(events.iter().all(|e| matches!(e.action(), EventKind::Create | EventKind::Delete | EventKind::DeleteSelf)));
}
