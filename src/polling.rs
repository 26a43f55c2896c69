//! The portable polling backend
//!
//! A fallback for platforms with no native change-notification facility.
//! Each watch remembers a snapshot of what it last saw (a directory
//! listing with per-entry metadata, or a single file's metadata) and
//! `read_events` periodically refreshes and diffs it.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, WatchFlags};
use crate::watch::{MonitorId, Watch, WatchTarget};

/// The last-observed metadata for one entry, trimmed to the fields the
/// diff algorithm actually compares
#[derive(Debug, Clone, Copy, PartialEq)]
struct Stat {
    modified: SystemTime,
    accessed: SystemTime,
}

impl Stat {
    fn from_metadata(meta: &fs::Metadata) -> Stat {
        Stat {
            modified: meta.modified().unwrap_or(UNIX_EPOCH),
            accessed: meta.accessed().unwrap_or(UNIX_EPOCH),
        }
    }
}

#[derive(Debug, Clone)]
enum Snapshot {
    Directory(Vec<(String, Stat)>),
    File(Option<Stat>),
}

struct Tracked<T> {
    watch: Watch<T>,
    last_scan: Instant,
    snapshot: Snapshot,
    deleted: bool,
}

struct State<T> {
    watches: HashMap<i64, Tracked<T>>,
}

/// The portable, snapshot-diffing adapter
pub struct PollingMonitor<T = ()> {
    id: MonitorId,
    polling_interval: Duration,
    next_key: AtomicI64,
    state: Mutex<State<T>>,
}

impl<T> PollingMonitor<T> {
    /// Creates an empty polling monitor
    pub fn new(config: Config) -> Self {
        PollingMonitor {
            id: crate::watch::next_monitor_id(),
            polling_interval: config.polling_interval,
            next_key: AtomicI64::new(0),
            state: Mutex::new(State {
                watches: HashMap::new(),
            }),
        }
    }

    pub(crate) fn id(&self) -> MonitorId {
        self.id
    }

    fn add(&self, path: &Path, target: WatchTarget, flags: WatchFlags, user: T) -> Result<Watch<T>> {
        let watch = Watch::new(self.id, path, target, flags, user);
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        watch.set_backend_key(key);

        let (snapshot, deleted) = match target {
            WatchTarget::Directory => match list_dir(path) {
                Ok(entries) => (Snapshot::Directory(entries), false),
                Err(e) if e.kind() == io::ErrorKind::NotFound => (Snapshot::Directory(Vec::new()), true),
                Err(e) => return Err(Error::os(path, e)),
            },
            WatchTarget::File => match fs::metadata(path) {
                Ok(meta) => (Snapshot::File(Some(Stat::from_metadata(&meta))), false),
                Err(e) if e.kind() == io::ErrorKind::NotFound => (Snapshot::File(None), true),
                Err(e) => return Err(Error::os(path, e)),
            },
        };

        let mut state = self.state.lock().unwrap();
        state.watches.insert(
            key,
            Tracked {
                watch: watch.clone(),
                last_scan: Instant::now(),
                snapshot,
                deleted,
            },
        );
        log::debug!("added polling watch key={} path={}", key, path.display());

        Ok(watch)
    }

    /// Adds a watch on a directory, tracking its direct children
    pub fn add_dir_watch(&self, path: impl AsRef<Path>, flags: WatchFlags, user: T) -> Result<Watch<T>> {
        self.add(path.as_ref(), WatchTarget::Directory, flags, user)
    }

    /// Adds a watch on a single file
    ///
    /// Supported on this backend, per the original implementation's
    /// `FSMonitorFileWatch`.
    pub fn add_file_watch(&self, path: impl AsRef<Path>, flags: WatchFlags, user: T) -> Result<Watch<T>> {
        self.add(path.as_ref(), WatchTarget::File, flags, user)
    }

    /// Drops a watch from the scanned set
    pub fn remove_watch(&self, watch: &Watch<T>) -> Result<bool> {
        if watch.monitor_id() != self.id {
            return Err(Error::Unsupported("watch does not belong to this monitor"));
        }
        let Some(key) = watch.backend_key() else {
            return Ok(false);
        };
        let removed = self.state.lock().unwrap().watches.remove(&key).is_some();
        watch.mark_removed();
        Ok(removed)
    }

    /// Drops every watch currently registered
    pub fn remove_all_watches(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for tracked in state.watches.values() {
            tracked.watch.mark_removed();
        }
        state.watches.clear();
        Ok(())
    }

    /// A snapshot of currently active watches
    pub fn watches(&self) -> Vec<Watch<T>> {
        self.state
            .lock()
            .unwrap()
            .watches
            .values()
            .map(|t| t.watch.clone())
            .collect()
    }

    /// Scans watches oldest-first, pacing each by `polling_interval`, and
    /// returns the events the scan produced
    ///
    /// A `timeout` caps the total time this call may spend pacing; `None`
    /// reproduces the original implementation's unbounded behaviour, where
    /// the interval is honoured but the call never gives up early.
    pub fn read_events(&self, timeout: Option<Duration>) -> Result<Vec<Event<T>>> {
        let start = Instant::now();
        let deadline = timeout.map(|d| start + d);

        let keys: Vec<i64> = {
            let state = self.state.lock().unwrap();
            let mut keys: Vec<i64> = state.watches.keys().copied().collect();
            keys.sort_by_key(|k| std::cmp::Reverse(state.watches[k].last_scan.elapsed()));
            keys
        };
        // Membership is re-checked per key below since concurrent removal
        // is allowed between this sort and the scan loop.

        let mut events = Vec::new();

        for key in keys {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    break;
                }
            }

            let pace = {
                let state = self.state.lock().unwrap();
                match state.watches.get(&key) {
                    Some(tracked) => {
                        let elapsed = tracked.last_scan.elapsed();
                        if elapsed < self.polling_interval {
                            Some(self.polling_interval - elapsed)
                        } else {
                            None
                        }
                    }
                    None => continue,
                }
            };
            if let Some(pace) = pace {
                std::thread::sleep(pace);
            }

            self.scan_one(key, &mut events);
        }

        Ok(events)
    }

    fn scan_one(&self, key: i64, events_out: &mut Vec<Event<T>>) {
        let (path, target, enabled, flags, watch) = {
            let mut state = self.state.lock().unwrap();
            let Some(tracked) = state.watches.get_mut(&key) else {
                return;
            };
            tracked.last_scan = Instant::now();
            (
                tracked.watch.path().to_path_buf(),
                tracked.watch.target(),
                tracked.watch.is_enabled(),
                tracked.watch.flags(),
                tracked.watch.clone(),
            )
        };

        if !enabled {
            return;
        }

        let before = round_fs_resolution(SystemTime::now());

        let fresh = match target {
            WatchTarget::Directory => list_dir(&path).map(Snapshot::Directory),
            WatchTarget::File => fs::metadata(&path).map(|m| Snapshot::File(Some(Stat::from_metadata(&m)))),
        };

        let mut state = self.state.lock().unwrap();
        let Some(tracked) = state.watches.get_mut(&key) else {
            return;
        };

        match fresh {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !tracked.deleted {
                    tracked.deleted = true;
                    tracked.snapshot = match target {
                        WatchTarget::Directory => Snapshot::Directory(Vec::new()),
                        WatchTarget::File => Snapshot::File(None),
                    };
                    if flags.contains(WatchFlags::DELETE_SELF) {
                        events_out.push(Event::new(watch, EventKind::DeleteSelf, ""));
                    }
                }
            }
            Err(_) => {
                // Transient error mid-scan; keep the old snapshot and retry
                // on the next pass rather than surfacing it.
            }
            Ok(new_snapshot) => {
                tracked.deleted = false;
                match (&tracked.snapshot, &new_snapshot) {
                    (Snapshot::Directory(old), Snapshot::Directory(new)) => {
                        diff_directory(&watch, old, new, before, flags, events_out);
                    }
                    (Snapshot::File(old), Snapshot::File(new)) => {
                        if let (Some(old), Some(new)) = (old, new) {
                            diff_stat(&watch, "", old, new, before, flags, events_out);
                        }
                    }
                    _ => {}
                }
                tracked.snapshot = new_snapshot;
            }
        }
    }
}

/// Rounds a timestamp down to filesystem-observable resolution, guarding
/// the access-time comparison against races with the scan that just ran
fn round_fs_resolution(t: SystemTime) -> SystemTime {
    let secs = t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let rounded = if cfg!(windows) { secs / 2 * 2 } else { secs };
    UNIX_EPOCH + Duration::from_secs(rounded)
}

fn list_dir(path: &Path) -> io::Result<Vec<(String, Stat)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        entries.push((entry.file_name().to_string_lossy().into_owned(), Stat::from_metadata(&meta)));
    }
    Ok(entries)
}

fn diff_directory<T>(
    watch: &Watch<T>,
    old: &[(String, Stat)],
    new: &[(String, Stat)],
    before: SystemTime,
    flags: WatchFlags,
    events_out: &mut Vec<Event<T>>,
) {
    let new_by_name: HashMap<&str, &Stat> =
        new.iter().map(|(name, stat)| (name.as_str(), stat)).collect();

    for (name, old_stat) in old {
        match new_by_name.get(name.as_str()) {
            Some(new_stat) => diff_stat(watch, name, old_stat, new_stat, before, flags, events_out),
            None => {
                if flags.contains(WatchFlags::DELETE) {
                    events_out.push(Event::new(watch.clone(), EventKind::Delete, name.clone()));
                }
            }
        }
    }

    let old_names: std::collections::HashSet<&str> =
        old.iter().map(|(name, _)| name.as_str()).collect();
    for (name, _) in new {
        if !old_names.contains(name.as_str()) && flags.contains(WatchFlags::CREATE) {
            events_out.push(Event::new(watch.clone(), EventKind::Create, name.clone()));
        }
    }
}

fn diff_stat<T>(
    watch: &Watch<T>,
    name: &str,
    old: &Stat,
    new: &Stat,
    before: SystemTime,
    flags: WatchFlags,
    events_out: &mut Vec<Event<T>>,
) {
    if new.accessed != old.accessed && new.accessed < before && flags.contains(WatchFlags::ACCESS) {
        events_out.push(Event::new(watch.clone(), EventKind::Access, name.to_string()));
    }
    if new.modified != old.modified && flags.contains(WatchFlags::MODIFY) {
        events_out.push(Event::new(watch.clone(), EventKind::Modify, name.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat_at(secs: u64) -> Stat {
        let t = UNIX_EPOCH + Duration::from_secs(secs);
        Stat {
            modified: t,
            accessed: t,
        }
    }

    #[test]
    fn diff_directory_detects_create_and_delete() {
        let watch = Watch::new(1, "/tmp/x", WatchTarget::Directory, WatchFlags::ALL, ());
        let old = vec![("a".to_string(), stat_at(1))];
        let new = vec![("b".to_string(), stat_at(1))];
        let mut events = Vec::new();
        diff_directory(&watch, &old, &new, UNIX_EPOCH + Duration::from_secs(100), WatchFlags::ALL, &mut events);

        assert!(events.iter().any(|e| e.action() == EventKind::Delete && e.name() == "a"));
        assert!(events.iter().any(|e| e.action() == EventKind::Create && e.name() == "b"));
    }

    #[test]
    fn diff_stat_respects_flag_filtering() {
        let watch = Watch::new(1, "/tmp/x/a", WatchTarget::File, WatchFlags::CREATE | WatchFlags::DELETE, ());
        let old = stat_at(1);
        let new = stat_at(2);
        let mut events = Vec::new();
        diff_stat(&watch, "a", &old, &new, UNIX_EPOCH + Duration::from_secs(100), watch.flags(), &mut events);
        assert!(events.is_empty(), "Modify should be filtered out when not subscribed");
    }

    #[test]
    fn diff_stat_emits_modify_when_subscribed() {
        let watch = Watch::new(1, "/tmp/x/a", WatchTarget::File, WatchFlags::MODIFY, ());
        let old = stat_at(1);
        let new = stat_at(2);
        let mut events = Vec::new();
        diff_stat(&watch, "a", &old, &new, UNIX_EPOCH + Duration::from_secs(100), watch.flags(), &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action(), EventKind::Modify);
    }

    #[test]
    fn round_fs_resolution_is_monotonic_with_time() {
        let a = round_fs_resolution(UNIX_EPOCH + Duration::from_secs(10));
        let b = round_fs_resolution(UNIX_EPOCH + Duration::from_secs(20));
        assert!(b >= a);
    }
}
