//! The watch handle shared between callers and backend adapters

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::event::WatchFlags;

/// A process-unique identifier for a [`Monitor`](crate::Monitor), used to
/// reject a [`Watch`] handed to a monitor other than the one that created it
pub(crate) type MonitorId = usize;

static NEXT_MONITOR_ID: AtomicUsize = AtomicUsize::new(1);

/// Allocates a fresh [`MonitorId`], unique for the lifetime of the process
pub(crate) fn next_monitor_id() -> MonitorId {
    NEXT_MONITOR_ID.fetch_add(1, Ordering::Relaxed)
}

/// Whether a [`Watch`] covers a directory or a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchTarget {
    /// The watch covers a directory and the entries within it
    Directory,
    /// The watch covers exactly one file, with no directory semantics
    File,
}

#[derive(Debug)]
struct Inner<T> {
    monitor_id: MonitorId,
    path: PathBuf,
    target: WatchTarget,
    flags: WatchFlags,
    user: T,
    /// Backend-specific identity: an inotify watch descriptor, a Windows
    /// completion key, or a polling-backend sequence number. `-1` while the
    /// watch is being constructed and not yet registered with its backend.
    backend_key: AtomicI64,
    /// Cleared by the adapter when the watch has been torn down, either by
    /// an explicit removal or because the backend observed the watched
    /// entry disappear. A watch found disabled is skipped on the next scan
    /// rather than re-armed.
    removed: AtomicBool,
    /// Events from a disabled watch are dropped before delivery; toggled by
    /// [`Watch::set_enabled`].
    enabled: AtomicBool,
}

/// A handle to one filesystem watch
///
/// Cloning a `Watch` is cheap and shares the same underlying state; every
/// clone refers to the same watch. Returned by
/// [`Monitor::add_dir_watch`](crate::Monitor::add_dir_watch) and
/// [`Monitor::add_file_watch`](crate::Monitor::add_file_watch), and carried
/// by every [`Event`](crate::Event) it produces.
#[derive(Debug)]
pub struct Watch<T = ()> {
    inner: Arc<Inner<T>>,
}

impl<T> Watch<T> {
    pub(crate) fn new(
        monitor_id: MonitorId,
        path: impl Into<PathBuf>,
        target: WatchTarget,
        flags: WatchFlags,
        user: T,
    ) -> Self {
        Watch {
            inner: Arc::new(Inner {
                monitor_id,
                path: path.into(),
                target,
                // DeleteSelf is observable on every watch no matter what
                // the caller asked for.
                flags: flags | WatchFlags::DELETE_SELF,
                user,
                backend_key: AtomicI64::new(-1),
                removed: AtomicBool::new(false),
                enabled: AtomicBool::new(true),
            }),
        }
    }

    /// The monitor this watch was created by
    pub(crate) fn monitor_id(&self) -> MonitorId {
        self.inner.monitor_id
    }

    /// The watched path
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Whether this watch covers a directory or a single file
    pub fn target(&self) -> WatchTarget {
        self.inner.target
    }

    /// The subscribed event kinds, always including `DeleteSelf`
    pub fn flags(&self) -> WatchFlags {
        self.inner.flags
    }

    /// The caller-supplied annotation attached at creation time
    pub fn user(&self) -> &T {
        &self.inner.user
    }

    /// The backend-specific identity assigned to this watch, or `None` if
    /// it has not yet been registered with its backend
    pub(crate) fn backend_key(&self) -> Option<i64> {
        match self.inner.backend_key.load(Ordering::Acquire) {
            -1 => None,
            key => Some(key),
        }
    }

    /// Records the backend-specific identity assigned to this watch
    pub(crate) fn set_backend_key(&self, key: i64) {
        self.inner.backend_key.store(key, Ordering::Release);
    }

    /// Whether this watch has been torn down
    pub fn is_removed(&self) -> bool {
        self.inner.removed.load(Ordering::Acquire)
    }

    /// Marks this watch as torn down; idempotent
    pub(crate) fn mark_removed(&self) {
        self.inner.removed.store(true, Ordering::Release);
    }

    /// Whether events from this watch are currently delivered
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Enables or disables event delivery for this watch
    ///
    /// A disabled watch keeps its backend registration; it is merely
    /// skipped when the adapter would otherwise deliver or scan it.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }
}

impl<T> Clone for Watch<T> {
    fn clone(&self) -> Self {
        Watch {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Watch<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Watch<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_self_is_always_subscribed() {
        let watch = Watch::new(1, "/tmp/x", WatchTarget::Directory, WatchFlags::CREATE, ());
        assert!(watch.flags().contains(WatchFlags::DELETE_SELF));
        assert!(watch.flags().contains(WatchFlags::CREATE));
    }

    #[test]
    fn clones_share_identity() {
        let a = Watch::new(1, "/tmp/x", WatchTarget::Directory, WatchFlags::ALL, 7u32);
        let b = a.clone();
        assert_eq!(a, b);
        b.set_backend_key(42);
        assert_eq!(a.backend_key(), Some(42));
    }

    #[test]
    fn distinct_watches_are_not_equal() {
        let a = Watch::new(1, "/tmp/x", WatchTarget::Directory, WatchFlags::ALL, ());
        let b = Watch::new(1, "/tmp/x", WatchTarget::Directory, WatchFlags::ALL, ());
        assert_ne!(a, b);
    }

    #[test]
    fn backend_key_starts_unset() {
        let watch = Watch::new(1, "/tmp/x", WatchTarget::File, WatchFlags::ALL, ());
        assert_eq!(watch.backend_key(), None);
    }
}
