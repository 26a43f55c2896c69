//! The unified facade dispatching to whichever backend is active

use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{Event, WatchFlags};
use crate::polling::PollingMonitor;
use crate::watch::Watch;

#[cfg(target_os = "linux")]
use crate::linux::LinuxMonitor;
#[cfg(windows)]
use crate::windows::WindowsMonitor;

enum Backend<T> {
    #[cfg(target_os = "linux")]
    Linux(LinuxMonitor<T>),
    #[cfg(windows)]
    Windows(WindowsMonitor<T>),
    Polling(PollingMonitor<T>),
}

/// A filesystem-change monitor
///
/// Chooses a native backend at construction time ([`Monitor::new`]), or can
/// be forced onto the portable polling backend via
/// [`Monitor::with_config`] and [`Config::force_polling`]. Every method
/// simply forwards to whichever backend was selected.
pub struct Monitor<T = ()> {
    backend: Backend<T>,
}

impl<T> Monitor<T> {
    /// Creates a monitor using the default configuration
    ///
    /// Picks the native backend for the current platform (Linux inotify,
    /// Windows completion ports) or falls back to polling on every other
    /// platform.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// Creates a monitor with explicit [`Config`]
    pub fn with_config(config: Config) -> Result<Self> {
        if config.force_polling {
            return Ok(Monitor {
                backend: Backend::Polling(PollingMonitor::new(config)),
            });
        }

        #[cfg(target_os = "linux")]
        {
            return Ok(Monitor {
                backend: Backend::Linux(LinuxMonitor::new(config)?),
            });
        }

        #[cfg(all(windows, not(target_os = "linux")))]
        {
            return Ok(Monitor {
                backend: Backend::Windows(WindowsMonitor::new(config)?),
            });
        }

        #[cfg(not(any(target_os = "linux", windows)))]
        {
            return Ok(Monitor {
                backend: Backend::Polling(PollingMonitor::new(config)),
            });
        }
    }

    /// Explicitly creates a monitor on the portable polling backend,
    /// regardless of what the running platform natively supports
    pub fn new_polling(config: Config) -> Self {
        Monitor {
            backend: Backend::Polling(PollingMonitor::new(config)),
        }
    }

    /// Adds a watch on a directory and its immediate children
    ///
    /// `flags` always implicitly includes [`WatchFlags::DELETE_SELF`].
    pub fn add_dir_watch(&self, path: impl AsRef<Path>, flags: WatchFlags, user: T) -> Result<Watch<T>> {
        match &self.backend {
            #[cfg(target_os = "linux")]
            Backend::Linux(m) => m.add_dir_watch(path, flags, user),
            #[cfg(windows)]
            Backend::Windows(m) => m.add_dir_watch(path, flags, false, user),
            Backend::Polling(m) => m.add_dir_watch(path, flags, user),
        }
    }

    /// Adds a watch on a directory, requesting recursive delivery
    ///
    /// Only meaningful on the Windows backend, where recursion is a native
    /// switch on `ReadDirectoryChangesW`; on every other backend this is
    /// equivalent to [`Monitor::add_dir_watch`].
    #[cfg(windows)]
    pub fn add_dir_watch_recursive(&self, path: impl AsRef<Path>, flags: WatchFlags, user: T) -> Result<Watch<T>> {
        match &self.backend {
            Backend::Windows(m) => m.add_dir_watch(path, flags, true, user),
            Backend::Polling(m) => m.add_dir_watch(path, flags, user),
        }
    }

    /// Adds a watch on a single file
    ///
    /// Unsupported on the Windows backend (see [`Error::Unsupported`]).
    pub fn add_file_watch(&self, path: impl AsRef<Path>, flags: WatchFlags, user: T) -> Result<Watch<T>> {
        match &self.backend {
            #[cfg(target_os = "linux")]
            Backend::Linux(m) => m.add_file_watch(path, flags, user),
            #[cfg(windows)]
            Backend::Windows(m) => m.add_file_watch(path, flags, user),
            Backend::Polling(m) => m.add_file_watch(path, flags, user),
        }
    }

    /// Removes a watch, returning whether it was still registered
    ///
    /// Fails with [`Error::Unsupported`] if `watch` was not created by this
    /// monitor.
    pub fn remove_watch(&self, watch: &Watch<T>) -> Result<bool> {
        match &self.backend {
            #[cfg(target_os = "linux")]
            Backend::Linux(m) => m.remove_watch(watch),
            #[cfg(windows)]
            Backend::Windows(m) => m.remove_watch(watch),
            Backend::Polling(m) => m.remove_watch(watch),
        }
    }

    /// Removes every watch currently registered with this monitor
    pub fn remove_all_watches(&self) -> Result<()> {
        match &self.backend {
            #[cfg(target_os = "linux")]
            Backend::Linux(m) => m.remove_all_watches(),
            #[cfg(windows)]
            Backend::Windows(m) => m.remove_all_watches(),
            Backend::Polling(m) => m.remove_all_watches(),
        }
    }

    /// Enables or disables delivery for a single watch without removing it
    pub fn enable_watch(&self, watch: &Watch<T>, enabled: bool) -> Result<()> {
        if watch.monitor_id() != self.monitor_id() {
            return Err(Error::Unsupported("watch does not belong to this monitor"));
        }
        watch.set_enabled(enabled);
        Ok(())
    }

    /// Disables delivery for a single watch without removing it
    pub fn disable_watch(&self, watch: &Watch<T>) -> Result<()> {
        self.enable_watch(watch, false)
    }

    /// A snapshot of currently active watches
    pub fn watches(&self) -> Vec<Watch<T>> {
        match &self.backend {
            #[cfg(target_os = "linux")]
            Backend::Linux(m) => m.watches(),
            #[cfg(windows)]
            Backend::Windows(m) => m.watches(),
            Backend::Polling(m) => m.watches(),
        }
    }

    /// Waits up to `timeout` (or indefinitely, if `None`) for at least one
    /// event, and returns the batch read
    pub fn read_events(&self, timeout: Option<Duration>) -> Result<Vec<Event<T>>> {
        match &self.backend {
            #[cfg(target_os = "linux")]
            Backend::Linux(m) => m.read_events(timeout),
            #[cfg(windows)]
            Backend::Windows(m) => m.read_events(timeout),
            Backend::Polling(m) => m.read_events(timeout),
        }
    }

    /// Releases any remaining watches and the backend resource
    ///
    /// Equivalent to dropping the monitor; provided for callers that want
    /// to observe teardown errors explicitly.
    pub fn close(self) -> Result<()> {
        self.remove_all_watches()
    }

    fn monitor_id(&self) -> crate::watch::MonitorId {
        match &self.backend {
            #[cfg(target_os = "linux")]
            Backend::Linux(m) => m.id(),
            #[cfg(windows)]
            Backend::Windows(m) => m.id(),
            Backend::Polling(m) => m.id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_monitor_can_be_forced_explicitly() {
        let monitor: Monitor<()> = Monitor::new_polling(Config::default());
        assert!(monitor.watches().is_empty());
    }
}
