//! The Linux backend, driven by the kernel's inotify interface
//!
//! One [`LinuxMonitor`] owns exactly one inotify instance. Watches are kept
//! in a `wd -> Watch` map guarded by a mutex that is held only around map
//! operations, never across the blocking `read`.

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::mem;
use std::os::raw::c_int;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use inotify_sys as ffi;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{convert_flags, Event, EventKind, WatchFlags};
use crate::watch::{MonitorId, Watch, WatchTarget};

/// Native → unified event-kind table, scanned in ascending bit order
///
/// Stops at `IN_MOVED_TO` (`0x00000080`); `IN_ISDIR` (`0x40000000`) is a
/// modifier on other bits, not an event of its own, and is never reported
/// as a distinct [`EventKind`].
const NATIVE_TO_UNIFIED: &[(u32, EventKind)] = &[
    (ffi::IN_ACCESS, EventKind::Access),
    (ffi::IN_MODIFY, EventKind::Modify),
    (ffi::IN_ATTRIB, EventKind::Attrib),
    (ffi::IN_CREATE, EventKind::Create),
    (ffi::IN_DELETE, EventKind::Delete),
    (ffi::IN_DELETE_SELF, EventKind::DeleteSelf),
    (ffi::IN_MOVED_FROM, EventKind::MoveFrom),
    (ffi::IN_MOVED_TO, EventKind::MoveTo),
];

/// Unified → native table used to build the subscription mask passed to
/// `inotify_add_watch`
const UNIFIED_TO_NATIVE: &[(WatchFlags, u32)] = &[
    (WatchFlags::ACCESS, ffi::IN_ACCESS),
    (WatchFlags::MODIFY, ffi::IN_MODIFY),
    (WatchFlags::ATTRIB, ffi::IN_ATTRIB),
    (WatchFlags::CREATE, ffi::IN_CREATE),
    (WatchFlags::DELETE, ffi::IN_DELETE),
    (WatchFlags::DELETE_SELF, ffi::IN_DELETE_SELF),
    (WatchFlags::MOVE_FROM, ffi::IN_MOVED_FROM),
    (WatchFlags::MOVE_TO, ffi::IN_MOVED_TO),
];

struct State<T> {
    fd: c_int,
    by_wd: HashMap<c_int, Watch<T>>,
}

/// The Linux inotify adapter
pub struct LinuxMonitor<T = ()> {
    id: MonitorId,
    config: Config,
    state: Mutex<State<T>>,
}

impl<T> LinuxMonitor<T> {
    /// Opens a fresh inotify instance
    pub fn new(config: Config) -> Result<Self> {
        let fd = unsafe { ffi::inotify_init1(ffi::IN_CLOEXEC) };
        if fd == -1 {
            return Err(Error::last_os_error("<inotify_init1>"));
        }

        log::debug!("opened inotify instance, fd={}", fd);

        Ok(LinuxMonitor {
            id: crate::watch::next_monitor_id(),
            config,
            state: Mutex::new(State {
                fd,
                by_wd: HashMap::new(),
            }),
        })
    }

    pub(crate) fn id(&self) -> MonitorId {
        self.id
    }

    fn add_watch(
        &self,
        path: &Path,
        target: WatchTarget,
        flags: WatchFlags,
        user: T,
    ) -> Result<Watch<T>> {
        let watch = Watch::new(self.id, path, target, flags, user);

        let mut native = convert_flags(watch.flags(), UNIFIED_TO_NATIVE);
        if target == WatchTarget::Directory {
            native |= ffi::IN_ONLYDIR;
        }

        let c_path =
            CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::InvalidArgument(
                format!("path contains an interior NUL byte: {}", path.display()),
            ))?;

        let wd = {
            let state = self.state.lock().unwrap();
            unsafe { ffi::inotify_add_watch(state.fd, c_path.as_ptr(), native) }
        };
        if wd == -1 {
            return Err(Error::last_os_error(path));
        }

        watch.set_backend_key(wd as i64);

        let mut state = self.state.lock().unwrap();
        state.by_wd.insert(wd, watch.clone());
        log::debug!("added watch wd={} path={}", wd, path.display());

        Ok(watch)
    }

    /// Adds a watch on a directory and its immediate children
    pub fn add_dir_watch(&self, path: impl AsRef<Path>, flags: WatchFlags, user: T) -> Result<Watch<T>> {
        self.add_watch(path.as_ref(), WatchTarget::Directory, flags, user)
    }

    /// Adds a watch on a single file
    pub fn add_file_watch(&self, path: impl AsRef<Path>, flags: WatchFlags, user: T) -> Result<Watch<T>> {
        self.add_watch(path.as_ref(), WatchTarget::File, flags, user)
    }

    /// Removes a watch, returning whether it was still registered
    pub fn remove_watch(&self, watch: &Watch<T>) -> Result<bool> {
        if watch.monitor_id() != self.id {
            return Err(Error::Unsupported(
                "watch does not belong to this monitor",
            ));
        }

        let Some(wd) = watch.backend_key() else {
            return Ok(false);
        };

        let mut state = self.state.lock().unwrap();
        let rc = unsafe { ffi::inotify_rm_watch(state.fd, wd as c_int) };
        if rc == -1 {
            // ENOENT/EINVAL here means the wd is already gone: treat as
            // already-removed rather than propagating the error.
            state.by_wd.remove(&(wd as c_int));
            watch.mark_removed();
            return Ok(false);
        }

        // The wd is evicted from the map when `IN_IGNORED` is observed, not
        // here: the kernel still owns delivering any events already queued
        // for it.
        drop(state);
        log::debug!("removed watch wd={}", wd);
        Ok(true)
    }

    /// Removes every watch currently registered with this monitor
    pub fn remove_all_watches(&self) -> Result<()> {
        let wds: Vec<Watch<T>> = {
            let state = self.state.lock().unwrap();
            state.by_wd.values().cloned().collect()
        };
        for watch in wds {
            self.remove_watch(&watch)?;
        }
        Ok(())
    }

    /// A snapshot of currently active watches
    pub fn watches(&self) -> Vec<Watch<T>> {
        self.state.lock().unwrap().by_wd.values().cloned().collect()
    }

    /// Reads a batch of events, waiting at most `timeout` (or indefinitely,
    /// if `None`) for the first one to arrive
    pub fn read_events(&self, timeout: Option<Duration>) -> Result<Vec<Event<T>>> {
        let fd = self.state.lock().unwrap().fd;

        if !self.wait_readable(fd, timeout)? {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; self.config.buffer_size.max(1024)];
        let n = loop {
            let n = unsafe {
                libc::read(
                    fd,
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                )
            };
            if n >= 0 {
                break n as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                log::trace!("inotify read interrupted (EINTR), retrying");
                continue;
            }
            return Err(Error::os(Path::new(""), err));
        };

        self.parse_events(&buffer[..n])
    }

    fn wait_readable(&self, fd: c_int, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|d| Instant::now() + d);

        loop {
            let poll_timeout = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    remaining.as_millis().min(c_int::MAX as u128) as c_int
                }
                None => -1,
            };

            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };

            let rc = unsafe { libc::poll(&mut pfd, 1, poll_timeout) };
            if rc > 0 {
                return Ok(true);
            }
            if rc == 0 {
                return Ok(false);
            }

            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                log::trace!("inotify poll interrupted (EINTR), retrying");
                continue;
            }
            return Err(Error::os(Path::new(""), err));
        }
    }

    fn parse_events(&self, buffer: &[u8]) -> Result<Vec<Event<T>>> {
        let header_size = mem::size_of::<ffi::inotify_event>();
        let mut events = Vec::new();
        let mut evicted = Vec::new();
        let mut pos = 0;

        {
            let state = self.state.lock().unwrap();

            while pos + header_size <= buffer.len() {
                // The buffer has alignment 1; `inotify_event` does not, so a
                // cast-and-deref here would be UB. Read it unaligned instead.
                let header = unsafe {
                    (buffer[pos..].as_ptr() as *const ffi::inotify_event).read_unaligned()
                };
                let wd = header.wd;
                let mask = header.mask;
                let len = header.len as usize;

                let name_bytes = &buffer[pos + header_size..pos + header_size + len];
                let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(len);
                let name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

                pos += header_size + len;

                if mask & ffi::IN_IGNORED != 0 {
                    evicted.push(wd);
                    continue;
                }
                if mask & ffi::IN_Q_OVERFLOW != 0 || wd == -1 {
                    log::warn!("inotify event queue overflowed; some events were dropped");
                    continue;
                }

                let Some(watch) = state.by_wd.get(&wd) else {
                    continue;
                };
                if watch.is_removed() || !watch.is_enabled() {
                    continue;
                }

                // Scan only the bits this crate models; IN_ISDIR and other
                // modifier bits above 0x10000 are intentionally not visited.
                for &(native_bit, kind) in NATIVE_TO_UNIFIED {
                    if mask & native_bit == 0 {
                        continue;
                    }
                    if !watch.flags().contains(kind.flag()) {
                        continue;
                    }
                    events.push(Event::new(watch.clone(), kind, name.clone()));
                }
            }
        }

        if !evicted.is_empty() {
            let mut state = self.state.lock().unwrap();
            for wd in evicted {
                if let Some(watch) = state.by_wd.remove(&wd) {
                    watch.mark_removed();
                    log::debug!("evicted watch wd={} on IN_IGNORED", wd);
                }
            }
        }

        Ok(events)
    }
}

impl<T> Drop for LinuxMonitor<T> {
    fn drop(&mut self) {
        let fd = self.state.lock().unwrap().fd;
        if unsafe { libc::close(fd) } == -1 {
            log::warn!("failed to close inotify fd {}: {}", fd, io::Error::last_os_error());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_tables_stay_in_sync() {
        assert_eq!(NATIVE_TO_UNIFIED.len(), UNIFIED_TO_NATIVE.len());
        for &(flag, native) in UNIFIED_TO_NATIVE {
            assert!(NATIVE_TO_UNIFIED.iter().any(|&(n, k)| n == native && k.flag() == flag));
        }
    }

    #[test]
    fn isdir_bit_is_not_modelled() {
        assert!(NATIVE_TO_UNIFIED.iter().all(|&(bit, _)| bit < 0x10000));
    }
}
