//! The Windows backend, driven by `ReadDirectoryChangesW` multiplexed
//! through a single I/O completion port
//!
//! One [`WindowsMonitor`] owns exactly one completion port. Each watch owns
//! a directory handle, an `OVERLAPPED` block, and a change buffer; all three
//! are kept alive, pinned in a `Box`, for as long as an I/O request is
//! outstanding against them.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use windows_sys::Win32::Foundation::{CloseHandle, ERROR_ACCESS_DENIED, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ACTION_ADDED, FILE_ACTION_MODIFIED, FILE_ACTION_REMOVED,
    FILE_ACTION_RENAMED_NEW_NAME, FILE_ACTION_RENAMED_OLD_NAME, FILE_FLAG_BACKUP_SEMANTICS,
    FILE_FLAG_OVERLAPPED, FILE_LIST_DIRECTORY, FILE_NOTIFY_CHANGE_ATTRIBUTES,
    FILE_NOTIFY_CHANGE_CREATION, FILE_NOTIFY_CHANGE_DIR_NAME, FILE_NOTIFY_CHANGE_FILE_NAME,
    FILE_NOTIFY_CHANGE_LAST_ACCESS, FILE_NOTIFY_CHANGE_LAST_WRITE, FILE_NOTIFY_CHANGE_SECURITY,
    FILE_NOTIFY_CHANGE_SIZE, FILE_SHARE_DELETE, FILE_SHARE_READ,
    FILE_SHARE_WRITE, OPEN_EXISTING, ReadDirectoryChangesW,
};
use windows_sys::Win32::System::IO::{
    CancelIoEx, CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED,
    PostQueuedCompletionStatus,
};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{decode_native, Event, EventKind, WatchFlags};
use crate::watch::{MonitorId, Watch, WatchTarget};

/// Native action code → unified kind, per `FILE_ACTION_*`
const ACTION_TO_UNIFIED: &[(u32, EventKind)] = &[
    (FILE_ACTION_ADDED, EventKind::Create),
    (FILE_ACTION_REMOVED, EventKind::Delete),
    (FILE_ACTION_MODIFIED, EventKind::Modify),
    (FILE_ACTION_RENAMED_OLD_NAME, EventKind::MoveFrom),
    (FILE_ACTION_RENAMED_NEW_NAME, EventKind::MoveTo),
];

const UNIFIED_TO_NATIVE: &[(WatchFlags, u32)] = &[
    (WatchFlags::MODIFY, FILE_NOTIFY_CHANGE_LAST_WRITE),
    (WatchFlags::ATTRIB, FILE_NOTIFY_CHANGE_ATTRIBUTES),
    (WatchFlags::CREATE, FILE_NOTIFY_CHANGE_FILE_NAME | FILE_NOTIFY_CHANGE_DIR_NAME),
    (WatchFlags::DELETE, FILE_NOTIFY_CHANGE_FILE_NAME | FILE_NOTIFY_CHANGE_DIR_NAME),
    (WatchFlags::MOVE_FROM, FILE_NOTIFY_CHANGE_FILE_NAME | FILE_NOTIFY_CHANGE_DIR_NAME),
    (WatchFlags::MOVE_TO, FILE_NOTIFY_CHANGE_FILE_NAME | FILE_NOTIFY_CHANGE_DIR_NAME),
    (WatchFlags::ACCESS, FILE_NOTIFY_CHANGE_LAST_ACCESS),
];

/// A sentinel completion key. The IOCP wakeup posted on `remove_watch` uses
/// this key, which no real watch is ever assigned, so `read_events` can
/// distinguish "wake up and recheck" from "this key has real data".
const WAKEUP_KEY: usize = 0;

const BUFFER_SIZE: usize = 4096;

struct WatchState<T> {
    watch: Watch<T>,
    handle: HANDLE,
    recursive: bool,
    native_filter: u32,
    /// Pinned for the lifetime of any outstanding `ReadDirectoryChangesW`
    /// call; the kernel writes into it asynchronously.
    overlapped: Box<OVERLAPPED>,
    buffer: Box<[u8; BUFFER_SIZE]>,
}

// The raw HANDLE and pointers are only ever touched while holding the
// monitor's mutex or from the thread that owns the completion port wait;
// Windows handles are safe to move between threads.
unsafe impl<T: Send> Send for WatchState<T> {}

struct Inner<T> {
    port: HANDLE,
    by_key: HashMap<usize, WatchState<T>>,
}

/// The Windows I/O-completion-port adapter
pub struct WindowsMonitor<T = ()> {
    id: MonitorId,
    #[allow(dead_code)]
    config: Config,
    next_key: AtomicI64,
    state: Mutex<Inner<T>>,
}

impl<T> WindowsMonitor<T> {
    /// Creates a completion port with no handle attached yet
    pub fn new(config: Config) -> Result<Self> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, ptr::null_mut(), 0, 0) };
        if port.is_null() {
            return Err(Error::os(Path::new(""), io::Error::last_os_error()));
        }

        Ok(WindowsMonitor {
            id: crate::watch::next_monitor_id(),
            config,
            next_key: AtomicI64::new(WAKEUP_KEY as i64 + 1),
            state: Mutex::new(Inner {
                port,
                by_key: HashMap::new(),
            }),
        })
    }

    pub(crate) fn id(&self) -> MonitorId {
        self.id
    }

    /// Adds a watch on a directory
    pub fn add_dir_watch(
        &self,
        path: impl AsRef<Path>,
        flags: WatchFlags,
        recursive: bool,
        user: T,
    ) -> Result<Watch<T>> {
        let path = path.as_ref();
        let watch = Watch::new(self.id, path, WatchTarget::Directory, flags, user);

        let native_filter = crate::event::convert_flags(watch.flags(), UNIFIED_TO_NATIVE)
            | FILE_NOTIFY_CHANGE_CREATION
            | FILE_NOTIFY_CHANGE_SECURITY
            | FILE_NOTIFY_CHANGE_SIZE;

        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();

        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                FILE_LIST_DIRECTORY,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(Error::last_os_error(path));
        }

        let key = self.next_key.fetch_add(1, Ordering::Relaxed) as usize;

        let mut state = self.state.lock().unwrap();
        let attached = unsafe { CreateIoCompletionPort(handle, state.port, key, 0) };
        if attached.is_null() {
            let err = Error::last_os_error(path);
            unsafe { CloseHandle(handle) };
            return Err(err);
        }

        watch.set_backend_key(key as i64);

        let mut watch_state = WatchState {
            watch: watch.clone(),
            handle,
            recursive,
            native_filter,
            overlapped: Box::new(unsafe { std::mem::zeroed() }),
            buffer: Box::new([0u8; BUFFER_SIZE]),
        };
        arm(&mut watch_state)?;

        state.by_key.insert(key, watch_state);
        log::debug!("added watch key={} path={}", key, path.display());

        Ok(watch)
    }

    /// File watches are not supported by this backend
    pub fn add_file_watch(&self, path: impl AsRef<Path>, _flags: WatchFlags, _user: T) -> Result<Watch<T>> {
        let _ = path;
        Err(Error::Unsupported("file watches are not supported on the Windows backend"))
    }

    /// Cancels I/O, closes the handle, and wakes any blocked reader
    pub fn remove_watch(&self, watch: &Watch<T>) -> Result<bool> {
        if watch.monitor_id() != self.id {
            return Err(Error::Unsupported("watch does not belong to this monitor"));
        }

        let Some(key) = watch.backend_key() else {
            return Ok(false);
        };

        let mut state = self.state.lock().unwrap();
        let Some(mut watch_state) = state.by_key.remove(&(key as usize)) else {
            return Ok(false);
        };

        watch.mark_removed();
        unsafe {
            CancelIoEx(watch_state.handle, ptr::null());
            CloseHandle(watch_state.handle);
        }
        watch_state.handle = INVALID_HANDLE_VALUE;

        // Wake up whatever thread is blocked in GetQueuedCompletionStatus so
        // it can notice removal even with nothing else happening.
        unsafe {
            PostQueuedCompletionStatus(state.port, 0, WAKEUP_KEY, ptr::null_mut());
        }

        log::debug!("removed watch key={}", key);
        Ok(true)
    }

    /// Removes every watch currently registered with this monitor
    pub fn remove_all_watches(&self) -> Result<()> {
        let watches: Vec<Watch<T>> = {
            let state = self.state.lock().unwrap();
            state.by_key.values().map(|w| w.watch.clone()).collect()
        };
        for watch in watches {
            self.remove_watch(&watch)?;
        }
        Ok(())
    }

    /// A snapshot of currently active watches
    pub fn watches(&self) -> Vec<Watch<T>> {
        self.state
            .lock()
            .unwrap()
            .by_key
            .values()
            .map(|w| w.watch.clone())
            .collect()
    }

    /// Waits on the completion port and returns a batch of translated events
    pub fn read_events(&self, timeout: Option<Duration>) -> Result<Vec<Event<T>>> {
        let port = self.state.lock().unwrap().port;

        let mut bytes_transferred: u32 = 0;
        let mut completion_key: usize = 0;
        let mut overlapped_ptr: *mut OVERLAPPED = ptr::null_mut();

        let wait_ms = match timeout {
            Some(d) => d.as_millis().min(u32::MAX as u128) as u32,
            None => windows_sys::Win32::System::Threading::INFINITE,
        };

        let rc = unsafe {
            GetQueuedCompletionStatus(
                port,
                &mut bytes_transferred,
                &mut completion_key,
                &mut overlapped_ptr,
                wait_ms,
            )
        };

        if rc == 0 && overlapped_ptr.is_null() {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(windows_sys::Win32::Foundation::WAIT_TIMEOUT as i32) {
                return Ok(Vec::new());
            }
            return Err(Error::os(Path::new(""), err));
        }

        if completion_key == WAKEUP_KEY {
            // Synthetic wakeup from `remove_watch`; nothing to report.
            return Ok(Vec::new());
        }

        let mut state = self.state.lock().unwrap();

        let access_denied = rc == 0
            && io::Error::last_os_error().raw_os_error() == Some(ERROR_ACCESS_DENIED as i32);

        let Some(watch_state) = state.by_key.get_mut(&completion_key) else {
            return Ok(Vec::new());
        };

        if access_denied {
            let watch = watch_state.watch.clone();
            unsafe { CloseHandle(watch_state.handle) };
            state.by_key.remove(&completion_key);
            watch.mark_removed();
            log::debug!("watch key={} is no longer accessible; synthesizing DeleteSelf", completion_key);
            return Ok(vec![Event::new(watch, EventKind::DeleteSelf, "")]);
        }

        let events = if watch_state.watch.is_enabled() {
            parse_events(watch_state, bytes_transferred as usize)
        } else {
            Vec::new()
        };

        match arm(watch_state) {
            Ok(()) => {}
            Err(err) => {
                let rearm_access_denied = err.errno() == Some(ERROR_ACCESS_DENIED as i32);
                let watch = watch_state.watch.clone();
                unsafe { CloseHandle(watch_state.handle) };
                state.by_key.remove(&completion_key);
                watch.mark_removed();

                if !rearm_access_denied {
                    log::warn!("failed to re-arm watch key={}: {}", completion_key, err);
                    return Err(err);
                }

                log::debug!("watch key={} is no longer accessible after re-arm; synthesizing DeleteSelf", completion_key);
                let mut events = events;
                events.push(Event::new(watch, EventKind::DeleteSelf, ""));
                return Ok(events);
            }
        }

        Ok(events)
    }
}

fn native_to_kind(action: u32) -> Option<EventKind> {
    decode_native(action, ACTION_TO_UNIFIED)
}

/// Byte offsets of `FILE_NOTIFY_INFORMATION`'s fields: `NextEntryOffset` and
/// `Action` are `u32` at 0 and 4, `FileNameLength` is a `u32` at 8, and the
/// variable-length `FileName` array starts at 12. The buffer backing these
/// records has no alignment guarantee beyond 1, so every field is read with
/// `read_unaligned` rather than through a reference to the struct, which
/// would be undefined behaviour (`FILE_NOTIFY_INFORMATION` requires 4-byte
/// alignment).
fn parse_events<T>(watch_state: &WatchState<T>, bytes: usize) -> Vec<Event<T>> {
    let mut events = Vec::new();
    if bytes == 0 {
        return events;
    }

    let base = watch_state.buffer.as_ptr();
    let mut offset = 0usize;
    loop {
        if offset + 12 > bytes {
            break;
        }

        let record = unsafe { base.add(offset) };
        let next_entry_offset = unsafe { (record as *const u32).read_unaligned() };
        let action = unsafe { (record.add(4) as *const u32).read_unaligned() };
        let file_name_length = unsafe { (record.add(8) as *const u32).read_unaligned() } as usize;

        let name_start = offset + 12;
        let name_units = file_name_length / 2;
        let name = if name_start + file_name_length <= bytes {
            let wide: Vec<u16> = (0..name_units)
                .map(|i| unsafe { (base.add(name_start + i * 2) as *const u16).read_unaligned() })
                .collect();
            OsString::from_wide(&wide).to_string_lossy().into_owned()
        } else {
            String::new()
        };

        if let Some(kind) = native_to_kind(action) {
            if watch_state.watch.flags().contains(kind.flag()) {
                events.push(Event::new(watch_state.watch.clone(), kind, name));
            }
        }

        if next_entry_offset == 0 {
            break;
        }
        offset += next_entry_offset as usize;
        if offset >= bytes {
            break;
        }
    }

    events
}

fn arm<T>(watch_state: &mut WatchState<T>) -> Result<()> {
    *watch_state.overlapped = unsafe { std::mem::zeroed() };

    let ok = unsafe {
        ReadDirectoryChangesW(
            watch_state.handle,
            watch_state.buffer.as_mut_ptr() as *mut _,
            BUFFER_SIZE as u32,
            watch_state.recursive as i32,
            watch_state.native_filter,
            ptr::null_mut(),
            &mut *watch_state.overlapped,
            None,
        )
    };

    if ok == 0 {
        return Err(Error::last_os_error(watch_state.watch.path()));
    }

    Ok(())
}

impl<T> Drop for WindowsMonitor<T> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        for (_, watch_state) in state.by_key.drain() {
            unsafe {
                CancelIoEx(watch_state.handle, ptr::null());
                CloseHandle(watch_state.handle);
            }
        }
        unsafe { CloseHandle(state.port) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_action_table_covers_every_kind() {
        for code in [
            FILE_ACTION_ADDED,
            FILE_ACTION_REMOVED,
            FILE_ACTION_MODIFIED,
            FILE_ACTION_RENAMED_OLD_NAME,
            FILE_ACTION_RENAMED_NEW_NAME,
        ] {
            assert!(native_to_kind(code).is_some());
        }
        assert_eq!(native_to_kind(0xdead), None);
    }
}
