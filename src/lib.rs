#![deny(missing_docs)]

//! Cross-platform filesystem change notification
//!
//! # About
//!
//! `fswatch` lets a caller register watches on directories (and, on some
//! platforms, individual files) and receive a stream of events describing
//! what happened inside them: creation, deletion, modification, attribute
//! changes, renames, access, and deletion of the watched path itself. Three
//! very different operating-system facilities are unified behind one
//! [`Monitor`] so callers write their watching logic once:
//!
//! - **Linux**, via the kernel's [inotify] interface.
//! - **Windows**, via `ReadDirectoryChangesW` multiplexed through an I/O
//!   completion port.
//! - **Everywhere else**, via a portable polling fallback that diffs
//!   periodic directory/file snapshots.
//!
//! [`Monitor::new`] picks the right backend for the host platform; tests
//! and callers that want the portable behaviour everywhere can force it
//! with [`Config::force_polling`].
//!
//! # Example
//!
//! ```no_run
//! use fswatch::{Monitor, WatchFlags};
//!
//! let monitor: Monitor<()> = Monitor::new().expect("failed to open a monitor");
//! monitor.add_dir_watch("/tmp/fswatch-example", WatchFlags::CREATE | WatchFlags::DELETE, ())
//!     .expect("failed to add watch");
//!
//! let events = monitor.read_events(None).expect("failed to read events");
//! for event in events {
//!     println!("{}: {:?}", event.action_name(), event.name());
//! }
//! ```
//!
//! # Non-goals
//!
//! This crate does not promise global event ordering across independent
//! watches, does not reconstruct rename pairs, does not recurse into
//! subdirectories on Linux or the polling backend, does not deduplicate or
//! coalesce events, and does not persist state across restarts.
//!
//! [inotify]: https://man7.org/linux/man-pages/man7/inotify.7.html

mod config;
mod error;
mod event;
mod monitor;
mod polling;
mod watch;
mod worker;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(windows)]
mod windows;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{Event, EventKind, WatchFlags};
pub use monitor::Monitor;
pub use watch::{Watch, WatchTarget};
pub use worker::{spawn_default, Watcher};
