//! The background watcher task
//!
//! Owns a [`Monitor`] and pumps [`Monitor::read_events`] in a loop, either
//! pushing each event to a user callback or buffering it for pull-mode
//! retrieval via [`Watcher::try_recv`]/[`Watcher::recv`].

use std::sync::mpsc::{self, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::event::Event;
use crate::monitor::Monitor;

/// How the worker hands events off once `read_events` returns them
enum Delivery<T> {
    Callback(Box<dyn FnMut(Event<T>) + Send>),
    Queue(Sender<Event<T>>),
}

/// A background thread pumping events out of a [`Monitor`]
///
/// Detached (daemon-style): dropping the last handle without calling
/// [`Watcher::stop`] lets the thread keep running and does not block
/// process exit, since the thread itself is not joined unless the caller
/// asks.
pub struct Watcher<T = ()> {
    monitor: Arc<Monitor<T>>,
    stopping: Arc<std::sync::atomic::AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + Sync + 'static> Watcher<T> {
    /// Spawns a worker that invokes `callback` for every event read
    pub fn spawn(monitor: Monitor<T>, mut callback: impl FnMut(Event<T>) + Send + 'static) -> Self {
        Self::spawn_with(monitor, Delivery::Callback(Box::new(move |event| callback(event))))
    }

    /// Spawns a worker that buffers events for pull-mode retrieval via
    /// [`Watcher::try_recv`] / [`Watcher::recv`]
    pub fn spawn_pull(monitor: Monitor<T>) -> (Self, Receiver<Event<T>>) {
        let (tx, rx) = mpsc::channel();
        (Self::spawn_with(monitor, Delivery::Queue(tx)), rx)
    }

    fn spawn_with(monitor: Monitor<T>, mut delivery: Delivery<T>) -> Self {
        let monitor = Arc::new(monitor);
        let stopping = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let thread_monitor = Arc::clone(&monitor);
        let thread_stopping = Arc::clone(&stopping);

        let handle = thread::spawn(move || {
            let poll_timeout = Some(Duration::from_millis(200));

            while !thread_stopping.load(std::sync::atomic::Ordering::Acquire) {
                match thread_monitor.read_events(poll_timeout) {
                    Ok(events) => {
                        for event in events {
                            match &mut delivery {
                                Delivery::Callback(f) => f(event),
                                Delivery::Queue(tx) => {
                                    if tx.send(event).is_err() {
                                        log::debug!("watcher queue receiver dropped; stopping");
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Err(err) => {
                        log::error!("watcher task: read_events failed: {err}");
                    }
                }
            }

            log::debug!("watcher task stopping");
        });

        Watcher {
            monitor,
            stopping,
            handle: Some(handle),
        }
    }

    /// A reference to the monitor this worker owns, for adding/removing
    /// watches while the worker runs
    pub fn monitor(&self) -> &Monitor<T> {
        &self.monitor
    }

    /// Signals the worker to stop, removes all watches so any blocked
    /// native wait unblocks, and joins the thread
    pub fn stop(mut self) -> Result<()> {
        self.stop_inner()
    }

    fn stop_inner(&mut self) -> Result<()> {
        self.stopping.store(true, std::sync::atomic::Ordering::Release);
        self.monitor.remove_all_watches()?;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl<T> Watcher<T> {
    /// Non-blocking pull of the next buffered event, for workers created
    /// with [`Watcher::spawn_pull`]
    pub fn try_recv(rx: &Receiver<Event<T>>) -> std::result::Result<Event<T>, TryRecvError> {
        rx.try_recv()
    }

    /// Blocking pull of the next buffered event
    pub fn recv(rx: &Receiver<Event<T>>) -> std::result::Result<Event<T>, RecvError> {
        rx.recv()
    }

    /// Blocking pull with a timeout
    pub fn recv_timeout(
        rx: &Receiver<Event<T>>,
        timeout: Duration,
    ) -> std::result::Result<Event<T>, RecvTimeoutError> {
        rx.recv_timeout(timeout)
    }
}

impl<T> Drop for Watcher<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stopping.store(true, std::sync::atomic::Ordering::Release);
            // Daemon-style: we do not join here. The thread observes
            // `stopping` on its next wake and exits on its own.
        }
    }
}

/// Convenience constructor mirroring [`Monitor::new`] for a push-mode
/// watcher with default configuration
pub fn spawn_default<T: Send + Sync + 'static>(callback: impl FnMut(Event<T>) + Send + 'static) -> Result<Watcher<T>> {
    let monitor = Monitor::with_config(Config::default())?;
    Ok(Watcher::spawn(monitor, callback))
}
