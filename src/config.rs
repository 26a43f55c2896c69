//! Monitor-wide configuration

use std::time::Duration;

/// Tuning knobs for a [`Monitor`](crate::Monitor)
///
/// Constructed with [`Config::default`] and adjusted with the builder
/// methods, then passed to [`Monitor::with_config`](crate::Monitor::with_config).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub(crate) buffer_size: usize,
    pub(crate) polling_interval: Duration,
    pub(crate) force_polling: bool,
}

impl Config {
    /// The Linux adapter's default `read` buffer size, in bytes
    ///
    /// Large enough to hold a good number of `inotify_event` records even
    /// when several carry long names, without resorting to a per-call
    /// syscall just to size the buffer.
    pub const DEFAULT_BUFFER_SIZE: usize = 4096;

    /// The polling adapter's default minimum interval between two scans of
    /// the same watch
    pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(500);

    /// The size, in bytes, of the buffer the Linux adapter reads raw
    /// `inotify_event` records into
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// The minimum interval between two scans of the same watch on the
    /// polling backend
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Forces use of the portable polling backend even on a platform with a
    /// native adapter
    pub fn force_polling(mut self, force: bool) -> Self {
        self.force_polling = force;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            polling_interval: Self::DEFAULT_POLLING_INTERVAL,
            force_polling: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_constants() {
        let config = Config::default();
        assert_eq!(config.buffer_size, Config::DEFAULT_BUFFER_SIZE);
        assert_eq!(config.polling_interval, Config::DEFAULT_POLLING_INTERVAL);
        assert!(!config.force_polling);
    }

    #[test]
    fn builder_methods_chain() {
        let config = Config::default()
            .buffer_size(8192)
            .polling_interval(Duration::from_millis(100))
            .force_polling(true);
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.polling_interval, Duration::from_millis(100));
        assert!(config.force_polling);
    }
}
