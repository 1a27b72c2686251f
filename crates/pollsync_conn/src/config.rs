//! Connection configuration.

use std::time::Duration;

/// Default depth of the unacknowledged response buffer.
pub const DEFAULT_MAX_BUFFERED: usize = 64;

/// Configuration for a connection.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Timeout hint forced onto a new request while a response is already
    /// waiting to be delivered.
    pub min_timeout: Duration,
    /// Maximum number of unacknowledged responses, or `None` for no limit.
    pub max_buffered: Option<usize>,
}

impl ConnConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            min_timeout: Duration::from_millis(1),
            max_buffered: Some(DEFAULT_MAX_BUFFERED),
        }
    }

    /// Sets the forced timeout for requests that queue behind a buffered response.
    pub fn with_min_timeout(mut self, timeout: Duration) -> Self {
        self.min_timeout = timeout;
        self
    }

    /// Sets the maximum buffer depth.
    pub fn with_max_buffered(mut self, max: usize) -> Self {
        self.max_buffered = Some(max);
        self
    }

    /// Removes the buffer depth limit.
    pub fn unbounded(mut self) -> Self {
        self.max_buffered = None;
        self
    }

    /// Returns true if `len` buffered responses leave no room for another.
    pub fn buffer_full(&self, len: usize) -> bool {
        self.max_buffered.is_some_and(|max| len >= max)
    }
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ConnConfig::default();
        assert_eq!(config.min_timeout, Duration::from_millis(1));
        assert_eq!(config.max_buffered, Some(DEFAULT_MAX_BUFFERED));
        assert!(!config.buffer_full(0));
        assert!(config.buffer_full(DEFAULT_MAX_BUFFERED));
    }

    #[test]
    fn config_builder() {
        let config = ConnConfig::new()
            .with_min_timeout(Duration::from_millis(5))
            .with_max_buffered(2);

        assert_eq!(config.min_timeout, Duration::from_millis(5));
        assert!(!config.buffer_full(1));
        assert!(config.buffer_full(2));

        let config = config.unbounded();
        assert!(!config.buffer_full(usize::MAX));
    }
}
