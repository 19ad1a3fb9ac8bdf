//! Database configuration.

/// Default database file name.
pub const DEFAULT_DB_NAME: &str = "veil.db";

/// Default operation log file name.
pub const DEFAULT_LOG_NAME: &str = "veil.log";

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum degree `t` of the B-tree. Every non-root node holds between
    /// `t-1` and `2t-1` keys. Must be at least 2.
    pub min_degree: usize,

    /// Capacity of the node cache, in nodes. Must be non-zero.
    pub cache_capacity: usize,

    /// File name of the node store inside the database directory.
    pub db_name: String,

    /// File name of the operation log inside the database directory.
    pub log_name: String,

    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Maximum accepted value size in bytes.
    ///
    /// Oversized inserts and updates are rejected before any side effect.
    /// A framing layer in front of the store should apply the same cap to
    /// inbound payloads before they reach the engine.
    pub max_value_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_degree: 2,
            cache_capacity: 1024,
            db_name: DEFAULT_DB_NAME.to_string(),
            log_name: DEFAULT_LOG_NAME.to_string(),
            create_if_missing: true,
            max_value_size: 10 * 1024 * 1024, // 10 MiB
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the B-tree minimum degree.
    #[must_use]
    pub fn min_degree(mut self, t: usize) -> Self {
        self.min_degree = t;
        self
    }

    /// Sets the node cache capacity.
    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the database file name.
    #[must_use]
    pub fn db_name(mut self, name: impl Into<String>) -> Self {
        self.db_name = name.into();
        self
    }

    /// Sets the operation log file name.
    #[must_use]
    pub fn log_name(mut self, name: impl Into<String>) -> Self {
        self.log_name = name.into();
        self
    }

    /// Sets whether to create the database directory if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the maximum accepted value size.
    #[must_use]
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.max_value_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.min_degree, 2);
        assert_eq!(config.cache_capacity, 1024);
        assert_eq!(config.db_name, "veil.db");
        assert_eq!(config.log_name, "veil.log");
        assert!(config.create_if_missing);
        assert_eq!(config.max_value_size, 10 * 1024 * 1024);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .min_degree(4)
            .cache_capacity(16)
            .db_name("custom.db")
            .max_value_size(1024);

        assert_eq!(config.min_degree, 4);
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.db_name, "custom.db");
        assert_eq!(config.max_value_size, 1024);
    }
}
