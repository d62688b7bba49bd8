//! Store and connection configuration.

use serde::Deserialize;

/// Behavioural switches of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whether `add` rejects an entity whose revision differs from the
    /// cached instance with the same full id.
    pub check_revisions: bool,

    /// Whether `commit` registers unsaved entities reachable through
    /// pending references before planning.
    pub cascade_transient_references: bool,

    /// Whether `commit` refuses to insert an entity that already carries a
    /// revision token.
    pub strict_new_revisions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            check_revisions: true,
            cascade_transient_references: true,
            strict_new_revisions: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether revisions are checked on `add`.
    #[must_use]
    pub const fn check_revisions(mut self, value: bool) -> Self {
        self.check_revisions = value;
        self
    }

    /// Sets whether unsaved referenced entities are registered on commit.
    #[must_use]
    pub const fn cascade_transient_references(mut self, value: bool) -> Self {
        self.cascade_transient_references = value;
        self
    }

    /// Sets whether new entities with a revision are rejected.
    #[must_use]
    pub const fn strict_new_revisions(mut self, value: bool) -> Self {
        self.strict_new_revisions = value;
        self
    }
}

/// Connection settings handed to a database driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Registered driver name.
    pub driver: String,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub db_name: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: "memory".to_string(),
            host: "localhost".to_string(),
            port: 8529,
            db_name: "_system".to_string(),
            user: "root".to_string(),
            password: String::new(),
        }
    }
}

impl ConnectionConfig {
    /// Creates connection settings for `driver` with defaults elsewhere.
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Self::default()
        }
    }

    /// The `http://host:port` endpoint of the server.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}
