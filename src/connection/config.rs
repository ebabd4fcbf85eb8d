use crate::core::{DbError, Result};
use crate::facade::DEFAULT_STATEMENT_CACHE_CAPACITY;
use std::time::Duration;

const URL_SCHEME: &str = "occtx://";

/// Pool and session configuration
///
/// Built fluently or parsed from a connection URL.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Host label (the engine runs in-process; kept for URL round trips)
    pub host: String,

    /// Database name
    pub database: String,

    /// Maximum number of connections in pool
    pub max_connections: usize,

    /// Connections opened eagerly when the pool is created
    pub min_connections: usize,

    /// How long `acquire` waits for a free connection
    pub acquire_timeout: Duration,

    /// How long a statement waits for a row lock
    pub lock_timeout: Duration,

    /// Idle connections older than this are closed instead of reused
    pub idle_timeout: Option<Duration>,

    /// Connections older than this are closed instead of reused
    pub max_lifetime: Option<Duration>,

    /// Parsed statements kept per database
    pub statement_cache_capacity: usize,
}

impl ConnectionConfig {
    pub fn new(database: &str) -> Self {
        Self {
            host: "localhost".to_string(),
            database: database.to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(2),
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
        }
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Parse from connection string
    ///
    /// Format: `occtx://host/database?max_connections=4&acquire_timeout_ms=500`
    ///
    /// Recognised query keys: `max_connections`, `min_connections`,
    /// `acquire_timeout_ms`, `lock_timeout_ms`, `idle_timeout_ms`,
    /// `max_lifetime_ms`, `statement_cache`.
    ///
    /// # Examples
    ///
    /// ```
    /// use occtx::ConnectionConfig;
    ///
    /// let config = ConnectionConfig::from_url("occtx://localhost/hotel?max_connections=4").unwrap();
    /// assert_eq!(config.database, "hotel");
    /// assert_eq!(config.max_connections, 4);
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| DbError::InvalidConfig(format!("URL must start with '{}'", URL_SCHEME)))?;

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let (host, database) = location
            .split_once('/')
            .filter(|(host, db)| !host.is_empty() && !db.is_empty())
            .ok_or_else(|| DbError::InvalidConfig("Invalid host/database format".to_string()))?;

        let mut config = Self::new(database).host(host);

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| DbError::InvalidConfig(format!("Malformed parameter '{}'", pair)))?;
            let number: u64 = value
                .parse()
                .map_err(|_| DbError::InvalidConfig(format!("Parameter '{}' must be a number", key)))?;

            match key {
                "max_connections" => config.max_connections = number as usize,
                "min_connections" => config.min_connections = number as usize,
                "acquire_timeout_ms" => config.acquire_timeout = Duration::from_millis(number),
                "lock_timeout_ms" => config.lock_timeout = Duration::from_millis(number),
                "idle_timeout_ms" => config.idle_timeout = Some(Duration::from_millis(number)),
                "max_lifetime_ms" => config.max_lifetime = Some(Duration::from_millis(number)),
                "statement_cache" => config.statement_cache_capacity = number as usize,
                other => {
                    return Err(DbError::InvalidConfig(format!("Unknown parameter '{}'", other)));
                }
            }
        }

        Ok(config)
    }

    /// Convert to connection string
    pub fn to_url(&self) -> String {
        format!(
            "{}{}/{}?max_connections={}&min_connections={}&acquire_timeout_ms={}&lock_timeout_ms={}",
            URL_SCHEME,
            self.host,
            self.database,
            self.max_connections,
            self.min_connections,
            self.acquire_timeout.as_millis(),
            self.lock_timeout.as_millis()
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(DbError::InvalidConfig("Database name cannot be empty".to_string()));
        }

        if self.max_connections == 0 {
            return Err(DbError::InvalidConfig("max_connections must be > 0".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(DbError::InvalidConfig(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.acquire_timeout.is_zero() {
            return Err(DbError::InvalidConfig("acquire_timeout must be > 0".to_string()));
        }

        if self.statement_cache_capacity == 0 {
            return Err(DbError::InvalidConfig("statement_cache_capacity must be > 0".to_string()));
        }

        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("occtx")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.database, "occtx");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.max_connections, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ConnectionConfig::new("hotel")
            .max_connections(3)
            .min_connections(0)
            .acquire_timeout(Duration::from_millis(250))
            .lock_timeout(Duration::from_millis(100));

        assert_eq!(config.database, "hotel");
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.min_connections, 0);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.lock_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_from_url() {
        let config = ConnectionConfig::from_url(
            "occtx://db.example.com/hotel?max_connections=4&acquire_timeout_ms=500&lock_timeout_ms=50",
        )
        .unwrap();

        assert_eq!(config.host, "db.example.com");
        assert_eq!(config.database, "hotel");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.acquire_timeout, Duration::from_millis(500));
        assert_eq!(config.lock_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_from_url_without_query() {
        let config = ConnectionConfig::from_url("occtx://localhost/testdb").unwrap();
        assert_eq!(config.database, "testdb");
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn test_url_round_trip() {
        let config = ConnectionConfig::new("hotel").max_connections(2);
        let parsed = ConnectionConfig::from_url(&config.to_url()).unwrap();
        assert_eq!(parsed.max_connections, 2);
        assert_eq!(parsed.database, "hotel");
    }

    #[test]
    fn test_invalid_url() {
        assert!(ConnectionConfig::from_url("postgres://localhost/db").is_err());
        assert!(ConnectionConfig::from_url("occtx://nodb").is_err());
        assert!(ConnectionConfig::from_url("occtx://h/db?max_connections=lots").is_err());
        assert!(ConnectionConfig::from_url("occtx://h/db?colour=blue").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ConnectionConfig::new("db").max_connections(0).validate().is_err());
        assert!(
            ConnectionConfig::new("db")
                .min_connections(10)
                .max_connections(5)
                .validate()
                .is_err()
        );
        assert!(ConnectionConfig::new("").validate().is_err());
        assert!(
            ConnectionConfig::new("db")
                .acquire_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
