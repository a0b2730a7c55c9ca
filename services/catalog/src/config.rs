use std::time::Duration;

/// Settings shared by the services, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub api_bind: String,
    pub max_connections: u32,
    pub cache_ttl: Duration,
}

#[derive(Debug, thiserror::Error)]
#[error("{0} env var missing")]
pub struct MissingVar(pub &'static str);

impl Config {
    pub fn from_env() -> Result<Self, MissingVar> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, MissingVar>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            db_url: lookup("DB_URL").ok_or(MissingVar("DB_URL"))?,
            api_bind: lookup("API_BIND").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            max_connections: lookup("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            cache_ttl: Duration::from_secs(
                lookup("CACHE_TTL_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60 * 15),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([("DB_URL", "postgres://localhost/catalog")]);
        let config = Config::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.api_bind, "127.0.0.1:8080");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.cache_ttl, Duration::from_secs(900));
    }

    #[test]
    fn test_missing_db_url() {
        let err = Config::from_lookup(|_| None).unwrap_err();
        assert_eq!(err.to_string(), "DB_URL env var missing");
    }

    #[test]
    fn test_bad_numbers_fall_back() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DB_URL", "postgres://x"),
            ("DB_MAX_CONNECTIONS", "lots"),
            ("CACHE_TTL_SECS", "30"),
        ]);
        let config = Config::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
    }
}
