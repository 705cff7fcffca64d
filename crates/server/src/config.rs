// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The store module still reads its own pool tuning vars;
// this covers the core server settings.

use std::net::SocketAddr;

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string. When unset the server keeps
    /// connection records in memory.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `tally_server=debug`).
    pub log_filter: String,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `TALLY_SERVER_HOST` | `0.0.0.0` |
    /// | `TALLY_SERVER_PORT` | `8080` |
    /// | `TALLY_SERVER_DATABASE_URL` | *(none — in-memory store)* |
    /// | `TALLY_SERVER_CORS_ORIGINS` | *(none — cors.rs allows any origin)* |
    /// | `TALLY_SERVER_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("TALLY_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("TALLY_SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let database_url = env("TALLY_SERVER_DATABASE_URL").ok();
        let cors_origins = env("TALLY_SERVER_CORS_ORIGINS").ok();

        let log_filter = env("TALLY_SERVER_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, database_url, cors_origins, log_filter }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = ServerConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert!(cfg.database_url.is_none());
        assert!(cfg.cors_origins.is_none());
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("TALLY_SERVER_HOST", "127.0.0.1");
        m.insert("TALLY_SERVER_PORT", "3000");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn database_url_from_env() {
        let mut m = HashMap::new();
        m.insert("TALLY_SERVER_DATABASE_URL", "postgres://u:p@host/tally");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://u:p@host/tally"));
    }

    #[test]
    fn cors_origins_from_env() {
        let mut m = HashMap::new();
        m.insert("TALLY_SERVER_CORS_ORIGINS", "https://board.example.com");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.cors_origins.as_deref(), Some("https://board.example.com"));
    }

    #[test]
    fn log_filter_override() {
        let mut m = HashMap::new();
        m.insert("TALLY_SERVER_LOG_FILTER", "debug,tower_http=trace");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.log_filter, "debug,tower_http=trace");
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut m = HashMap::new();
        m.insert("TALLY_SERVER_PORT", "not_a_number");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 8080);
    }
}
