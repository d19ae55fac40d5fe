use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read once from `BARBERQ_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "barberq".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed(&lookup, "BARBERQ_PORT").unwrap_or(defaults.port),
            bind: lookup("BARBERQ_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("BARBERQ_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("BARBERQ_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "BARBERQ_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "BARBERQ_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "BARBERQ_METRICS_PORT"),
            tls_cert: lookup("BARBERQ_TLS_CERT"),
            tls_key: lookup("BARBERQ_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup_from(&[]));
        assert_eq!(config.port, 5433);
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert!(config.metrics_port.is_none());
        assert!(config.tls_cert.is_none());
    }

    #[test]
    fn overrides_from_lookup() {
        let config = Config::from_lookup(lookup_from(&[
            ("BARBERQ_PORT", "6000"),
            ("BARBERQ_BIND", "127.0.0.1"),
            ("BARBERQ_DATA_DIR", "/var/lib/barberq"),
            ("BARBERQ_PASSWORD", "s3cret"),
            ("BARBERQ_METRICS_PORT", "9100"),
        ]));
        assert_eq!(config.listen_addr(), "127.0.0.1:6000");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/barberq"));
        assert_eq!(config.password, "s3cret");
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("BARBERQ_PORT", "not-a-port"),
            ("BARBERQ_MAX_CONNECTIONS", "-3"),
        ]));
        assert_eq!(config.port, 5433);
        assert_eq!(config.max_connections, 256);
    }
}
