use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{info, warn};

use crate::engine::{EngineOptions, IndexSet};

/// Process configuration, read once from `SALOND_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    /// Seconds a pending appointment holds its slot; 0 disables expiry.
    pub pending_ttl_secs: u64,
    pub indexes: IndexSet,
}

impl Config {
    pub fn load() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Invalid values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let indexes = match lookup("SALOND_INDEXES") {
            Some(list) => {
                let (set, unknown) = IndexSet::parse(&list);
                for name in unknown {
                    warn!("SALOND_INDEXES: ignoring unknown index {name:?}");
                }
                set
            }
            None => IndexSet::default(),
        };
        Self {
            bind: lookup("SALOND_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: try_load(&lookup, "SALOND_PORT", 8080),
            data_dir: lookup("SALOND_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            metrics_port: lookup("SALOND_METRICS_PORT").and_then(|v| parse_or_warn("SALOND_METRICS_PORT", &v)),
            compact_threshold: try_load(&lookup, "SALOND_COMPACT_THRESHOLD", 1000),
            pending_ttl_secs: try_load(&lookup, "SALOND_PENDING_TTL_SECS", 0),
            indexes,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            indexes: self.indexes,
            pending_ttl_ms: i64::try_from(self.pending_ttl_secs)
                .ok()
                .filter(|&secs| secs > 0)
                .and_then(|secs| secs.checked_mul(1000)),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("salond.wal")
    }
}

fn try_load<T: FromStr + Display>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => parse_or_warn(key, &raw).unwrap_or(default),
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

fn parse_or_warn<T: FromStr>(key: &str, raw: &str) -> Option<T>
where
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| warn!("Invalid {key} value {raw:?}: {e}, using default"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.bind, "0.0.0.0");
        assert_eq!(c.port, 8080);
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.indexes, IndexSet::default());
        assert_eq!(c.engine_options().pending_ttl_ms, None);
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("SALOND_PORT", "9000"),
            ("SALOND_METRICS_PORT", "9100"),
            ("SALOND_DATA_DIR", "/var/lib/salond"),
            ("SALOND_PENDING_TTL_SECS", "1800"),
            ("SALOND_INDEXES", "salon_date"),
        ]);
        assert_eq!(c.port, 9000);
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/salond/salond.wal"));
        assert_eq!(c.engine_options().pending_ttl_ms, Some(1_800_000));
        assert!(!c.indexes.salon_date_status);
        assert!(c.indexes.salon_date);
    }

    #[test]
    fn invalid_values_fall_back() {
        let c = config(&[
            ("SALOND_PORT", "eighty"),
            ("SALOND_METRICS_PORT", "99999"),
            ("SALOND_COMPACT_THRESHOLD", "-5"),
        ]);
        assert_eq!(c.port, 8080);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.compact_threshold, 1000);
    }

    #[test]
    fn huge_pending_ttl_disables_expiry_instead_of_overflowing() {
        let c = config(&[("SALOND_PENDING_TTL_SECS", &u64::MAX.to_string())]);
        assert_eq!(c.engine_options().pending_ttl_ms, None);
        let c = config(&[("SALOND_PENDING_TTL_SECS", &(i64::MAX as u64).to_string())]);
        assert_eq!(c.engine_options().pending_ttl_ms, None);
    }

    #[test]
    fn empty_index_list_disables_indexes() {
        assert_eq!(config(&[("SALOND_INDEXES", "")]).indexes, IndexSet::none());
    }
}
