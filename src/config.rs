// src/config.rs

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use chrono::FixedOffset;

/// Which store implementation backs the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres { url: String, max_connections: u32 },
    Memory,
}

/// Process settings read from the environment at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    pub store: StoreBackend,
    pub hotel_offset: FixedOffset,
    pub reconcile_interval: Duration,
    pub notify_webhook_url: Option<String>,
    pub broadcast_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store = match (var("STORE_BACKEND"), var("DATABASE_URL")) {
            (Some(b), _) if b.eq_ignore_ascii_case("memory") => StoreBackend::Memory,
            (Some(b), _) if !b.eq_ignore_ascii_case("postgres") => {
                bail!("STORE_BACKEND={b:?}: expected \"postgres\" or \"memory\"")
            }
            (_, Some(url)) => StoreBackend::Postgres {
                url,
                max_connections: parse_or(var("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS", 10)?,
            },
            (_, None) => bail!("DATABASE_URL must be set unless STORE_BACKEND=memory"),
        };

        let hotel_offset = match var("HOTEL_UTC_OFFSET") {
            Some(raw) => parse_offset(&raw).context("HOTEL_UTC_OFFSET")?,
            None => FixedOffset::east_opt(0).ok_or_else(|| anyhow!("zero offset out of range"))?,
        };

        let interval_secs: u64 = parse_or(var("RECONCILE_INTERVAL_SECS"), "RECONCILE_INTERVAL_SECS", 60)?;
        if interval_secs == 0 {
            bail!("RECONCILE_INTERVAL_SECS must be greater than zero");
        }
        let broadcast_capacity: usize = parse_or(var("BROADCAST_CAPACITY"), "BROADCAST_CAPACITY", 256)?;
        if broadcast_capacity == 0 {
            bail!("BROADCAST_CAPACITY must be greater than zero");
        }

        Ok(Self {
            port: parse_or(var("PORT"), "PORT", 8080)?,
            store,
            hotel_offset,
            reconcile_interval: Duration::from_secs(interval_secs),
            notify_webhook_url: var("NOTIFY_WEBHOOK_URL"),
            broadcast_capacity,
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(v) => v.parse().map_err(|e| anyhow!("{key}={v:?}: {e}")),
        None => Ok(default),
    }
}

/// Accepts `+07:00`, `-0330` or `Z`.
pub fn parse_offset(raw: &str) -> anyhow::Result<FixedOffset> {
    if raw.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(|| anyhow!("zero offset out of range"));
    }
    raw.parse::<FixedOffset>()
        .map_err(|e| anyhow!("offset {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_memory_store_is_chosen() {
        let cfg = load(&[("STORE_BACKEND", "memory")]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.store, StoreBackend::Memory);
        assert_eq!(cfg.hotel_offset.local_minus_utc(), 0);
        assert_eq!(cfg.reconcile_interval, Duration::from_secs(60));
        assert_eq!(cfg.broadcast_capacity, 256);
        assert!(cfg.notify_webhook_url.is_none());
    }

    #[test]
    fn database_url_selects_postgres_unless_memory_is_forced() {
        let cfg = load(&[("DATABASE_URL", "postgres://localhost/hotel"), ("DB_MAX_CONNECTIONS", "4")]).unwrap();
        assert_eq!(
            cfg.store,
            StoreBackend::Postgres { url: "postgres://localhost/hotel".into(), max_connections: 4 }
        );

        let cfg = load(&[("DATABASE_URL", "postgres://localhost/hotel"), ("STORE_BACKEND", "memory")]).unwrap();
        assert_eq!(cfg.store, StoreBackend::Memory);
    }

    #[test]
    fn missing_database_url_fails_unless_memory_is_explicit() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
        assert!(load(&[("STORE_BACKEND", "postgres")]).is_err());
        assert!(load(&[("STORE_BACKEND", "sqlite"), ("DATABASE_URL", "postgres://x")]).is_err());
    }

    #[test]
    fn offsets_parse_in_common_forms() {
        assert_eq!(parse_offset("+07:00").unwrap().local_minus_utc(), 7 * 3600);
        assert_eq!(parse_offset("-0330").unwrap().local_minus_utc(), -(3 * 3600 + 1800));
        assert_eq!(parse_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_offset("07:00").is_err());
        assert!(parse_offset("+07:75").is_err());
        assert!(parse_offset("+30:00").is_err());
    }

    #[test]
    fn oversized_hours_are_rejected_not_wrapped() {
        assert!(parse_offset("+1193046").is_err());
        assert!(parse_offset("-99999999:00").is_err());
        assert!(load(&[("STORE_BACKEND", "memory"), ("HOTEL_UTC_OFFSET", "+1193046")]).is_err());
    }

    #[test]
    fn malformed_values_fail_startup() {
        let mem = ("STORE_BACKEND", "memory");
        assert!(load(&[mem, ("PORT", "eighty")]).is_err());
        assert!(load(&[mem, ("RECONCILE_INTERVAL_SECS", "0")]).is_err());
        assert!(load(&[mem, ("HOTEL_UTC_OFFSET", "Asia/Bangkok")]).is_err());
    }
}
