use anyhow::{Context, Result};
use std::time::Duration;

// ATAC Rome open data feeds
const VEHICLE_POSITIONS_URL: &str = "https://dati.comune.roma.it/catalog/dataset/a7dadb4a-66ae-4eff-8ded-a102064702ba/resource/d2b123d6-8d2d-4dee-9792-f535df3dc166/download/rome_vehicle_positions.pb";
const TRIP_UPDATES_URL: &str = "https://dati.comune.roma.it/catalog/dataset/a7dadb4a-66ae-4eff-8ded-a102064702ba/resource/bf7577b5-ed26-4f50-a590-38b8ed4d2827/download/rome_trip_updates.pb";
const STATIC_BASE: &str = "./data";

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub port: u16,
    /// Directory or http(s) base holding the static schedule files.
    pub static_base: String,
    pub vehicle_positions_url: String,
    pub trip_updates_url: String,
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = var("PORT", "3000")
            .parse()
            .context("Invalid PORT env variable")?;
        let refresh_secs: u64 = var("REFRESH_INTERVAL_SECS", "30")
            .parse()
            .context("Invalid REFRESH_INTERVAL_SECS env variable")?;
        let timeout_secs: u64 = var("FETCH_TIMEOUT_SECS", "20")
            .parse()
            .context("Invalid FETCH_TIMEOUT_SECS env variable")?;
        if refresh_secs == 0 {
            anyhow::bail!("REFRESH_INTERVAL_SECS must be positive");
        }

        Ok(Self {
            port,
            static_base: var("STATIC_BASE", STATIC_BASE),
            vehicle_positions_url: var("VEHICLE_POSITIONS_URL", VEHICLE_POSITIONS_URL),
            trip_updates_url: var("TRIP_UPDATES_URL", TRIP_UPDATES_URL),
            refresh_interval: Duration::from_secs(refresh_secs),
            fetch_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.static_base, "./data");
        assert_eq!(config.refresh_interval, Duration::from_secs(30));
        assert!(config.vehicle_positions_url.ends_with("rome_vehicle_positions.pb"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("STATIC_BASE", "https://example.org/gtfs"),
            ("REFRESH_INTERVAL_SECS", "15"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.static_base, "https://example.org/gtfs");
        assert_eq!(config.refresh_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config_from(&[("PORT", "http")]).is_err());
        assert!(config_from(&[("REFRESH_INTERVAL_SECS", "0")]).is_err());
    }
}
