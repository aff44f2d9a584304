// src/config/mod.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs};

use crate::changes::DEFAULT_INDEX_CAP;
use crate::providers::{cubecraft, hive};

pub const ENV_CONFIG_PATH: &str = "ROADMAP_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/roadmap.toml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HiveConfig {
    pub base_url: String,
    /// Seconds; `<= 0` disables caching.
    pub cache_ttl_secs: i64,
    pub max_concurrency: usize,
    pub http_timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            base_url: hive::DEFAULT_BASE_URL.to_string(),
            cache_ttl_secs: 30,
            max_concurrency: 4,
            http_timeout_secs: 12,
            max_body_bytes: hive::DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CubecraftConfig {
    pub endpoint: String,
    pub cache_ttl_secs: i64,
    pub http_timeout_secs: u64,
    pub max_body_bytes: usize,
    /// Sent verbatim as the `Cookie` header.
    pub cookie: Option<String>,
}

impl Default for CubecraftConfig {
    fn default() -> Self {
        Self {
            endpoint: cubecraft::DEFAULT_ENDPOINT.to_string(),
            cache_ttl_secs: 120,
            http_timeout_secs: 30,
            max_body_bytes: cubecraft::DEFAULT_MAX_BODY_BYTES,
            cookie: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub request_timeout_secs: u64,
    /// `0` leaves the status index unbounded.
    pub change_index_cap: usize,
    pub hive: HiveConfig,
    pub cubecraft: CubecraftConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            change_index_cap: DEFAULT_INDEX_CAP,
            hive: HiveConfig::default(),
            cubecraft: CubecraftConfig::default(),
        }
    }
}

/// Negative TTLs mean "never cache".
pub fn ttl(secs: i64) -> Duration {
    Duration::from_secs(secs.max(0) as u64)
}

impl AppConfig {
    /// Resolve the config file, then apply environment overrides:
    /// 1) $ROADMAP_CONFIG_PATH (must exist)
    /// 2) config/roadmap.toml
    /// 3) built-in defaults
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var(ENV_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
                }
                Self::from_path(&pb)?
            }
            Err(_) => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_path(&default)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env(|key| env::var(key).ok());
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("HIVE_BASE_URL").filter(|s| !s.trim().is_empty()) {
            self.hive.base_url = url.trim().to_string();
        }
        override_num(&lookup, "HIVE_CACHE_TTL_SECS", &mut self.hive.cache_ttl_secs);
        override_num(&lookup, "HIVE_MAX_CONCURRENCY", &mut self.hive.max_concurrency);
        override_num(&lookup, "HIVE_HTTP_TIMEOUT_SECS", &mut self.hive.http_timeout_secs);
        override_num(&lookup, "MAX_BODY_BYTES", &mut self.hive.max_body_bytes);

        override_num(&lookup, "CUBECRAFT_CACHE_TTL_SECS", &mut self.cubecraft.cache_ttl_secs);
        override_num(&lookup, "CUBECRAFT_HTTP_TIMEOUT_SECS", &mut self.cubecraft.http_timeout_secs);
        override_num(&lookup, "CUBECRAFT_MAX_BODY_BYTES", &mut self.cubecraft.max_body_bytes);
        if let Some(cookie) = lookup("NOTION_COOKIE").filter(|s| !s.trim().is_empty()) {
            self.cubecraft.cookie = Some(cookie);
        }

        override_num(&lookup, "REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        override_num(&lookup, "CHANGE_INDEX_CAP", &mut self.change_index_cap);

        if self.hive.max_concurrency == 0 {
            self.hive.max_concurrency = 1;
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = AppConfig::default().request_timeout_secs;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn override_num<T, F>(lookup: &F, key: &str, slot: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring invalid numeric override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.hive.cache_ttl_secs, 30);
        assert_eq!(cfg.hive.max_concurrency, 4);
        assert_eq!(cfg.cubecraft.cache_ttl_secs, 120);
        assert_eq!(cfg.cubecraft.max_body_bytes, 32 << 20);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.change_index_cap, 10_000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
            request_timeout_secs = 10
            [hive]
            max_concurrency = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.request_timeout_secs, 10);
        assert_eq!(cfg.hive.max_concurrency, 2);
        assert_eq!(cfg.hive.base_url, hive::DEFAULT_BASE_URL);
        assert_eq!(cfg.cubecraft, CubecraftConfig::default());
    }

    #[test]
    fn env_overrides_and_bad_numbers() {
        let mut cfg = AppConfig::default();
        cfg.apply_env(lookup(&[
            ("HIVE_CACHE_TTL_SECS", "-1"),
            ("HIVE_MAX_CONCURRENCY", "lots"),
            ("CUBECRAFT_CACHE_TTL_SECS", " 5 "),
            ("NOTION_COOKIE", "token_v2=abc"),
            ("CHANGE_INDEX_CAP", "0"),
        ]));
        assert_eq!(cfg.hive.cache_ttl_secs, -1);
        assert_eq!(ttl(cfg.hive.cache_ttl_secs), Duration::ZERO);
        assert_eq!(cfg.hive.max_concurrency, 4);
        assert_eq!(cfg.cubecraft.cache_ttl_secs, 5);
        assert_eq!(cfg.cubecraft.cookie.as_deref(), Some("token_v2=abc"));
        assert_eq!(cfg.change_index_cap, 0);
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let mut cfg = AppConfig::default();
        cfg.apply_env(lookup(&[("HIVE_MAX_CONCURRENCY", "0")]));
        assert_eq!(cfg.hive.max_concurrency, 1);
    }

    #[serial_test::serial]
    #[test]
    fn load_uses_env_path_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);

        // No file anywhere → defaults.
        assert_eq!(AppConfig::load().unwrap().request_timeout_secs, 30);

        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(tmp.path().join(DEFAULT_CONFIG_PATH), "request_timeout_secs = 7\n").unwrap();
        assert_eq!(AppConfig::load().unwrap().request_timeout_secs, 7);

        let explicit = tmp.path().join("other.toml");
        fs::write(&explicit, "request_timeout_secs = 9\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, explicit.display().to_string());
        assert_eq!(AppConfig::load().unwrap().request_timeout_secs, 9);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(AppConfig::load().is_err());

        env::remove_var(ENV_CONFIG_PATH);
        env::set_current_dir(&old).unwrap();
    }
}
