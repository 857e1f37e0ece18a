use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "MOMENTS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedsConfig {
    /// Which feed backend to render: talks, memos, mastodon, or telegram.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub talks_endpoint: String,
    #[serde(default)]
    pub memos_endpoint: String,
    #[serde(default)]
    pub telegram_endpoint: String,
    #[serde(default)]
    pub mastodon_instance: String,
    #[serde(default)]
    pub mastodon_user_id: String,
    #[serde(default)]
    pub mastodon_token: String,
    #[serde(default)]
    pub mastodon_tag: String,
    #[serde(default = "default_shown_max")]
    pub shown_max: usize,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            user_agent: default_user_agent(),
            talks_endpoint: String::new(),
            memos_endpoint: String::new(),
            telegram_endpoint: String::new(),
            mastodon_instance: String::new(),
            mastodon_user_id: String::new(),
            mastodon_token: String::new(),
            mastodon_tag: String::new(),
            shown_max: default_shown_max(),
        }
    }
}

fn default_source() -> String {
    "talks".to_string()
}

fn default_user_agent() -> String {
    "moments/0.1 (+https://github.com/zsxcoder/moments)".to_string()
}

fn default_shown_max() -> usize {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: Option<PathBuf>,
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            ttl: default_cache_ttl(),
        }
    }
}

fn default_cache_path() -> Option<PathBuf> {
    crate::cache::default_path()
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinksConfig {
    #[serde(default = "default_allow")]
    pub allow: Vec<String>,
    #[serde(default = "default_safego_path")]
    pub safego_path: String,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            allow: default_allow(),
            safego_path: default_safego_path(),
        }
    }
}

fn default_allow() -> Vec<String> {
    vec![
        "blog.ljx.icu".into(),
        "localhost".into(),
        "127.0.0.1".into(),
        "b.zsxcoder.top".into(),
        "mcy.zsxcoder.top".into(),
    ]
}

fn default_safego_path() -> String {
    "/safego".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutConfig {
    #[serde(default = "default_container_width")]
    pub container_width: f64,
    #[serde(default = "default_card_width")]
    pub card_width: f64,
    #[serde(default = "default_card_margin")]
    pub card_margin: f64,
    #[serde(default = "default_ready_timeout", with = "humantime_serde")]
    pub ready_timeout: Duration,
    #[serde(default = "default_resize_debounce", with = "humantime_serde")]
    pub resize_debounce: Duration,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            container_width: default_container_width(),
            card_width: default_card_width(),
            card_margin: default_card_margin(),
            ready_timeout: default_ready_timeout(),
            resize_debounce: default_resize_debounce(),
        }
    }
}

fn default_container_width() -> f64 {
    780.0
}

fn default_card_width() -> f64 {
    360.0
}

fn default_card_margin() -> f64 {
    8.0
}

fn default_ready_timeout() -> Duration {
    Duration::from_millis(2500)
}

fn default_resize_debounce() -> Duration {
    Duration::from_millis(80)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

fn default_workers() -> usize {
    2
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix)?);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.feeds.source.is_empty() {
        base.feeds.source = other.feeds.source;
    }
    if !other.feeds.user_agent.is_empty() {
        base.feeds.user_agent = other.feeds.user_agent;
    }
    if !other.feeds.talks_endpoint.is_empty() {
        base.feeds.talks_endpoint = other.feeds.talks_endpoint;
    }
    if !other.feeds.memos_endpoint.is_empty() {
        base.feeds.memos_endpoint = other.feeds.memos_endpoint;
    }
    if !other.feeds.telegram_endpoint.is_empty() {
        base.feeds.telegram_endpoint = other.feeds.telegram_endpoint;
    }
    if !other.feeds.mastodon_instance.is_empty() {
        base.feeds.mastodon_instance = other.feeds.mastodon_instance;
    }
    if !other.feeds.mastodon_user_id.is_empty() {
        base.feeds.mastodon_user_id = other.feeds.mastodon_user_id;
    }
    if !other.feeds.mastodon_token.is_empty() {
        base.feeds.mastodon_token = other.feeds.mastodon_token;
    }
    if !other.feeds.mastodon_tag.is_empty() {
        base.feeds.mastodon_tag = other.feeds.mastodon_tag;
    }
    if other.feeds.shown_max != 0 {
        base.feeds.shown_max = other.feeds.shown_max;
    }

    if other.cache.path.is_some() {
        base.cache.path = other.cache.path;
    }
    base.cache.ttl = other.cache.ttl;

    if !other.links.allow.is_empty() {
        base.links.allow = other.links.allow;
    }
    if !other.links.safego_path.is_empty() {
        base.links.safego_path = other.links.safego_path;
    }

    if other.layout.container_width > 0.0 {
        base.layout.container_width = other.layout.container_width;
    }
    if other.layout.card_width > 0.0 {
        base.layout.card_width = other.layout.card_width;
    }
    if other.layout.card_margin >= 0.0 {
        base.layout.card_margin = other.layout.card_margin;
    }
    base.layout.ready_timeout = other.layout.ready_timeout;
    base.layout.resize_debounce = other.layout.resize_debounce;

    if other.media.workers != 0 {
        base.media.workers = other.media.workers;
    }
    base.media.probe_timeout = other.media.probe_timeout;

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return Ok(Config::default());
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "feeds.source" => cfg.feeds.source = value,
        "feeds.user_agent" => cfg.feeds.user_agent = value,
        "feeds.talks_endpoint" => cfg.feeds.talks_endpoint = value,
        "feeds.memos_endpoint" => cfg.feeds.memos_endpoint = value,
        "feeds.telegram_endpoint" => cfg.feeds.telegram_endpoint = value,
        "feeds.mastodon_instance" => cfg.feeds.mastodon_instance = value,
        "feeds.mastodon_user_id" => cfg.feeds.mastodon_user_id = value,
        "feeds.mastodon_token" => cfg.feeds.mastodon_token = value,
        "feeds.mastodon_tag" => cfg.feeds.mastodon_tag = value,
        "feeds.shown_max" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.feeds.shown_max = parsed;
            }
        }
        "cache.path" => cfg.cache.path = Some(PathBuf::from(value)),
        "cache.ttl" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.cache.ttl = duration;
            }
        }
        "links.allow" => {
            cfg.links.allow = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        "links.safego_path" => cfg.links.safego_path = value,
        "layout.container_width" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.layout.container_width = parsed;
            }
        }
        "layout.card_width" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.layout.card_width = parsed;
            }
        }
        "layout.card_margin" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.layout.card_margin = parsed;
            }
        }
        "layout.ready_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.layout.ready_timeout = duration;
            }
        }
        "layout.resize_debounce" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.layout.resize_debounce = duration;
            }
        }
        "media.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.media.workers = parsed;
            }
        }
        "media.probe_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.media.probe_timeout = duration;
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("moments").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(LoadOptions {
            env_prefix: Some("MOMENTS_TEST_NONE".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.feeds.source, "talks");
        assert_eq!(cfg.cache.ttl, Duration::from_secs(30 * 60));
        assert_eq!(cfg.layout.container_width, 780.0);
        assert!(cfg.links.allow.contains(&"blog.ljx.icu".to_string()));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "feeds:\n  source: mastodon\nlayout:\n  card_width: 300\ncache:\n  ttl: 5m\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("MOMENTS_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.feeds.source, "mastodon");
        assert_eq!(cfg.layout.card_width, 300.0);
        assert_eq!(cfg.cache.ttl, Duration::from_secs(300));
    }

    #[test]
    fn env_overrides() {
        env::set_var("MOMENTS_FEEDS__SOURCE", "telegram");
        env::set_var("MOMENTS_CACHE__TTL", "10m");
        let cfg = load(LoadOptions::default()).unwrap();
        assert_eq!(cfg.feeds.source, "telegram");
        assert_eq!(cfg.cache.ttl, Duration::from_secs(600));
        env::remove_var("MOMENTS_FEEDS__SOURCE");
        env::remove_var("MOMENTS_CACHE__TTL");
    }
}
