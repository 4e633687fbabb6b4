use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "LEDIT";
pub const FALLBACK_ROUTE: &str = "r/all";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub bookmarks: Vec<Bookmark>,
}

impl Config {
    /// The route to open when none is given: the default bookmark, else `r/all`.
    pub fn default_route(&self) -> String {
        self.bookmarks
            .iter()
            .find(|bookmark| bookmark.default)
            .map(|bookmark| bookmark.route.clone())
            .unwrap_or_else(|| FALLBACK_ROUTE.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            retries: default_retries(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

fn default_user_agent() -> String {
    format!("ledit/{} (+https://github.com/badlogic/ledit)", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_retries() -> u32 {
    2
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(500)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedsConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub mastodon_only_roots: bool,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            mastodon_only_roots: false,
        }
    }
}

fn default_page_size() -> usize {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
        }
    }
}

fn default_theme() -> String {
    "default".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bookmark {
    pub label: String,
    pub route: String,
    #[serde(default)]
    pub default: bool,
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
    cfg = merge_env(cfg, prefix);

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
    if !other.http.user_agent.is_empty() {
        base.http.user_agent = other.http.user_agent;
    }
    if !other.http.timeout.is_zero() {
        base.http.timeout = other.http.timeout;
    }
    base.http.retries = other.http.retries;
    base.http.retry_backoff = other.http.retry_backoff;

    if other.feeds.page_size != 0 {
        base.feeds.page_size = other.feeds.page_size;
    }
    base.feeds.mastodon_only_roots = other.feeds.mastodon_only_roots;

    if !other.ui.theme.is_empty() {
        base.ui.theme = other.ui.theme;
    }

    if !other.bookmarks.is_empty() {
        base.bookmarks = other.bookmarks;
    }

    base
}

/// Applies `<PREFIX>_SECTION__KEY` variables on top of `cfg`.
fn merge_env(mut cfg: Config, prefix: &str) -> Config {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    cfg
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "http.user_agent" => cfg.http.user_agent = value,
        "http.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.http.timeout = duration;
            }
        }
        "http.retries" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.http.retries = parsed;
            }
        }
        "http.retry_backoff" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.http.retry_backoff = duration;
            }
        }
        "feeds.page_size" => {
            if let Ok(parsed) = value.parse::<usize>() {
                if parsed > 0 {
                    cfg.feeds.page_size = parsed;
                }
            }
        }
        "feeds.mastodon_only_roots" => {
            cfg.feeds.mastodon_only_roots =
                matches!(value.as_str(), "1" | "true" | "TRUE" | "True");
        }
        "ui.theme" => cfg.ui.theme = value,
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ledit").join("config.yaml"))
}

/// Adds or replaces the bookmark for `route`. A new default clears the old one.
pub fn save_bookmark(path: Option<PathBuf>, bookmark: Bookmark) -> Result<PathBuf> {
    anyhow::ensure!(
        !bookmark.route.trim().is_empty(),
        "config: bookmark route is required"
    );

    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };

    if bookmark.default {
        for existing in cfg.bookmarks.iter_mut() {
            existing.default = false;
        }
    }
    match cfg
        .bookmarks
        .iter_mut()
        .find(|existing| existing.route == bookmark.route)
    {
        Some(existing) => *existing = bookmark,
        None => cfg.bookmarks.push(bookmark),
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}
