use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::MAX_IMAGE_BYTES;

const DEFAULT_ENV_PREFIX: &str = "MED_GALLERY";

pub const DEFAULT_FALLBACK_IMAGE_URL: &str =
    "https://images.unsplash.com/photo-1576091160399-112ba8d25d1f?w=600&h=400&fit=crop";
pub const DEFAULT_AUTHOR_AVATAR_URL: &str =
    "https://images.unsplash.com/photo-1472099645785-5658abf4ff4e?w=150&h=150&fit=crop&crop=face";
pub const DEFAULT_COMMENT_AVATAR_URL: &str =
    "https://images.unsplash.com/photo-1472099645785-5658abf4ff4e?w=50&h=50&fit=crop&crop=face";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub gallery: GalleryConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub blob_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GalleryConfig {
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_fallback_image_url")]
    pub fallback_image_url: String,
    #[serde(default = "default_author_avatar_url")]
    pub author_avatar_url: String,
    #[serde(default = "default_comment_avatar_url")]
    pub comment_avatar_url: String,
    #[serde(default = "default_affiliation")]
    pub default_affiliation: String,
    #[serde(default = "default_upload_prefix")]
    pub upload_prefix: String,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            collection: default_collection(),
            fallback_image_url: default_fallback_image_url(),
            author_avatar_url: default_author_avatar_url(),
            comment_avatar_url: default_comment_avatar_url(),
            default_affiliation: default_affiliation(),
            upload_prefix: default_upload_prefix(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_origin() -> String {
    "http://localhost:5173".into()
}

fn default_collection() -> String {
    "posts".into()
}

fn default_fallback_image_url() -> String {
    DEFAULT_FALLBACK_IMAGE_URL.into()
}

fn default_author_avatar_url() -> String {
    DEFAULT_AUTHOR_AVATAR_URL.into()
}

fn default_comment_avatar_url() -> String {
    DEFAULT_COMMENT_AVATAR_URL.into()
}

fn default_affiliation() -> String {
    "SMAK Medical College".into()
}

fn default_upload_prefix() -> String {
    "medical-posts".into()
}

fn default_max_image_bytes() -> u64 {
    MAX_IMAGE_BYTES
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfig {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_comment_avatar_url")]
    pub avatar_url: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            display_name: default_display_name(),
            avatar_url: default_comment_avatar_url(),
        }
    }
}

fn default_user_id() -> String {
    "current-user".into()
}

fn default_display_name() -> String {
    "You".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_tick_rate", with = "humantime_serde")]
    pub tick_rate: Duration,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            tick_rate: default_tick_rate(),
        }
    }
}

fn default_theme() -> String {
    "dark".into()
}

fn default_tick_rate() -> Duration {
    Duration::from_millis(100)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
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
    apply_env(&mut cfg, prefix);

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
    base.backend.kind = other.backend.kind;
    if other.backend.database_path.is_some() {
        base.backend.database_path = other.backend.database_path;
    }
    if other.backend.blob_dir.is_some() {
        base.backend.blob_dir = other.backend.blob_dir;
    }

    let gallery = other.gallery;
    if !gallery.origin.is_empty() {
        base.gallery.origin = gallery.origin;
    }
    if !gallery.collection.is_empty() {
        base.gallery.collection = gallery.collection;
    }
    if !gallery.fallback_image_url.is_empty() {
        base.gallery.fallback_image_url = gallery.fallback_image_url;
    }
    if !gallery.author_avatar_url.is_empty() {
        base.gallery.author_avatar_url = gallery.author_avatar_url;
    }
    if !gallery.comment_avatar_url.is_empty() {
        base.gallery.comment_avatar_url = gallery.comment_avatar_url;
    }
    if !gallery.default_affiliation.is_empty() {
        base.gallery.default_affiliation = gallery.default_affiliation;
    }
    if !gallery.upload_prefix.is_empty() {
        base.gallery.upload_prefix = gallery.upload_prefix;
    }
    if gallery.max_image_bytes != 0 {
        base.gallery.max_image_bytes = gallery.max_image_bytes;
    }

    if !other.identity.user_id.is_empty() {
        base.identity.user_id = other.identity.user_id;
    }
    if !other.identity.display_name.is_empty() {
        base.identity.display_name = other.identity.display_name;
    }
    if !other.identity.avatar_url.is_empty() {
        base.identity.avatar_url = other.identity.avatar_url;
    }

    if !other.ui.theme.is_empty() {
        base.ui.theme = other.ui.theme;
    }
    if !other.ui.tick_rate.is_zero() {
        base.ui.tick_rate = other.ui.tick_rate;
    }

    if !other.log.level.is_empty() {
        base.log.level = other.log.level;
    }
    if other.log.file.is_some() {
        base.log.file = other.log.file;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "backend.kind" => match value.to_ascii_lowercase().as_str() {
            "memory" => cfg.backend.kind = BackendKind::Memory,
            "sqlite" => cfg.backend.kind = BackendKind::Sqlite,
            _ => {}
        },
        "backend.database_path" => cfg.backend.database_path = Some(PathBuf::from(value)),
        "backend.blob_dir" => cfg.backend.blob_dir = Some(PathBuf::from(value)),
        "gallery.origin" => cfg.gallery.origin = value,
        "gallery.collection" => cfg.gallery.collection = value,
        "gallery.fallback_image_url" => cfg.gallery.fallback_image_url = value,
        "gallery.author_avatar_url" => cfg.gallery.author_avatar_url = value,
        "gallery.comment_avatar_url" => cfg.gallery.comment_avatar_url = value,
        "gallery.default_affiliation" => cfg.gallery.default_affiliation = value,
        "gallery.upload_prefix" => cfg.gallery.upload_prefix = value,
        "gallery.max_image_bytes" => {
            if let Ok(parsed) = value.parse::<u64>() {
                cfg.gallery.max_image_bytes = parsed;
            }
        }
        "identity.user_id" => cfg.identity.user_id = value,
        "identity.display_name" => cfg.identity.display_name = value,
        "identity.avatar_url" => cfg.identity.avatar_url = value,
        "ui.theme" => cfg.ui.theme = value,
        "ui.tick_rate" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.ui.tick_rate = duration;
            }
        }
        "log.level" => cfg.log.level = value,
        "log.file" => cfg.log.file = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("med-gallery").join("config.yaml"))
}
