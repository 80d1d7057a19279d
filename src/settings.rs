use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "jobtail";

/// Suffix v1 files kept on the controller URL
const LEGACY_API_SUFFIX: &str = "/api/v2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_controller_url")]
    pub controller_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Events per history page and per live fetch
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Pages kept in the live window before the oldest are dropped
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_controller_url() -> String {
    "http://localhost:8013".to_string()
}

fn default_page_size() -> usize {
    50
}

fn default_page_limit() -> usize {
    5
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            controller_url: default_controller_url(),
            token: None,
            page_size: default_page_size(),
            page_limit: default_page_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load `<config_dir>/jobtail/config.yaml`, writing defaults if it is missing
pub fn load_settings() {
    let Some(path) = config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    load_settings_from_path(&path);
}

pub fn load_settings_from_path(path: &Path) {
    if !path.exists() {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, path);
        }
        return;
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }

                if let Ok(mut global) = SETTINGS.write() {
                    *global = settings;
                }
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    if settings.version < 2 {
        let trimmed = settings.controller_url.trim_end_matches('/');
        settings.controller_url = trimmed
            .strip_suffix(LEGACY_API_SUFFIX)
            .unwrap_or(trimmed)
            .to_string();
    }

    settings.version = CURRENT_VERSION;
}

pub fn save_settings() {
    let Some(path) = config_path() else {
        warn!("Could not determine config directory, cannot save settings");
        return;
    };

    if let Ok(settings) = SETTINGS.read() {
        save_settings_to_file(&settings, &path);
    }
}

fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    match fs::write(path, generate_settings_yaml(settings)) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str(&format!(
        "controller_url: {}\n",
        yaml_scalar(&settings.controller_url)
    ));
    match &settings.token {
        Some(token) => content.push_str(&format!("token: {}\n", yaml_scalar(token))),
        None => content.push_str("# token: \"<personal access token>\"\n"),
    }
    content.push('\n');
    content.push_str("# Output window\n");
    content.push_str(&format!("page_size: {}\n", settings.page_size));
    content.push_str(&format!("page_limit: {}\n", settings.page_limit));
    content.push('\n');
    content.push_str(&format!("poll_interval_ms: {}\n", settings.poll_interval_ms));
    content.push_str(&format!(
        "request_timeout_secs: {}\n",
        settings.request_timeout_secs
    ));
    content.push_str(&format!("log_level: {}\n", yaml_scalar(&settings.log_level)));

    content
}

/// A string as serde_yaml writes it, quoted and escaped when needed
fn yaml_scalar(value: &str) -> String {
    match serde_yaml::to_string(value) {
        Ok(yaml) => yaml.trim_end().to_string(),
        Err(e) => {
            warn!("Failed to serialize settings value: {e}");
            format!("{value:?}")
        }
    }
}

// Public API for accessing/modifying settings

pub fn get_controller_url() -> String {
    SETTINGS
        .read()
        .map(|s| s.controller_url.clone())
        .unwrap_or_else(|_| default_controller_url())
}

pub fn set_controller_url(url: &str) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.controller_url = url.trim_end_matches('/').to_string();
    }
    save_settings();
}

pub fn get_token() -> Option<String> {
    SETTINGS.read().ok().and_then(|s| s.token.clone())
}

pub fn set_token(token: &str) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.token = Some(token.to_string());
    }
    save_settings();
}

pub fn get_page_size() -> usize {
    SETTINGS
        .read()
        .map(|s| s.page_size)
        .unwrap_or_else(|_| default_page_size())
}

pub fn get_page_limit() -> usize {
    SETTINGS
        .read()
        .map(|s| s.page_limit)
        .unwrap_or_else(|_| default_page_limit())
}

pub fn get_poll_interval() -> Duration {
    let ms = SETTINGS
        .read()
        .map(|s| s.poll_interval_ms)
        .unwrap_or_else(|_| default_poll_interval_ms());
    Duration::from_millis(ms)
}

pub fn get_request_timeout() -> Duration {
    let secs = SETTINGS
        .read()
        .map(|s| s.request_timeout_secs)
        .unwrap_or_else(|_| default_request_timeout_secs());
    Duration::from_secs(secs)
}

pub fn get_log_level() -> String {
    SETTINGS
        .read()
        .map(|s| s.log_level.clone())
        .unwrap_or_else(|_| default_log_level())
}
