use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::chat::scroll_manager::ScrollConfig;

pub const DEFAULT_USER_ID: &str = "default_user";
pub const DEFAULT_AGENT_ID: &str = "web-search-agent";
pub const SETTINGS_DIRECTORY_NAME: &str = "agentchat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "history.db";
pub const ENV_PREFIX: &str = "AGENTCHAT_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_agent_id")]
    pub default_agent_id: String,
    /// Empty means `history.db` inside the settings directory.
    #[serde(default)]
    pub database_path: String,
    #[serde(default)]
    pub single_shot: bool,
    #[serde(default = "default_stream_debounce_ms")]
    pub stream_debounce_ms: u64,
    #[serde(default = "default_scroll_away_threshold_px")]
    pub scroll_away_threshold_px: f32,
    #[serde(default = "default_smooth_scroll_settle_ms")]
    pub smooth_scroll_settle_ms: u64,
    #[serde(default = "default_instant_scroll_settle_ms")]
    pub instant_scroll_settle_ms: u64,
    #[serde(default = "default_threads_refresh_delay_ms")]
    pub threads_refresh_delay_ms: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            default_agent_id: default_agent_id(),
            database_path: String::new(),
            single_shot: false,
            stream_debounce_ms: default_stream_debounce_ms(),
            scroll_away_threshold_px: default_scroll_away_threshold_px(),
            smooth_scroll_settle_ms: default_smooth_scroll_settle_ms(),
            instant_scroll_settle_ms: default_instant_scroll_settle_ms(),
            threads_refresh_delay_ms: default_threads_refresh_delay_ms(),
        }
    }
}

impl ChatSettings {
    pub fn normalized(mut self) -> Self {
        self.user_id = non_blank_or(self.user_id, DEFAULT_USER_ID);
        self.default_agent_id = non_blank_or(self.default_agent_id, DEFAULT_AGENT_ID);
        self.database_path = self.database_path.trim().to_string();

        if !self.scroll_away_threshold_px.is_finite() || self.scroll_away_threshold_px < 0.0 {
            self.scroll_away_threshold_px = default_scroll_away_threshold_px();
        }

        self
    }

    pub fn stream_debounce(&self) -> Duration {
        Duration::from_millis(self.stream_debounce_ms)
    }

    pub fn threads_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.threads_refresh_delay_ms)
    }

    pub fn scroll_config(&self) -> ScrollConfig {
        ScrollConfig {
            away_threshold: self.scroll_away_threshold_px,
            smooth_settle: Duration::from_millis(self.smooth_scroll_settle_ms),
            instant_settle: Duration::from_millis(self.instant_scroll_settle_ms),
        }
    }

    pub fn resolved_database_path(&self, config_dir: &Path) -> PathBuf {
        if self.database_path.is_empty() {
            config_dir.join(DATABASE_FILE_NAME)
        } else {
            PathBuf::from(&self.database_path)
        }
    }
}

/// Layered settings: defaults, then `settings.json`, then `AGENTCHAT_*` environment variables.
pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".agentchat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_sources(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn update(&self, settings: ChatSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_sources(path: &Path) -> ChatSettings {
        let mut figment = Figment::from(Serialized::defaults(ChatSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ChatSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn non_blank_or(value: String, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

fn default_user_id() -> String {
    DEFAULT_USER_ID.to_string()
}

fn default_agent_id() -> String {
    DEFAULT_AGENT_ID.to_string()
}

fn default_stream_debounce_ms() -> u64 {
    3
}

fn default_scroll_away_threshold_px() -> f32 {
    50.0
}

fn default_smooth_scroll_settle_ms() -> u64 {
    500
}

fn default_instant_scroll_settle_ms() -> u64 {
    100
}

fn default_threads_refresh_delay_ms() -> u64 {
    500
}
