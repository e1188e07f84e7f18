use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use snafu::{ResultExt, Snafu};

pub const PREFERENCES_FILE_NAME: &str = "preferences.json";

type PreferenceMap = BTreeMap<String, String>;

/// Small key-value store for client-side preferences such as the last used agent.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError>;
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PreferenceError {
    #[snafu(display("failed to create preferences directory at {path:?} on `{stage}`: {source}"))]
    CreatePreferencesDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize preferences on `{stage}`: {source}"))]
    SerializePreferences {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write preferences at {path:?} on `{stage}`: {source}"))]
    WritePreferences {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: ArcSwap<PreferenceMap>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.load().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.values.rcu(|values| {
            let mut next = PreferenceMap::clone(values);
            next.insert(key.to_string(), value.to_string());
            next
        });
        Ok(())
    }
}

/// JSON-file preferences. Reads are served from an in-memory snapshot.
pub struct FilePreferences {
    path: PathBuf,
    values: ArcSwap<PreferenceMap>,
    write_lock: Mutex<()>,
}

impl FilePreferences {
    pub fn open(path: PathBuf) -> Self {
        let values = Self::load_from_disk(&path);
        Self {
            path,
            values: ArcSwap::from_pointee(values),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> PreferenceMap {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return PreferenceMap::new();
            }
            Err(error) => {
                tracing::warn!("failed to read preferences from {:?}: {}", path, error);
                return PreferenceMap::new();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|error| {
            tracing::warn!(
                "failed to parse preferences from {:?}: {}. starting empty",
                path,
                error
            );
            PreferenceMap::new()
        })
    }

    fn persist(&self, values: &PreferenceMap) -> Result<(), PreferenceError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreatePreferencesDirSnafu {
                stage: "create-preferences-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content =
            serde_json::to_string_pretty(values).context(SerializePreferencesSnafu {
                stage: "serialize-preferences-json",
            })?;

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WritePreferencesSnafu {
            stage: "write-temporary-preferences-file",
            path: temp_path.clone(),
        })?;
        std::fs::rename(&temp_path, &self.path).context(WritePreferencesSnafu {
            stage: "rename-temporary-preferences-file",
            path: self.path.clone(),
        })?;

        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.load().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        // Serialize writers so two updates cannot interleave their file replacements.
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut next = PreferenceMap::clone(&self.values.load());
        if next.get(key).is_some_and(|current| current == value) {
            return Ok(());
        }
        next.insert(key.to_string(), value.to_string());

        self.persist(&next)?;
        self.values.store(Arc::new(next));
        Ok(())
    }
}
