pub mod preferences;
pub mod state;

pub use preferences::{
    FilePreferences, MemoryPreferences, PREFERENCES_FILE_NAME, PreferenceError, PreferenceStore,
};
pub use state::{ChatSettings, SettingsError, SettingsStore};
