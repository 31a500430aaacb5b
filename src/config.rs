use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::{
    DEFAULT_API_BASE, DEFAULT_TEXT_EDITION, DEFAULT_TRANSLATION_EDITION, DEFAULT_USER_AGENT,
};
use crate::error::Result;
use crate::model::{Reciter, default_reciters};

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReaderConfig {
    pub api_base: String,
    pub text_edition: String,
    pub translation_edition: String,
    pub reciters: Vec<Reciter>,
    /// Reciter selected at startup; the first catalogue entry when unset.
    pub default_reciter: Option<String>,
    /// Where caches and bookmarks live; see [`default_data_dir`].
    pub data_dir: Option<PathBuf>,
    /// Maximum number of cached chapters; unbounded when unset.
    pub cache_budget: Option<usize>,
    /// Warm the audio cache with the first verse of each opened chapter.
    pub prefetch_audio: bool,
    pub user_agent: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            text_edition: DEFAULT_TEXT_EDITION.to_string(),
            translation_edition: DEFAULT_TRANSLATION_EDITION.to_string(),
            reciters: default_reciters(),
            default_reciter: None,
            data_dir: None,
            cache_budget: None,
            prefetch_audio: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ReaderConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Reads `explicit` if given, else `config.json` in `data_dir` when it
    /// exists, else defaults.
    pub fn load(explicit: Option<&Path>, data_dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let implicit = data_dir.join(CONFIG_FILE_NAME);
        if implicit.is_file() {
            Self::from_file(&implicit)
        } else {
            Ok(Self::default())
        }
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn initial_reciter(&self) -> String {
        self.default_reciter
            .clone()
            .or_else(|| self.reciters.first().map(|reciter| reciter.id.clone()))
            .unwrap_or_else(|| "ar.alafasy".to_string())
    }

    pub fn find_reciter(&self, id: &str) -> Option<&Reciter> {
        self.reciters.iter().find(|reciter| reciter.id == id)
    }
}

/// `$XDG_DATA_HOME/ogechina`, then `~/.local/share/ogechina`, then `./.ogechina`.
pub fn default_data_dir() -> PathBuf {
    if let Some(xdg) = env::var_os("XDG_DATA_HOME").filter(|value| !value.is_empty()) {
        return PathBuf::from(xdg).join("ogechina");
    }
    if let Some(home) = env::var_os("HOME").filter(|value| !value.is_empty()) {
        return PathBuf::from(home).join(".local/share/ogechina");
    }
    PathBuf::from(".ogechina")
}
