//! Application context: directories and tunables.
//!
//! An explicit struct threaded through the orchestrator and producers,
//! constructed once per process (or per test), never a global.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::Deserialize;

use curator_core::SharedProgress;

/// Settings read from `curator.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub workers: WorkersSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root directory; data lives under `<dir>/data`, the download
    /// cache under `<dir>/cache`.
    pub dir: PathBuf,
    /// Keep download cache entries after the resource consuming them
    /// completes.
    pub keep_downloads: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let dir = std::env::var_os("CURATOR_DIR")
            .map(PathBuf::from)
            .or_else(|| {
                directories::BaseDirs::new().map(|b| b.home_dir().join(".curator"))
            })
            .unwrap_or_else(|| PathBuf::from("./curator"));
        Self {
            dir,
            keep_downloads: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkersSettings {
    pub default: usize,
    pub max: usize,
}

impl Default for WorkersSettings {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            default: cpus.min(8),
            max: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub max_retries: u32,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl Settings {
    /// Load settings from default locations.
    ///
    /// Search order:
    /// 1. ./curator.toml (current directory)
    /// 2. ~/.config/curator/config.toml
    ///
    /// Falls back to defaults when no file is found.
    pub fn load() -> Result<Self> {
        let local = PathBuf::from("curator.toml");
        if local.exists() {
            return Self::from_file(&local);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "curator") {
            let user = dirs.config_dir().join("config.toml");
            if user.exists() {
                return Self::from_file(&user);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load settings from a specific file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(settings)
    }
}

/// Runtime context handed to the orchestrator and the producers.
#[derive(Clone)]
pub struct Context {
    root: PathBuf,
    pub keep_downloads: bool,
    pub workers: usize,
    pub max_retries: u32,
    pub progress: SharedProgress,
}

impl Context {
    /// Context rooted at an explicit directory (tests use a tempdir).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_settings(Settings {
            storage: StorageSettings {
                dir: root.into(),
                keep_downloads: false,
            },
            ..Settings::default()
        })
    }

    /// Context from loaded settings.
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            root: settings.storage.dir,
            keep_downloads: settings.storage.keep_downloads,
            workers: settings.workers.default.clamp(1, settings.workers.max),
            max_retries: settings.http.max_retries,
            progress: SharedProgress::default(),
        }
    }

    /// Context from default config locations.
    pub fn load() -> Result<Self> {
        Ok(Self::with_settings(Settings::load()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root for all dataset data directories.
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Download cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Data directory for one dataset: the qualified id's dot-separated
    /// components become path components under the data root.
    pub fn dataset_dir(&self, dataset_id: &str) -> PathBuf {
        let mut path = self.data_dir();
        for component in dataset_id.split('.') {
            path.push(component);
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_dir_splits_qualified_id() {
        let ctx = Context::new("/tmp/cur");
        assert_eq!(
            ctx.dataset_dir("ml.image.mnist"),
            PathBuf::from("/tmp/cur/data/ml/image/mnist")
        );
    }

    #[test]
    fn default_settings() {
        let s = Settings::default();
        assert!(s.workers.default >= 1);
        assert_eq!(s.http.max_retries, 3);
        assert!(!s.storage.keep_downloads);
    }

    #[test]
    fn parse_settings_toml() {
        let toml = r#"
[storage]
dir = "/srv/datasets"
keep_downloads = true

[workers]
default = 2
max = 4

[http]
max_retries = 5
"#;
        let s: Settings = toml::from_str(toml).unwrap();
        assert_eq!(s.storage.dir, PathBuf::from("/srv/datasets"));
        assert!(s.storage.keep_downloads);
        assert_eq!(s.workers.default, 2);
        assert_eq!(s.http.max_retries, 5);
    }

    #[test]
    fn workers_clamped() {
        let ctx = Context::with_settings(Settings {
            workers: WorkersSettings {
                default: 99,
                max: 4,
            },
            ..Settings::default()
        });
        assert_eq!(ctx.workers, 4);
    }
}
