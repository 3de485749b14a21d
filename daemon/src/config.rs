use common::Configuration;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config not yet loaded: no path has been set")]
    NotLoaded,
    #[error("failed to read config file {path:?}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("failed to save config file {path:?}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
}

struct Inner {
    path: Option<PathBuf>,
    cached: Option<Configuration>,
}

/// File-backed configuration shared by the web handlers and the job loops.
///
/// Readers get a value copy; writers swap the whole struct and persist it.
/// One mutex guards both the cached value and the path, so a reader never
/// observes a half-applied write.
pub struct ConfigStore {
    inner: Mutex<Inner>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { path: None, cached: None }),
        }
    }

    /// Point the store at `path` and load it immediately.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let store = Self::new();
        store.set_path(path);
        store.get()?;
        Ok(store)
    }

    /// Record the backing file. The next `get` reloads from it.
    pub fn set_path(&self, path: impl Into<PathBuf>) {
        let mut inner = self.lock();
        inner.path = Some(path.into());
        inner.cached = None;
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.lock().path.clone()
    }

    /// A copy of the current configuration, loading it first if needed.
    pub fn get(&self) -> Result<Configuration, ConfigError> {
        let mut inner = self.lock();
        Ok(Self::loaded(&mut inner)?.clone())
    }

    /// Replace the configuration and write it out.
    ///
    /// The in-memory value is replaced even when the write fails, so readers
    /// see the latest settings; the error tells the caller it was not saved.
    pub fn set(&self, config: Configuration) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        let path = inner.path.clone().ok_or(ConfigError::NotLoaded)?;
        inner.cached = Some(config);
        log::info!("config: set");
        match inner.cached.as_ref() {
            Some(c) => save(&path, c),
            None => Err(ConfigError::NotLoaded),
        }
    }

    /// Read-modify-write under the lock. `f` works on the freshest value, so
    /// concurrent updates to different fields are never lost. Nothing is
    /// written when `f` leaves the configuration unchanged.
    pub fn update<R>(&self, f: impl FnOnce(&mut Configuration) -> R) -> Result<R, ConfigError> {
        let mut inner = self.lock();
        let path = inner.path.clone().ok_or(ConfigError::NotLoaded)?;
        let current = Self::loaded(&mut inner)?;
        let mut next = current.clone();
        let result = f(&mut next);
        if next == *current {
            return Ok(result);
        }
        inner.cached = Some(next);
        log::info!("config: updated");
        if let Some(c) = inner.cached.as_ref() {
            save(&path, c)?;
        }
        Ok(result)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn loaded(inner: &mut Inner) -> Result<&Configuration, ConfigError> {
        if inner.cached.is_none() {
            let path = inner.path.as_deref().ok_or(ConfigError::NotLoaded)?;
            inner.cached = Some(load(path)?);
        }
        inner.cached.as_ref().ok_or(ConfigError::NotLoaded)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

fn load(path: &Path) -> Result<Configuration, ConfigError> {
    log::info!("config: loading from path: {:?}", path);
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("config: loaded");
    Ok(config)
}

fn save(path: &Path, config: &Configuration) -> Result<(), ConfigError> {
    let mut content = serde_json::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    content.push('\n');
    if let Err(source) = fs::write(path, content) {
        log::error!("config: saving to {:?}: {}", path, source);
        return Err(ConfigError::Io { path: path.to_path_buf(), source });
    }
    log::info!("config: saved to path: {:?}", path);
    Ok(())
}
