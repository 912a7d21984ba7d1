use arc_swap::ArcSwap;
use std::path::Path;
use std::sync::Arc;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a TOML file
///
/// Uses `ArcSwap` for lock-free reads, so hot paths (every touch event reads
/// the gesture thresholds) never contend with updates.
#[derive(Clone)]
pub struct ConfigStore {
    /// Lock-free cache using ArcSwap for zero-cost reads
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Load configuration from `path`, creating it with defaults if missing
    pub async fn load(path: &Path) -> Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                toml::from_str::<AppConfig>(&text).map_err(|e| AppError::Config(e.to_string()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = AppConfig::default();
                Self::write_file(path, &config).await?;
                tracing::info!("Created default configuration at {}", path.display());
                config
            }
            Err(e) => return Err(e.into()),
        };
        config.validate().map_err(AppError::Config)?;

        Ok(Self {
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    /// Store that lives only in memory (no backing file)
    pub fn in_memory(config: AppConfig) -> Self {
        Self {
            cache: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    async fn write_file(path: &Path, config: &AppConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let text = toml::to_string_pretty(config).map_err(|e| AppError::Config(e.to_string()))?;
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Update the in-memory configuration with a closure
    ///
    /// The result is validated before it becomes visible. Nothing is written
    /// to disk, so command line overrides never touch the file.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (*self.cache.load_full()).clone();
        f(&mut config);
        config.validate().map_err(AppError::Config)?;
        self.cache.store(Arc::new(config));
        Ok(())
    }

}
