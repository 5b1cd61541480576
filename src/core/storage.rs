//! Data storage directory management
//!
//! Resolves a platform-appropriate data directory and manages its
//! subdirectories: `duckdb/` for the analytical store, `uploads/` for
//! raw files awaiting ingestion.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use super::constants::{APP_DOT_FOLDER, APP_NAME, ENV_DATA_DIR};

/// Data subdirectories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSubdir {
    Duckdb,
    Uploads,
}

impl DataSubdir {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataSubdir::Duckdb => "duckdb",
            DataSubdir::Uploads => "uploads",
        }
    }

    pub const fn all() -> &'static [DataSubdir] {
        &[DataSubdir::Duckdb, DataSubdir::Uploads]
    }
}

/// Application storage manager
#[derive(Debug, Clone)]
pub struct AppStorage {
    data_dir: PathBuf,
}

impl AppStorage {
    /// Initialize storage, creating the data directory and subdirectories
    pub async fn init(data_dir_override: Option<&Path>) -> Result<Self> {
        let data_dir = Self::resolve_data_dir(data_dir_override);
        Self::ensure_directories(&data_dir).await?;

        // Canonicalize after creation for clean log output
        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);
        tracing::debug!(data_dir = %data_dir.display(), "Storage initialized");

        Ok(Self { data_dir })
    }

    /// Resolve the data directory: override, env var, platform dir, fallback
    pub fn resolve_data_dir(data_dir_override: Option<&Path>) -> PathBuf {
        if let Some(dir) = data_dir_override {
            return dir.to_path_buf();
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            return PathBuf::from(dir);
        }
        if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
            return proj_dirs.data_dir().to_path_buf();
        }
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        cwd.join(APP_DOT_FOLDER)
    }

    async fn ensure_directories(data_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        for subdir in DataSubdir::all() {
            let path = data_dir.join(subdir.as_str());
            tokio::fs::create_dir_all(&path).await.with_context(|| {
                format!(
                    "Failed to create {} directory: {}",
                    subdir.as_str(),
                    path.display()
                )
            })?;
        }
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn subdir(&self, subdir: DataSubdir) -> PathBuf {
        self.data_dir.join(subdir.as_str())
    }

    /// Construct storage over an existing directory (test utility)
    pub fn init_for_test(data_dir: PathBuf) -> Self {
        for subdir in DataSubdir::all() {
            std::fs::create_dir_all(data_dir.join(subdir.as_str())).expect("create test subdir");
        }
        Self { data_dir }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_creates_subdirs() {
        let temp = tempfile::tempdir().unwrap();
        let storage = AppStorage::init(Some(temp.path())).await.unwrap();
        assert!(storage.subdir(DataSubdir::Duckdb).is_dir());
        assert!(storage.subdir(DataSubdir::Uploads).is_dir());
    }

    #[test]
    fn override_wins_over_env() {
        let resolved = AppStorage::resolve_data_dir(Some(Path::new("/tmp/custom")));
        assert_eq!(resolved, PathBuf::from("/tmp/custom"));
    }
}
