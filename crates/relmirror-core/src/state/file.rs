// # File Package Store
//
// JSON-file implementation of PackageStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: every mutation writes a temp file, then renames it
// - Automatic backup: the previous file is kept as `.backup`
// - Recovery: a file that fails to parse is replaced by its backup
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "table": {
//     "packages": { "<uuid>": { "owner": "acme", "repo": "tool", ... } },
//     "statistics": { "<uuid>": { "installs": { "2026-01-05T08:00:00Z": 5 }, ... } }
//   }
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::table::PackageTable;
use crate::Error;
use crate::config::PackageStoreConfig;
use crate::model::{InteractionKind, PackageStatistics, PopularitySnapshot, TrackedPackage};
use crate::traits::{PackageStore, PackageStoreFactory};

/// State file format version
const STATE_FILE_VERSION: &str = "1.0";

/// File-based package store with crash recovery
///
/// The whole table is held in memory and rewritten on every mutation, which
/// suits mirrors tracking up to a few thousand packages.
#[derive(Debug)]
pub struct FilePackageStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    table: PackageTable,
    dirty: bool,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StateFileFormat {
    version: String,
    #[serde(default)]
    table: PackageTable,
}

impl FilePackageStore {
    /// Create or load a file package store
    ///
    /// A missing file starts an empty store. A corrupt file is recovered from
    /// its backup; if the backup is unusable too, the store starts empty.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let table = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                table,
                dirty: false,
            })),
        })
    }

    async fn load_with_recovery(path: &Path) -> Result<PackageTable, Error> {
        let err = match Self::load(path).await {
            Ok(table) => {
                tracing::debug!("Loaded package store: {} packages", table.len());
                return Ok(table);
            }
            Err(err @ Error::Json(_)) => err,
            Err(err) => return Err(err),
        };

        tracing::warn!(
            "Package store {} appears corrupted: {}. Attempting recovery from backup.",
            path.display(),
            err
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with an empty package store.");
            return Ok(PackageTable::default());
        }

        match Self::load(&backup_path).await {
            Ok(table) => {
                tracing::info!("Recovered package store from backup: {} packages", table.len());
                if let Err(e) = fs::copy(&backup_path, path).await {
                    tracing::error!("Failed to restore package store from backup: {}", e);
                }
                Ok(table)
            }
            Err(e) => {
                tracing::error!(
                    "Backup also unusable: {}. Starting with an empty package store.",
                    e
                );
                Ok(PackageTable::default())
            }
        }
    }

    async fn load(path: &Path) -> Result<PackageTable, Error> {
        if !path.exists() {
            tracing::debug!("Package store file does not exist: {}", path.display());
            return Ok(PackageTable::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::package_store(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let state_file: StateFileFormat = serde_json::from_str(&content)?;

        if state_file.version != STATE_FILE_VERSION {
            tracing::warn!(
                "Package store version mismatch: expected {}, got {}. Attempting to load anyway.",
                STATE_FILE_VERSION,
                state_file.version
            );
        }

        Ok(state_file.table)
    }

    /// Write the table to disk atomically
    async fn write_state(&self) -> Result<(), Error> {
        // held for the whole write so concurrent writers cannot interleave renames
        let mut guard = self.state.write().await;

        let json = serde_json::to_string_pretty(&StateFileFormat {
            version: STATE_FILE_VERSION.to_string(),
            table: guard.table.clone(),
        })?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::package_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.write_all(json.as_bytes()).await?;
            file.flush().await?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::package_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        guard.dirty = false;
        tracing::trace!("Package store written to {}", self.path.display());
        Ok(())
    }

    /// Apply a mutation, then persist it
    async fn mutate<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut PackageTable) -> Result<(), Error> + Send,
    {
        {
            let mut guard = self.state.write().await;
            f(&mut guard.table)?;
            guard.dirty = true;
        }
        self.write_state().await
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl PackageStore for FilePackageStore {
    async fn get_package(&self, id: Uuid) -> Result<Option<TrackedPackage>, Error> {
        Ok(self.state.read().await.table.get(id))
    }

    async fn find_package(&self, owner: &str, repo: &str) -> Result<Option<TrackedPackage>, Error> {
        Ok(self.state.read().await.table.find(owner, repo))
    }

    async fn insert_package(&self, package: &TrackedPackage) -> Result<(), Error> {
        self.mutate(|table| table.insert(package)).await
    }

    async fn save_package(&self, package: &TrackedPackage) -> Result<(), Error> {
        self.mutate(|table| table.save(package)).await
    }

    async fn list_package_ids(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<Uuid>, Error> {
        Ok(self.state.read().await.table.list_ids(after, limit))
    }

    async fn get_statistics(&self, package_id: Uuid) -> Result<Option<PackageStatistics>, Error> {
        Ok(self.state.read().await.table.statistics(package_id))
    }

    async fn save_statistics(&self, stats: &PackageStatistics) -> Result<(), Error> {
        self.mutate(|table| table.save_statistics(stats)).await
    }

    async fn record_interaction(
        &self,
        package_id: Uuid,
        kind: InteractionKind,
        at: DateTime<Utc>,
        amount: u64,
    ) -> Result<(), Error> {
        self.mutate(|table| table.record(package_id, kind, at, amount))
            .await
    }

    async fn count_above(&self, total: u64) -> Result<u64, Error> {
        Ok(self.state.read().await.table.count_above(total))
    }

    async fn count_packages(&self) -> Result<u64, Error> {
        Ok(self.state.read().await.table.len() as u64)
    }

    async fn popularity(&self, package_id: Uuid) -> Result<PopularitySnapshot, Error> {
        Ok(self.state.read().await.table.popularity(package_id))
    }

    async fn flush(&self) -> Result<(), Error> {
        if self.state.read().await.dirty {
            self.write_state().await
        } else {
            Ok(())
        }
    }
}

/// Factory for the `file` package store type
pub struct FilePackageStoreFactory;

#[async_trait]
impl PackageStoreFactory for FilePackageStoreFactory {
    async fn create(&self, config: &PackageStoreConfig) -> Result<Box<dyn PackageStore>, Error> {
        match config {
            PackageStoreConfig::File { path } => Ok(Box::new(FilePackageStore::new(path).await?)),
            other => Err(Error::config(format!(
                "file package store cannot be built from '{}' config",
                other.type_name()
            ))),
        }
    }
}
