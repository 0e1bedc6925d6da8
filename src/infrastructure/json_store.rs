use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::mutation::UserAction;
use crate::domain::ports::HostStore;
use crate::domain::table::{ColumnMeta, TableData};
use crate::domain::value_objects::TableName;
use crate::infrastructure::memory_store::{MemTable, MemoryStore};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    tables: BTreeMap<String, MemTable>,
}

/// [`HostStore`] backed by a JSON document on disk.
///
/// The whole document is loaded on open; every successful `apply_actions`
/// call rewrites it.
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Open `path`, starting from an empty store when the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file: StoreFile = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store file: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse store file: {}", path.display()))?
        } else {
            StoreFile::default()
        };
        debug!(path = %path.display(), tables = file.tables.len(), "opened store file");
        Ok(Self {
            path,
            inner: MemoryStore::from_tables(file.tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        let file = StoreFile {
            tables: self.inner.snapshot()?,
        };
        let content = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write store file: {}", self.path.display()))
    }
}

#[async_trait]
impl HostStore for JsonFileStore {
    async fn list_tables(&self) -> Result<Vec<TableName>> {
        self.inner.list_tables().await
    }

    async fn fetch_table(&self, table: &TableName) -> Result<TableData> {
        self.inner.fetch_table(table).await
    }

    async fn column_metadata(&self, table: &TableName) -> Result<Vec<ColumnMeta>> {
        self.inner.column_metadata(table).await
    }

    async fn apply_actions(&self, actions: &[UserAction]) -> Result<Vec<Value>> {
        let returned = self.inner.apply_actions(actions).await?;
        self.save()?;
        Ok(returned)
    }
}
