// ============================================================================
// SessionDb - Embedded Key-Value Store (redb)
// ============================================================================
// Persistent local storage for the signed-in session. String keys map to
// UTF-8 JSON strings, the same shape the mobile app kept in AsyncStorage.
// Default path: ~/.streamdata/session.redb (callers pass AppConfig::db_path)
// ============================================================================

use anyhow::{anyhow, Result};
use redb::{Database, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Key holding the serialized `User`
pub const USER_DATA_KEY: &str = "@STREAM-DATA:twitch:user_access";
/// Key holding the access token, serialized as a JSON string
pub const USER_TOKEN_KEY: &str = "@STREAM-DATA:twitch:user_access_token";

const STORAGE: TableDefinition<&str, &[u8]> = TableDefinition::new("storage");

/// Embedded key-value store for session data
pub struct SessionDb {
    db: Database,
    path: PathBuf,
}

impl SessionDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses ~/.streamdata/session.redb
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let db_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow!("Failed to create {}: {}", parent.display(), e)
                })?;
            }
        }

        info!("Opening session store at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Make sure the table exists so later reads never see TableDoesNotExist
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(STORAGE)
                .map_err(|e| anyhow!("Failed to create storage table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    /// ~/.streamdata/session.redb
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(".streamdata").join("session.redb"))
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.multi_set(&[(key, value)])
    }

    /// Write several keys in one transaction; either all land or none do
    pub fn multi_set(&self, entries: &[(&str, &str)]) -> Result<()> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(STORAGE)
                .map_err(|e| anyhow!("Failed to open storage table: {}", e))?;
            for (key, value) in entries {
                table.insert(*key, value.as_bytes())
                    .map_err(|e| anyhow!("Failed to insert {}: {}", key, e))?;
            }
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored {} key(s)", entries.len());
        Ok(())
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(STORAGE)
            .map_err(|e| anyhow!("Failed to open storage table: {}", e))?;

        match table.get(key).map_err(|e| anyhow!("Failed to get {}: {}", key, e))? {
            Some(value) => {
                let text = String::from_utf8(value.value().to_vec())
                    .map_err(|e| anyhow!("Stored value for {} is not UTF-8: {}", key, e))?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    /// Remove the given keys in one transaction. Returns how many existed.
    pub fn multi_remove(&self, keys: &[&str]) -> Result<usize> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let mut removed = 0;
        {
            let mut table = write_txn.open_table(STORAGE)
                .map_err(|e| anyhow!("Failed to open storage table: {}", e))?;
            for key in keys {
                if table.remove(*key)
                    .map_err(|e| anyhow!("Failed to remove {}: {}", key, e))?
                    .is_some()
                {
                    removed += 1;
                }
            }
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if removed > 0 {
            debug!("Removed {} key(s)", removed);
        }
        Ok(removed)
    }

    /// List every stored key
    pub fn keys(&self) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(STORAGE)
            .map_err(|e| anyhow!("Failed to open storage table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate storage: {}", e))?;
        for entry in iter {
            let (key, _value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            results.push(key.value().to_string());
        }
        Ok(results)
    }

    /// Wipe every key. Returns the number of keys removed.
    pub fn clear(&self) -> Result<usize> {
        let keys = self.keys()?;
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let removed = self.multi_remove(&refs)?;
        info!("Cleared local storage ({} keys)", removed);
        Ok(removed)
    }
}
