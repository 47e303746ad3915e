use std::path::Path;

use redb::{Database, ReadableDatabase, TableDefinition};

use crate::error::Result;

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Setting key holding the persisted embedding model id.
pub const EMBEDDING_MODEL_KEY: &str = "embedding_model";

/// Setting key holding the RFC 3339 time of the most recent reindex.
pub const LAST_REINDEX_KEY: &str = "last_reindex";

/// Small key/value store for user-level settings.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.db")).unwrap();
        (tmp, db)
    }

    #[test]
    fn settings_crud() {
        let (_tmp, db) = test_db();

        assert_eq!(db.get_setting(EMBEDDING_MODEL_KEY).unwrap(), None);
        assert_eq!(
            db.get_setting_or(EMBEDDING_MODEL_KEY, "default-model")
                .unwrap(),
            "default-model"
        );

        db.set_setting(EMBEDDING_MODEL_KEY, "custom-model").unwrap();
        assert_eq!(
            db.get_setting(EMBEDDING_MODEL_KEY).unwrap(),
            Some("custom-model".to_string())
        );

        assert!(db.remove_setting(EMBEDDING_MODEL_KEY).unwrap());
        assert!(!db.remove_setting(EMBEDDING_MODEL_KEY).unwrap());
        assert_eq!(db.get_setting(EMBEDDING_MODEL_KEY).unwrap(), None);
    }

    #[test]
    fn last_reindex_falls_back_to_never() {
        let (_tmp, db) = test_db();
        assert_eq!(
            db.get_setting_or(LAST_REINDEX_KEY, "never").unwrap(),
            "never"
        );

        db.set_setting(LAST_REINDEX_KEY, "2024-05-01T10:00:00+00:00")
            .unwrap();
        assert_eq!(
            db.get_setting_or(LAST_REINDEX_KEY, "never").unwrap(),
            "2024-05-01T10:00:00+00:00"
        );
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.db");

        {
            let db = ConfigDb::open(&path).unwrap();
            db.set_setting(LAST_REINDEX_KEY, "42 records").unwrap();
        }

        {
            let db = ConfigDb::open(&path).unwrap();
            assert_eq!(
                db.get_setting(LAST_REINDEX_KEY).unwrap(),
                Some("42 records".to_string())
            );
        }
    }
}
