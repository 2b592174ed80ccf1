use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use skizze_sketches::DomainInfo;

use crate::error::{StorageError, StorageResult};

/// INFO_FILE is the name of the metadata database inside the info directory.
pub const INFO_FILE: &str = "info.redb";

/// One JSON encoded DomainInfo per domain, keyed by domain name.
const INFO_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("info");

/// MetadataStore is the source of truth for which domains exist. All methods
/// block on disk I/O; async callers should move them off the runtime threads.
pub trait MetadataStore: Send + Sync {
    /// put_info inserts or overwrites the record of a domain.
    fn put_info(&self, info: &DomainInfo) -> StorageResult<()>;

    /// create_info inserts the record of a domain, failing with
    /// StorageError::AlreadyExists if the name is taken.
    fn create_info(&self, info: &DomainInfo) -> StorageResult<()>;

    fn get_info(&self, name: &str) -> StorageResult<Option<DomainInfo>>;

    /// get_all_info returns every known domain, keyed by name.
    fn get_all_info(&self) -> StorageResult<BTreeMap<String, DomainInfo>>;

    /// delete_info removes the record of a domain. Removing an unknown domain
    /// is not an error; the return value tells whether a record existed.
    fn delete_info(&self, name: &str) -> StorageResult<bool>;
}

/// InfoStore is the redb backed MetadataStore, one table in `info.redb`.
/// Every operation runs in its own redb transaction, so a failed call leaves no
/// partial write behind.
#[derive(Clone)]
pub struct InfoStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl InfoStore {
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        fs::create_dir_all(dir.as_ref())?;

        let path = dir.as_ref().join(INFO_FILE);
        let db = Database::create(&path)?;

        // make sure the table exists so that readers never see a missing table
        let txn = db.begin_write()?;
        {
            txn.open_table(INFO_TABLE)?;
        }
        txn.commit()?;

        tracing::debug!("info store opened at {}", path.display());
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

impl MetadataStore for InfoStore {
    fn put_info(&self, info: &DomainInfo) -> StorageResult<()> {
        let value = serde_json::to_vec(info)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(INFO_TABLE)?;
            table.insert(info.id.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// The check and the insert share one write transaction.
    fn create_info(&self, info: &DomainInfo) -> StorageResult<()> {
        let value = serde_json::to_vec(info)?;

        let txn = self.db.begin_write()?;
        let exists = {
            let mut table = txn.open_table(INFO_TABLE)?;
            let exists = table.get(info.id.as_str())?.is_some();
            if !exists {
                table.insert(info.id.as_str(), value.as_slice())?;
            }
            exists
        };

        if exists {
            txn.abort()?;
            return Err(StorageError::AlreadyExists(info.id.clone()));
        }
        txn.commit()?;
        Ok(())
    }

    fn get_info(&self, name: &str) -> StorageResult<Option<DomainInfo>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(INFO_TABLE)?;

        let info = match table.get(name)? {
            Some(v) => Some(serde_json::from_slice(v.value())?),
            None => None,
        };
        Ok(info)
    }

    fn get_all_info(&self) -> StorageResult<BTreeMap<String, DomainInfo>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(INFO_TABLE)?;

        let mut infos = BTreeMap::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let info: DomainInfo = serde_json::from_slice(v.value())?;
            infos.insert(k.value().to_string(), info);
        }
        Ok(infos)
    }

    fn delete_info(&self, name: &str) -> StorageResult<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(INFO_TABLE)?;
            let removed = table.remove(name)?.is_some();
            removed
        };
        txn.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use redb::{Database, TableDefinition};
    use skizze_sketches::DomainInfo;

    use crate::info::{InfoStore, MetadataStore, INFO_FILE};
    use crate::StorageError;

    const RAW_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("info");

    /// writes records the way an external tool would, bypassing InfoStore.
    fn put_raw(dir: &std::path::Path, records: &[(&str, &str)]) {
        let db = Database::create(dir.join(INFO_FILE)).unwrap();
        let txn = db.begin_write().unwrap();
        {
            let mut table = txn.open_table(RAW_TABLE).unwrap();
            for (k, v) in records {
                table.insert(*k, v.as_bytes()).unwrap();
            }
        }
        txn.commit().unwrap();
    }

    #[test]
    fn test_get_all_info() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        put_raw(
            dir.path(),
            &[(
                "thing",
                r#"{
                    "id": "thing",
                    "type": "default",
                    "capacity": 12345
                }"#,
            )],
        );

        let store = InfoStore::open(dir.path())?;
        let infos = store.get_all_info()?;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos["thing"].capacity, 12345);
        Ok(())
    }

    #[test]
    fn test_delete_info() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        put_raw(
            dir.path(),
            &[
                ("thing", r#"{"id": "thing", "type": "default", "capacity": 12345}"#),
                ("venom", r#"{"id": "venom", "type": "default", "capacity": 67890}"#),
            ],
        );

        let store = InfoStore::open(dir.path())?;
        assert!(store.delete_info("venom")?);
        // idempotent
        assert!(!store.delete_info("venom")?);

        let infos = store.get_all_info()?;
        assert_eq!(infos.len(), 1);
        assert!(infos.contains_key("thing"));
        Ok(())
    }

    #[test]
    fn test_put_get_info() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = InfoStore::open(dir.path())?;
        assert!(store.get_info("marvel")?.is_none());

        let info = DomainInfo::new("marvel", "hllpp", 10000);
        store.put_info(&info)?;
        assert_eq!(store.get_info("marvel")?, Some(info.clone()));

        // overwrite
        let mut other = info.clone();
        other.capacity = 5;
        store.put_info(&other)?;
        assert_eq!(store.get_info("marvel")?.map(|i| i.capacity), Some(5));
        Ok(())
    }

    #[test]
    fn test_create_info_exists() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = InfoStore::open(dir.path())?;

        let info = DomainInfo::new("marvel", "hllpp", 10000);
        store.create_info(&info)?;

        let again = DomainInfo::new("marvel", "dict", 1);
        let err = store.create_info(&again).err().unwrap();
        assert!(matches!(err, StorageError::AlreadyExists(name) if name == "marvel"));
        // the first record is untouched
        assert_eq!(store.get_info("marvel")?, Some(info));
        Ok(())
    }

    #[test]
    fn test_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let store = InfoStore::open(dir.path())?;
            store.put_info(&DomainInfo::new("phoenix", "dict", 1))?;
        }

        let store = InfoStore::open(dir.path())?;
        assert_eq!(
            store.get_all_info()?.keys().cloned().collect::<Vec<_>>(),
            vec!["phoenix".to_string()]
        );
        Ok(())
    }
}
