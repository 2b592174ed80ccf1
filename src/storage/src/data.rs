use std::fs;
use std::path::{Path, PathBuf};

use opendal::layers::TracingLayer;
use opendal::{ErrorKind, Operator};

use crate::error::{StorageError, StorageResult};

/// TMP_DIR holds partially written blobs until they are renamed in place.
const TMP_DIR: &str = ".tmp";

/// StateStore persists the serialized state of each domain as a blob of its own,
/// so saving or deleting one domain never touches another.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// save_data persists data as the state of domain name. With offset 0 the
    /// blob is replaced, otherwise data is written at offset of the existing
    /// blob, which is cut there first. The data is durable when the call returns.
    async fn save_data(&self, name: &str, data: &[u8], offset: u64) -> StorageResult<()>;

    /// load_data reads length bytes from offset, length 0 reads to the end.
    /// Returns StorageError::NotFound if the domain was never saved.
    async fn load_data(&self, name: &str, offset: u64, length: u64) -> StorageResult<Vec<u8>>;

    /// delete_data removes the blob of a domain, deleting a missing blob is a no-op.
    async fn delete_data(&self, name: &str) -> StorageResult<()>;
}

/// DataStore is the filesystem StateStore, one file per domain under the data directory.
#[derive(Clone)]
pub struct DataStore {
    op: Operator,
    root: PathBuf,
}

impl DataStore {
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        fs::create_dir_all(dir.as_ref())?;
        let root = fs::canonicalize(dir.as_ref())?;

        let tmp = root.join(TMP_DIR);
        fs::create_dir_all(&tmp)?;

        let mut builder = opendal::services::Fs::default();
        builder.root(&root.to_string_lossy());
        builder.atomic_write_dir(&tmp.to_string_lossy());

        let op = Operator::new(builder)?.layer(TracingLayer).finish();

        tracing::debug!("data store opened at {}", root.display());
        Ok(Self { op, root })
    }

    /// path returns the file backing the state of domain name.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub async fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.op.is_exist(name).await?)
    }

    async fn read_all(&self, name: &str) -> StorageResult<Vec<u8>> {
        self.op.read(name).await.map_err(|e| not_found(name, e))
    }
}

fn not_found(name: &str, e: opendal::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::Data(e)
    }
}

#[async_trait]
impl StateStore for DataStore {
    async fn save_data(&self, name: &str, data: &[u8], offset: u64) -> StorageResult<()> {
        let bs = if offset == 0 {
            data.to_vec()
        } else {
            let mut current = match self.read_all(name).await {
                Ok(current) => current,
                Err(StorageError::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            };
            if offset > current.len() as u64 {
                return Err(StorageError::OutOfRange {
                    name: name.to_string(),
                    offset,
                    len: current.len() as u64,
                });
            }
            current.truncate(offset as usize);
            current.extend_from_slice(data);
            current
        };

        self.op.write(name, bs).await?;
        Ok(())
    }

    async fn load_data(&self, name: &str, offset: u64, length: u64) -> StorageResult<Vec<u8>> {
        if offset == 0 && length == 0 {
            return self.read_all(name).await;
        }

        let r = if length == 0 {
            self.op.range_read(name, offset..).await
        } else {
            self.op.range_read(name, offset..offset + length).await
        };
        r.map_err(|e| not_found(name, e))
    }

    async fn delete_data(&self, name: &str) -> StorageResult<()> {
        self.op.delete(name).await?;
        Ok(())
    }
}
