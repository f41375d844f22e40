//! Partition Storage
//!
//! Append-only storage for day partitions. Individual records can be
//! appended and read back but never updated or deleted; the only way
//! to remove data is to remove a whole partition.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::audit::partition::PartitionId;
use crate::error::{AuditError, AuditResult};

/// What happens to a partition the retention sweeper removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Delete,
    Archive,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

/// Exclusive hold on one partition, shared with every process using the
/// same storage. Released on drop.
#[derive(Debug)]
pub struct PartitionLock {
    partition: PartitionId,
    file: Option<File>,
}

impl PartitionLock {
    /// A hold for stores with no other writers to coordinate with
    pub fn in_process(partition: PartitionId) -> Self {
        Self {
            partition,
            file: None,
        }
    }

    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }
}

/// Append-only, partitioned record storage
pub trait PartitionStore: Send + Sync {
    /// Take the exclusive append hold on a partition, waiting for other writers
    fn lock(&self, partition: &PartitionId) -> AuditResult<PartitionLock>;

    /// Durably append one serialized record under a held lock. Returns the
    /// partition size after the write.
    fn append(&self, lock: &PartitionLock, record: &str) -> AuditResult<u64>;

    /// Every record of the partition in append order
    fn read_partition(&self, partition: &PartitionId) -> AuditResult<Vec<String>>;

    /// Current size of the partition; grows with every append from any writer
    fn size(&self, partition: &PartitionId) -> AuditResult<u64>;

    /// All partitions currently stored, oldest first
    fn partitions(&self) -> AuditResult<Vec<PartitionId>>;

    fn exists(&self, partition: &PartitionId) -> AuditResult<bool>;

    /// Remove a whole partition. Returns how it was disposed of.
    fn remove_partition(&self, partition: &PartitionId) -> AuditResult<Disposition>;
}

const LOCK_ATTEMPTS: usize = 3;

/// One JSONL file per partition inside a log directory
#[derive(Debug, Clone)]
pub struct FileStore {
    log_dir: PathBuf,
    archive_dir: Option<PathBuf>,
}

impl FileStore {
    /// Create a store deleting removed partitions
    pub fn new(log_dir: impl Into<PathBuf>) -> AuditResult<Self> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir).map_err(|e| {
            AuditError::StorageError(format!("Failed to create log directory {:?}: {}", log_dir, e))
        })?;
        info!("Audit partition store at {:?}", log_dir);
        Ok(Self {
            log_dir,
            archive_dir: None,
        })
    }

    /// Move removed partitions into `archive_dir` instead of deleting them
    pub fn with_archive_dir(mut self, archive_dir: impl Into<PathBuf>) -> AuditResult<Self> {
        let archive_dir = archive_dir.into();
        fs::create_dir_all(&archive_dir).map_err(|e| {
            AuditError::StorageError(format!(
                "Failed to create archive directory {:?}: {}",
                archive_dir, e
            ))
        })?;
        self.archive_dir = Some(archive_dir);
        Ok(self)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn partition_path(&self, partition: &PartitionId) -> PathBuf {
        self.log_dir.join(partition.file_name())
    }

    /// Open and flock the partition file. Retries if the file was removed
    /// while we waited, so the hold is never on an unlinked file.
    fn lock_file(&self, path: &Path, create: bool) -> AuditResult<File> {
        for _ in 0..LOCK_ATTEMPTS {
            let file = OpenOptions::new()
                .create(create)
                .append(true)
                .open(path)
                .map_err(|e| AuditError::StorageError(format!("Failed to open {:?}: {}", path, e)))?;
            file.lock_exclusive()
                .map_err(|e| AuditError::StorageError(format!("Failed to lock {:?}: {}", path, e)))?;
            if path.exists() {
                return Ok(file);
            }
            debug!("{:?} was removed while waiting for its lock", path);
        }
        Err(AuditError::StorageError(format!(
            "Failed to lock {:?}: partition kept disappearing",
            path
        )))
    }
}

impl PartitionStore for FileStore {
    fn lock(&self, partition: &PartitionId) -> AuditResult<PartitionLock> {
        let file = self.lock_file(&self.partition_path(partition), true)?;
        Ok(PartitionLock {
            partition: *partition,
            file: Some(file),
        })
    }

    fn append(&self, lock: &PartitionLock, record: &str) -> AuditResult<u64> {
        let path = self.partition_path(&lock.partition);
        let file = lock.file.as_ref().ok_or_else(|| {
            AuditError::StorageError(format!("{} is not locked by this store", lock.partition))
        })?;
        let before = file
            .metadata()
            .map_err(|e| AuditError::StorageError(format!("Failed to stat {:?}: {}", path, e)))?
            .len();

        // Record and newline go out in one write so a line is never split.
        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');

        let mut writer = file;
        if let Err(e) = writer.write_all(line.as_bytes()) {
            // Drop any torn fragment so the next record starts on a clean line.
            if let Err(trunc) = file.set_len(before) {
                error!("Failed to roll back partial write to {:?}: {}", path, trunc);
            }
            return Err(AuditError::StorageError(format!("Failed to write to {:?}: {}", path, e)));
        }
        file.sync_data()
            .map_err(|e| AuditError::StorageError(format!("Failed to sync {:?}: {}", path, e)))?;
        Ok(before + line.len() as u64)
    }

    fn read_partition(&self, partition: &PartitionId) -> AuditResult<Vec<String>> {
        let path = self.partition_path(partition);
        if !path.exists() {
            return Ok(vec![]);
        }

        let file = File::open(&path)
            .map_err(|e| AuditError::StorageError(format!("Failed to open {:?}: {}", path, e)))?;

        let mut records = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                AuditError::StorageError(format!("Failed to read line {} of {:?}: {}", line_num + 1, path, e))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(line);
        }

        debug!("Read {} records from {}", records.len(), partition);
        Ok(records)
    }

    fn size(&self, partition: &PartitionId) -> AuditResult<u64> {
        match fs::metadata(self.partition_path(partition)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(AuditError::StorageError(format!(
                "Failed to stat partition {}: {}",
                partition, e
            ))),
        }
    }

    fn partitions(&self) -> AuditResult<Vec<PartitionId>> {
        let pattern = self.log_dir.join(PartitionId::file_pattern());
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern)
            .map_err(|e| AuditError::StorageError(format!("Invalid partition pattern: {}", e)))?;

        let mut partitions = Vec::new();
        for path in paths {
            let path = path
                .map_err(|e| AuditError::StorageError(format!("Failed to list partitions: {}", e)))?;
            if let Some(partition) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(PartitionId::from_file_name)
            {
                partitions.push(partition);
            }
        }

        partitions.sort();
        Ok(partitions)
    }

    fn exists(&self, partition: &PartitionId) -> AuditResult<bool> {
        Ok(self.partition_path(partition).is_file())
    }

    fn remove_partition(&self, partition: &PartitionId) -> AuditResult<Disposition> {
        let path = self.partition_path(partition);
        let _held = self.lock_file(&path, false)?;
        match &self.archive_dir {
            Some(archive_dir) => {
                let target = archive_dir.join(partition.file_name());
                fs::rename(&path, &target).map_err(|e| {
                    AuditError::StorageError(format!("Failed to archive {:?} to {:?}: {}", path, target, e))
                })?;
                info!("Archived audit partition {} to {:?}", partition, target);
                Ok(Disposition::Archive)
            }
            None => {
                fs::remove_file(&path).map_err(|e| {
                    AuditError::StorageError(format!("Failed to delete {:?}: {}", path, e))
                })?;
                info!("Deleted audit partition {}", partition);
                Ok(Disposition::Delete)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn day(s: &str) -> PartitionId {
        s.parse().unwrap()
    }

    fn put(store: &FileStore, partition: &PartitionId, record: &str) -> u64 {
        let lock = store.lock(partition).unwrap();
        store.append(&lock, record).unwrap()
    }

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();
        let partition = day("2024-01-01");

        put(&store, &partition, r#"{"n":1}"#);
        put(&store, &partition, r#"{"n":2}"#);

        let records = store.read_partition(&partition).unwrap();
        assert_eq!(records, vec![r#"{"n":1}"#.to_string(), r#"{"n":2}"#.to_string()]);
        assert!(store.exists(&partition).unwrap());
    }

    #[test]
    fn test_missing_partition_reads_empty() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();
        assert!(store.read_partition(&day("2024-02-02")).unwrap().is_empty());
        assert!(!store.exists(&day("2024-02-02")).unwrap());
    }

    #[test]
    fn test_partitions_sorted_and_filtered() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();

        put(&store, &day("2024-03-01"), "{}");
        put(&store, &day("2024-01-15"), "{}");
        fs::write(temp_dir.path().join("notes.txt"), "not a partition").unwrap();
        fs::write(temp_dir.path().join("audit_log_bogus.jsonl"), "{}").unwrap();

        assert_eq!(
            store.partitions().unwrap(),
            vec![day("2024-01-15"), day("2024-03-01")]
        );
    }

    #[test]
    fn test_remove_deletes_file() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();
        let partition = day("2024-01-01");
        put(&store, &partition, "{}");

        assert_eq!(store.remove_partition(&partition).unwrap(), Disposition::Delete);
        assert!(!store.exists(&partition).unwrap());
        assert!(store.remove_partition(&partition).is_err());
    }

    #[test]
    fn test_remove_archives_when_configured() {
        let temp_dir = tempdir().unwrap();
        let archive = temp_dir.path().join("archive");
        let store = FileStore::new(temp_dir.path().join("logs"))
            .unwrap()
            .with_archive_dir(&archive)
            .unwrap();
        let partition = day("2024-01-01");
        put(&store, &partition, "{}");

        assert_eq!(store.remove_partition(&partition).unwrap(), Disposition::Archive);
        assert!(!store.exists(&partition).unwrap());
        assert!(archive.join(partition.file_name()).is_file());
    }

    #[test]
    fn test_append_reports_size() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();
        let partition = day("2024-01-01");
        assert_eq!(store.size(&partition).unwrap(), 0);

        assert_eq!(put(&store, &partition, "{}"), 3);
        assert_eq!(put(&store, &partition, r#"{"n":1}"#), 11);
        assert_eq!(store.size(&partition).unwrap(), 11);
    }

    #[test]
    fn test_append_requires_file_lock() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();
        let partition = day("2024-01-01");

        let err = store
            .append(&PartitionLock::in_process(partition), "{}")
            .unwrap_err();
        assert!(matches!(err, AuditError::StorageError(_)));
        assert!(store.read_partition(&partition).unwrap().is_empty());
    }

    #[test]
    fn test_lock_is_exclusive_across_handles() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();
        let partition = day("2024-01-01");

        let held = store.lock(&partition).unwrap();
        let other = OpenOptions::new()
            .append(true)
            .open(store.partition_path(&partition))
            .unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(held);
        assert!(other.try_lock_exclusive().is_ok());
    }
}
