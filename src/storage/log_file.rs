//! Append-only record log on the local file system
//!
//! Each record is `[id: u64 LE][len: u32 LE][payload]`. Appends are followed
//! by `sync_data`, so an acknowledged `put` survives a crash. A record that was
//! only partly written when the process died is cut off the next time the log
//! is opened. `clear` swaps in an empty file with an atomic rename and syncs
//! the directory so the swap itself is durable.

use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::fs::{self as tokio_fs, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{KvStore, StorageError};

const HEADER_LEN: usize = 12;

struct LogState {
    /// `None` after a failed reopen or rollback; the next write reopens it
    /// and cuts the file back to `len` first
    file: Option<File>,
    /// Bytes covered by acknowledged records
    len: u64,
    next_id: u64,
    count: usize,
}

pub struct FileStore {
    path: PathBuf,
    state: Mutex<LogState>,
    #[cfg(test)]
    faults: Faults,
}

#[derive(Clone, Copy)]
enum Fault {
    TornWrite,
    Rollback,
}

/// Failures the tests can arm; each fires once.
#[cfg(test)]
#[derive(Default)]
struct Faults {
    torn_write: AtomicBool,
    rollback: AtomicBool,
}

impl FileStore {
    /// Open (or create) the log at `path`, repairing a torn tail.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = PathBuf::from(path.as_ref());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio_fs::create_dir_all(parent).await?;
            }
        }

        let bytes = match tokio_fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let (records, valid_len) = parse_records(&bytes);

        let file = open_append(&path).await?;
        if valid_len < bytes.len() {
            warn!(
                "Truncating {} torn byte(s) from {}",
                bytes.len() - valid_len,
                path.display()
            );
            file.set_len(valid_len as u64).await?;
            file.sync_all().await?;
        }

        let next_id = records.iter().map(|(id, _)| *id).max().unwrap_or(0) + 1;
        debug!(
            "Opened offline log {} with {} record(s)",
            path.display(),
            records.len()
        );

        Ok(Self {
            path,
            state: Mutex::new(LogState {
                file: Some(file),
                len: valid_len as u64,
                next_id,
                count: records.len(),
            }),
            #[cfg(test)]
            faults: Faults::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    fn fault(&self, fault: Fault) -> bool {
        let flag = match fault {
            Fault::TornWrite => &self.faults.torn_write,
            Fault::Rollback => &self.faults.rollback,
        };
        flag.swap(false, Ordering::SeqCst)
    }

    #[cfg(not(test))]
    fn fault(&self, _fault: Fault) -> bool {
        false
    }

    /// Reopen for appending, cutting off anything past the committed length.
    async fn reopen_at(&self, committed: u64) -> Result<File, StorageError> {
        let file = open_append(&self.path).await?;
        let on_disk = file.metadata().await?.len();
        if on_disk > committed {
            warn!(
                "Cutting {} uncommitted byte(s) from {}",
                on_disk - committed,
                self.path.display()
            );
            file.set_len(committed).await?;
            file.sync_all().await?;
        }
        Ok(file)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".clearing");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn put(&self, value: Vec<u8>) -> Result<u64, StorageError> {
        let payload_len = u32::try_from(value.len()).map_err(|_| {
            StorageError::SerializationError(format!("payload of {} bytes is too large", value.len()))
        })?;

        let mut state = self.state.lock().await;
        let id = state.next_id;

        let mut record = Vec::with_capacity(HEADER_LEN + value.len());
        record.extend_from_slice(&id.to_le_bytes());
        record.extend_from_slice(&payload_len.to_le_bytes());
        record.extend_from_slice(&value);

        if state.file.is_none() {
            state.file = Some(self.reopen_at(state.len).await?);
        }
        let committed = state.len;
        let file = match state.file.as_mut() {
            Some(file) => file,
            None => return Err(StorageError::Unavailable("log file not open".into())),
        };

        let written: std::io::Result<()> = async {
            if self.fault(Fault::TornWrite) {
                file.write_all(&record[..record.len() / 2]).await?;
                file.sync_data().await?;
                return Err(fault_error("torn write"));
            }
            file.write_all(&record).await?;
            file.sync_data().await
        }
        .await;

        if let Err(e) = written {
            // keep later appends readable by cutting off the partial record
            let rolled_back: std::io::Result<()> = async {
                if self.fault(Fault::Rollback) {
                    return Err(fault_error("rollback"));
                }
                file.set_len(committed).await
            }
            .await;
            if let Err(repair) = rolled_back {
                warn!(
                    "Could not roll back partial append: {}; repairing before next write",
                    repair
                );
                state.file = None;
            }
            return Err(e.into());
        }

        state.len += record.len() as u64;
        state.next_id += 1;
        state.count += 1;
        Ok(id)
    }

    async fn get_all(&self) -> Result<Vec<(u64, Vec<u8>)>, StorageError> {
        let _state = self.state.lock().await;
        let bytes = match tokio_fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let (mut records, _) = parse_records(&bytes);
        records.sort_by_key(|(id, _)| *id);
        Ok(records)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let temp = self.temp_path();

        let empty = File::create(&temp).await?;
        empty.sync_all().await?;
        drop(empty);
        tokio_fs::rename(&temp, &self.path).await?;

        // the old handle points at the replaced file
        state.file = None;
        state.len = 0;
        state.count = 0;
        sync_parent_dir(&self.path).await?;
        state.file = Some(open_append(&self.path).await?);
        Ok(())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.state.lock().await.count)
    }
}

async fn open_append(path: &Path) -> Result<File, StorageError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(file)
}

fn fault_error(what: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, format!("injected {} failure", what))
}

/// Make a rename inside the log's directory durable.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Parse complete records, returning them and the byte length they cover.
fn parse_records(bytes: &[u8]) -> (Vec<(u64, Vec<u8>)>, usize) {
    let mut records = Vec::new();
    let mut offset = 0;

    while bytes.len() - offset >= HEADER_LEN {
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[offset..offset + 8]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[offset + 8..offset + HEADER_LEN]);

        let start = offset + HEADER_LEN;
        let end = start + u32::from_le_bytes(len) as usize;
        if end > bytes.len() {
            break;
        }

        records.push((u64::from_le_bytes(id), bytes[start..end].to_vec()));
        offset = end;
    }

    (records, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        {
            let store = FileStore::open(&path).await.unwrap();
            store.put(b"first".to_vec()).await.unwrap();
            store.put(b"second".to_vec()).await.unwrap();
        }

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        let payloads: Vec<Vec<u8>> = store
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(payloads, vec![b"first".to_vec(), b"second".to_vec()]);

        // ids keep increasing across restarts
        let id = store.put(b"third".to_vec()).await.unwrap();
        assert_eq!(id, 3);
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        {
            let store = FileStore::open(&path).await.unwrap();
            store.put(b"whole".to_vec()).await.unwrap();
        }
        let intact_len = std::fs::metadata(&path).unwrap().len();

        // header claims 100 bytes, only 3 made it to disk
        let mut torn = Vec::new();
        torn.extend_from_slice(&2u64.to_le_bytes());
        torn.extend_from_slice(&100u32.to_le_bytes());
        torn.extend_from_slice(b"abc");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&torn);
        std::fs::write(&path, bytes).unwrap();

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact_len);
        assert_eq!(store.count().await.unwrap(), 1);

        store.put(b"after".to_vec()).await.unwrap();
        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].1, b"after".to_vec());
    }

    #[tokio::test]
    async fn test_clear_empties_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.log");
        let store = FileStore::open(&path).await.unwrap();

        for i in 0..4u8 {
            store.put(vec![i]).await.unwrap();
        }
        store.clear().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.get_all().await.unwrap().is_empty());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        assert!(!store.temp_path().exists());

        store.put(vec![9]).await.unwrap();
        drop(store);
        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_rollback_does_not_bury_later_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");
        let store = FileStore::open(&path).await.unwrap();

        store.put(b"first".to_vec()).await.unwrap();
        store.faults.torn_write.store(true, Ordering::SeqCst);
        store.faults.rollback.store(true, Ordering::SeqCst);
        assert!(store.put(b"lost".to_vec()).await.is_err());

        store.put(b"third".to_vec()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        drop(store);

        let reopened = FileStore::open(&path).await.unwrap();
        let payloads: Vec<Vec<u8>> = reopened
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(payloads, vec![b"first".to_vec(), b"third".to_vec()]);
    }

    #[tokio::test]
    async fn test_rolled_back_write_leaves_log_intact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");
        let store = FileStore::open(&path).await.unwrap();

        store.put(b"first".to_vec()).await.unwrap();
        let committed = std::fs::metadata(&path).unwrap().len();
        store.faults.torn_write.store(true, Ordering::SeqCst);
        assert!(store.put(b"lost".to_vec()).await.is_err());

        assert_eq!(std::fs::metadata(&path).unwrap().len(), committed);
        store.put(b"second".to_vec()).await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_directory_sync_after_rename() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");
        std::fs::write(&path, b"").unwrap();

        sync_parent_dir(&path).await.unwrap();
        sync_parent_dir(Path::new("queue.log")).await.unwrap();
    }

    #[test]
    fn test_parse_stops_at_short_header() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(b"ok");
        bytes.extend_from_slice(&[0, 1, 2]);

        let (records, valid) = parse_records(&bytes);
        assert_eq!(records, vec![(1, b"ok".to_vec())]);
        assert_eq!(valid, 14);
    }
}
