//! On-disk journal for update batches.
//!
//! Layout of a state directory:
//! - `linkage.wal` — append-only log of bincode-framed [`UpdateBatch`]es
//! - `snapshot.json` — full engine state as of the last checkpoint
//!
//! Each frame is a little-endian u32 length followed by the bincode payload,
//! synced after every append. Recovery loads the snapshot (if any) and then
//! replays whatever batches the journal still holds.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::batch::{PersistenceSink, UpdateBatch};
use crate::StoreError;

const JOURNAL_FILE: &str = "linkage.wal";
const SNAPSHOT_FILE: &str = "snapshot.json";

/// Journal-backed persistence sink.
pub struct JournalSink {
    file: Mutex<File>,
    journal_path: PathBuf,
    snapshot_path: PathBuf,
}

impl JournalSink {
    /// Open (creating if needed) the journal inside `dir`.
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let journal_path = dir.join(JOURNAL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&journal_path)?;

        Ok(Self {
            file: Mutex::new(file),
            journal_path,
            snapshot_path: dir.join(SNAPSHOT_FILE),
        })
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Append one batch frame. Returns the number of bytes written.
    pub fn append(&self, batch: &UpdateBatch) -> std::io::Result<u64> {
        let mut file = self.file.lock();

        let data = bincode::serialize(batch)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let len = data.len() as u32;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(&data)?;
        file.sync_data()?;

        Ok(len as u64 + 4)
    }

    /// Replay every batch in the journal, oldest first.
    pub fn replay<F: FnMut(UpdateBatch) -> std::io::Result<()>>(
        &self,
        mut handler: F,
    ) -> std::io::Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;

        loop {
            let mut len_bytes = [0u8; 4];
            match file.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            file.read_exact(&mut data)?;

            let batch: UpdateBatch = bincode::deserialize(&data)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

            handler(batch)?;
        }

        Ok(())
    }

    /// Drop all journal frames. Called after a snapshot made them redundant.
    pub fn truncate(&self) -> std::io::Result<()> {
        let mut file = self.file.lock();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Write a full-state snapshot as JSON.
    pub fn save_snapshot<S: Serialize>(&self, state: &S) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(state)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.snapshot_path, data)
    }

    /// Load the last snapshot, or `None` if one was never written.
    pub fn load_snapshot<S: DeserializeOwned>(&self) -> std::io::Result<Option<S>> {
        let data = match std::fs::read(&self.snapshot_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let state = serde_json::from_slice(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Some(state))
    }

    /// Snapshot the given state and truncate the journal behind it.
    pub fn checkpoint<S: Serialize>(&self, state: &S) -> std::io::Result<()> {
        self.save_snapshot(state)?;
        self.truncate()
    }
}

impl PersistenceSink for JournalSink {
    fn apply(&mut self, batch: &UpdateBatch) -> Result<(), StoreError> {
        self.append(batch)?;
        Ok(())
    }
}

/// Appending takes `&self` internally, so a shared journal can serve as a
/// sink while another handle keeps checkpointing rights.
impl PersistenceSink for std::sync::Arc<JournalSink> {
    fn apply(&mut self, batch: &UpdateBatch) -> Result<(), StoreError> {
        self.append(batch)?;
        Ok(())
    }
}
