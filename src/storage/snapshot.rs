//! Snapshot file backend for computation state.
//!
//! All states live in memory and are written to a single snapshot file that
//! atomically replaces the previous one (write to a temp file, fsync, rename).

use super::{ComputationState, StateBackend, StateStats};
use crate::error::{Result, TraceError};
use crate::types::TraceId;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const SNAPSHOT_MAGIC: &[u8] = b"TRACEKIT_STATE";
const SNAPSHOT_VERSION: u8 = 1;

/// State backend persisted to a snapshot file.
#[derive(Debug)]
pub struct SnapshotStateBackend {
    path: PathBuf,
    states: BTreeMap<String, String>,
    write_every: usize,
    saves_since_write: usize,
    saves: u64,
}

impl SnapshotStateBackend {
    /// Open the snapshot at `path`, loading any states it already holds.
    /// A missing or empty file starts empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let states = Self::load(&path)?;
        Ok(Self {
            path,
            states,
            write_every: 1,
            saves_since_write: 0,
            saves: 0,
        })
    }

    /// Write the file only every `saves` saves instead of on every save.
    /// Unwritten saves are lost unless [`flush`](Self::flush) is called.
    pub fn with_write_every(mut self, saves: usize) -> Self {
        self.write_every = saves.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<BTreeMap<String, String>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(BTreeMap::new());
        }

        let mut reader = BufReader::new(file);

        let mut magic = vec![0u8; SNAPSHOT_MAGIC.len()];
        reader.read_exact(&mut magic)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(TraceError::InvalidFormat);
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(TraceError::InvalidFormat);
        }

        bincode::deserialize_from(reader).map_err(|e| {
            TraceError::SerializationWithContext(format!(
                "Failed to read state snapshot '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Write all states to disk now.
    pub fn flush(&mut self) -> Result<()> {
        let temp_path = self.temp_path();

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(SNAPSHOT_MAGIC)?;
        writer.write_all(&[SNAPSHOT_VERSION])?;
        bincode::serialize_into(&mut writer, &self.states).map_err(|e| {
            TraceError::SerializationWithContext(format!(
                "Failed to write state snapshot '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &self.path)?;
        self.saves_since_write = 0;
        Ok(())
    }

    fn record_save(&mut self) -> Result<()> {
        self.saves += 1;
        self.saves_since_write += 1;
        if self.saves_since_write >= self.write_every {
            self.flush()?;
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        if let Some(name) = temp.file_name() {
            let mut new_name = name.to_string_lossy().into_owned();
            new_name.push_str(".tmp");
            temp.set_file_name(new_name);
        }
        temp
    }
}

impl StateBackend for SnapshotStateBackend {
    fn load_state(&self, trace: &TraceId) -> Result<Option<ComputationState>> {
        self.states
            .get(trace.as_str())
            .map(|json| ComputationState::from_json(json))
            .transpose()
    }

    fn save_state(&mut self, trace: &TraceId, state: &ComputationState) -> Result<()> {
        self.states.insert(trace.as_str().to_string(), state.to_json()?);
        self.record_save()
    }

    fn remove_state(&mut self, trace: &TraceId) -> Result<()> {
        if self.states.remove(trace.as_str()).is_some() {
            self.record_save()?;
        }
        Ok(())
    }

    fn stats(&self) -> StateStats {
        StateStats {
            entries: self.states.len(),
            saves: self.saves,
            size_bytes: self.states.values().map(String::len).sum(),
        }
    }
}
