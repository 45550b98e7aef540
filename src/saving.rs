//! Process-wide storage of the last uploaded workbook.
//!
//! Three files live in the data directory: the raw upload, a gzip'd bincode
//! snapshot of the parsed table, and `last_upload.txt` holding the upload
//! timestamp. The timestamp file is written last on publish and removed
//! first on reset, so its presence means the other two are complete.
//! Readers cache the parsed workbook keyed by the timestamp contents.

use crate::error::{DashboardError, Result};
use crate::ledger::Ledger;
use crate::table::RawTable;
use bincode::{deserialize_from, serialize_into};
use chrono::{DateTime, Local};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

pub const RAW_FILE: &str = "workbook.xlsx";
pub const SNAPSHOT_FILE: &str = "workbook.bin.gz";
pub const TIMESTAMP_FILE: &str = "last_upload.txt";
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Display form of an upload time.
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    filename: String,
    table: RawTable,
}

/// The currently published workbook, parsed.
#[derive(Clone, Debug)]
pub struct StoredWorkbook {
    pub filename: String,
    pub uploaded_at: String,
    /// Fresh for every publish or reload, even within the same second.
    pub revision: String,
    pub ledger: Arc<Ledger>,
}

/// Shared store for the last upload. One writer at a time; readers get a
/// cached parse keyed by the upload timestamp.
pub struct WorkbookStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
    cache: RwLock<Option<StoredWorkbook>>,
}

fn poisoned() -> DashboardError {
    DashboardError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "workbook store lock poisoned",
    ))
}

/// Writes `contents` to `path` through a temp file in the same directory.
fn write_atomic(dir: &Path, path: &Path, contents: impl FnOnce(&mut File) -> Result<()>) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    contents(tmp.as_file_mut())?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| DashboardError::Io(e.error))?;
    Ok(())
}

impl WorkbookStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(WorkbookStore {
            dir,
            write_lock: Mutex::new(()),
            cache: RwLock::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Publish a new upload
    ///
    /// Replaces the previous workbook for every session. The raw bytes and
    /// snapshot are written before the timestamp file.
    ///
    /// # Arguments
    /// * `bytes` - The file exactly as uploaded
    /// * `filename` - Original file name
    /// * `table` - The parsed table
    ///
    /// # Returns
    /// * `Result<StoredWorkbook>` - The newly current workbook
    pub fn publish(&self, bytes: &[u8], filename: &str, table: RawTable) -> Result<StoredWorkbook> {
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;

        write_atomic(&self.dir, &self.path(RAW_FILE), |f| {
            f.write_all(bytes)?;
            Ok(())
        })?;

        let snapshot = Snapshot {
            filename: filename.to_string(),
            table,
        };
        write_atomic(&self.dir, &self.path(SNAPSHOT_FILE), |f| {
            let encoder = GzEncoder::new(f, Compression::default());
            let mut writer = BufWriter::new(encoder);
            serialize_into(&mut writer, &snapshot)?;
            let encoder = writer
                .into_inner()
                .map_err(|e| DashboardError::Io(e.into_error()))?;
            encoder.finish()?;
            Ok(())
        })?;

        let uploaded_at = format_timestamp(Local::now());
        let revision = Uuid::new_v4().to_string();
        write_atomic(&self.dir, &self.path(TIMESTAMP_FILE), |f| {
            f.write_all(uploaded_at.as_bytes())?;
            Ok(())
        })?;

        let stored = StoredWorkbook {
            filename: snapshot.filename,
            uploaded_at,
            revision,
            ledger: Arc::new(Ledger::from_table(snapshot.table)),
        };
        *self.cache.write().map_err(|_| poisoned())? = Some(stored.clone());
        info!(
            "published workbook {} ({} rows) at {}",
            stored.filename,
            stored.ledger.rows.len(),
            stored.uploaded_at
        );
        Ok(stored)
    }

    /// Timestamp of the current upload, if any.
    pub fn stamp(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.path(TIMESTAMP_FILE)) {
            Ok(t) => Ok(Some(t.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The current workbook, loaded from disk when another process (or a
    /// restart) published it.
    pub fn current(&self) -> Result<Option<StoredWorkbook>> {
        let Some(uploaded_at) = self.stamp()? else {
            return Ok(None);
        };

        if let Some(cached) = self.cache.read().map_err(|_| poisoned())?.as_ref() {
            if cached.uploaded_at == uploaded_at {
                debug!("workbook cache hit ({})", uploaded_at);
                return Ok(Some(cached.clone()));
            }
        }

        let file = match File::open(self.path(SNAPSHOT_FILE)) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("timestamp present but snapshot missing, treating as no upload");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(GzDecoder::new(file));
        let snapshot: Snapshot = deserialize_from(&mut reader)?;

        let stored = StoredWorkbook {
            filename: snapshot.filename,
            uploaded_at,
            revision: Uuid::new_v4().to_string(),
            ledger: Arc::new(Ledger::from_table(snapshot.table)),
        };
        *self.cache.write().map_err(|_| poisoned())? = Some(stored.clone());
        Ok(Some(stored))
    }

    /// Raw bytes of the current upload.
    pub fn raw_bytes(&self) -> Result<Option<Vec<u8>>> {
        if self.stamp()?.is_none() {
            return Ok(None);
        }
        match fs::read(self.path(RAW_FILE)) {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the current upload for every session.
    pub fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        for name in [TIMESTAMP_FILE, SNAPSHOT_FILE, RAW_FILE] {
            match fs::remove_file(self.path(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        *self.cache.write().map_err(|_| poisoned())? = None;
        info!("workbook reset");
        Ok(())
    }
}
