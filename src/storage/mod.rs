//! Sequential persistence of uploaded files.
//!
//! Uploads are written by a single worker thread so two peers finishing at the
//! same time never interleave writes, and the network loop never waits on the
//! disk. Each file is written to a hidden temporary name in the storage
//! directory and renamed into place only once it is complete, so a reader of
//! the directory never sees a partial upload.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::error::ErrorKind;
use crate::http::multipart::UploadedFile;
use crate::media::MediaInspector;
use crate::server::types::ReceivedFile;

const TEMP_PREFIX: &str = ".loopshare-";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} does not contain an audio track")]
    NotAudio(String),
    #[error("upload cancelled because the server stopped")]
    Cancelled,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::WriteFailed { .. } | StorageError::Cancelled => {
                ErrorKind::StorageWriteFailed
            }
            StorageError::NotAudio(_) => ErrorKind::MediaValidationFailed,
        }
    }
}

pub struct StorageJob {
    pub token: u64,
    pub file: UploadedFile,
}

pub struct StorageOutcome {
    pub token: u64,
    pub result: Result<ReceivedFile, StorageError>,
}

pub struct Storage {
    dir: PathBuf,
    inspector: Arc<dyn MediaInspector>,
    reject_non_audio: bool,
    cancel: Arc<AtomicBool>,
}

impl Storage {
    pub fn new(
        dir: PathBuf,
        inspector: Arc<dyn MediaInspector>,
        reject_non_audio: bool,
        cancel: Arc<AtomicBool>,
    ) -> Storage {
        Storage {
            dir,
            inspector,
            reject_non_audio,
            cancel,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Write `file` into the storage directory and return where it landed.
    pub fn persist(&self, file: UploadedFile) -> Result<ReceivedFile, StorageError> {
        let write_failed = |path: &Path, source: io::Error| StorageError::WriteFailed {
            path: path.display().to_string(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(|e| write_failed(&self.dir, e))?;

        let temp_path = make_temp_path(&self.dir, &file.filename);
        if let Err(e) = write_fully(&temp_path, &file.bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(write_failed(&temp_path, e));
        }
        let size_bytes = file.size_bytes;
        // The payload now lives on disk; release the in-memory copy.
        drop(file.bytes);

        if self.cancelled() {
            let _ = fs::remove_file(&temp_path);
            return Err(StorageError::Cancelled);
        }

        let has_audio_track = self.inspector.has_audio_track(&temp_path);
        if !has_audio_track && self.reject_non_audio {
            let _ = fs::remove_file(&temp_path);
            return Err(StorageError::NotAudio(file.filename));
        }

        let final_path = unique_destination(&self.dir, &file.filename);
        if self.cancelled() {
            let _ = fs::remove_file(&temp_path);
            return Err(StorageError::Cancelled);
        }
        if let Err(e) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(write_failed(&final_path, e));
        }

        tracing::info!(
            path = %final_path.display(),
            bytes = size_bytes,
            has_audio_track,
            "storage: file saved"
        );

        Ok(ReceivedFile {
            path: final_path,
            size_bytes,
            has_audio_track,
        })
    }
}

fn write_fully(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut f = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    f.write_all(bytes)?;
    f.sync_all()
}

/// Hidden temp name that keeps the original extension for media probing.
fn make_temp_path(dir: &Path, filename: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    dir.join(format!("{}{}-{}", TEMP_PREFIX, nanos, filename))
}

/// `name.ext`, or `name (1).ext`, `name (2).ext`, ... if taken.
fn unique_destination(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match filename.rfind('.') {
        Some(idx) if idx > 0 => (&filename[..idx], &filename[idx..]),
        _ => (filename, ""),
    };
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{} ({}){}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Remove temp files left behind by an earlier run.
pub fn cleanup_temp_files(dir: &Path) -> io::Result<usize> {
    let mut removed = 0usize;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if !file_name.to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        if fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Start the storage thread. It runs until the returned sender is dropped,
/// sending each outcome back and calling `notify` so the network loop wakes.
pub fn spawn_worker<N>(
    storage: Storage,
    outcomes: mpsc::Sender<StorageOutcome>,
    notify: N,
) -> io::Result<(mpsc::Sender<StorageJob>, thread::JoinHandle<()>)>
where
    N: Fn() + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<StorageJob>();
    let handle = thread::Builder::new()
        .name("loopshare-storage".to_string())
        .spawn(move || {
            for job in rx {
                let result = storage.persist(job.file);
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "storage: upload not saved");
                }
                if outcomes
                    .send(StorageOutcome {
                        token: job.token,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
                notify();
            }
            tracing::debug!("storage: worker exiting");
        })?;
    Ok((tx, handle))
}
