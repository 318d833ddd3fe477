// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durable storage for the current token record and one prior backup.
//!
//! The file store keeps two JSON files: the primary at the configured path
//! and a `.bak` sibling. Every write goes to a unique temp file that is
//! fsynced and renamed over the target, so a crash mid-save leaves either the
//! old or the new file in place, never a truncated one.
//!
//! Each save first copies the readable primary into the backup, so the
//! backup always holds the immediately prior record.

use crate::models::TokenRecord;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Credential storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No token record stored")]
    NotFound,

    #[error("Stored token record is corrupt: {0}")]
    Corrupt(String),

    #[error("Token storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence contract used by the authenticator.
pub trait CredentialStore: Send + Sync {
    /// Read and validate the primary record.
    fn load(&self) -> Result<TokenRecord, StoreError>;

    /// Atomically persist `record`, rotating the previous one into the backup
    /// slot first.
    fn save(&self, record: &TokenRecord) -> Result<(), StoreError>;

    /// Read the backup, rewrite the primary from it and return it.
    fn restore_backup(&self) -> Result<TokenRecord, StoreError>;
}

/// File-backed store: `<path>` plus `<path>.bak`.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    backup_path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let backup_path = crate::config::backup_path_for(&path);
        Self { path, backup_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<TokenRecord, StoreError> {
        read_record(&self.path)
    }

    fn save(&self, record: &TokenRecord) -> Result<(), StoreError> {
        record.validate().map_err(StoreError::Corrupt)?;

        // Only a readable primary is worth keeping as the backup.
        if let Ok(previous) = read_record(&self.path) {
            if &previous != record {
                write_atomic(&self.backup_path, &previous)?;
                tracing::debug!(path = %self.backup_path.display(), "Rotated token record into backup");
            }
        }

        write_atomic(&self.path, record)?;
        tracing::info!(path = %self.path.display(), "Token record saved");
        Ok(())
    }

    fn restore_backup(&self) -> Result<TokenRecord, StoreError> {
        let record = read_record(&self.backup_path)?;
        write_atomic(&self.path, &record)?;
        tracing::warn!(path = %self.path.display(), "Token record restored from backup");
        Ok(record)
    }
}

fn read_record(path: &Path) -> Result<TokenRecord, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NotFound),
        Err(e) => return Err(StoreError::Io(e)),
    };

    let record: TokenRecord =
        serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    record.validate().map_err(StoreError::Corrupt)?;
    Ok(record)
}

/// Write `record` to a unique temp file next to `path`, fsync, then rename.
fn write_atomic(path: &Path, record: &TokenRecord) -> Result<(), StoreError> {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let json = serde_json::to_vec_pretty(record)
        .map_err(|e| StoreError::Corrupt(format!("serialize failed: {}", e)))?;

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "token".to_string());
    let tmp_path = path.with_file_name(format!(".{}.{}.{}.tmp", file_name, std::process::id(), seq));

    let result = (|| -> std::io::Result<()> {
        let mut file = open_private(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result.map_err(StoreError::Io)
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}

/// In-memory store with the same rotation rules, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<MemorySlots>,
    saves: AtomicU32,
}

#[derive(Debug, Default)]
struct MemorySlots {
    primary: Option<TokenRecord>,
    backup: Option<TokenRecord>,
    fail_saves: u32,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: TokenRecord) -> Self {
        let store = Self::default();
        if let Ok(mut slots) = store.inner.lock() {
            slots.primary = Some(record);
        }
        store
    }

    /// Make the next `count` saves fail with an I/O error.
    pub fn fail_next_saves(&self, count: u32) {
        if let Ok(mut slots) = self.inner.lock() {
            slots.fail_saves = count;
        }
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn primary(&self) -> Option<TokenRecord> {
        self.inner.lock().ok().and_then(|s| s.primary.clone())
    }

    pub fn backup(&self) -> Option<TokenRecord> {
        self.inner.lock().ok().and_then(|s| s.backup.clone())
    }

    fn slots(&self) -> Result<std::sync::MutexGuard<'_, MemorySlots>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Io(std::io::Error::other("memory store lock poisoned")))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<TokenRecord, StoreError> {
        self.slots()?.primary.clone().ok_or(StoreError::NotFound)
    }

    fn save(&self, record: &TokenRecord) -> Result<(), StoreError> {
        record.validate().map_err(StoreError::Corrupt)?;
        let mut slots = self.slots()?;
        if slots.fail_saves > 0 {
            slots.fail_saves -= 1;
            return Err(StoreError::Io(std::io::Error::other("injected save failure")));
        }
        if let Some(previous) = slots.primary.take() {
            if &previous != record {
                slots.backup = Some(previous);
            }
        }
        slots.primary = Some(record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn restore_backup(&self) -> Result<TokenRecord, StoreError> {
        let mut slots = self.slots()?;
        let record = slots.backup.clone().ok_or(StoreError::NotFound)?;
        slots.primary = Some(record.clone());
        Ok(record)
    }
}
