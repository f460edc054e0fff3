//! Only one process may write to a given local store at a time.

use agenda_core::StoreConfig;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Holds the lock until dropped
#[derive(Debug)]
pub struct LockGuard {
    _file: File,
}

/// `<store>.lock`, next to the store itself. Two configs pointing at the
/// same store share a lock; different stores never contend.
fn lock_path(store_path: &Path) -> Result<PathBuf> {
    let mut name = store_path
        .file_name()
        .map(OsString::from)
        .ok_or_else(|| anyhow::anyhow!("Store path {} has no file name", store_path.display()))?;
    name.push(".lock");

    let path = store_path.with_file_name(name);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    Ok(path)
}

pub fn acquire_lock(store: &StoreConfig) -> Result<LockGuard> {
    acquire_lock_at(&store.expanded_path())
}

fn acquire_lock_at(store_path: &Path) -> Result<LockGuard> {
    let path = lock_path(store_path)?;
    let file = File::create(&path).context("Failed to create lock file")?;

    file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!(
            "Another agenda process is using the store at {}.\n\
            If you believe this is an error, remove: {}",
            store_path.display(),
            path.display()
        )
    })?;

    tracing::debug!(lock = %path.display(), "Acquired store lock");
    Ok(LockGuard { _file: file })
}
