//! Durable checkpoint of deployed addresses.
//!
//! The store keeps the whole [`DeploymentAddresses`] in memory and rewrites the JSON
//! file after each chain pass. Writes go to a temporary file that is renamed over the
//! previous one, so readers never observe a torn file. An advisory lock file
//! serializes writers from different processes; within a process the async mutex does.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fs2::FileExt;
use tokio::sync::Mutex;

use crate::types::{AddressRecord, ChainId, DeploymentAddresses};

pub struct AddressStore {
    path: PathBuf,
    state: Mutex<DeploymentAddresses>,
}

impl AddressStore {
    /// Open the store at `path`, loading whatever was persisted there.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let addresses = Self::load(&path);
        tracing::info!(
            path = %path.display(),
            chains = addresses.len(),
            "Address store opened"
        );
        Self {
            path,
            state: Mutex::new(addresses),
        }
    }

    /// Read the persisted addresses.
    ///
    /// A missing, unreadable or malformed file yields an empty mapping: at worst a
    /// contract gets deployed twice, which is preferable to not deploying at all.
    pub fn load(path: &Path) -> DeploymentAddresses {
        match read_file(path) {
            Ok(Some(addresses)) => addresses,
            Ok(None) => DeploymentAddresses::default(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %format!("{e:#}"),
                    "Failed to read address store, starting fresh"
                );
                DeploymentAddresses::default()
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> DeploymentAddresses {
        self.state.lock().await.clone()
    }

    /// The persisted record of `chain`, empty if nothing was deployed there yet.
    pub async fn record(&self, chain: ChainId) -> AddressRecord {
        self.state.lock().await.record(chain)
    }

    /// Merge `record` into the entry of `chain` and write the whole mapping back.
    ///
    /// Addresses already persisted are never replaced. Calling this again with the same
    /// record leaves the file unchanged.
    pub async fn save(&self, record: &AddressRecord, chain: ChainId) -> Result<()> {
        let mut state = self.state.lock().await;

        let mut next = state.clone();
        next.merge_chain(chain, record);

        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || write_merged(&path, next))
            .await
            .context("Address store writer panicked")??;

        tracing::debug!(
            path = %self.path.display(),
            chain,
            entries = record.len(),
            "Addresses saved"
        );

        *state = written;
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<Option<DeploymentAddresses>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .context(format!("Failed to read addresses from {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(None);
    }

    let addresses = serde_json::from_str(&content)
        .context(format!("Failed to parse addresses in {}", path.display()))?;
    Ok(Some(addresses))
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Write `addresses` to `path` under the lock file, first folding in whatever another
/// process persisted since we last read the file. Returns the mapping written.
fn write_merged(path: &Path, mut addresses: DeploymentAddresses) -> Result<DeploymentAddresses> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create directory {}", parent.display()))?;
    }

    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(path))
        .context("Failed to open address store lock file")?;
    lock.lock_exclusive()
        .context("Failed to lock address store")?;

    // Another process may have persisted other chains in the meantime.
    if let Ok(Some(on_disk)) = read_file(path) {
        for (chain, record) in on_disk.iter() {
            addresses.merge_chain(*chain, record);
        }
    }

    let content =
        serde_json::to_string_pretty(&addresses).context("Failed to serialize addresses")?;

    let tmp = temp_path(path);
    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp)
            .context(format!("Failed to create {}", tmp.display()))?;
        file.write_all(content.as_bytes())
            .context(format!("Failed to write {}", tmp.display()))?;
        file.sync_all()
            .context(format!("Failed to sync {}", tmp.display()))?;
        std::fs::rename(&tmp, path).context(format!(
            "Failed to move {} to {}",
            tmp.display(),
            path.display()
        ))
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    let _ = FileExt::unlock(&lock);

    result.map(|()| addresses)
}
