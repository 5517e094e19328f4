//! Persisted state under `state_dir` (§6): the pid file, the canonical
//! model snapshot, and the last-known-good nft ruleset backup.
//!
//! The snapshot is the serialized form of `current` (§3 Lifecycle) — what
//! the reconciler compares against on reload and hands off to a new
//! process on upgrade (§4.G). It round-trips through `bincode` the same
//! way the teacher's local client state does.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::CanonicalConfig;

#[derive(Debug, Error)]
pub enum Error {
    #[error("snapshot file not found at {0}")]
    NoSnapshot(PathBuf),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("snapshot encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("snapshot decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("flywall.pid")
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.root.join("current.snapshot")
    }

    pub fn nft_backup_file(&self) -> PathBuf {
        self.root.join("nft.backup")
    }

    pub fn control_socket(&self) -> PathBuf {
        self.root.join("ctl.sock")
    }

    pub async fn ensure(&self) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub async fn write_pid(&self, pid: u32) -> Result<(), Error> {
        tokio::fs::write(self.pid_file(), pid.to_string()).await?;
        Ok(())
    }

    pub async fn remove_pid(&self) -> Result<(), Error> {
        match tokio::fs::remove_file(self.pid_file()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::IO(e)),
        }
    }

    /// Serializes `current` to the snapshot file (§6 Persisted state,
    /// §4.G handoff). Same wire format is used for the upgrade handoff file.
    pub async fn write_snapshot(&self, config: &CanonicalConfig) -> Result<(), Error> {
        write_snapshot_at(&self.snapshot_file(), config).await
    }

    pub async fn read_snapshot(&self) -> Result<CanonicalConfig, Error> {
        read_snapshot_at(&self.snapshot_file()).await
    }

    pub async fn write_nft_backup(&self, ruleset_text: &str) -> Result<(), Error> {
        tokio::fs::write(self.nft_backup_file(), ruleset_text).await?;
        Ok(())
    }

    pub async fn read_nft_backup(&self) -> Result<String, Error> {
        match tokio::fs::read_to_string(self.nft_backup_file()).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::IO(e)),
        }
    }
}

pub async fn write_snapshot_at(path: &Path, config: &CanonicalConfig) -> Result<(), Error> {
    let bytes = bincode::serde::encode_to_vec(config, bincode::config::standard())?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

pub async fn read_snapshot_at(path: &Path) -> Result<CanonicalConfig, Error> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::NoSnapshot(path.to_path_buf())),
        Err(e) => return Err(Error::IO(e)),
    };
    let (config, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
    Ok(config)
}
