//! Durable checkpoint artifacts.
//!
//! A checkpoint directory holds two files:
//!
//! - `latest.json`: written every checkpoint interval and at shutdown
//! - `best.json`: written when the moving-average reward improves
//!
//! Writes go to a temporary file that is renamed into place, so a crash
//! mid-write never leaves a truncated artifact behind. Any failure to load
//! (missing, unreadable, corrupt, newer format) is reported as
//! [`Error::CheckpointUnavailable`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::rl::agent::PolicyState;
use crate::rl::error::{Error, Result};

/// Version of the checkpoint envelope.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Which artifact to read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Most recent state.
    Latest,
    /// Best moving-average reward so far.
    Best,
}

impl CheckpointKind {
    /// File name inside the checkpoint directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            CheckpointKind::Latest => "latest.json",
            CheckpointKind::Best => "best.json",
        }
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointKind::Latest => write!(f, "latest"),
            CheckpointKind::Best => write!(f, "best"),
        }
    }
}

/// Policy plus the training progress needed to resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Envelope version.
    pub format_version: u32,
    /// Unix seconds when written.
    pub saved_at: u64,
    /// Episodes completed when written.
    pub episodes: u64,
    /// Moving-average reward when written.
    pub moving_average: Option<f64>,
    /// Best moving-average reward seen so far.
    pub best_average: Option<f64>,
    /// Agent policy.
    pub policy: PolicyState,
}

impl Checkpoint {
    /// Wrap a policy with progress metadata, stamped with the current time.
    pub fn new(policy: PolicyState, episodes: u64, moving_average: Option<f64>, best_average: Option<f64>) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            saved_at: unix_seconds(),
            episodes,
            moving_average,
            best_average,
            policy,
        }
    }
}

/// Checkpoint directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Use `dir` for artifacts. The directory is created on first write.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Checkpoint directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of an artifact.
    pub fn path(&self, kind: CheckpointKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// True if the artifact exists on disk.
    pub fn exists(&self, kind: CheckpointKind) -> bool {
        self.path(kind).is_file()
    }

    /// Write an artifact atomically.
    pub fn save(&self, kind: CheckpointKind, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path(kind);
        write_json(&path, checkpoint)?;
        info!(
            "saved {} checkpoint after {} episodes to {}",
            kind,
            checkpoint.episodes,
            path.display()
        );
        Ok(())
    }

    /// Read an artifact.
    pub fn load(&self, kind: CheckpointKind) -> Result<Checkpoint> {
        let path = self.path(kind);
        let checkpoint: Checkpoint = read_json(&path)?;
        if checkpoint.format_version > CHECKPOINT_FORMAT_VERSION {
            return Err(Error::CheckpointUnavailable(format!(
                "{}: format {} is newer than supported {}",
                path.display(),
                checkpoint.format_version,
                CHECKPOINT_FORMAT_VERSION
            )));
        }
        Ok(checkpoint)
    }
}

/// Serialize `value` as pretty JSON to `path` via a temporary file and rename.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read JSON from `path`; every failure maps to [`Error::CheckpointUnavailable`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::CheckpointUnavailable(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::CheckpointUnavailable(format!("{}: {}", path.display(), e)))
}

/// Seconds since the Unix epoch (0 if the clock is before it).
pub fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::agent::Agent;
    use crate::rl::config::{AgentConfig, EnvConfig, Mode};

    fn policy() -> PolicyState {
        Agent::new(AgentConfig::default().with_seed(3), &EnvConfig::small(), Mode::Train).state()
    }

    #[test]
    fn test_save_and_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("models"));
        assert!(!store.exists(CheckpointKind::Latest));

        let checkpoint = Checkpoint::new(policy(), 12, Some(3.5), Some(4.0));
        store.save(CheckpointKind::Latest, &checkpoint).unwrap();
        assert!(store.exists(CheckpointKind::Latest));
        assert!(!store.exists(CheckpointKind::Best));

        let loaded = store.load(CheckpointKind::Latest).unwrap();
        assert_eq!(loaded.episodes, 12);
        assert_eq!(loaded.best_average, Some(4.0));
        assert_eq!(loaded.policy.online, checkpoint.policy.online);
    }

    #[test]
    fn test_missing_and_corrupt_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(matches!(
            store.load(CheckpointKind::Best),
            Err(Error::CheckpointUnavailable(_))
        ));

        fs::write(store.path(CheckpointKind::Best), "{ truncated").unwrap();
        assert!(matches!(
            store.load(CheckpointKind::Best),
            Err(Error::CheckpointUnavailable(_))
        ));
    }

    #[test]
    fn test_newer_format_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let mut checkpoint = Checkpoint::new(policy(), 1, None, None);
        checkpoint.format_version = CHECKPOINT_FORMAT_VERSION + 1;
        store.save(CheckpointKind::Latest, &checkpoint).unwrap();
        assert!(matches!(
            store.load(CheckpointKind::Latest),
            Err(Error::CheckpointUnavailable(_))
        ));
    }
}
