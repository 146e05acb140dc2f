//! Error taxonomy for the decision-and-adaptation loop.
//!
//! Perception degradation and illegal actions are not errors here: they are
//! reported as values in [`StepInfo`](crate::rl::environment::StepInfo).
//! Actuation failures end the episode as `ABORTED` and never surface as `Err`.

use thiserror::Error;

use crate::rl::config::ConfigError;

/// Errors surfaced by the library.
#[derive(Debug, Error)]
pub enum Error {
    /// A new episode could not be started at the perception/actuation boundary.
    #[error("environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    /// The experience store holds fewer transitions than the requested batch.
    #[error("insufficient data: {available} transitions stored, {requested} requested")]
    InsufficientData {
        /// Transitions currently stored.
        available: usize,
        /// Batch size requested.
        requested: usize,
    },

    /// A checkpoint is missing, unreadable, corrupt, or from a newer format.
    #[error("checkpoint unavailable: {0}")]
    CheckpointUnavailable(String),

    /// Episodes repeatedly failed to start; training cannot continue.
    #[error("environment unavailable for {episodes} consecutive episodes")]
    SystemicUnavailability {
        /// Consecutive episodes that could not start.
        episodes: u32,
    },

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Filesystem error outside checkpoint loading (metrics, checkpoint writes).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error outside checkpoint loading.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
