//! # Arena RL
//!
//! A reinforcement-learning decision loop for a real-time card-placement
//! battle game: observe the board, choose which card to play and where,
//! learn from prioritized experience replay.
//!
//! ## Features
//!
//! - **Pluggable Boundaries**: perception and actuation are traits, so the
//!   loop runs against a live client or the bundled simulator
//! - **Legality Before Actuation**: illegal placements are never sent to the game
//! - **Prioritized Replay**: proportional sampling with min-priority eviction
//! - **Loss Attribution**: moves leading into a loss are replayed more often
//! - **Checkpointing**: latest and best policies, resumable across restarts
//!
//! ## Quick Start
//!
//! ```ignore
//! use arena_rl::arena::{ActionExecutor, RetryPolicy, SimConfig, SimMatch};
//! use arena_rl::rl::{TrainerConfig, TrainingOrchestrator};
//!
//! let config = TrainerConfig::fast();
//! let sim = SimMatch::new(&config.env, SimConfig::fast(), 42);
//! let executor = ActionExecutor::spawn(sim.actuator(), config.actuation_timeout(), RetryPolicy::default());
//! let mut trainer = TrainingOrchestrator::new(config, sim.perception(), executor)?;
//! trainer.train()?;
//! ```
//!
//! ## Modules
//!
//! - [`rl`]: Environment, agent, replay, outcome analysis and training loop
//! - [`arena`]: Simulator and timeout-enforcing actuation
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Training Orchestrator                        │
//! │  - Episode loop          - Replay update cycles                  │
//! │  - Checkpoints           - Metrics / stop handling               │
//! └──────────────────────────────────────────────────────────────────┘
//!          │                   │                      │
//!          ▼                   ▼                      ▼
//!    ┌─────────────┐    ┌─────────────┐    ┌─────────────────────┐
//!    │ Environment │    │    Agent    │◀───│  Outcome Analyzer   │
//!    │ (legality,  │    │ (ε-greedy,  │    │ (loss reweighting,  │
//!    │  rewards)   │    │  TD update) │    │  exploration bump)  │
//!    └─────────────┘    └─────────────┘    └─────────────────────┘
//!       │       │              ▲                      │
//!       ▼       ▼              │                      ▼
//!  Perception  Executor   ┌──────────────────────────────────┐
//!   (trait)    (trait)    │   Experience Store (prioritized) │
//!       │       │         └──────────────────────────────────┘
//!       ▼       ▼
//!   ┌────────────────┐
//!   │ Simulator / UI │
//!   └────────────────┘
//! ```

#![warn(missing_docs)]

/// Decision loop: environment, learning agent, replay, training.
///
/// Everything here is independent of how the game is observed or driven.
pub mod rl;

/// Simulator and actuation wrappers.
///
/// Implementations of the perception and actuation boundaries.
pub mod arena;

// Re-export commonly used types at crate root for convenience
pub use rl::{Agent, Environment, Error, ExperienceStore, Mode, Result, TrainerConfig, TrainingOrchestrator};
