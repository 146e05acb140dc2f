//! Decision loop for a real-time card-placement battle game.
//!
//! # Overview
//!
//! Each decision step runs the same cycle:
//! 1. Perception turns the screen into an [`Observation`] (board grid,
//!    scalar context, and a four-slot hand that may contain unknown cards)
//! 2. The [`Agent`] picks a `(slot, row, col)` placement epsilon-greedily
//! 3. The [`Environment`] checks legality, actuates, re-observes, and scores
//!    the step from tower and troop deltas
//! 4. The transition lands in the prioritized [`ExperienceStore`]
//!
//! When an episode ends the [`OutcomeAnalyzer`] raises the priority of the
//! moves leading into a loss, and the [`TrainingOrchestrator`] runs a cycle
//! of replay updates, checkpoints the policy, and emits metrics.
//!
//! # Example
//!
//! ```ignore
//! use arena_rl::arena::{ActionExecutor, RetryPolicy, SimConfig, SimMatch};
//! use arena_rl::rl::{TrainerConfig, TrainingOrchestrator};
//!
//! let config = TrainerConfig::fast();
//! let sim = SimMatch::new(&config.env, SimConfig::fast(), 7);
//! let executor = ActionExecutor::spawn(sim.actuator(), config.actuation_timeout(), RetryPolicy::default());
//! let mut trainer = TrainingOrchestrator::new(config, sim.perception(), executor)?;
//! let summary = trainer.train()?;
//! println!("{} episodes, moving average {:.2}", summary.episodes, summary.moving_average);
//! ```
//!
//! # Value Model
//!
//! Q-values factor over the action components:
//! ```text
//! Q(s, (slot, row, col)) = w_slot · φ(s) + w_cell · φ(s) + b_card(hand[slot])
//! ```
//! so the greedy action is a pair of independent argmaxes over legal slots
//! and legal cells, and the TD target uses a frozen copy of the weights:
//! ```text
//! y = r + γ · max_a' Q_target(s', a')      (y = r at terminal steps)
//! ```

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod outcome;
pub mod replay;
pub mod types;
pub mod value;

// Re-export main types for convenient access
pub use agent::{Agent, PolicyState, UpdateStats};
pub use checkpoint::{Checkpoint, CheckpointKind, CheckpointStore};
pub use config::{
    AgentConfig, AnalyzerConfig, ConfigError, EnvConfig, LookbackWindow, Mode, ReplayConfig, RewardConfig,
    TrainerConfig,
};
pub use environment::{
    ActionSpace, Environment, ExecutionReport, Executor, Frame, MatchPhase, MatchSnapshot, Perception, StepInfo,
    StepResult,
};
pub use error::{Error, Result};
pub use metrics::{EpisodeMetrics, JsonLinesSink, MemorySink, MetricsSink, PerformanceTracker};
pub use orchestrator::{EpisodeSummary, StopSignal, TrainingOrchestrator, TrainingSummary};
pub use outcome::{OutcomeAnalyzer, OutcomeReport};
pub use replay::ExperienceStore;
pub use types::{Action, CardId, CardSlot, EpisodeId, Hand, Observation, Outcome, Transition};
