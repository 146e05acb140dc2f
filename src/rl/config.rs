//! Configuration for the environment, learning agent, experience store,
//! outcome analyzer and training orchestrator.
//!
//! Every struct has sensible defaults and deserializes with `#[serde(default)]`,
//! so a JSON file only needs the fields it overrides. Reward magnitudes are
//! tunable; their ordering (win > draw > loss, illegal < 0) is checked by
//! [`TrainerConfig::validate`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether the orchestrator learns or only plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Explore, store experience, update and adapt.
    #[default]
    Train,
    /// Greedy play: ε fixed at 0, no updates, no reprioritization.
    Evaluate,
}

/// Rows of the board the player may deploy on (inclusive bounds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRegion {
    /// First permitted row.
    pub first_row: usize,
    /// Last permitted row.
    pub last_row: usize,
}

impl PlacementRegion {
    /// True if `(row, col)` is a permitted deploy cell on a `cols`-wide board.
    pub fn contains(&self, row: usize, col: usize, cols: usize) -> bool {
        row >= self.first_row && row <= self.last_row && col < cols
    }

    /// Number of permitted rows.
    pub fn rows(&self) -> usize {
        self.last_row.saturating_sub(self.first_row) + 1
    }
}

/// Board geometry, card costs and episode limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Board rows (H).
    pub grid_rows: usize,
    /// Board columns (W).
    pub grid_cols: usize,
    /// Feature channels per cell (C).
    pub spatial_channels: usize,
    /// Cells the player may deploy on.
    pub placement: PlacementRegion,
    /// Size of the card vocabulary.
    pub card_vocab_size: u16,
    /// Per-card elixir costs; cards past the end use the built-in cost curve.
    pub card_costs: Vec<f64>,
    /// Assumed cost of a card perception could not identify.
    pub unknown_card_cost: f64,
    /// Decision ticks after which the episode is truncated as a draw.
    pub max_steps: u32,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            grid_rows: 28,
            grid_cols: 18,
            spatial_channels: 4,
            placement: PlacementRegion {
                first_row: 15,
                last_row: 27,
            },
            card_vocab_size: 24,
            card_costs: Vec::new(),
            unknown_card_cost: 4.0,
            max_steps: 2000,
        }
    }
}

impl EnvConfig {
    /// Small board for tests and quick runs.
    pub fn small() -> Self {
        Self {
            grid_rows: 8,
            grid_cols: 6,
            spatial_channels: 4,
            placement: PlacementRegion {
                first_row: 4,
                last_row: 7,
            },
            max_steps: 200,
            ..Default::default()
        }
    }
}

/// Reward shaping weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Per unit of opponent tower health removed (towers are 1.0 at full health).
    pub damage_dealt: f64,
    /// Per unit of own tower health lost.
    pub damage_taken: f64,
    /// Per opponent troop removed from the board.
    pub troop_neutralized: f64,
    /// Per elixir spent on a placement.
    pub elixir_spent: f64,
    /// Fixed reward for an illegal action. Must be negative.
    pub illegal_action: f64,
    /// Terminal reward on a win.
    pub win: f64,
    /// Terminal reward on a draw.
    pub draw: f64,
    /// Terminal reward on a loss.
    pub loss: f64,
    /// Terminal reward when actuation fails.
    pub aborted: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            damage_dealt: 20.0,
            damage_taken: 20.0,
            troop_neutralized: 2.0,
            elixir_spent: 0.5,
            illegal_action: -1.0,
            win: 100.0,
            draw: 0.0,
            loss: -100.0,
            aborted: 0.0,
        }
    }
}

/// Experience store sizing and priority policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Maximum retained transitions.
    pub capacity: usize,
    /// Lowest priority any transition can have.
    pub priority_floor: f64,
    /// Priority of a zero-reward, non-terminal transition.
    pub base_priority: f64,
    /// Extra priority per unit of absolute reward.
    pub reward_priority_weight: f64,
    /// Multiplier applied to terminal transitions.
    pub terminal_priority_boost: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            priority_floor: 1e-3,
            base_priority: 1.0,
            reward_priority_weight: 0.05,
            terminal_priority_boost: 2.0,
        }
    }
}

/// Learning agent hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// SGD step size.
    pub learning_rate: f64,
    /// Discount factor.
    pub gamma: f64,
    /// Initial exploration rate.
    pub epsilon_start: f64,
    /// Exploration floor.
    pub epsilon_min: f64,
    /// Multiplicative per-episode decay.
    pub epsilon_decay: f64,
    /// TD errors are clamped to `±td_clip`.
    pub td_clip: f64,
    /// Updates between target snapshot refreshes.
    pub target_sync_interval: u64,
    /// Hash buckets for card identities (plus one for `Unknown`).
    pub card_buckets: usize,
    /// Seed for action selection; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            gamma: 0.95,
            epsilon_start: 1.0,
            epsilon_min: 0.01,
            epsilon_decay: 0.997,
            td_clip: 1.0,
            target_sync_interval: 100,
            card_buckets: 32,
            seed: None,
        }
    }
}

impl AgentConfig {
    /// Builder method: set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builder method: set the starting exploration rate.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon_start = epsilon.clamp(0.0, 1.0);
        self
    }
}

/// Shape of the loss-attribution window at the end of a lost episode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LookbackWindow {
    /// The last `len` transitions all get the full contributing multiplier.
    Fixed {
        /// Window length in transitions.
        len: usize,
    },
    /// The last `len` transitions get a multiplier that decays geometrically
    /// with distance from the terminal step, never below the remainder multiplier.
    Decaying {
        /// Window length in transitions.
        len: usize,
        /// Per-step decay of the excess multiplier, in `(0, 1]`.
        decay: f64,
    },
}

impl LookbackWindow {
    /// Window length.
    pub fn len(&self) -> usize {
        match *self {
            LookbackWindow::Fixed { len } | LookbackWindow::Decaying { len, .. } => len,
        }
    }

    /// True for a zero-length window.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LookbackWindow {
    fn default() -> Self {
        LookbackWindow::Fixed { len: 5 }
    }
}

/// Outcome analyzer policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Which trailing transitions count as contributing to a loss.
    pub lookback: LookbackWindow,
    /// Priority multiplier for contributing transitions (M > 1).
    pub contributing_multiplier: f64,
    /// Priority multiplier for the rest of a lost episode (1 < M' < M).
    pub remainder_multiplier: f64,
    /// Exploration increase after a loss-weighted outcome.
    pub loss_epsilon_bump: f64,
    /// Extra multiplicative decay after a win, in `(0, 1]`; 1.0 leaves ε alone.
    pub win_decay_factor: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            lookback: LookbackWindow::default(),
            contributing_multiplier: 2.0,
            remainder_multiplier: 1.2,
            loss_epsilon_bump: 0.05,
            win_decay_factor: 0.99,
        }
    }
}

/// Top-level training configuration.
///
/// # Example
/// ```
/// use arena_rl::rl::TrainerConfig;
///
/// let config = TrainerConfig::default();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Environment settings.
    pub env: EnvConfig,
    /// Reward shaping.
    pub reward: RewardConfig,
    /// Experience store.
    pub replay: ReplayConfig,
    /// Learning agent.
    pub agent: AgentConfig,
    /// Outcome analyzer.
    pub analyzer: AnalyzerConfig,
    /// Train or evaluate.
    pub mode: Mode,
    /// Episodes to run; 0 runs until stopped.
    pub episodes: u64,
    /// Transitions per optimisation step.
    pub batch_size: usize,
    /// Episodes between optimisation cycles.
    pub update_interval_episodes: u64,
    /// Optimisation steps per cycle.
    pub updates_per_cycle: usize,
    /// Episodes between "latest" checkpoints.
    pub checkpoint_interval: u64,
    /// Directory holding checkpoint artifacts.
    pub checkpoint_dir: PathBuf,
    /// Append-only metrics file (JSON lines); `None` disables it.
    pub metrics_path: Option<PathBuf>,
    /// `reset` attempts per episode before the episode is aborted.
    pub reset_attempts: u32,
    /// Delay before the first reset retry, doubled on each further retry.
    pub reset_backoff_ms: u64,
    /// Consecutive unstartable episodes that escalate to a fatal error.
    pub max_consecutive_unavailable: u32,
    /// Upper bound on a single actuation call.
    pub actuation_timeout_ms: u64,
    /// Episodes in the moving-average reward window.
    pub moving_average_window: usize,
    /// Episodes required before "best" checkpoints are considered.
    pub best_min_episodes: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            env: EnvConfig::default(),
            reward: RewardConfig::default(),
            replay: ReplayConfig::default(),
            agent: AgentConfig::default(),
            analyzer: AnalyzerConfig::default(),
            mode: Mode::Train,
            episodes: 10_000,
            batch_size: 32,
            update_interval_episodes: 1,
            updates_per_cycle: 32,
            checkpoint_interval: 1,
            checkpoint_dir: PathBuf::from("models"),
            metrics_path: Some(PathBuf::from("logs/metrics.jsonl")),
            reset_attempts: 3,
            reset_backoff_ms: 500,
            max_consecutive_unavailable: 5,
            actuation_timeout_ms: 2_000,
            moving_average_window: 50,
            best_min_episodes: 10,
        }
    }
}

impl TrainerConfig {
    /// Create a TrainerConfig with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Small, fast configuration for tests and smoke runs.
    pub fn fast() -> Self {
        Self {
            env: EnvConfig::small(),
            replay: ReplayConfig {
                capacity: 2_000,
                ..Default::default()
            },
            agent: AgentConfig {
                epsilon_decay: 0.95,
                target_sync_interval: 20,
                ..Default::default()
            },
            episodes: 20,
            batch_size: 16,
            updates_per_cycle: 8,
            reset_backoff_ms: 0,
            actuation_timeout_ms: 200,
            metrics_path: None,
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json_str(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builder method: set the mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder method: set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.agent.seed = Some(seed);
        self
    }

    /// Actuation timeout as a [`Duration`].
    pub fn actuation_timeout(&self) -> Duration {
        Duration::from_millis(self.actuation_timeout_ms)
    }

    /// Validate the configuration and return the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let env = &self.env;
        if env.grid_rows == 0 || env.grid_cols == 0 || env.spatial_channels == 0 {
            return Err(invalid("env", "grid dimensions must be positive"));
        }
        if env.placement.first_row > env.placement.last_row
            || env.placement.last_row >= env.grid_rows
        {
            return Err(invalid("env.placement", "placement rows must lie inside the grid"));
        }
        if env.card_vocab_size == 0 {
            return Err(invalid("env.card_vocab_size", "vocabulary must not be empty"));
        }
        if env.card_costs.iter().chain([&env.unknown_card_cost]).any(|c| !c.is_finite() || *c < 0.0) {
            return Err(invalid("env.card_costs", "card costs must be finite and non-negative"));
        }

        let r = &self.reward;
        if !(r.illegal_action < 0.0) {
            return Err(invalid("reward.illegal_action", "illegal-action reward must be negative"));
        }
        if !(r.win > r.draw && r.draw > r.loss) {
            return Err(invalid("reward", "terminal rewards must satisfy win > draw > loss"));
        }
        if [r.damage_dealt, r.damage_taken, r.troop_neutralized, r.elixir_spent]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(invalid("reward", "shaping weights must be finite and non-negative"));
        }

        let p = &self.replay;
        if p.capacity == 0 {
            return Err(invalid("replay.capacity", "capacity must be positive"));
        }
        if !(p.priority_floor > 0.0 && p.priority_floor.is_finite()) {
            return Err(invalid("replay.priority_floor", "priority floor must be positive"));
        }
        if !(p.base_priority >= p.priority_floor && p.terminal_priority_boost >= 1.0) {
            return Err(invalid("replay", "base priority must be >= floor and boost >= 1"));
        }

        let a = &self.agent;
        if !(0.0..=1.0).contains(&a.epsilon_min)
            || !(a.epsilon_min..=1.0).contains(&a.epsilon_start)
        {
            return Err(invalid("agent.epsilon", "need 0 <= epsilon_min <= epsilon_start <= 1"));
        }
        if !(a.epsilon_decay > 0.0 && a.epsilon_decay <= 1.0) {
            return Err(invalid("agent.epsilon_decay", "decay must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&a.gamma) || !(a.learning_rate > 0.0) || !(a.td_clip > 0.0) {
            return Err(invalid("agent", "need gamma in [0, 1], positive learning rate and td_clip"));
        }
        if a.card_buckets == 0 {
            return Err(invalid("agent.card_buckets", "need at least one card bucket"));
        }

        let z = &self.analyzer;
        if !(z.remainder_multiplier > 1.0 && z.contributing_multiplier > z.remainder_multiplier) {
            return Err(invalid(
                "analyzer",
                "multipliers must satisfy 1 < remainder_multiplier < contributing_multiplier",
            ));
        }
        if let LookbackWindow::Decaying { decay, .. } = z.lookback {
            if !(decay > 0.0 && decay <= 1.0) {
                return Err(invalid("analyzer.lookback.decay", "decay must be in (0, 1]"));
            }
        }
        if !(0.0..=1.0).contains(&z.loss_epsilon_bump) {
            return Err(invalid("analyzer.loss_epsilon_bump", "bump must be in [0, 1]"));
        }
        if !(z.win_decay_factor > 0.0 && z.win_decay_factor <= 1.0) {
            return Err(invalid("analyzer.win_decay_factor", "factor must be in (0, 1]"));
        }

        if self.batch_size == 0 {
            return Err(invalid("batch_size", "batch size must be positive"));
        }
        if self.reset_attempts == 0 || self.max_consecutive_unavailable == 0 {
            return Err(invalid("reset_attempts", "retry bounds must be positive"));
        }
        if self.actuation_timeout_ms == 0 {
            return Err(invalid("actuation_timeout_ms", "timeout must be positive"));
        }
        if self.moving_average_window == 0 {
            return Err(invalid("moving_average_window", "window must be positive"));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        message: message.to_string(),
    }
}

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("IO error: {0}")]
    Io(String),
    /// The file is not valid configuration JSON.
    #[error("parse error: {0}")]
    Parse(String),
    /// A field has an out-of-range value.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_and_fast_configs_validate() {
        assert!(TrainerConfig::default().validate().is_ok());
        assert!(TrainerConfig::fast().validate().is_ok());
    }

    #[test]
    fn test_minimal_json_applies_defaults() {
        let json = r#"{
            "episodes": 5,
            "mode": "evaluate",
            "analyzer": { "lookback": { "kind": "decaying", "len": 8, "decay": 0.7 } }
        }"#;
        let config = TrainerConfig::from_json_str(json).unwrap();
        assert_eq!(config.episodes, 5);
        assert_eq!(config.mode, Mode::Evaluate);
        assert_eq!(config.analyzer.lookback, LookbackWindow::Decaying { len: 8, decay: 0.7 });
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.env.grid_rows, 28);
    }

    #[test]
    fn test_reward_ordering_enforced() {
        let mut config = TrainerConfig::default();
        config.reward.draw = 150.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "reward", .. })
        ));

        let mut config = TrainerConfig::default();
        config.reward.illegal_action = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_multiplier_ordering_enforced() {
        let mut config = TrainerConfig::default();
        config.analyzer.remainder_multiplier = 3.0;
        assert!(config.validate().is_err());

        config.analyzer.remainder_multiplier = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_placement_outside_grid_rejected() {
        let mut config = TrainerConfig::default();
        config.env.placement.last_row = config.env.grid_rows;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error_reported() {
        assert!(matches!(
            TrainerConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
