//! Learning agent: ε-greedy action selection and temporal-difference
//! updates against a lagging target snapshot.
//!
//! # Update rule
//!
//! For each sampled transition `(s, a, r, s', done)`:
//!
//! ```text
//! y  = r                              if done
//! y  = r + γ · max_a' Q_target(s', a') otherwise
//! δ  = clamp(y - Q(s, a), -clip, clip)
//! θ += α · δ · ∇Q(s, a) / batch
//! ```
//!
//! Per-sample gradients are computed in parallel with rayon and applied
//! sequentially. Non-finite errors are dropped so a single bad transition
//! cannot poison the parameters.

use std::path::Path;

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::rl::checkpoint;
use crate::rl::config::{AgentConfig, EnvConfig, Mode};
use crate::rl::environment::ActionSpace;
use crate::rl::error::{Error, Result};
use crate::rl::types::{Action, Observation, Transition, HAND_SIZE};
use crate::rl::value::{QParams, SparseGradient, ValueShape};

/// Version of the serialized [`PolicyState`] layout.
pub const POLICY_FORMAT_VERSION: u32 = 1;

/// Everything needed to restore an agent's policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyState {
    /// Layout version.
    pub version: u32,
    /// Hyperparameters the policy was trained with.
    pub config: AgentConfig,
    /// Online parameters.
    pub online: QParams,
    /// Target parameters.
    pub target: QParams,
    /// Exploration rate.
    pub epsilon: f64,
    /// Actions selected.
    pub steps: u64,
    /// Episodes completed.
    pub episodes: u64,
    /// Optimisation steps taken.
    pub updates: u64,
}

/// Statistics of one [`Agent::update`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateStats {
    /// Mean squared (clipped) TD error over the used samples.
    pub loss: f64,
    /// Samples that contributed a gradient.
    pub used: usize,
    /// Samples dropped because their error was not finite.
    pub skipped: usize,
    /// True if this update refreshed the target snapshot.
    pub synced: bool,
}

/// ε-greedy temporal-difference learner.
pub struct Agent {
    config: AgentConfig,
    space: ActionSpace,
    online: QParams,
    target: QParams,
    epsilon: f64,
    mode: Mode,
    rng: StdRng,
    steps: u64,
    episodes: u64,
    updates: u64,
}

impl Agent {
    /// Create an agent with zeroed parameters.
    ///
    /// # Arguments
    /// * `config` - Hyperparameters
    /// * `env` - Board geometry and card costs the agent acts on
    /// * `mode` - Train (explore and learn) or Evaluate (greedy, frozen)
    pub fn new(config: AgentConfig, env: &EnvConfig, mode: Mode) -> Self {
        let shape = ValueShape {
            rows: env.grid_rows,
            cols: env.grid_cols,
            channels: env.spatial_channels,
            card_buckets: config.card_buckets.max(1),
        };
        let online = QParams::new(shape);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            epsilon: config.epsilon_start.clamp(config.epsilon_min, 1.0),
            space: ActionSpace::from_config(env),
            target: online.clone(),
            online,
            config,
            mode,
            rng,
            steps: 0,
            episodes: 0,
            updates: 0,
        }
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch between training and evaluation.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Stored exploration rate.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Exploration rate actually used by [`Agent::select_action`]: 0 in evaluation.
    pub fn effective_epsilon(&self) -> f64 {
        match self.mode {
            Mode::Train => self.epsilon,
            Mode::Evaluate => 0.0,
        }
    }

    /// Actions selected so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Episodes completed so far.
    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    /// Optimisation steps taken so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Online parameters.
    pub fn online(&self) -> &QParams {
        &self.online
    }

    /// Target parameters.
    pub fn target(&self) -> &QParams {
        &self.target
    }

    /// Action space the agent chooses from.
    pub fn action_space(&self) -> &ActionSpace {
        &self.space
    }

    /// Choose an action for an observation.
    ///
    /// With probability ε a uniformly random legal action; otherwise the
    /// greedy action. When no action is legal a random deployable action is
    /// returned and the environment will reject it with a penalty.
    pub fn select_action(&mut self, observation: &Observation) -> Action {
        self.steps += 1;
        let explore = self.mode == Mode::Train && self.rng.gen::<f64>() < self.epsilon;
        if !explore {
            return self.online.best_action(observation, &self.space).0;
        }

        let slots = self.space.playable_slots(observation);
        let slot = match slots.choose(&mut self.rng) {
            Some(&slot) => slot,
            None => self.rng.gen_range(0..HAND_SIZE),
        };
        let placement = self.space.placement();
        let last_row = placement.last_row.min(self.space.rows().saturating_sub(1));
        let row = self.rng.gen_range(placement.first_row..=last_row.max(placement.first_row));
        let col = self.rng.gen_range(0..self.space.cols().max(1));
        Action::new(slot, row, col)
    }

    /// One optimisation step on a sampled batch.
    ///
    /// A no-op returning default stats in evaluation mode or on an empty batch.
    pub fn update(&mut self, batch: &[Transition]) -> UpdateStats {
        if self.mode == Mode::Evaluate || batch.is_empty() {
            return UpdateStats::default();
        }

        let gamma = self.config.gamma;
        let clip = self.config.td_clip;
        let online = &self.online;
        let target = &self.target;
        let space = &self.space;

        let results: Vec<Option<(SparseGradient, f64)>> = batch
            .par_iter()
            .map(|t| {
                let bootstrap = if t.done {
                    0.0
                } else {
                    gamma * target.max_q(&t.next_observation, space)
                };
                let error = t.reward + bootstrap - online.q(&t.observation, &t.action);
                if !error.is_finite() {
                    return None;
                }
                let clipped = error.clamp(-clip, clip);
                online
                    .gradient(&t.observation, &t.action, clipped)
                    .map(|g| (g, clipped * clipped))
            })
            .collect();

        let skipped = results.iter().filter(|r| r.is_none()).count();
        let (gradients, squared): (Vec<SparseGradient>, Vec<f64>) = results.into_iter().flatten().unzip();
        let used = gradients.len();
        if skipped > 0 {
            warn!("dropped {} non-finite TD error(s) from batch of {}", skipped, batch.len());
        }
        if used == 0 {
            return UpdateStats {
                skipped,
                ..Default::default()
            };
        }

        self.online.apply(&gradients, self.config.learning_rate / used as f64);
        self.updates += 1;

        let synced = self.config.target_sync_interval > 0
            && self.updates % self.config.target_sync_interval == 0;
        if synced {
            self.sync_target();
        }

        UpdateStats {
            loss: squared.iter().sum::<f64>() / used as f64,
            used,
            skipped,
            synced,
        }
    }

    /// Copy the online parameters into the target snapshot.
    pub fn sync_target(&mut self) {
        self.target = self.online.clone();
        debug!("target snapshot refreshed after {} updates", self.updates);
    }

    /// Per-episode bookkeeping: multiplicative ε decay down to the floor.
    pub fn end_episode(&mut self) {
        self.episodes += 1;
        if self.mode == Mode::Train {
            self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
        }
    }

    /// Raise ε by `amount`, capped at 1.
    pub fn boost_exploration(&mut self, amount: f64) {
        self.epsilon = (self.epsilon + amount).min(1.0).max(self.config.epsilon_min);
    }

    /// Multiply ε by `factor`, floored at the minimum.
    pub fn scale_exploration(&mut self, factor: f64) {
        self.epsilon = (self.epsilon * factor).clamp(self.config.epsilon_min, 1.0);
    }

    /// Snapshot of the policy for persistence.
    pub fn state(&self) -> PolicyState {
        PolicyState {
            version: POLICY_FORMAT_VERSION,
            config: self.config.clone(),
            online: self.online.clone(),
            target: self.target.clone(),
            epsilon: self.epsilon,
            steps: self.steps,
            episodes: self.episodes,
            updates: self.updates,
        }
    }

    /// Replace the policy with a persisted one.
    ///
    /// Fails with [`Error::CheckpointUnavailable`] if the state is from a
    /// newer format or does not fit this agent's board.
    pub fn restore(&mut self, state: PolicyState) -> Result<()> {
        if state.version > POLICY_FORMAT_VERSION {
            return Err(Error::CheckpointUnavailable(format!(
                "policy format {} is newer than supported {}",
                state.version, POLICY_FORMAT_VERSION
            )));
        }
        if !state.online.is_consistent() || !state.target.is_consistent() {
            return Err(Error::CheckpointUnavailable("policy parameters are malformed".to_string()));
        }
        let expected = self.online.shape();
        if state.online.shape() != expected || state.target.shape() != expected {
            return Err(Error::CheckpointUnavailable(format!(
                "policy shape {:?} does not match {:?}",
                state.online.shape(),
                expected
            )));
        }
        if !state.online.is_finite() {
            return Err(Error::CheckpointUnavailable("policy parameters are not finite".to_string()));
        }

        self.online = state.online;
        self.target = state.target;
        self.epsilon = state.epsilon.clamp(self.config.epsilon_min, 1.0);
        self.steps = state.steps;
        self.episodes = state.episodes;
        self.updates = state.updates;
        Ok(())
    }

    /// Persist the policy to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        checkpoint::write_json(path.as_ref(), &self.state())
    }

    /// Load a policy written by [`Agent::save`].
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let state: PolicyState = checkpoint::read_json(path.as_ref())?;
        self.restore(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::types::{CardId, EpisodeId, Hand, CTX_ELIXIR};
    use std::sync::Arc;

    fn observation(elixir: f32) -> Observation {
        let env = EnvConfig::small();
        let mut obs = Observation::blank(env.grid_rows, env.grid_cols, env.spatial_channels);
        obs.context[CTX_ELIXIR] = elixir;
        obs.hand = Hand::from_detections((0..4).map(|i| Some(CardId(i))));
        obs
    }

    fn agent(mode: Mode) -> Agent {
        Agent::new(AgentConfig::default().with_seed(7), &EnvConfig::small(), mode)
    }

    fn rewarding_transition(action: Action, reward: f64) -> Transition {
        let obs = Arc::new(observation(10.0));
        Transition {
            episode: EpisodeId(0),
            step: 0,
            observation: obs.clone(),
            action,
            reward,
            next_observation: obs,
            done: true,
            priority: 1.0,
        }
    }

    #[test]
    fn test_exploration_picks_legal_actions() {
        let mut agent = agent(Mode::Train);
        let obs = observation(3.0);
        let space = agent.action_space().clone();
        for _ in 0..200 {
            let action = agent.select_action(&obs);
            assert!(space.check(&obs, &action).is_ok(), "{}", action);
        }
    }

    #[test]
    fn test_no_legal_action_still_returns_action() {
        let mut agent = agent(Mode::Train);
        let obs = observation(0.0);
        let action = agent.select_action(&obs);
        assert!(action.slot < HAND_SIZE);
    }

    #[test]
    fn test_zero_card_buckets_still_acts_and_learns() {
        let config = AgentConfig {
            card_buckets: 0,
            ..AgentConfig::default().with_seed(3)
        };
        let mut agent = Agent::new(config, &EnvConfig::small(), Mode::Evaluate);
        let obs = observation(10.0);
        let action = agent.select_action(&obs);
        assert!(agent.action_space().check(&obs, &action).is_ok());

        let mut agent = Agent::new(
            AgentConfig {
                card_buckets: 0,
                ..AgentConfig::default().with_seed(3)
            },
            &EnvConfig::small(),
            Mode::Train,
        );
        let stats = agent.update(&[rewarding_transition(Action::new(1, 5, 2), 1.0)]);
        assert_eq!(stats.used, 1);
    }

    #[test]
    fn test_update_learns_rewarded_action() {
        let mut agent = agent(Mode::Train);
        let good = Action::new(1, 5, 4);
        let batch = vec![rewarding_transition(good, 1.0); 8];
        for _ in 0..50 {
            let stats = agent.update(&batch);
            assert_eq!(stats.used, 8);
        }
        agent.set_mode(Mode::Evaluate);
        assert_eq!(agent.select_action(&observation(10.0)), good);
    }

    #[test]
    fn test_non_finite_errors_skipped() {
        let mut agent = agent(Mode::Train);
        let mut batch = vec![rewarding_transition(Action::new(0, 4, 0), 1.0)];
        batch.push(rewarding_transition(Action::new(0, 4, 1), f64::NAN));
        let stats = agent.update(&batch);
        assert_eq!((stats.used, stats.skipped), (1, 1));
        assert!(agent.online().is_finite());
    }

    #[test]
    fn test_evaluation_mode_frozen() {
        let mut agent = agent(Mode::Evaluate);
        let before = agent.online().clone();
        let stats = agent.update(&[rewarding_transition(Action::new(0, 4, 0), 5.0)]);
        assert_eq!(stats, UpdateStats::default());
        assert_eq!(agent.online(), &before);
        assert_eq!(agent.effective_epsilon(), 0.0);
    }

    #[test]
    fn test_epsilon_bounds() {
        let mut agent = agent(Mode::Train);
        for _ in 0..5000 {
            agent.end_episode();
        }
        assert_eq!(agent.epsilon(), AgentConfig::default().epsilon_min);
        agent.boost_exploration(5.0);
        assert_eq!(agent.epsilon(), 1.0);
        agent.scale_exploration(0.0);
        assert_eq!(agent.epsilon(), AgentConfig::default().epsilon_min);
    }

    #[test]
    fn test_target_sync_interval() {
        let config = AgentConfig {
            target_sync_interval: 3,
            ..AgentConfig::default().with_seed(1)
        };
        let mut agent = Agent::new(config, &EnvConfig::small(), Mode::Train);
        let batch = vec![rewarding_transition(Action::new(0, 4, 0), 1.0)];
        assert!(!agent.update(&batch).synced);
        assert_ne!(agent.online(), agent.target());
        assert!(!agent.update(&batch).synced);
        assert!(agent.update(&batch).synced);
        assert_eq!(agent.online(), agent.target());
    }

    #[test]
    fn test_save_load_reproduces_greedy_actions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");

        let mut trained = agent(Mode::Train);
        let batch = vec![rewarding_transition(Action::new(2, 6, 1), 1.0); 4];
        for _ in 0..20 {
            trained.update(&batch);
        }
        trained.save(&path).unwrap();

        let mut restored = agent(Mode::Evaluate);
        restored.load(&path).unwrap();
        trained.set_mode(Mode::Evaluate);
        for elixir in [2.0, 5.0, 10.0] {
            let obs = observation(elixir);
            assert_eq!(trained.select_action(&obs), restored.select_action(&obs));
        }
        assert_eq!(restored.updates(), 20);
    }

    #[test]
    fn test_load_rejects_mismatched_board() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        agent(Mode::Train).save(&path).unwrap();

        let mut big = Agent::new(AgentConfig::default(), &EnvConfig::default(), Mode::Train);
        assert!(matches!(big.load(&path), Err(Error::CheckpointUnavailable(_))));
        assert!(matches!(
            big.load(dir.path().join("missing.json")),
            Err(Error::CheckpointUnavailable(_))
        ));
    }
}
