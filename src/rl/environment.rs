//! Environment: a deterministic reset/step contract over the perception and
//! actuation boundaries.
//!
//! The environment never retries. Perception is expected to fail closed
//! (unknown card slots, never partial frames) and the executor reports a
//! single pass/fail result per call, with its own timeout and retry policy.
//!
//! # Step semantics
//!
//! ```text
//! illegal action ──► fixed penalty, no actuation, cached observation
//! legal action ────► execute ─┬─ success ──► capture until playable, reward from deltas
//!                             ├─ rejected ─► as illegal, refused slot masked
//!                             └─ failure ──► done, outcome = ABORTED
//! ```

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::rl::config::{EnvConfig, PlacementRegion, RewardConfig};
use crate::rl::error::{Error, Result};
use crate::rl::types::{Action, CardId, CardSlot, Observation, Outcome, CTX_COOLDOWN, HAND_SIZE};

/// Towers per side (one king, two princess).
pub const TOWERS: usize = 3;

/// Cooldown written into the cached observation for a slot the game refused.
const REFUSED_SLOT_COOLDOWN: f32 = 1.0;

/// Match-state numbers the reward is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    /// Own tower health fractions, 1.0 = full.
    pub own_towers: [f64; TOWERS],
    /// Opponent tower health fractions.
    pub opponent_towers: [f64; TOWERS],
    /// Own troops on the board.
    pub own_troops: u32,
    /// Opponent troops on the board.
    pub opponent_troops: u32,
}

impl Default for MatchSnapshot {
    fn default() -> Self {
        Self {
            own_towers: [1.0; TOWERS],
            opponent_towers: [1.0; TOWERS],
            own_troops: 0,
            opponent_troops: 0,
        }
    }
}

/// Whether the match is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchPhase {
    /// Match running.
    #[default]
    InProgress,
    /// Match over with the given result.
    Ended(Outcome),
}

/// Everything perception reports for one tick.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Structured observation for the agent.
    pub observation: Observation,
    /// Match-state numbers for reward computation.
    pub snapshot: MatchSnapshot,
    /// Match phase.
    pub phase: MatchPhase,
}

/// Perception boundary.
///
/// Implementations must always return a complete frame: when card
/// identification fails the slot is `Unknown`, and when the whole capture
/// fails the previous (or a blank) observation is returned.
pub trait Perception {
    /// Capture the current game state.
    fn capture(&mut self) -> Frame;
}

/// Result of one actuation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionReport {
    /// The action was carried out.
    Success,
    /// The action could not be carried out. Transient; may be retried.
    Failed(String),
    /// The game refused the play (for example the card in the slot costs
    /// more than perception assumed). Deterministic; never retried.
    Rejected(String),
    /// The action did not complete within the executor's timeout.
    TimedOut,
}

impl ExecutionReport {
    /// True on success.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionReport::Success)
    }
}

/// Actuation boundary. Calls are bounded by a timeout and report failure
/// instead of panicking or blocking.
pub trait Executor {
    /// Bring the game into a fresh match.
    fn start_match(&mut self) -> ExecutionReport;

    /// Play a card at a board cell.
    fn execute(&mut self, action: &Action) -> ExecutionReport;
}

impl<T: Perception + ?Sized> Perception for Box<T> {
    fn capture(&mut self) -> Frame {
        (**self).capture()
    }
}

impl<T: Executor + ?Sized> Executor for Box<T> {
    fn start_match(&mut self) -> ExecutionReport {
        (**self).start_match()
    }

    fn execute(&mut self, action: &Action) -> ExecutionReport {
        (**self).execute(action)
    }
}

/// Elixir cost lookup for the card vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct CardCatalog {
    costs: Vec<f64>,
    unknown_cost: f64,
}

impl CardCatalog {
    /// Build the catalog from configuration.
    pub fn from_config(config: &EnvConfig) -> Self {
        let costs = (0..config.card_vocab_size)
            .map(|id| {
                config
                    .card_costs
                    .get(id as usize)
                    .copied()
                    .unwrap_or_else(|| Self::default_cost(CardId(id)))
            })
            .collect();
        Self {
            costs,
            unknown_cost: config.unknown_card_cost,
        }
    }

    /// Built-in cost curve: deterministic costs spread over `[2, 6]`.
    pub fn default_cost(card: CardId) -> f64 {
        2.0 + 4.0 * ((card.0 % 7) as f64 / 6.0)
    }

    /// Cost of the card in a slot. Unknown or out-of-vocabulary cards use the assumed cost.
    pub fn cost(&self, slot: CardSlot) -> f64 {
        match slot {
            CardSlot::Known(id) => self
                .costs
                .get(id.0 as usize)
                .copied()
                .unwrap_or(self.unknown_cost),
            CardSlot::Unknown => self.unknown_cost,
        }
    }
}

/// Why an action was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum IllegalReason {
    /// Slot index past the end of the hand.
    SlotOutOfRange,
    /// Cell outside the board.
    OutOfBounds,
    /// Cell on the board but outside the player's deploy region.
    OutsidePlacement,
    /// Not enough elixir for the card.
    InsufficientElixir {
        /// Cost of the card.
        needed: f64,
        /// Elixir available.
        available: f64,
    },
    /// The slot is still cooling down.
    OnCooldown {
        /// Seconds remaining.
        remaining: f64,
    },
    /// Passed the local checks but the game refused the play.
    RejectedByGame,
}

impl fmt::Display for IllegalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IllegalReason::SlotOutOfRange => write!(f, "slot out of range"),
            IllegalReason::OutOfBounds => write!(f, "cell outside the board"),
            IllegalReason::OutsidePlacement => write!(f, "cell outside the placement region"),
            IllegalReason::InsufficientElixir { needed, available } => {
                write!(f, "needs {:.1} elixir, {:.1} available", needed, available)
            }
            IllegalReason::OnCooldown { remaining } => {
                write!(f, "slot on cooldown for {:.2}s", remaining)
            }
            IllegalReason::RejectedByGame => write!(f, "rejected by the game"),
        }
    }
}

/// The factorized action space with its legality rules.
///
/// Legality is separable: a slot is playable or not, and a cell is
/// deployable or not, so the legal set is a product of the two.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpace {
    rows: usize,
    cols: usize,
    placement: PlacementRegion,
    catalog: CardCatalog,
}

impl ActionSpace {
    /// Build from environment configuration.
    pub fn from_config(config: &EnvConfig) -> Self {
        Self {
            rows: config.grid_rows,
            cols: config.grid_cols,
            placement: config.placement,
            catalog: CardCatalog::from_config(config),
        }
    }

    /// Board rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Board columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Deploy region.
    pub fn placement(&self) -> PlacementRegion {
        self.placement
    }

    /// Card costs.
    pub fn catalog(&self) -> &CardCatalog {
        &self.catalog
    }

    /// Total number of `(slot, row, col)` triples.
    pub fn size(&self) -> usize {
        HAND_SIZE * self.rows * self.cols
    }

    /// Check a slot against elixir and cooldown; returns the card's cost.
    pub fn check_slot(&self, observation: &Observation, slot: usize) -> std::result::Result<f64, IllegalReason> {
        let card = observation.hand.slot(slot).ok_or(IllegalReason::SlotOutOfRange)?;
        let remaining = observation.cooldown(slot);
        if remaining > 0.0 {
            return Err(IllegalReason::OnCooldown { remaining });
        }
        let needed = self.catalog.cost(card);
        let available = observation.elixir();
        if available < needed {
            return Err(IllegalReason::InsufficientElixir { needed, available });
        }
        Ok(needed)
    }

    /// Check a cell against the board and the deploy region.
    pub fn check_cell(&self, row: usize, col: usize) -> std::result::Result<(), IllegalReason> {
        if row >= self.rows || col >= self.cols {
            return Err(IllegalReason::OutOfBounds);
        }
        if !self.placement.contains(row, col, self.cols) {
            return Err(IllegalReason::OutsidePlacement);
        }
        Ok(())
    }

    /// Full legality check; returns the elixir the action would spend.
    pub fn check(&self, observation: &Observation, action: &Action) -> std::result::Result<f64, IllegalReason> {
        self.check_cell(action.row, action.col)?;
        self.check_slot(observation, action.slot)
    }

    /// Slots that can be played right now.
    pub fn playable_slots(&self, observation: &Observation) -> Vec<usize> {
        (0..HAND_SIZE)
            .filter(|&slot| self.check_slot(observation, slot).is_ok())
            .collect()
    }

    /// Deployable cells, row-major.
    pub fn placement_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let last = self.placement.last_row.min(self.rows.saturating_sub(1));
        (self.placement.first_row..=last).flat_map(move |row| (0..self.cols).map(move |col| (row, col)))
    }

    /// Every legal action for an observation.
    pub fn legal_actions(&self, observation: &Observation) -> Vec<Action> {
        let slots = self.playable_slots(observation);
        slots
            .iter()
            .flat_map(|&slot| self.placement_cells().map(move |(row, col)| Action::new(slot, row, col)))
            .collect()
    }
}

/// Diagnostics attached to every step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Terminal outcome when `done`.
    pub outcome: Option<Outcome>,
    /// Set when the action was rejected.
    pub illegal: Option<IllegalReason>,
    /// Hand slots perception could not identify in the returned observation.
    pub unknown_slots: usize,
    /// Elixir spent by this step.
    pub elixir_spent: f64,
    /// Opponent tower health removed this step.
    pub damage_dealt: f64,
    /// Own tower health lost this step.
    pub damage_taken: f64,
    /// Opponent troops removed this step.
    pub troops_neutralized: u32,
    /// True when the step limit ended the episode.
    pub truncated: bool,
    /// Ticks observed after the action while nothing was playable.
    pub idle_ticks: u32,
    /// Executor message when actuation failed or timed out.
    pub actuation_failure: Option<String>,
}

/// Result of [`Environment::step`].
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Observation after the step.
    pub observation: Arc<Observation>,
    /// Reward for the step.
    pub reward: f64,
    /// Whether the episode is over.
    pub done: bool,
    /// Diagnostics.
    pub info: StepInfo,
}

#[derive(Debug)]
struct EpisodeState {
    observation: Arc<Observation>,
    snapshot: MatchSnapshot,
    steps: u32,
}

/// The environment.
///
/// # Type Parameters
/// - `P`: perception boundary
/// - `X`: actuation boundary
pub struct Environment<P: Perception, X: Executor> {
    config: EnvConfig,
    reward: RewardConfig,
    space: ActionSpace,
    perception: P,
    executor: X,
    episode: Option<EpisodeState>,
}

impl<P: Perception, X: Executor> Environment<P, X> {
    /// Create an environment over the given boundaries.
    pub fn new(config: EnvConfig, reward: RewardConfig, perception: P, executor: X) -> Self {
        let space = ActionSpace::from_config(&config);
        Self {
            config,
            reward,
            space,
            perception,
            executor,
            episode: None,
        }
    }

    /// Action space and legality rules.
    pub fn action_space(&self) -> &ActionSpace {
        &self.space
    }

    /// Environment configuration.
    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// True between a successful `reset` and the terminal step.
    pub fn in_episode(&self) -> bool {
        self.episode.is_some()
    }

    /// Perception backend.
    pub fn perception(&self) -> &P {
        &self.perception
    }

    /// Actuation backend.
    pub fn executor(&self) -> &X {
        &self.executor
    }

    /// Start a new episode and return its first observation.
    ///
    /// Frames in which no card is playable are skipped, up to the step limit.
    /// Fails with [`Error::EnvironmentUnavailable`] when the executor cannot
    /// start a match or perception reports a match that is already over.
    pub fn reset(&mut self) -> Result<Arc<Observation>> {
        self.episode = None;
        match self.executor.start_match() {
            ExecutionReport::Success => {}
            ExecutionReport::Failed(msg) | ExecutionReport::Rejected(msg) => {
                return Err(Error::EnvironmentUnavailable(format!("start match failed: {}", msg)))
            }
            ExecutionReport::TimedOut => {
                return Err(Error::EnvironmentUnavailable("start match timed out".to_string()))
            }
        }

        let mut frame = self.perception.capture();
        let mut waited = 0;
        while frame.phase == MatchPhase::InProgress
            && waited < self.config.max_steps
            && self.space.playable_slots(&frame.observation).is_empty()
        {
            waited += 1;
            frame = self.perception.capture();
        }
        if let MatchPhase::Ended(outcome) = frame.phase {
            return Err(Error::EnvironmentUnavailable(format!(
                "match reported over ({}) immediately after start",
                outcome
            )));
        }
        let observation = Arc::new(frame.observation);
        if observation.hand.unknown_count() > 0 {
            debug!("perception degraded at reset: hand {}", observation.hand);
        }
        self.episode = Some(EpisodeState {
            observation: observation.clone(),
            snapshot: frame.snapshot,
            steps: 0,
        });
        Ok(observation)
    }

    /// Apply an action and advance to the next decision point.
    ///
    /// An illegal action is neither actuated nor observed: the match is left
    /// as it was and the cached observation is returned with the penalty.
    /// After a successful play, ticks in which nothing is playable are
    /// observed and folded into this step, so the next observation always
    /// offers a decision unless the episode ended.
    ///
    /// Fails only when no episode is in progress.
    pub fn step(&mut self, action: Action) -> Result<StepResult> {
        let Some(mut state) = self.episode.take() else {
            return Err(Error::EnvironmentUnavailable("step called outside an episode".to_string()));
        };
        state.steps += 1;

        let cost = match self.space.check(&state.observation, &action) {
            Ok(cost) => cost,
            Err(reason) => {
                debug!("illegal action {}: {}", action, reason);
                return Ok(self.reject(state, reason));
            }
        };

        let mut info = StepInfo::default();
        match self.executor.execute(&action) {
            ExecutionReport::Success => {}
            ExecutionReport::Rejected(message) => {
                debug!("game rejected {}: {}", action, message);
                return Ok(self.refused(state, action));
            }
            report => {
                let message = match report {
                    ExecutionReport::Failed(msg) => msg,
                    _ => "actuation timed out".to_string(),
                };
                warn!("actuation failed for {}: {}; aborting episode", action, message);
                info.actuation_failure = Some(message);
                info.outcome = Some(Outcome::Aborted);
                info.unknown_slots = state.observation.hand.unknown_count();
                return Ok(StepResult {
                    observation: state.observation,
                    reward: self.reward.aborted,
                    done: true,
                    info,
                });
            }
        }

        info.elixir_spent = cost;
        let frame = self.next_decision(&mut state, &mut info);
        Ok(self.settle(state, frame, info, 0.0))
    }

    /// Illegal action: no actuation, no observation, fixed penalty. Only the
    /// step limit can end the episode here.
    fn reject(&mut self, state: EpisodeState, reason: IllegalReason) -> StepResult {
        let mut info = StepInfo {
            illegal: Some(reason),
            unknown_slots: state.observation.hand.unknown_count(),
            ..Default::default()
        };
        let mut reward = self.reward.illegal_action;
        let done = state.steps >= self.config.max_steps;
        if done {
            info.truncated = true;
            info.outcome = Some(Outcome::Draw);
            reward += self.reward.draw;
        } else {
            self.episode = Some(EpisodeState {
                observation: state.observation.clone(),
                ..state
            });
        }
        StepResult {
            observation: state.observation,
            reward,
            done,
            info,
        }
    }

    /// The game refused a play that passed the local checks. Penalised like
    /// an illegal action; the slot is marked unplayable in the cached
    /// observation so the same play is not chosen again. If that leaves
    /// nothing playable, the match is observed until something is.
    fn refused(&mut self, mut state: EpisodeState, action: Action) -> StepResult {
        let mut blocked = (*state.observation).clone();
        if let Some(cooldown) = blocked.context.get_mut(CTX_COOLDOWN + action.slot) {
            *cooldown = cooldown.max(REFUSED_SLOT_COOLDOWN);
        }
        state.observation = Arc::new(blocked);
        if !self.space.playable_slots(&state.observation).is_empty() {
            return self.reject(state, IllegalReason::RejectedByGame);
        }

        let mut info = StepInfo {
            illegal: Some(IllegalReason::RejectedByGame),
            ..Default::default()
        };
        let frame = self.next_decision(&mut state, &mut info);
        self.settle(state, frame, info, self.reward.illegal_action)
    }

    /// Capture frames until a slot is playable, the match ends or the step
    /// limit is reached. Every extra capture counts as a step.
    fn next_decision(&mut self, state: &mut EpisodeState, info: &mut StepInfo) -> Frame {
        let mut frame = self.perception.capture();
        while frame.phase == MatchPhase::InProgress
            && state.steps < self.config.max_steps
            && self.space.playable_slots(&frame.observation).is_empty()
        {
            state.steps += 1;
            info.idle_ticks += 1;
            frame = self.perception.capture();
        }
        if info.idle_ticks > 0 {
            debug!("waited {} tick(s) for a playable card", info.idle_ticks);
        }
        frame
    }

    /// Score the move from the last baseline to `frame` and decide termination.
    fn settle(&mut self, state: EpisodeState, frame: Frame, mut info: StepInfo, base: f64) -> StepResult {
        info.damage_dealt = tower_loss(&state.snapshot.opponent_towers, &frame.snapshot.opponent_towers);
        info.damage_taken = tower_loss(&state.snapshot.own_towers, &frame.snapshot.own_towers);
        info.troops_neutralized = state
            .snapshot
            .opponent_troops
            .saturating_sub(frame.snapshot.opponent_troops);
        info.unknown_slots = frame.observation.hand.unknown_count();
        if info.unknown_slots > 0 {
            debug!("perception degraded: {} unknown slot(s)", info.unknown_slots);
        }

        let mut reward = base + self.shaped_reward(&info);
        let mut done = false;
        if let MatchPhase::Ended(outcome) = frame.phase {
            done = true;
            info.outcome = Some(outcome);
            reward += self.terminal_reward(outcome);
        } else if state.steps >= self.config.max_steps {
            done = true;
            info.truncated = true;
            info.outcome = Some(Outcome::Draw);
            reward += self.reward.draw;
        }

        let observation = Arc::new(frame.observation);
        if !done {
            self.episode = Some(EpisodeState {
                observation: observation.clone(),
                snapshot: frame.snapshot,
                steps: state.steps,
            });
        }
        StepResult {
            observation,
            reward,
            done,
            info,
        }
    }

    /// Dense reward: value gained net of elixir spent and damage taken.
    fn shaped_reward(&self, info: &StepInfo) -> f64 {
        let r = &self.reward;
        r.damage_dealt * info.damage_dealt + r.troop_neutralized * info.troops_neutralized as f64
            - r.damage_taken * info.damage_taken
            - r.elixir_spent * info.elixir_spent
    }

    fn terminal_reward(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Win => self.reward.win,
            Outcome::Draw => self.reward.draw,
            Outcome::Loss => self.reward.loss,
            Outcome::Aborted => self.reward.aborted,
        }
    }
}

fn tower_loss(before: &[f64; TOWERS], after: &[f64; TOWERS]) -> f64 {
    before
        .iter()
        .zip(after.iter())
        .map(|(b, a)| (b - a).max(0.0))
        .sum()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rl::types::{Hand, CTX_COOLDOWN, CTX_ELIXIR};
    use std::collections::VecDeque;

    /// Perception that replays a script, repeating the last frame when exhausted.
    pub(crate) struct ScriptedPerception {
        pub frames: VecDeque<Frame>,
        pub last: Frame,
    }

    impl ScriptedPerception {
        pub fn new(frames: Vec<Frame>) -> Self {
            let last = frames.first().cloned().unwrap_or_else(|| frame(5.0, MatchSnapshot::default()));
            Self {
                frames: frames.into(),
                last,
            }
        }
    }

    impl Perception for ScriptedPerception {
        fn capture(&mut self) -> Frame {
            if let Some(next) = self.frames.pop_front() {
                self.last = next;
            }
            self.last.clone()
        }
    }

    /// Executor that replays scripted reports and counts calls.
    #[derive(Default)]
    pub(crate) struct ScriptedExecutor {
        pub starts: VecDeque<ExecutionReport>,
        pub reports: VecDeque<ExecutionReport>,
        pub executed: Vec<Action>,
    }

    impl Executor for ScriptedExecutor {
        fn start_match(&mut self) -> ExecutionReport {
            self.starts.pop_front().unwrap_or(ExecutionReport::Success)
        }

        fn execute(&mut self, action: &Action) -> ExecutionReport {
            self.executed.push(*action);
            self.reports.pop_front().unwrap_or(ExecutionReport::Success)
        }
    }

    pub(crate) fn frame(elixir: f32, snapshot: MatchSnapshot) -> Frame {
        let config = EnvConfig::small();
        let mut observation =
            Observation::blank(config.grid_rows, config.grid_cols, config.spatial_channels);
        observation.context[CTX_ELIXIR] = elixir;
        observation.hand = Hand::from_detections((0..4).map(|i| Some(CardId(i))));
        Frame {
            observation,
            snapshot,
            phase: MatchPhase::InProgress,
        }
    }

    fn env(frames: Vec<Frame>, executor: ScriptedExecutor) -> Environment<ScriptedPerception, ScriptedExecutor> {
        Environment::new(
            EnvConfig::small(),
            RewardConfig::default(),
            ScriptedPerception::new(frames),
            executor,
        )
    }

    #[test]
    fn test_illegal_action_penalized_without_state_change() {
        let mut env = env(vec![frame(5.0, MatchSnapshot::default())], ScriptedExecutor::default());
        let first = env.reset().unwrap();

        for action in [
            Action::new(0, 0, 0),
            Action::new(7, 5, 1),
            Action::new(0, 99, 0),
        ] {
            let result = env.step(action).unwrap();
            assert!(!result.done);
            assert_eq!(result.reward, RewardConfig::default().illegal_action);
            assert!(result.info.illegal.is_some());
            assert_eq!(*result.observation, *first);
        }
        assert!(env.executor().executed.is_empty());
        assert!(env.in_episode());
    }

    #[test]
    fn test_illegal_action_does_not_observe() {
        let start = MatchSnapshot::default();
        let mut hit = start;
        hit.own_towers[2] = 0.5;
        let mut env = env(vec![frame(5.0, start), frame(5.0, hit), frame(3.0, hit)], ScriptedExecutor::default());
        env.reset().unwrap();
        let pending = env.perception().frames.len();

        let illegal = env.step(Action::new(0, 0, 0)).unwrap();
        assert_eq!(illegal.reward, RewardConfig::default().illegal_action);
        assert_eq!(illegal.info.damage_taken, 0.0);
        assert_eq!(env.perception().frames.len(), pending);

        let legal = env.step(Action::new(0, 4, 0)).unwrap();
        assert!((legal.info.damage_taken - 0.5).abs() < 1e-12);
        assert_eq!(legal.info.idle_ticks, 0);
    }

    #[test]
    fn test_idle_ticks_skipped_until_playable() {
        let start = MatchSnapshot::default();
        let mut hit = start;
        hit.own_towers[0] = 0.5;
        let mut env = env(
            vec![frame(5.0, start), frame(0.5, start), frame(1.0, hit), frame(3.0, hit)],
            ScriptedExecutor::default(),
        );
        env.reset().unwrap();

        let result = env.step(Action::new(0, 4, 0)).unwrap();
        assert!(!result.done);
        assert_eq!(result.info.idle_ticks, 2);
        assert!((result.info.damage_taken - 0.5).abs() < 1e-12);
        assert!(!env.action_space().playable_slots(&result.observation).is_empty());
        assert!(env.perception().frames.is_empty());
    }

    #[test]
    fn test_idle_ticks_bounded_by_step_limit() {
        let mut config = EnvConfig::small();
        config.max_steps = 3;
        let mut env = Environment::new(
            config,
            RewardConfig::default(),
            ScriptedPerception::new(vec![frame(5.0, MatchSnapshot::default()), frame(0.0, MatchSnapshot::default())]),
            ScriptedExecutor::default(),
        );
        env.reset().unwrap();
        let result = env.step(Action::new(0, 4, 0)).unwrap();
        assert!(result.done);
        assert!(result.info.truncated);
        assert_eq!(result.info.idle_ticks, 2);
    }

    #[test]
    fn test_reset_waits_for_playable_card() {
        let mut env = env(
            vec![frame(0.0, MatchSnapshot::default()), frame(0.0, MatchSnapshot::default()), frame(4.0, MatchSnapshot::default())],
            ScriptedExecutor::default(),
        );
        let obs = env.reset().unwrap();
        assert_eq!(obs.elixir(), 4.0);
    }

    #[test]
    fn test_game_rejection_is_illegal_and_masks_slot() {
        let executor = ScriptedExecutor {
            reports: vec![ExecutionReport::Rejected("not enough elixir".into())].into(),
            ..Default::default()
        };
        let mut env = env(vec![frame(5.0, MatchSnapshot::default())], executor);
        let first = env.reset().unwrap();
        let pending = env.perception().frames.len();

        let result = env.step(Action::new(1, 4, 0)).unwrap();
        assert!(!result.done);
        assert_eq!(result.info.illegal, Some(IllegalReason::RejectedByGame));
        assert_eq!(result.info.actuation_failure, None);
        assert_eq!(result.reward, RewardConfig::default().illegal_action);
        assert_eq!(env.perception().frames.len(), pending);
        assert_eq!(env.action_space().playable_slots(&result.observation), vec![0, 2, 3]);
        assert_eq!(result.observation.elixir(), first.elixir());

        // The refused slot stays masked until the next observation.
        let again = env.step(Action::new(1, 4, 0)).unwrap();
        assert!(matches!(again.info.illegal, Some(IllegalReason::OnCooldown { .. })));
        assert_eq!(env.executor().executed.len(), 1);
        assert!(env.step(Action::new(0, 4, 0)).unwrap().info.illegal.is_none());
    }

    #[test]
    fn test_game_rejection_of_last_playable_slot_waits() {
        let executor = ScriptedExecutor {
            reports: vec![ExecutionReport::Rejected("not playable".into())].into(),
            ..Default::default()
        };
        let mut only = frame(5.0, MatchSnapshot::default());
        for slot in 1..HAND_SIZE {
            only.observation.context[CTX_COOLDOWN + slot] = 0.5;
        }
        let mut env = env(vec![only, frame(5.0, MatchSnapshot::default())], executor);
        env.reset().unwrap();

        let result = env.step(Action::new(0, 4, 0)).unwrap();
        assert!(!result.done);
        assert_eq!(result.info.illegal, Some(IllegalReason::RejectedByGame));
        assert_eq!(result.info.elixir_spent, 0.0);
        assert_eq!(env.action_space().playable_slots(&result.observation), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_insufficient_elixir_and_cooldown_are_illegal() {
        let mut cooling = frame(5.0, MatchSnapshot::default());
        cooling.observation.context[CTX_COOLDOWN + 1] = 0.5;
        let mut env = env(vec![cooling], ScriptedExecutor::default());
        env.reset().unwrap();

        let result = env.step(Action::new(1, 5, 1)).unwrap();
        assert!(matches!(result.info.illegal, Some(IllegalReason::OnCooldown { .. })));

        let space = env.action_space().clone();
        let poor = frame(1.0, MatchSnapshot::default()).observation;
        assert!(matches!(
            space.check(&poor, &Action::new(0, 5, 1)),
            Err(IllegalReason::InsufficientElixir { .. })
        ));
        let mut rich = frame(10.0, MatchSnapshot::default()).observation;
        rich.context[CTX_COOLDOWN + 1] = 0.5;
        assert_eq!(space.playable_slots(&rich), vec![0, 2, 3]);
        assert_eq!(space.legal_actions(&rich).len(), 3 * 4 * 6);
    }

    #[test]
    fn test_reward_from_match_deltas() {
        let start = MatchSnapshot {
            opponent_troops: 3,
            ..Default::default()
        };
        let mut after = start;
        after.opponent_towers[1] = 0.75;
        after.own_towers[0] = 0.9;
        after.opponent_troops = 1;

        let mut env = env(vec![frame(5.0, start), frame(3.0, after)], ScriptedExecutor::default());
        env.reset().unwrap();
        let result = env.step(Action::new(0, 5, 2)).unwrap();

        let r = RewardConfig::default();
        let cost = CardCatalog::default_cost(CardId(0));
        let expected = r.damage_dealt * 0.25 + r.troop_neutralized * 2.0 - r.damage_taken * 0.1 - r.elixir_spent * cost;
        assert!((result.reward - expected).abs() < 1e-9);
        assert!(!result.done);
        assert_eq!(result.info.troops_neutralized, 2);
        assert_eq!(env.executor().executed, vec![Action::new(0, 5, 2)]);
    }

    #[test]
    fn test_efficient_trade_beats_inefficient_trade() {
        let start = MatchSnapshot::default();
        let mut after = start;
        after.opponent_towers[0] = 0.8;

        // Same damage, cheap card (id 0, cost 2) vs expensive card (id 6, cost 6).
        let mut cheap = env(vec![frame(10.0, start), frame(8.0, after)], ScriptedExecutor::default());
        cheap.reset().unwrap();
        let cheap_reward = cheap.step(Action::new(0, 5, 0)).unwrap().reward;

        let mut pricey_frame = frame(10.0, start);
        pricey_frame.observation.hand = Hand::from_detections(vec![Some(CardId(6))]);
        let mut pricey = env(vec![pricey_frame, frame(4.0, after)], ScriptedExecutor::default());
        pricey.reset().unwrap();
        let pricey_reward = pricey.step(Action::new(0, 5, 0)).unwrap().reward;

        assert!(cheap_reward > pricey_reward);
    }

    #[test]
    fn test_terminal_outcomes_ordered() {
        let mut rewards = Vec::new();
        for outcome in [Outcome::Win, Outcome::Draw, Outcome::Loss] {
            let mut end = frame(5.0, MatchSnapshot::default());
            end.phase = MatchPhase::Ended(outcome);
            let mut env = env(vec![frame(5.0, MatchSnapshot::default()), end], ScriptedExecutor::default());
            env.reset().unwrap();
            let result = env.step(Action::new(0, 4, 0)).unwrap();
            assert!(result.done);
            assert_eq!(result.info.outcome, Some(outcome));
            assert!(!env.in_episode());
            rewards.push(result.reward);
        }
        assert!(rewards[0] > rewards[1] && rewards[1] > rewards[2]);
    }

    #[test]
    fn test_actuation_timeout_aborts_episode() {
        let executor = ScriptedExecutor {
            reports: vec![ExecutionReport::TimedOut].into(),
            ..Default::default()
        };
        let mut env = env(vec![frame(5.0, MatchSnapshot::default())], executor);
        env.reset().unwrap();
        let result = env.step(Action::new(0, 4, 0)).unwrap();
        assert!(result.done);
        assert_eq!(result.info.outcome, Some(Outcome::Aborted));
        assert!(result.info.actuation_failure.is_some());
        assert!(env.step(Action::new(0, 4, 0)).is_err());
    }

    #[test]
    fn test_reset_unavailable() {
        let executor = ScriptedExecutor {
            starts: vec![ExecutionReport::Failed("no emulator".into())].into(),
            ..Default::default()
        };
        let mut env = env(vec![], executor);
        assert!(matches!(env.reset(), Err(Error::EnvironmentUnavailable(_))));
        assert!(env.reset().is_ok());
    }

    #[test]
    fn test_unknown_cards_degrade_gracefully() {
        let mut blind = frame(10.0, MatchSnapshot::default());
        blind.observation.hand = Hand::unknown();
        let mut env = env(vec![blind.clone(), blind], ScriptedExecutor::default());
        let obs = env.reset().unwrap();
        assert_eq!(obs.hand.len(), HAND_SIZE);

        let result = env.step(Action::new(2, 4, 3)).unwrap();
        assert!(result.info.illegal.is_none());
        assert_eq!(result.info.unknown_slots, HAND_SIZE);
        assert_eq!(result.info.elixir_spent, EnvConfig::small().unknown_card_cost);
    }

    #[test]
    fn test_step_limit_truncates_as_draw() {
        let mut config = EnvConfig::small();
        config.max_steps = 2;
        let mut env = Environment::new(
            config,
            RewardConfig::default(),
            ScriptedPerception::new(vec![frame(10.0, MatchSnapshot::default())]),
            ScriptedExecutor::default(),
        );
        env.reset().unwrap();
        assert!(!env.step(Action::new(0, 4, 0)).unwrap().done);
        let last = env.step(Action::new(0, 0, 0)).unwrap();
        assert!(last.done);
        assert!(last.info.truncated);
        assert_eq!(last.info.outcome, Some(Outcome::Draw));
    }
}
