//! In-process match simulator implementing both the perception and the
//! actuation boundaries.
//!
//! This is not a physics replica of the real game. It models the pieces the
//! decision loop cares about:
//!
//! - Elixir that regenerates over time up to a cap, for both sides
//! - A cycling 8-card deck with a 4-card hand and per-slot cooldowns
//! - Units that march down their lane, fight enemy units they meet and
//!   damage the tower at the end of the lane
//! - A random opponent that plays whatever it can afford on its own half
//! - Three towers per side; the king tower falling ends the match, otherwise
//!   tower health decides at the end of regulation time
//!
//! ## Board orientation
//!
//! ```text
//! row 0        ┌──────────────┐  opponent towers
//!              │  opponent    │  opponent deploys here
//!              ├── river ─────┤
//!              │  player      │  player deploys here (placement region)
//! row H-1      └──────────────┘  player towers
//! ```
//!
//! Time advances one decision tick per perception capture, so the match
//! moves on whether or not the agent manages to act.
//!
//! Failures can be injected on every boundary call to exercise the
//! degradation paths: unidentified cards, failed or slow actuation, and
//! matches that refuse to start.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::rl::config::EnvConfig;
use crate::rl::environment::{
    ActionSpace, ExecutionReport, Executor, Frame, MatchPhase, MatchSnapshot, Perception, TOWERS,
};
use crate::rl::types::{
    Action, CardId, CardSlot, Grid, Hand, Observation, Outcome, CONTEXT_LEN, CTX_CLOCK, CTX_COOLDOWN, CTX_ELIXIR,
    CTX_OPP_AGE, CTX_OPP_CARD, CTX_OPP_COL, CTX_OPP_ROW, HAND_SIZE,
};

/// Cards in each side's deck.
pub const DECK_SIZE: usize = 8;
/// Index of the king tower in the tower arrays.
pub const KING: usize = 1;

/// Spatial channel layout rendered by the simulator.
const CH_TERRAIN: usize = 0;
const CH_FRIENDLY: usize = 1;
const CH_OPPONENT: usize = 2;
const CH_TOWERS: usize = 3;

/// Simulation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Elixir at match start.
    pub initial_elixir: f64,
    /// Elixir cap.
    pub elixir_cap: f64,
    /// Elixir regenerated per second.
    pub elixir_regen_per_sec: f64,
    /// Simulated seconds per decision tick.
    pub tick_seconds: f64,
    /// Regulation time in seconds.
    pub match_seconds: f64,
    /// Cooldown put on a slot after playing it, in seconds.
    pub play_cooldown_seconds: f64,
    /// Seconds between opponent decisions.
    pub opponent_interval_seconds: f64,
    /// Rows per second a unit advances.
    pub unit_speed: f64,
    /// Unit strength per elixir of card cost.
    pub strength_per_elixir: f64,
    /// Strength removed per second per unit of enemy strength in range.
    pub combat_rate: f64,
    /// Tower health removed per unit of strength reaching a tower.
    pub tower_damage: f64,
    /// Probability that a hand slot is reported `Unknown`.
    pub perception_failure_rate: f64,
    /// Probability that an actuation call fails.
    pub actuation_failure_rate: f64,
    /// Artificial delay on every actuation call.
    pub actuation_latency_ms: u64,
    /// Probability that a match refuses to start.
    pub start_failure_rate: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            initial_elixir: 5.0,
            elixir_cap: 10.0,
            elixir_regen_per_sec: 0.267,
            tick_seconds: 0.5,
            match_seconds: 180.0,
            play_cooldown_seconds: 1.0,
            opponent_interval_seconds: 3.0,
            unit_speed: 1.5,
            strength_per_elixir: 0.25,
            combat_rate: 1.0,
            tower_damage: 0.35,
            perception_failure_rate: 0.0,
            actuation_failure_rate: 0.0,
            actuation_latency_ms: 0,
            start_failure_rate: 0.0,
        }
    }
}

impl SimConfig {
    /// Shorter matches for tests and smoke runs.
    pub fn fast() -> Self {
        Self {
            match_seconds: 40.0,
            tick_seconds: 1.0,
            unit_speed: 3.0,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Player,
    Opponent,
}

#[derive(Debug, Clone)]
struct Unit {
    side: Side,
    row: f64,
    col: f64,
    strength: f64,
}

/// Full match state.
#[derive(Debug)]
struct SimState {
    config: SimConfig,
    space: ActionSpace,
    rows: usize,
    cols: usize,
    channels: usize,
    vocab: u16,
    rng: StdRng,

    elixir: f64,
    opponent_elixir: f64,
    clock: f64,
    opponent_timer: f64,
    own_towers: [f64; TOWERS],
    opponent_towers: [f64; TOWERS],
    hand: [CardId; HAND_SIZE],
    queue: VecDeque<CardId>,
    cooldowns: [f64; HAND_SIZE],
    units: Vec<Unit>,
    last_opponent_play: Option<(CardId, usize, usize, f64)>,
    phase: MatchPhase,
    fresh: bool,
    matches: u64,
}

impl SimState {
    fn new(env: &EnvConfig, config: SimConfig, seed: u64) -> Self {
        Self {
            space: ActionSpace::from_config(env),
            rows: env.grid_rows,
            cols: env.grid_cols,
            channels: env.spatial_channels,
            vocab: env.card_vocab_size.max(1),
            rng: StdRng::seed_from_u64(seed),
            elixir: config.initial_elixir,
            opponent_elixir: config.initial_elixir,
            clock: 0.0,
            opponent_timer: 0.0,
            own_towers: [1.0; TOWERS],
            opponent_towers: [1.0; TOWERS],
            hand: [CardId(0); HAND_SIZE],
            queue: VecDeque::new(),
            cooldowns: [0.0; HAND_SIZE],
            units: Vec::new(),
            last_opponent_play: None,
            phase: MatchPhase::Ended(Outcome::Draw),
            fresh: false,
            matches: 0,
            config,
        }
    }

    fn cost(&self, card: CardId) -> f64 {
        self.space.catalog().cost(CardSlot::Known(card))
    }

    fn start(&mut self) -> ExecutionReport {
        if self.rng.gen::<f64>() < self.config.start_failure_rate {
            return ExecutionReport::Failed("match did not start".to_string());
        }
        let mut deck: Vec<CardId> = (0..self.vocab).map(CardId).collect();
        deck.shuffle(&mut self.rng);
        deck.truncate(DECK_SIZE.max(HAND_SIZE));
        while deck.len() < DECK_SIZE {
            deck.push(deck[deck.len() % self.vocab as usize]);
        }

        for (slot, card) in self.hand.iter_mut().zip(deck.iter()) {
            *slot = *card;
        }
        self.queue = deck[HAND_SIZE..].iter().copied().collect();
        self.elixir = self.config.initial_elixir;
        self.opponent_elixir = self.config.initial_elixir;
        self.clock = 0.0;
        self.opponent_timer = 0.0;
        self.own_towers = [1.0; TOWERS];
        self.opponent_towers = [1.0; TOWERS];
        self.cooldowns = [0.0; HAND_SIZE];
        self.units.clear();
        self.last_opponent_play = None;
        self.phase = MatchPhase::InProgress;
        self.fresh = true;
        self.matches += 1;
        ExecutionReport::Success
    }

    fn play(&mut self, action: &Action) -> ExecutionReport {
        if self.config.actuation_latency_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.actuation_latency_ms));
        }
        if self.phase != MatchPhase::InProgress {
            return ExecutionReport::Failed("no match in progress".to_string());
        }
        if self.rng.gen::<f64>() < self.config.actuation_failure_rate {
            return ExecutionReport::Failed("tap not registered".to_string());
        }
        let Some(&card) = self.hand.get(action.slot) else {
            return ExecutionReport::Rejected(format!("no slot {}", action.slot));
        };
        let cost = self.cost(card);
        if self.cooldowns[action.slot] > 0.0 || self.elixir < cost {
            return ExecutionReport::Rejected(format!("{} not playable", card));
        }
        if self.space.check_cell(action.row, action.col).is_err() {
            return ExecutionReport::Rejected(format!("cannot deploy at ({}, {})", action.row, action.col));
        }

        self.elixir -= cost;
        self.units.push(Unit {
            side: Side::Player,
            row: action.row as f64,
            col: action.col as f64,
            strength: cost * self.config.strength_per_elixir,
        });
        self.queue.push_back(card);
        if let Some(next) = self.queue.pop_front() {
            self.hand[action.slot] = next;
        }
        self.cooldowns[action.slot] = self.config.play_cooldown_seconds;
        ExecutionReport::Success
    }

    /// Advance the match by one decision tick.
    fn advance(&mut self) {
        if self.phase != MatchPhase::InProgress {
            return;
        }
        let dt = self.config.tick_seconds;
        let cap = self.config.elixir_cap;
        let regen = self.config.elixir_regen_per_sec * dt;
        self.elixir = (self.elixir + regen).min(cap);
        self.opponent_elixir = (self.opponent_elixir + regen).min(cap);
        for cd in self.cooldowns.iter_mut() {
            *cd = (*cd - dt).max(0.0);
        }
        if let Some(play) = self.last_opponent_play.as_mut() {
            play.3 += dt;
        }

        self.opponent_timer += dt;
        if self.opponent_timer >= self.config.opponent_interval_seconds {
            self.opponent_timer = 0.0;
            self.opponent_turn();
        }

        self.march(dt);
        self.fight(dt);
        self.siege();

        self.clock += dt;
        self.phase = self.judge();
    }

    fn opponent_turn(&mut self) {
        let affordable: Vec<CardId> = (0..self.vocab)
            .map(CardId)
            .filter(|&c| self.cost(c) <= self.opponent_elixir)
            .collect();
        let Some(&card) = affordable.choose(&mut self.rng) else {
            return;
        };
        let last_row = self.rows.saturating_sub(1).saturating_sub(self.space.placement().first_row);
        let row = self.rng.gen_range(0..=last_row);
        let col = self.rng.gen_range(0..self.cols.max(1));
        let cost = self.cost(card);
        self.opponent_elixir -= cost;
        self.units.push(Unit {
            side: Side::Opponent,
            row: row as f64,
            col: col as f64,
            strength: cost * self.config.strength_per_elixir,
        });
        self.last_opponent_play = Some((card, row, col, 0.0));
    }

    fn march(&mut self, dt: f64) {
        let step = self.config.unit_speed * dt;
        for unit in self.units.iter_mut() {
            match unit.side {
                Side::Player => unit.row -= step,
                Side::Opponent => unit.row += step,
            }
        }
    }

    /// Units within range of an enemy trade strength simultaneously.
    fn fight(&mut self, dt: f64) {
        const RANGE: f64 = 1.5;
        let rate = self.config.combat_rate * dt;
        let mut losses = vec![0.0; self.units.len()];
        for (i, a) in self.units.iter().enumerate() {
            for (j, b) in self.units.iter().enumerate().skip(i + 1) {
                if a.side == b.side {
                    continue;
                }
                let (dr, dc) = (a.row - b.row, a.col - b.col);
                if dr * dr + dc * dc <= RANGE * RANGE {
                    losses[i] += b.strength * rate;
                    losses[j] += a.strength * rate;
                }
            }
        }
        for (unit, loss) in self.units.iter_mut().zip(losses) {
            unit.strength -= loss;
        }
        self.units.retain(|u| u.strength > 1e-6);
    }

    /// Units that reach the far edge hit the tower of their lane and are spent.
    fn siege(&mut self) {
        let rows = self.rows as f64;
        let cols = self.cols.max(1) as f64;
        let damage = self.config.tower_damage;
        let mut own_hits = [0.0; TOWERS];
        let mut opponent_hits = [0.0; TOWERS];
        self.units.retain(|u| {
            let lane = ((u.col / cols) * TOWERS as f64).clamp(0.0, (TOWERS - 1) as f64) as usize;
            match u.side {
                Side::Player if u.row <= 0.0 => {
                    opponent_hits[lane] += u.strength * damage;
                    false
                }
                Side::Opponent if u.row >= rows - 1.0 => {
                    own_hits[lane] += u.strength * damage;
                    false
                }
                _ => true,
            }
        });
        apply_hits(&mut self.own_towers, &own_hits);
        apply_hits(&mut self.opponent_towers, &opponent_hits);
    }

    fn judge(&self) -> MatchPhase {
        let own_down = self.own_towers[KING] <= 0.0;
        let opponent_down = self.opponent_towers[KING] <= 0.0;
        match (own_down, opponent_down) {
            (true, true) => return MatchPhase::Ended(Outcome::Draw),
            (true, false) => return MatchPhase::Ended(Outcome::Loss),
            (false, true) => return MatchPhase::Ended(Outcome::Win),
            (false, false) => {}
        }
        if self.clock + 1e-9 < self.config.match_seconds {
            return MatchPhase::InProgress;
        }
        let own: f64 = self.own_towers.iter().sum();
        let opponent: f64 = self.opponent_towers.iter().sum();
        if (own - opponent).abs() < 1e-9 {
            MatchPhase::Ended(Outcome::Draw)
        } else if own > opponent {
            MatchPhase::Ended(Outcome::Win)
        } else {
            MatchPhase::Ended(Outcome::Loss)
        }
    }

    fn capture(&mut self) -> Frame {
        if self.fresh {
            self.fresh = false;
        } else {
            self.advance();
        }
        let failure_rate = self.config.perception_failure_rate;
        let detections: Vec<Option<CardId>> = self
            .hand
            .iter()
            .map(|&card| (self.rng.gen::<f64>() >= failure_rate).then_some(card))
            .collect();

        Frame {
            observation: Observation {
                spatial: self.render(),
                context: self.context(),
                hand: Hand::from_detections(detections),
            },
            snapshot: self.snapshot(),
            phase: self.phase,
        }
    }

    fn snapshot(&self) -> MatchSnapshot {
        let count = |side| self.units.iter().filter(|u| u.side == side).count() as u32;
        MatchSnapshot {
            own_towers: self.own_towers,
            opponent_towers: self.opponent_towers,
            own_troops: count(Side::Player),
            opponent_troops: count(Side::Opponent),
        }
    }

    fn context(&self) -> Vec<f32> {
        let mut ctx = vec![0.0f32; CONTEXT_LEN];
        ctx[CTX_ELIXIR] = self.elixir as f32;
        ctx[CTX_CLOCK] = (self.clock / self.config.match_seconds).clamp(0.0, 1.0) as f32;
        for (slot, cd) in self.cooldowns.iter().enumerate() {
            ctx[CTX_COOLDOWN + slot] = *cd as f32;
        }
        if let Some((card, row, col, age)) = self.last_opponent_play {
            ctx[CTX_OPP_CARD] = card.0 as f32 / (self.vocab.max(2) - 1) as f32;
            ctx[CTX_OPP_ROW] = row as f32 / self.rows.max(2).saturating_sub(1) as f32;
            ctx[CTX_OPP_COL] = col as f32 / self.cols.max(2).saturating_sub(1) as f32;
            ctx[CTX_OPP_AGE] = age.min(10.0) as f32;
        }
        ctx
    }

    fn render(&self) -> Grid {
        let mut grid = Grid::zeros(self.rows, self.cols, self.channels);
        let mid = self.rows / 2;
        for row in mid.saturating_sub(1)..(mid + 1).min(self.rows) {
            for col in 0..self.cols {
                grid.set(row, col, CH_TERRAIN, 1.0);
            }
        }
        for unit in &self.units {
            let channel = match unit.side {
                Side::Player => CH_FRIENDLY,
                Side::Opponent => CH_OPPONENT,
            };
            stamp(&mut grid, channel, unit.row, unit.col, unit.strength.min(1.0) as f32);
        }
        for (lane, (own, opponent)) in self.own_towers.iter().zip(&self.opponent_towers).enumerate() {
            let col = (2 * lane + 1) * self.cols / (2 * TOWERS);
            grid.set(self.rows.saturating_sub(1), col, CH_TOWERS, *own as f32);
            grid.set(0, col, CH_TOWERS, *opponent as f32);
        }
        grid
    }
}

fn apply_hits(towers: &mut [f64; TOWERS], hits: &[f64; TOWERS]) {
    for (lane, &hit) in hits.iter().enumerate() {
        if hit <= 0.0 {
            continue;
        }
        // A fallen princess tower exposes the king.
        let target = if towers[lane] > 0.0 { lane } else { KING };
        towers[target] = (towers[target] - hit).max(0.0);
    }
}

/// Gaussian pressure blob, clamped into `[0, 1]` per cell.
fn stamp(grid: &mut Grid, channel: usize, row: f64, col: f64, magnitude: f32) {
    const SIGMA: f64 = 1.5;
    const RADIUS: i64 = 3;
    let (r0, c0) = (row.round() as i64, col.round() as i64);
    for r in (r0 - RADIUS)..=(r0 + RADIUS) {
        for c in (c0 - RADIUS)..=(c0 + RADIUS) {
            if r < 0 || c < 0 {
                continue;
            }
            let d2 = ((r as f64 - row).powi(2) + (c as f64 - col).powi(2)) / (2.0 * SIGMA * SIGMA);
            grid.add_clamped(r as usize, c as usize, channel, magnitude * (-d2).exp() as f32);
        }
    }
}

/// A simulated match. Clone-able handles share one match state.
#[derive(Debug, Clone)]
pub struct SimMatch {
    state: Arc<Mutex<SimState>>,
}

impl SimMatch {
    /// Create a simulator for the given board.
    pub fn new(env: &EnvConfig, config: SimConfig, seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(env, config, seed))),
        }
    }

    /// Perception handle.
    pub fn perception(&self) -> SimPerception {
        SimPerception { sim: self.clone() }
    }

    /// Actuation handle. `Send`, so it can run on an executor worker thread.
    pub fn actuator(&self) -> SimActuator {
        SimActuator { sim: self.clone() }
    }

    /// Matches started so far.
    pub fn matches(&self) -> u64 {
        self.state.lock().unwrap().matches
    }

    /// Current match phase.
    pub fn phase(&self) -> MatchPhase {
        self.state.lock().unwrap().phase
    }

    /// Current player elixir.
    pub fn elixir(&self) -> f64 {
        self.state.lock().unwrap().elixir
    }

    /// Current tower health and troop counts.
    pub fn snapshot(&self) -> MatchSnapshot {
        self.state.lock().unwrap().snapshot()
    }

    /// Match time elapsed, in seconds.
    pub fn clock(&self) -> f64 {
        self.state.lock().unwrap().clock
    }
}

/// Perception side of a [`SimMatch`].
#[derive(Debug, Clone)]
pub struct SimPerception {
    sim: SimMatch,
}

impl Perception for SimPerception {
    fn capture(&mut self) -> Frame {
        self.sim.state.lock().unwrap().capture()
    }
}

/// Actuation side of a [`SimMatch`].
#[derive(Debug, Clone)]
pub struct SimActuator {
    sim: SimMatch,
}

impl Executor for SimActuator {
    fn start_match(&mut self) -> ExecutionReport {
        self.sim.state.lock().unwrap().start()
    }

    fn execute(&mut self, action: &Action) -> ExecutionReport {
        self.sim.state.lock().unwrap().play(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::config::RewardConfig;
    use crate::rl::environment::Environment;

    fn sim(config: SimConfig, seed: u64) -> SimMatch {
        SimMatch::new(&EnvConfig::small(), config, seed)
    }

    /// Play the first affordable card at the first deploy cell, or wait.
    fn play_out(sim: &SimMatch, max_ticks: usize) -> (MatchPhase, usize) {
        let mut perception = sim.perception();
        let mut actuator = sim.actuator();
        let space = ActionSpace::from_config(&EnvConfig::small());
        assert!(actuator.start_match().is_success());
        let mut frame = perception.capture();
        for tick in 0..max_ticks {
            if let MatchPhase::Ended(_) = frame.phase {
                return (frame.phase, tick);
            }
            if let Some(&slot) = space.playable_slots(&frame.observation).first() {
                actuator.execute(&Action::new(slot, 4, tick % 6));
            }
            frame = perception.capture();
        }
        (frame.phase, max_ticks)
    }

    #[test]
    fn test_match_reaches_an_outcome() {
        let sim = sim(SimConfig::fast(), 3);
        let (phase, ticks) = play_out(&sim, 1_000);
        assert!(matches!(phase, MatchPhase::Ended(_)));
        assert!(ticks <= 41);
    }

    #[test]
    fn test_same_seed_same_match() {
        let a = sim(SimConfig::fast(), 9);
        let b = sim(SimConfig::fast(), 9);
        assert_eq!(play_out(&a, 1_000), play_out(&b, 1_000));
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn test_elixir_regenerates_to_cap() {
        let sim = sim(SimConfig::default(), 1);
        let mut perception = sim.perception();
        sim.actuator().start_match();
        let first = perception.capture();
        assert_eq!(first.observation.elixir(), 5.0);
        for _ in 0..60 {
            perception.capture();
        }
        assert!(sim.elixir() > 5.0);
        assert!(sim.elixir() <= SimConfig::default().elixir_cap);
    }

    #[test]
    fn test_rejects_unaffordable_and_misplaced_cards() {
        let config = SimConfig {
            initial_elixir: 0.0,
            ..SimConfig::default()
        };
        let sim = sim(config, 2);
        let mut actuator = sim.actuator();
        actuator.start_match();
        assert!(matches!(actuator.execute(&Action::new(0, 5, 1)), ExecutionReport::Rejected(_)));

        let rich = SimConfig {
            initial_elixir: 10.0,
            ..SimConfig::default()
        };
        let sim = self::sim(rich, 2);
        let mut actuator = sim.actuator();
        actuator.start_match();
        assert!(matches!(actuator.execute(&Action::new(0, 0, 1)), ExecutionReport::Rejected(_)));
        assert!(actuator.execute(&Action::new(0, 5, 1)).is_success());
        assert_eq!(sim.snapshot().own_troops, 1);
        assert!(sim.elixir() < 10.0);
    }

    #[test]
    fn test_played_slot_cools_down_and_cycles() {
        let config = SimConfig {
            initial_elixir: 10.0,
            ..SimConfig::default()
        };
        let sim = sim(config, 4);
        let mut perception = sim.perception();
        let mut actuator = sim.actuator();
        actuator.start_match();
        let before = perception.capture().observation.hand;
        assert!(actuator.execute(&Action::new(1, 6, 2)).is_success());
        let after = perception.capture().observation;
        assert_ne!(before.slot(1), after.hand.slot(1));
        assert!(after.cooldown(1) > 0.0);
        assert_eq!(after.cooldown(0), 0.0);
    }

    #[test]
    fn test_injected_perception_failure_yields_unknown_slots() {
        let config = SimConfig {
            perception_failure_rate: 1.0,
            ..SimConfig::default()
        };
        let sim = sim(config, 5);
        sim.actuator().start_match();
        let frame = sim.perception().capture();
        assert_eq!(frame.observation.hand, Hand::unknown());
        assert_eq!(frame.observation.hand.len(), HAND_SIZE);
    }

    #[test]
    fn test_injected_start_failure() {
        let config = SimConfig {
            start_failure_rate: 1.0,
            ..SimConfig::default()
        };
        let sim = sim(config, 6);
        assert!(!sim.actuator().start_match().is_success());
        assert_eq!(sim.matches(), 0);
    }

    #[test]
    fn test_illegal_actions_leave_match_untouched() {
        let sim = sim(SimConfig::default(), 8);
        let mut env = Environment::new(EnvConfig::small(), RewardConfig::default(), sim.perception(), sim.actuator());
        let first = env.reset().unwrap();
        let elixir = sim.elixir();
        let clock = sim.clock();
        let snapshot = sim.snapshot();

        for _ in 0..10 {
            let result = env.step(Action::new(0, 0, 0)).unwrap();
            assert!(!result.done);
            assert!(result.info.illegal.is_some());
            assert_eq!(*result.observation, *first);
        }
        assert_eq!(sim.elixir(), elixir);
        assert_eq!(sim.clock(), clock);
        assert_eq!(sim.snapshot(), snapshot);
        assert_eq!(sim.phase(), MatchPhase::InProgress);
    }

    #[test]
    fn test_injected_tap_failure_is_not_a_rejection() {
        let config = SimConfig {
            actuation_failure_rate: 1.0,
            initial_elixir: 10.0,
            ..SimConfig::default()
        };
        let sim = sim(config, 7);
        let mut actuator = sim.actuator();
        actuator.start_match();
        assert!(matches!(actuator.execute(&Action::new(0, 5, 1)), ExecutionReport::Failed(_)));
    }

    #[test]
    fn test_fallen_princess_exposes_king() {
        let mut towers = [0.0, 1.0, 1.0];
        apply_hits(&mut towers, &[0.25, 0.0, 0.5]);
        assert_eq!(towers, [0.0, 0.75, 0.5]);
    }
}
