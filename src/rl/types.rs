//! Core data model shared by every component of the decision loop.
//!
//! Observations are what perception hands to the environment, actions are
//! what the agent hands back, and transitions/episodes are what flows into
//! the experience store and the outcome analyzer.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Number of card slots in the player's hand. Always exactly four.
pub const HAND_SIZE: usize = 4;

/// Index of the current elixir amount (raw units) in the context vector.
pub const CTX_ELIXIR: usize = 0;
/// Index of the elapsed match-clock fraction (0 = start, 1 = regulation end).
pub const CTX_CLOCK: usize = 1;
/// First of [`HAND_SIZE`] per-slot cooldown timers, in seconds remaining.
pub const CTX_COOLDOWN: usize = 2;
/// Last opponent play: normalised card id.
pub const CTX_OPP_CARD: usize = 6;
/// Last opponent play: normalised row.
pub const CTX_OPP_ROW: usize = 7;
/// Last opponent play: normalised column.
pub const CTX_OPP_COL: usize = 8;
/// Seconds since the last opponent play.
pub const CTX_OPP_AGE: usize = 9;
/// Fixed length of [`Observation::context`].
pub const CONTEXT_LEN: usize = 10;

/// Identifier of a card in the game's card vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CardId(pub u16);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "card#{}", self.0)
    }
}

/// One slot of the hand as seen by perception.
///
/// Identification may fail for any slot; `Unknown` is a normal value that
/// every consumer handles explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CardSlot {
    /// Perception identified the card.
    Known(CardId),
    /// Perception could not identify the card.
    #[default]
    Unknown,
}

impl CardSlot {
    /// The card id, if known.
    pub fn card(&self) -> Option<CardId> {
        match self {
            CardSlot::Known(id) => Some(*id),
            CardSlot::Unknown => None,
        }
    }

    /// True if perception failed for this slot.
    pub fn is_unknown(&self) -> bool {
        matches!(self, CardSlot::Unknown)
    }
}

impl fmt::Display for CardSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardSlot::Known(id) => write!(f, "{}", id),
            CardSlot::Unknown => write!(f, "?"),
        }
    }
}

/// The player's hand: exactly [`HAND_SIZE`] slots.
///
/// The fixed-size array makes a partial hand unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Hand([CardSlot; HAND_SIZE]);

impl Hand {
    /// Build a hand from four slots.
    pub fn new(slots: [CardSlot; HAND_SIZE]) -> Self {
        Self(slots)
    }

    /// A hand where every slot failed identification.
    pub fn unknown() -> Self {
        Self([CardSlot::Unknown; HAND_SIZE])
    }

    /// Build a hand from whatever perception produced.
    ///
    /// Missing slots are filled with `Unknown`, extra detections are dropped.
    pub fn from_detections<I>(detections: I) -> Self
    where
        I: IntoIterator<Item = Option<CardId>>,
    {
        let mut slots = [CardSlot::Unknown; HAND_SIZE];
        for (slot, detection) in slots.iter_mut().zip(detections) {
            if let Some(id) = detection {
                *slot = CardSlot::Known(id);
            }
        }
        Self(slots)
    }

    /// Slot at `index`, or `None` past the end of the hand.
    pub fn slot(&self, index: usize) -> Option<CardSlot> {
        self.0.get(index).copied()
    }

    /// All slots in order.
    pub fn slots(&self) -> &[CardSlot; HAND_SIZE] {
        &self.0
    }

    /// Number of slots perception failed to identify.
    pub fn unknown_count(&self) -> usize {
        self.0.iter().filter(|s| s.is_unknown()).count()
    }

    /// Always [`HAND_SIZE`].
    pub fn len(&self) -> usize {
        HAND_SIZE
    }

    /// A hand is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Dense `height × width × channels` grid of cell features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<f32>,
}

impl Grid {
    /// Zero-filled grid.
    pub fn zeros(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
            data: vec![0.0; height * width * channels],
        }
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of feature channels per cell.
    pub fn channels(&self) -> usize {
        self.channels
    }

    fn index(&self, row: usize, col: usize, channel: usize) -> Option<usize> {
        (row < self.height && col < self.width && channel < self.channels)
            .then(|| (row * self.width + col) * self.channels + channel)
    }

    /// Feature value, or 0.0 outside the grid.
    pub fn get(&self, row: usize, col: usize, channel: usize) -> f32 {
        self.index(row, col, channel).map_or(0.0, |i| self.data[i])
    }

    /// Set a feature value; out-of-range writes are ignored.
    pub fn set(&mut self, row: usize, col: usize, channel: usize, value: f32) {
        if let Some(i) = self.index(row, col, channel) {
            self.data[i] = value;
        }
    }

    /// Add to a feature value and clamp the result into `[0, 1]`.
    pub fn add_clamped(&mut self, row: usize, col: usize, channel: usize, delta: f32) {
        if let Some(i) = self.index(row, col, channel) {
            self.data[i] = (self.data[i] + delta).clamp(0.0, 1.0);
        }
    }

    /// Multiply every value of one channel by `factor`.
    pub fn scale_channel(&mut self, channel: usize, factor: f32) {
        if channel >= self.channels {
            return;
        }
        for v in self.data.iter_mut().skip(channel).step_by(self.channels) {
            *v *= factor;
        }
    }

    /// Mean of one channel over the rows `rows.start..rows.end`.
    pub fn band_mean(&self, channel: usize, rows: std::ops::Range<usize>) -> f64 {
        let rows = rows.start.min(self.height)..rows.end.min(self.height);
        let cells = rows.len() * self.width;
        if cells == 0 || channel >= self.channels {
            return 0.0;
        }
        let mut sum = 0.0;
        for row in rows {
            for col in 0..self.width {
                sum += self.get(row, col, channel) as f64;
            }
        }
        sum / cells as f64
    }

    /// Mean of one channel over the whole grid.
    pub fn channel_mean(&self, channel: usize) -> f64 {
        self.band_mean(channel, 0..self.height)
    }
}

/// Structured observation of one decision tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Spatial cell features.
    pub spatial: Grid,
    /// Fixed-length numeric context, indexed by the `CTX_*` constants.
    pub context: Vec<f32>,
    /// Current hand.
    pub hand: Hand,
}

impl Observation {
    /// Observation with an all-zero grid and context and an unknown hand.
    pub fn blank(height: usize, width: usize, channels: usize) -> Self {
        Self {
            spatial: Grid::zeros(height, width, channels),
            context: vec![0.0; CONTEXT_LEN],
            hand: Hand::unknown(),
        }
    }

    fn ctx(&self, index: usize) -> f32 {
        self.context.get(index).copied().unwrap_or(0.0)
    }

    /// Elixir currently available.
    pub fn elixir(&self) -> f64 {
        self.ctx(CTX_ELIXIR) as f64
    }

    /// Seconds of cooldown remaining on a hand slot.
    pub fn cooldown(&self, slot: usize) -> f64 {
        if slot >= HAND_SIZE {
            return 0.0;
        }
        self.ctx(CTX_COOLDOWN + slot) as f64
    }

    /// Elapsed fraction of the match clock.
    pub fn clock(&self) -> f64 {
        self.ctx(CTX_CLOCK) as f64
    }
}

/// Factorized action: which card slot to play and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    /// Hand slot, `0..HAND_SIZE`.
    pub slot: usize,
    /// Board row.
    pub row: usize,
    /// Board column.
    pub col: usize,
}

impl Action {
    /// Create an action.
    pub fn new(slot: usize, row: usize, col: usize) -> Self {
        Self { slot, row, col }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {} @ ({}, {})", self.slot, self.row, self.col)
    }
}

/// Terminal result of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Match won.
    Win,
    /// Match lost.
    Loss,
    /// Match drawn (or truncated at the step limit).
    Draw,
    /// Episode could not start or was cut short by actuation failure or interruption.
    Aborted,
}

impl Outcome {
    /// Outcomes that the analyzer treats like a loss.
    pub fn is_loss_weighted(&self) -> bool {
        matches!(self, Outcome::Loss | Outcome::Aborted)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Win => "WIN",
            Outcome::Loss => "LOSS",
            Outcome::Draw => "DRAW",
            Outcome::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Episode identifier, unique within a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpisodeId(pub u64);

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}", self.0)
    }
}

/// One `(s, a, r, s', done)` step plus its replay priority.
///
/// Observations sit behind `Arc` so the episode record and the experience
/// store can share them without copying grids.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Episode this step belongs to.
    pub episode: EpisodeId,
    /// Zero-based step index within the episode.
    pub step: u32,
    /// Observation the action was chosen from.
    pub observation: Arc<Observation>,
    /// Action taken.
    pub action: Action,
    /// Reward computed by the environment.
    pub reward: f64,
    /// Observation after the action.
    pub next_observation: Arc<Observation>,
    /// Whether the step ended the episode.
    pub done: bool,
    /// Replay priority.
    pub priority: f64,
}

/// An episode that is still being played.
#[derive(Debug)]
pub struct EpisodeRecord {
    id: EpisodeId,
    transitions: Vec<Transition>,
}

impl EpisodeRecord {
    /// Start a new, empty record.
    pub fn new(id: EpisodeId) -> Self {
        Self {
            id,
            transitions: Vec::new(),
        }
    }

    /// Episode id.
    pub fn id(&self) -> EpisodeId {
        self.id
    }

    /// Append a step.
    pub fn push(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    /// Steps recorded so far.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// True if no step has been recorded.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Close the record with its terminal outcome. Sealed records are read-only.
    pub fn seal(self, outcome: Outcome) -> SealedEpisode {
        SealedEpisode {
            id: self.id,
            transitions: self.transitions,
            outcome,
        }
    }
}

/// A finished episode with its outcome.
#[derive(Debug, Clone)]
pub struct SealedEpisode {
    id: EpisodeId,
    transitions: Vec<Transition>,
    outcome: Outcome,
}

impl SealedEpisode {
    /// Episode id.
    pub fn id(&self) -> EpisodeId {
        self.id
    }

    /// Terminal outcome.
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Steps in order.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// True if the episode ended before any step.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Sum of step rewards.
    pub fn total_reward(&self) -> f64 {
        self.transitions.iter().map(|t| t.reward).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hand_always_has_four_slots() {
        let short = Hand::from_detections(vec![Some(CardId(3))]);
        assert_eq!(short.len(), HAND_SIZE);
        assert_eq!(short.slot(0), Some(CardSlot::Known(CardId(3))));
        assert_eq!(short.unknown_count(), 3);

        let long = Hand::from_detections((0..7).map(|i| Some(CardId(i))));
        assert_eq!(long.slots().len(), HAND_SIZE);
        assert_eq!(long.unknown_count(), 0);

        let failed = Hand::from_detections(Vec::new());
        assert_eq!(failed, Hand::unknown());
        assert_eq!(failed.slot(4), None);
    }

    #[test]
    fn test_grid_indexing_and_bands() {
        let mut grid = Grid::zeros(4, 3, 2);
        grid.set(3, 2, 1, 0.5);
        grid.add_clamped(3, 2, 1, 0.9);
        assert_eq!(grid.get(3, 2, 1), 1.0);
        assert_eq!(grid.get(9, 9, 9), 0.0);

        grid.set(0, 0, 0, 0.6);
        assert!((grid.band_mean(0, 0..1) - 0.2).abs() < 1e-6);
        assert!((grid.channel_mean(1) - 1.0 / 12.0).abs() < 1e-6);

        grid.scale_channel(1, 0.5);
        assert_eq!(grid.get(3, 2, 1), 0.5);
        assert_eq!(grid.get(0, 0, 0), 0.6);
    }

    #[test]
    fn test_sealed_episode_totals() {
        let obs = Arc::new(Observation::blank(2, 2, 1));
        let mut record = EpisodeRecord::new(EpisodeId(7));
        for step in 0..3 {
            record.push(Transition {
                episode: EpisodeId(7),
                step,
                observation: obs.clone(),
                action: Action::new(0, 1, 1),
                reward: 1.5,
                next_observation: obs.clone(),
                done: step == 2,
                priority: 1.0,
            });
        }
        let sealed = record.seal(Outcome::Loss);
        assert_eq!(sealed.len(), 3);
        assert_eq!(sealed.total_reward(), 4.5);
        assert!(sealed.outcome().is_loss_weighted());
        assert!(Outcome::Aborted.is_loss_weighted());
        assert!(!Outcome::Draw.is_loss_weighted());
    }
}
