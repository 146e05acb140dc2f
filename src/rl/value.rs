//! Linear, factorized action-value function.
//!
//! ```text
//! Q(s, (slot, row, col)) = w_slot[slot] · φ(s) + w_cell[row, col] · φ(s) + b_card[bucket(hand[slot])]
//! ```
//!
//! Because the slot and cell terms are additive and legality is separable,
//! the greedy action is the best playable slot paired with the best
//! deployable cell, without enumerating the product.
//!
//! Card identities are hashed into buckets; `Unknown` has a bucket of its
//! own so degraded perception still maps to a learned value.

use serde::{Deserialize, Serialize};

use crate::rl::environment::ActionSpace;
use crate::rl::types::{
    Action, CardSlot, Observation, CONTEXT_LEN, CTX_CLOCK, CTX_COOLDOWN, CTX_ELIXIR, CTX_OPP_AGE, HAND_SIZE,
};

/// Elixir cap used to normalise the elixir feature.
const ELIXIR_SCALE: f64 = 10.0;
/// Seconds used to normalise timers.
const TIMER_SCALE: f64 = 5.0;
/// Horizontal bands per channel: own third, river, opponent third.
const BANDS: usize = 3;

/// Shapes of the value function's parameter blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueShape {
    /// Board rows.
    pub rows: usize,
    /// Board columns.
    pub cols: usize,
    /// Spatial channels.
    pub channels: usize,
    /// Card identity buckets (excluding the `Unknown` bucket).
    pub card_buckets: usize,
}

impl ValueShape {
    /// Length of φ(s).
    pub fn feature_dim(&self) -> usize {
        CONTEXT_LEN + BANDS * self.channels + 1
    }
}

/// Parameters of the value function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QParams {
    shape: ValueShape,
    slot_weights: Vec<f64>,
    cell_weights: Vec<f64>,
    card_bias: Vec<f64>,
}

/// Gradient of one `Q(s, a)` with respect to the parameters it touches,
/// already scaled by the TD error.
#[derive(Debug, Clone)]
pub struct SparseGradient {
    slot: usize,
    cell: usize,
    bucket: usize,
    scaled_features: Vec<f64>,
    scaled_bias: f64,
}

impl QParams {
    /// Zero-initialised parameters.
    pub fn new(shape: ValueShape) -> Self {
        let d = shape.feature_dim();
        Self {
            shape,
            slot_weights: vec![0.0; HAND_SIZE * d],
            cell_weights: vec![0.0; shape.rows * shape.cols * d],
            card_bias: vec![0.0; shape.card_buckets + 1],
        }
    }

    /// Parameter shapes.
    pub fn shape(&self) -> ValueShape {
        self.shape
    }

    /// True if every block has the length its shape implies.
    pub fn is_consistent(&self) -> bool {
        let d = self.shape.feature_dim();
        self.slot_weights.len() == HAND_SIZE * d
            && self.cell_weights.len() == self.shape.rows * self.shape.cols * d
            && self.card_bias.len() == self.shape.card_buckets + 1
    }

    /// True if every parameter is finite.
    pub fn is_finite(&self) -> bool {
        self.slot_weights
            .iter()
            .chain(&self.cell_weights)
            .chain(&self.card_bias)
            .all(|w| w.is_finite())
    }

    /// Feature vector φ(s).
    ///
    /// Context entries are scaled into roughly `[0, 1]`, and each spatial
    /// channel contributes its mean over three horizontal bands.
    pub fn features(&self, observation: &Observation) -> Vec<f64> {
        let mut phi = Vec::with_capacity(self.shape.feature_dim());
        for i in 0..CONTEXT_LEN {
            let raw = observation.context.get(i).copied().unwrap_or(0.0) as f64;
            let v = match i {
                CTX_ELIXIR => raw / ELIXIR_SCALE,
                CTX_CLOCK => raw,
                i if (CTX_COOLDOWN..CTX_COOLDOWN + HAND_SIZE).contains(&i) || i == CTX_OPP_AGE => {
                    (raw / TIMER_SCALE).min(1.0)
                }
                _ => raw,
            };
            phi.push(if v.is_finite() { v } else { 0.0 });
        }

        let grid = &observation.spatial;
        let h = grid.height();
        let bounds = [0, h / BANDS, 2 * h / BANDS, h];
        for channel in 0..self.shape.channels {
            for band in 0..BANDS {
                phi.push(grid.band_mean(channel, bounds[band]..bounds[band + 1]));
            }
        }
        phi.push(1.0);
        phi
    }

    fn bucket(&self, card: CardSlot) -> usize {
        match card {
            CardSlot::Known(id) => id.0 as usize % self.shape.card_buckets.max(1),
            CardSlot::Unknown => self.shape.card_buckets,
        }
    }

    fn dot(weights: &[f64], phi: &[f64]) -> f64 {
        weights.iter().zip(phi).map(|(w, x)| w * x).sum()
    }

    fn slot_term(&self, phi: &[f64], observation: &Observation, slot: usize) -> f64 {
        let d = phi.len();
        let card = observation.hand.slot(slot).unwrap_or(CardSlot::Unknown);
        Self::dot(&self.slot_weights[slot * d..(slot + 1) * d], phi) + self.card_bias[self.bucket(card)]
    }

    fn cell_term(&self, phi: &[f64], row: usize, col: usize) -> f64 {
        let d = phi.len();
        let cell = row * self.shape.cols + col;
        Self::dot(&self.cell_weights[cell * d..(cell + 1) * d], phi)
    }

    fn in_range(&self, action: &Action) -> bool {
        action.slot < HAND_SIZE && action.row < self.shape.rows && action.col < self.shape.cols
    }

    /// `Q(s, a)`. Actions outside the board evaluate to 0.
    pub fn q(&self, observation: &Observation, action: &Action) -> f64 {
        if !self.in_range(action) {
            return 0.0;
        }
        let phi = self.features(observation);
        self.slot_term(&phi, observation, action.slot) + self.cell_term(&phi, action.row, action.col)
    }

    /// Greedy action over the legal set, or over every slot and deployable
    /// cell when nothing is affordable.
    ///
    /// # Returns
    /// The action and its value. Ties resolve to the lowest slot and the
    /// first cell in row-major order.
    pub fn best_action(&self, observation: &Observation, space: &ActionSpace) -> (Action, f64) {
        let phi = self.features(observation);
        let mut slots = space.playable_slots(observation);
        if slots.is_empty() {
            slots = (0..HAND_SIZE).collect();
        }

        let (slot, slot_value) = slots
            .iter()
            .map(|&s| (s, self.slot_term(&phi, observation, s)))
            .fold((slots[0], f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });

        let (cell, cell_value) = space
            .placement_cells()
            .filter(|&(r, c)| r < self.shape.rows && c < self.shape.cols)
            .map(|(r, c)| ((r, c), self.cell_term(&phi, r, c)))
            .fold(((space.placement().first_row, 0), f64::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });

        let value = if cell_value.is_finite() {
            slot_value + cell_value
        } else {
            slot_value
        };
        (Action::new(slot, cell.0, cell.1), value)
    }

    /// `max_a Q(s, a)` over the same candidate set as [`QParams::best_action`].
    pub fn max_q(&self, observation: &Observation, space: &ActionSpace) -> f64 {
        self.best_action(observation, space).1
    }

    /// Gradient of `Q(s, a)` scaled by `scale` (the clipped TD error).
    pub fn gradient(&self, observation: &Observation, action: &Action, scale: f64) -> Option<SparseGradient> {
        if !self.in_range(action) {
            return None;
        }
        let phi = self.features(observation);
        let card = observation.hand.slot(action.slot).unwrap_or(CardSlot::Unknown);
        Some(SparseGradient {
            slot: action.slot,
            cell: action.row * self.shape.cols + action.col,
            bucket: self.bucket(card),
            scaled_features: phi.iter().map(|x| x * scale).collect(),
            scaled_bias: scale,
        })
    }

    /// Gradient ascent step: `θ += step · g` for each gradient.
    pub fn apply(&mut self, gradients: &[SparseGradient], step: f64) {
        let d = self.shape.feature_dim();
        for g in gradients {
            let slot = &mut self.slot_weights[g.slot * d..(g.slot + 1) * d];
            for (w, x) in slot.iter_mut().zip(&g.scaled_features) {
                *w += step * x;
            }
            let cell = &mut self.cell_weights[g.cell * d..(g.cell + 1) * d];
            for (w, x) in cell.iter_mut().zip(&g.scaled_features) {
                *w += step * x;
            }
            self.card_bias[g.bucket] += step * g.scaled_bias;
        }
    }
}
