//! Outcome analyzer: turns the terminal result of an episode into
//! replay-priority and exploration adjustments.
//!
//! After a loss (or an aborted episode) the trailing lookback window is
//! treated as contributing to the loss and its priorities are multiplied by
//! the contributing multiplier `M`; the rest of the episode gets the smaller
//! remainder multiplier `M'`. Exploration is raised so the agent tries
//! alternatives. After a win exploration is nudged down. Draws change
//! nothing.

use log::debug;

use crate::rl::agent::Agent;
use crate::rl::config::{AnalyzerConfig, LookbackWindow};
use crate::rl::replay::ExperienceStore;
use crate::rl::types::{EpisodeId, Outcome, SealedEpisode};

/// What the analyzer did for one episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomeReport {
    /// Episode analysed.
    pub episode: EpisodeId,
    /// Its outcome.
    pub outcome: Outcome,
    /// Transitions inside the lookback window.
    pub contributing: usize,
    /// Stored transitions whose priority changed.
    pub reprioritized: usize,
    /// Exploration rate before the adjustment.
    pub epsilon_before: f64,
    /// Exploration rate after the adjustment.
    pub epsilon_after: f64,
}

/// Applies outcome-driven adaptation.
#[derive(Debug, Clone)]
pub struct OutcomeAnalyzer {
    config: AnalyzerConfig,
}

impl OutcomeAnalyzer {
    /// Create an analyzer.
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Analyzer policy.
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Priority multiplier for a transition `distance` steps before the
    /// terminal one (the terminal step has distance 0) in a lost episode.
    pub fn loss_multiplier(&self, distance: usize) -> f64 {
        let m = self.config.contributing_multiplier;
        let rest = self.config.remainder_multiplier;
        match self.config.lookback {
            LookbackWindow::Fixed { len } if distance < len => m,
            LookbackWindow::Decaying { len, decay } if distance < len => {
                (1.0 + (m - 1.0) * decay.powi(distance as i32)).max(rest)
            }
            _ => rest,
        }
    }

    /// Adjust priorities and exploration for a sealed episode.
    ///
    /// # Arguments
    /// * `episode` - The finished episode
    /// * `store` - Store holding (some of) the episode's transitions
    /// * `agent` - Agent whose exploration rate is adjusted
    pub fn analyze(&self, episode: &SealedEpisode, store: &ExperienceStore, agent: &mut Agent) -> OutcomeReport {
        let epsilon_before = agent.epsilon();
        let mut contributing = 0;
        let mut reprioritized = 0;

        match episode.outcome() {
            outcome if outcome.is_loss_weighted() => {
                let last = episode.transitions().last().map_or(0, |t| t.step);
                contributing = self.config.lookback.len().min(episode.len());
                reprioritized = store.reprioritize_with(episode.id(), |step| {
                    self.loss_multiplier(last.saturating_sub(step) as usize)
                });
                agent.boost_exploration(self.config.loss_epsilon_bump);
            }
            Outcome::Win => agent.scale_exploration(self.config.win_decay_factor),
            _ => {}
        }

        let report = OutcomeReport {
            episode: episode.id(),
            outcome: episode.outcome(),
            contributing,
            reprioritized,
            epsilon_before,
            epsilon_after: agent.epsilon(),
        };
        debug!(
            "{} {}: {} contributing, {} reprioritized, epsilon {:.4} -> {:.4}",
            report.episode,
            report.outcome,
            report.contributing,
            report.reprioritized,
            report.epsilon_before,
            report.epsilon_after
        );
        report
    }
}
