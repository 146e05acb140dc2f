//! Per-episode metrics and running performance statistics.
//!
//! Metrics are emitted once per episode to a [`MetricsSink`]. The default
//! sink appends one JSON object per line, so the file can be tailed while
//! training runs and survives restarts.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::rl::error::Result;
use crate::rl::types::Outcome;

/// One line of the metrics log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetrics {
    /// Episode number.
    pub episode_id: u64,
    /// Terminal outcome.
    pub outcome: Outcome,
    /// Sum of step rewards.
    pub total_reward: f64,
    /// Decision steps taken.
    pub steps: u32,
    /// Exploration rate after the episode.
    pub epsilon: f64,
    /// Mean loss of the updates run after this episode, if any.
    pub loss: Option<f64>,
    /// Actions rejected as illegal.
    pub illegal_actions: u32,
    /// Hand slots perception failed to identify, summed over steps.
    pub unknown_slots: u64,
    /// Moving-average reward including this episode.
    pub moving_average: f64,
    /// Win rate over all episodes so far.
    pub win_rate: f64,
    /// Unix seconds.
    pub timestamp: u64,
}

/// Destination for episode metrics.
pub trait MetricsSink: Send {
    /// Record one episode.
    fn record(&mut self, metrics: &EpisodeMetrics) -> Result<()>;

    /// Push buffered output to its destination.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appends metrics as JSON lines to a file. Each record is flushed as it is
/// written, so the file can be tailed while a run is in progress.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending; parent directories are created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonLinesSink {
    fn record(&mut self, metrics: &EpisodeMetrics) -> Result<()> {
        serde_json::to_writer(&mut self.writer, metrics)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps metrics in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<EpisodeMetrics>>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn records(&self) -> Vec<EpisodeMetrics> {
        self.records.lock().unwrap().clone()
    }
}

impl MetricsSink for MemorySink {
    fn record(&mut self, metrics: &EpisodeMetrics) -> Result<()> {
        self.records.lock().unwrap().push(metrics.clone());
        Ok(())
    }
}

/// Running win/loss statistics and moving-average reward.
#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    window: usize,
    best_min_episodes: usize,
    recent: VecDeque<f64>,
    episodes: u64,
    wins: u64,
    losses: u64,
    draws: u64,
    aborted: u64,
    win_streak: u32,
    best_win_streak: u32,
    loss_streak: u32,
    best_average: Option<f64>,
}

impl PerformanceTracker {
    /// Tracker with a moving-average window of `window` episodes. "Best"
    /// averages are only reported once `best_min_episodes` are in the window.
    pub fn new(window: usize, best_min_episodes: usize) -> Self {
        Self {
            window: window.max(1),
            best_min_episodes,
            recent: VecDeque::with_capacity(window.max(1)),
            episodes: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            aborted: 0,
            win_streak: 0,
            best_win_streak: 0,
            loss_streak: 0,
            best_average: None,
        }
    }

    /// Seed the best average from a resumed run.
    pub fn with_best_average(mut self, best: Option<f64>) -> Self {
        self.best_average = best;
        self
    }

    /// Record an episode.
    ///
    /// # Returns
    /// True if the moving average is a new best.
    pub fn record(&mut self, outcome: Outcome, total_reward: f64) -> bool {
        self.episodes += 1;
        match outcome {
            Outcome::Win => {
                self.wins += 1;
                self.win_streak += 1;
                self.best_win_streak = self.best_win_streak.max(self.win_streak);
                self.loss_streak = 0;
            }
            Outcome::Loss => {
                self.losses += 1;
                self.loss_streak += 1;
                self.win_streak = 0;
            }
            Outcome::Draw => {
                self.draws += 1;
                self.win_streak = 0;
                self.loss_streak = 0;
            }
            Outcome::Aborted => {
                self.aborted += 1;
                self.win_streak = 0;
            }
        }

        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(if total_reward.is_finite() { total_reward } else { 0.0 });

        if self.recent.len() < self.best_min_episodes {
            return false;
        }
        let average = self.moving_average();
        match self.best_average {
            Some(best) if average <= best => false,
            _ => {
                self.best_average = Some(average);
                true
            }
        }
    }

    /// Mean reward over the window (0 before the first episode).
    pub fn moving_average(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        self.recent.iter().sum::<f64>() / self.recent.len() as f64
    }

    /// Best moving average reported so far.
    pub fn best_average(&self) -> Option<f64> {
        self.best_average
    }

    /// Wins over all recorded episodes.
    pub fn win_rate(&self) -> f64 {
        if self.episodes == 0 {
            0.0
        } else {
            self.wins as f64 / self.episodes as f64
        }
    }

    /// Episodes recorded.
    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    /// `(wins, losses, draws, aborted)`.
    pub fn counts(&self) -> (u64, u64, u64, u64) {
        (self.wins, self.losses, self.draws, self.aborted)
    }

    /// Current consecutive wins.
    pub fn win_streak(&self) -> u32 {
        self.win_streak
    }

    /// Longest run of consecutive wins.
    pub fn best_win_streak(&self) -> u32 {
        self.best_win_streak
    }

    /// Current consecutive losses.
    pub fn loss_streak(&self) -> u32 {
        self.loss_streak
    }
}
