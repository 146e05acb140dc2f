//! Training orchestrator: drives episodes end to end.
//!
//! ```text
//! reset (bounded retries) ─► select_action / step / add ─► seal ─► analyze
//!        │                        ▲            │                     │
//!        └─ unavailable ─► ABORTED│            └─ until done         ▼
//!                                 └──────────── next episode ◄─ update cycle, checkpoint, metrics
//! ```
//!
//! All mutable training state that is not owned by a component lives in an
//! explicit [`TrainingContext`]. Stopping is cooperative through a
//! [`StopSignal`]: a graceful stop finishes the current episode, an abort
//! cuts it short. Either way the episode is analyzed, recorded and
//! checkpointed before `train` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::rl::agent::Agent;
use crate::rl::checkpoint::{unix_seconds, Checkpoint, CheckpointKind, CheckpointStore};
use crate::rl::config::{Mode, TrainerConfig};
use crate::rl::environment::{Environment, Executor, Perception};
use crate::rl::error::{Error, Result};
use crate::rl::metrics::{EpisodeMetrics, JsonLinesSink, MetricsSink, PerformanceTracker};
use crate::rl::outcome::{OutcomeAnalyzer, OutcomeReport};
use crate::rl::replay::ExperienceStore;
use crate::rl::types::{EpisodeId, EpisodeRecord, Observation, Outcome, Transition};

/// Cooperative stop request shared between the trainer and its controller.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stop: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
}

impl StopSignal {
    /// A signal with nothing requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after the current episode.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop now, ending the current episode as `ABORTED`.
    pub fn request_abort(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.abort.store(true, Ordering::SeqCst);
    }

    /// True once any stop was requested.
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// True once an abort was requested.
    pub fn should_abort(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

/// Counters and control state passed through a training run.
#[derive(Debug, Clone)]
pub struct TrainingContext {
    /// Next episode number.
    pub episode: u64,
    /// Environment steps taken in this run.
    pub global_step: u64,
    /// Train or evaluate.
    pub mode: Mode,
    /// Stop control.
    pub stop: StopSignal,
    /// Episodes in a row that could not start.
    pub consecutive_unavailable: u32,
}

impl TrainingContext {
    /// Fresh context.
    pub fn new(mode: Mode) -> Self {
        Self {
            episode: 0,
            global_step: 0,
            mode,
            stop: StopSignal::new(),
            consecutive_unavailable: 0,
        }
    }
}

/// What happened in one episode.
#[derive(Debug, Clone)]
pub struct EpisodeSummary {
    /// Episode id.
    pub episode: EpisodeId,
    /// Terminal outcome.
    pub outcome: Outcome,
    /// Sum of rewards.
    pub total_reward: f64,
    /// Steps taken.
    pub steps: u32,
    /// Illegal actions attempted.
    pub illegal_actions: u32,
    /// Unknown hand slots seen, summed over steps.
    pub unknown_slots: u64,
    /// True if the episode never started.
    pub unavailable: bool,
    /// Mean loss of the update cycle that followed, if one ran.
    pub loss: Option<f64>,
    /// Stored exploration rate after all adjustments.
    pub epsilon: f64,
    /// Moving-average reward including this episode.
    pub moving_average: f64,
    /// True if this episode produced a new best moving average.
    pub new_best: bool,
    /// Analyzer report (training mode only).
    pub report: Option<OutcomeReport>,
}

/// Result of [`TrainingOrchestrator::train`].
#[derive(Debug, Clone, Default)]
pub struct TrainingSummary {
    /// Episodes run in this call.
    pub episodes: u64,
    /// Wins in this call.
    pub wins: u64,
    /// Losses in this call.
    pub losses: u64,
    /// Draws in this call.
    pub draws: u64,
    /// Aborted episodes in this call.
    pub aborted: u64,
    /// Moving average at the end.
    pub moving_average: f64,
    /// Best moving average of the run (including resumed history).
    pub best_average: Option<f64>,
    /// True if a stop request ended the run.
    pub stopped: bool,
    /// Wall time.
    pub elapsed_seconds: f64,
}

impl TrainingSummary {
    fn record(&mut self, outcome: Outcome) {
        self.episodes += 1;
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
            Outcome::Draw => self.draws += 1,
            Outcome::Aborted => self.aborted += 1,
        }
    }
}

/// Coordinates environment, agent, experience store, analyzer and persistence.
///
/// # Type Parameters
/// - `P`: perception boundary
/// - `X`: actuation boundary
pub struct TrainingOrchestrator<P: Perception, X: Executor> {
    config: TrainerConfig,
    env: Environment<P, X>,
    agent: Agent,
    store: ExperienceStore,
    analyzer: OutcomeAnalyzer,
    checkpoints: CheckpointStore,
    tracker: PerformanceTracker,
    metrics: Option<Box<dyn MetricsSink>>,
    context: TrainingContext,
    sample_rng: StdRng,
}

impl<P: Perception, X: Executor> TrainingOrchestrator<P, X> {
    /// Build an orchestrator with a fresh policy.
    ///
    /// Opens the metrics file if one is configured.
    pub fn new(config: TrainerConfig, perception: P, executor: X) -> Result<Self> {
        config.validate()?;
        let env = Environment::new(config.env.clone(), config.reward.clone(), perception, executor);
        let agent = Agent::new(config.agent.clone(), &config.env, config.mode);
        let store = ExperienceStore::new(config.replay.clone());
        let analyzer = OutcomeAnalyzer::new(config.analyzer.clone());
        let checkpoints = CheckpointStore::new(config.checkpoint_dir.clone());
        let tracker = PerformanceTracker::new(config.moving_average_window, config.best_min_episodes);
        let metrics = match &config.metrics_path {
            Some(path) => Some(Box::new(JsonLinesSink::open(path)?) as Box<dyn MetricsSink>),
            None => None,
        };
        let sample_rng = match config.agent.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            context: TrainingContext::new(config.mode),
            config,
            env,
            agent,
            store,
            analyzer,
            checkpoints,
            tracker,
            metrics,
            sample_rng,
        })
    }

    /// Builder method: replace the metrics sink.
    pub fn with_metrics_sink(mut self, sink: Box<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Handle for requesting a stop from another thread.
    pub fn stop_signal(&self) -> StopSignal {
        self.context.stop.clone()
    }

    /// Training configuration.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Run context.
    pub fn context(&self) -> &TrainingContext {
        &self.context
    }

    /// The agent.
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// The experience store.
    pub fn store(&self) -> &ExperienceStore {
        &self.store
    }

    /// The environment.
    pub fn environment(&self) -> &Environment<P, X> {
        &self.env
    }

    /// Running statistics.
    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    /// Checkpoint directory.
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Restore the policy and progress from a checkpoint.
    ///
    /// On [`Error::CheckpointUnavailable`] the fresh policy is kept and a
    /// warning is logged.
    ///
    /// # Returns
    /// True if a checkpoint was restored.
    pub fn resume(&mut self, kind: CheckpointKind) -> bool {
        let checkpoint = match self.checkpoints.load(kind) {
            Ok(c) => c,
            Err(e) => {
                warn!("{}; starting from a fresh policy", e);
                return false;
            }
        };
        if let Err(e) = self.agent.restore(checkpoint.policy) {
            warn!("{}; starting from a fresh policy", e);
            return false;
        }
        self.context.episode = checkpoint.episodes;
        self.tracker = PerformanceTracker::new(self.config.moving_average_window, self.config.best_min_episodes)
            .with_best_average(checkpoint.best_average);
        info!(
            "resumed {} checkpoint: {} episodes, epsilon {:.4}",
            kind,
            checkpoint.episodes,
            self.agent.epsilon()
        );
        true
    }

    /// Run episodes until the configured count or a stop request.
    pub fn train(&mut self) -> Result<TrainingSummary> {
        self.train_with_callback(|_| {})
    }

    /// Run episodes, calling `callback` after each one.
    ///
    /// A final "latest" checkpoint is written on every exit path in
    /// training mode, including systemic unavailability.
    pub fn train_with_callback<F>(&mut self, mut callback: F) -> Result<TrainingSummary>
    where
        F: FnMut(&EpisodeSummary),
    {
        let start = Instant::now();
        let mut summary = TrainingSummary::default();
        let mut failure = None;

        while self.config.episodes == 0 || summary.episodes < self.config.episodes {
            if self.context.stop.should_stop() {
                summary.stopped = true;
                break;
            }
            match self.run_episode() {
                Ok(episode) => {
                    summary.record(episode.outcome);
                    callback(&episode);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        summary.stopped |= self.context.stop.should_stop();

        if let Err(e) = self.save_checkpoint(CheckpointKind::Latest) {
            warn!("final checkpoint failed: {}", e);
        }
        if let Some(sink) = self.metrics.as_mut() {
            if let Err(e) = sink.flush() {
                warn!("metrics flush failed: {}", e);
            }
        }

        summary.moving_average = self.tracker.moving_average();
        summary.best_average = self.tracker.best_average();
        summary.elapsed_seconds = start.elapsed().as_secs_f64();
        info!(
            "run finished: {} episodes ({}W/{}L/{}D/{}A) in {:.1}s, moving average {:.2}",
            summary.episodes,
            summary.wins,
            summary.losses,
            summary.draws,
            summary.aborted,
            summary.elapsed_seconds,
            summary.moving_average
        );

        match failure {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Play one episode and run all per-episode bookkeeping.
    ///
    /// Fails only on systemic unavailability or a broken environment contract.
    /// An episode that could not start is recorded as ABORTED before
    /// unavailability is escalated.
    pub fn run_episode(&mut self) -> Result<EpisodeSummary> {
        let id = EpisodeId(self.context.episode);
        let training = self.context.mode == Mode::Train;
        let mut record = EpisodeRecord::new(id);
        let mut illegal_actions = 0;
        let mut unknown_slots = 0u64;

        let started = self.reset_with_retry()?;
        let unavailable = started.is_none();
        let outcome = match started {
            None => Outcome::Aborted,
            Some(mut observation) => {
                let mut step = 0u32;
                loop {
                    if self.context.stop.should_abort() {
                        info!("{} aborted by request after {} steps", id, step);
                        break Outcome::Aborted;
                    }
                    let action = self.agent.select_action(&observation);
                    let result = self.env.step(action)?;
                    self.context.global_step += 1;
                    if result.info.illegal.is_some() {
                        illegal_actions += 1;
                    }
                    unknown_slots += result.info.unknown_slots as u64;

                    let transition = Transition {
                        episode: id,
                        step,
                        observation,
                        action,
                        reward: result.reward,
                        next_observation: result.observation.clone(),
                        done: result.done,
                        priority: self.store.initial_priority(result.reward, result.done),
                    };
                    if training {
                        self.store.add(transition.clone());
                    }
                    record.push(transition);
                    step += 1;

                    if result.done {
                        break result.info.outcome.unwrap_or(Outcome::Draw);
                    }
                    observation = result.observation;
                }
            }
        };

        let sealed = record.seal(outcome);
        self.agent.end_episode();
        let report = training.then(|| self.analyzer.analyze(&sealed, &self.store, &mut self.agent));

        let next = self.context.episode + 1;
        let loss = if training && next % self.config.update_interval_episodes.max(1) == 0 {
            self.run_updates()?
        } else {
            None
        };

        let total_reward = sealed.total_reward();
        let new_best = self.tracker.record(outcome, total_reward);
        self.context.episode = next;

        let summary = EpisodeSummary {
            episode: id,
            outcome,
            total_reward,
            steps: sealed.len() as u32,
            illegal_actions,
            unknown_slots,
            unavailable,
            loss,
            epsilon: self.agent.effective_epsilon(),
            moving_average: self.tracker.moving_average(),
            new_best,
            report,
        };
        self.emit_metrics(&summary);

        if training {
            if next % self.config.checkpoint_interval.max(1) == 0 {
                if let Err(e) = self.save_checkpoint(CheckpointKind::Latest) {
                    warn!("latest checkpoint failed: {}", e);
                }
            }
            if new_best {
                if let Err(e) = self.save_checkpoint(CheckpointKind::Best) {
                    warn!("best checkpoint failed: {}", e);
                }
            }
        }

        info!(
            "{}: {} reward {:.2} steps {} epsilon {:.4} avg {:.2}{}",
            id,
            outcome,
            total_reward,
            summary.steps,
            summary.epsilon,
            summary.moving_average,
            if new_best { " (best)" } else { "" }
        );

        if unavailable && self.context.consecutive_unavailable >= self.config.max_consecutive_unavailable {
            return Err(Error::SystemicUnavailability {
                episodes: self.context.consecutive_unavailable,
            });
        }
        Ok(summary)
    }

    /// Reset with bounded retries and exponential backoff.
    ///
    /// Returns `Ok(None)` when this episode cannot start and counts it
    /// towards the consecutive-unavailability limit.
    fn reset_with_retry(&mut self) -> Result<Option<Arc<Observation>>> {
        let attempts = self.config.reset_attempts.max(1);
        for attempt in 0..attempts {
            match self.env.reset() {
                Ok(observation) => {
                    self.context.consecutive_unavailable = 0;
                    return Ok(Some(observation));
                }
                Err(Error::EnvironmentUnavailable(reason)) => {
                    warn!("reset attempt {}/{} failed: {}", attempt + 1, attempts, reason);
                    if attempt + 1 < attempts && self.config.reset_backoff_ms > 0 {
                        let factor = 1u64 << attempt.min(10);
                        thread::sleep(Duration::from_millis(self.config.reset_backoff_ms.saturating_mul(factor)));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        self.context.consecutive_unavailable += 1;
        warn!(
            "episode {} could not start ({} in a row); recording as ABORTED",
            self.context.episode, self.context.consecutive_unavailable
        );
        Ok(None)
    }

    /// One optimisation cycle. Returns the mean loss, or `None` if no update ran.
    fn run_updates(&mut self) -> Result<Option<f64>> {
        let mut losses = Vec::with_capacity(self.config.updates_per_cycle);
        for _ in 0..self.config.updates_per_cycle {
            let batch = match self.store.sample(self.config.batch_size, &mut self.sample_rng) {
                Ok(batch) => batch,
                Err(Error::InsufficientData { available, requested }) => {
                    warn!(
                        "skipping optimisation cycle: {} transitions stored, batch needs {}",
                        available, requested
                    );
                    break;
                }
                Err(e) => return Err(e),
            };
            let stats = self.agent.update(&batch);
            if stats.used > 0 {
                losses.push(stats.loss);
            }
        }
        if losses.is_empty() {
            return Ok(None);
        }
        self.agent.sync_target();
        let mean = losses.iter().sum::<f64>() / losses.len() as f64;
        debug!("{} updates, mean loss {:.5}", losses.len(), mean);
        Ok(Some(mean))
    }

    fn emit_metrics(&mut self, summary: &EpisodeSummary) {
        let Some(sink) = self.metrics.as_mut() else {
            return;
        };
        let record = EpisodeMetrics {
            episode_id: summary.episode.0,
            outcome: summary.outcome,
            total_reward: summary.total_reward,
            steps: summary.steps,
            epsilon: summary.epsilon,
            loss: summary.loss,
            illegal_actions: summary.illegal_actions,
            unknown_slots: summary.unknown_slots,
            moving_average: summary.moving_average,
            win_rate: self.tracker.win_rate(),
            timestamp: unix_seconds(),
        };
        if let Err(e) = sink.record(&record) {
            warn!("failed to record metrics for {}: {}", summary.episode, e);
        }
    }

    /// Write a checkpoint of the current policy. A no-op in evaluation mode.
    pub fn save_checkpoint(&self, kind: CheckpointKind) -> Result<()> {
        if self.context.mode == Mode::Evaluate {
            return Ok(());
        }
        let checkpoint = Checkpoint::new(
            self.agent.state(),
            self.context.episode,
            Some(self.tracker.moving_average()),
            self.tracker.best_average(),
        );
        self.checkpoints.save(kind, &checkpoint)
    }
}
