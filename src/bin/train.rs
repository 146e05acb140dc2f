//! Train or evaluate the placement policy against the bundled simulator.
//!
//! Usage:
//!   cargo run --release --bin train -- [OPTIONS]
//!
//! Type "q" + Enter to stop after the current episode; type it again to
//! abort the episode in progress. Either way a final checkpoint is written.

use std::io::BufRead;
use std::path::PathBuf;
use std::process;
use std::thread;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};

use arena_rl::arena::{ActionExecutor, RetryPolicy, SimConfig, SimMatch};
use arena_rl::rl::{CheckpointKind, EpisodeSummary, Mode, StopSignal, TrainerConfig, TrainingOrchestrator};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RunMode {
    Train,
    Evaluate,
}

impl From<RunMode> for Mode {
    fn from(mode: RunMode) -> Self {
        match mode {
            RunMode::Train => Mode::Train,
            RunMode::Evaluate => Mode::Evaluate,
        }
    }
}

/// Card-placement agent trainer
#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(about = "Train or evaluate the card-placement agent", long_about = None)]
struct Args {
    /// Configuration JSON file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Use the small, fast configuration (ignored with --config)
    #[arg(long, short)]
    fast: bool,

    /// Episodes to run (0 = until stopped)
    #[arg(long, short)]
    episodes: Option<u64>,

    /// Random seed
    #[arg(long, short)]
    seed: Option<u64>,

    /// Train, or play greedily without learning
    #[arg(long, value_enum, default_value_t = RunMode::Train)]
    mode: RunMode,

    /// Checkpoint directory
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Start from a fresh policy even if a checkpoint exists
    #[arg(long)]
    no_resume: bool,

    /// Probability that the simulator reports a hand slot as unknown
    #[arg(long, default_value_t = 0.0)]
    perception_failure_rate: f64,

    /// Probability that a simulated actuation call fails
    #[arg(long, default_value_t = 0.0)]
    actuation_failure_rate: f64,

    /// Attempts per actuation call, including the first
    #[arg(long, default_value_t = 2)]
    actuation_attempts: u32,
}

fn init_logging() {
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![term];
    let file = std::fs::create_dir_all("logs").and_then(|_| std::fs::File::create("logs/train.log"));
    match file {
        Ok(file) => loggers.push(simplelog::WriteLogger::new(log::LevelFilter::Debug, config, file)),
        Err(e) => eprintln!("file logging disabled: {}", e),
    }
    if let Err(e) = simplelog::CombinedLogger::init(loggers) {
        eprintln!("logger already initialized: {}", e);
    }
}

/// Watch stdin for "q": first request stops after the episode, second aborts it.
fn watch_stdin(stop: StopSignal) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case("q") {
                if stop.should_stop() {
                    warn!("abort requested, ending the current episode");
                    stop.request_abort();
                    break;
                }
                warn!("stop requested, finishing the current episode (q again to abort it)");
                stop.request_stop();
            }
        }
    });
}

fn load_config(args: &Args) -> TrainerConfig {
    let mut config = if let Some(path) = &args.config {
        println!("Loading configuration from: {}", path.display());
        match TrainerConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                process::exit(2);
            }
        }
    } else if args.fast {
        println!("Using fast testing configuration");
        TrainerConfig::fast()
    } else {
        println!("Using default configuration");
        TrainerConfig::default()
    };

    config.mode = args.mode.into();
    if let Some(episodes) = args.episodes {
        config.episodes = episodes;
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(dir) = &args.checkpoint_dir {
        config.checkpoint_dir = dir.clone();
    }
    config
}

fn progress_bar(episodes: u64) -> ProgressBar {
    let bar = if episodes == 0 {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::new(episodes)
    };
    let template = if episodes == 0 {
        "{spinner} [{elapsed_precise}] {pos} episodes {msg}"
    } else {
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}"
    };
    match ProgressStyle::with_template(template) {
        Ok(style) => bar.set_style(style.progress_chars("=> ")),
        Err(e) => warn!("progress style rejected: {}", e),
    }
    bar
}

fn main() {
    let args = Args::parse();
    init_logging();

    println!("=================================================");
    println!("  Card Placement Agent");
    println!("=================================================");
    println!();

    let config = load_config(&args);
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        process::exit(2);
    }

    let base = if args.fast { SimConfig::fast() } else { SimConfig::default() };
    let sim_config = SimConfig {
        perception_failure_rate: args.perception_failure_rate,
        actuation_failure_rate: args.actuation_failure_rate,
        ..base
    };
    let seed = config.agent.seed.unwrap_or_else(rand::random);
    let sim = SimMatch::new(&config.env, sim_config, seed);
    let retry = RetryPolicy {
        max_attempts: args.actuation_attempts.max(1),
        ..Default::default()
    };
    let executor = ActionExecutor::spawn(sim.actuator(), config.actuation_timeout(), retry);

    println!("Mode: {:?}", config.mode);
    if config.episodes == 0 {
        println!("Episodes: until stopped");
    } else {
        println!("Episodes: {}", config.episodes);
    }
    println!("Board: {}x{}", config.env.grid_rows, config.env.grid_cols);
    println!("Checkpoints: {}", config.checkpoint_dir.display());
    println!();

    let episodes = config.episodes;
    let mode = config.mode;
    let mut trainer = match TrainingOrchestrator::new(config, sim.perception(), executor) {
        Ok(trainer) => trainer,
        Err(e) => {
            eprintln!("Error creating trainer: {}", e);
            process::exit(1);
        }
    };

    if !args.no_resume {
        let resumed = match mode {
            Mode::Evaluate => trainer.resume(CheckpointKind::Best) || trainer.resume(CheckpointKind::Latest),
            Mode::Train => trainer.resume(CheckpointKind::Latest),
        };
        if !resumed {
            info!("no usable checkpoint, starting fresh");
        }
    }

    watch_stdin(trainer.stop_signal());
    println!("Type q + Enter to stop.");
    println!();

    let bar = progress_bar(episodes);
    let result = trainer.train_with_callback(|episode: &EpisodeSummary| {
        bar.inc(1);
        bar.set_message(format!(
            "{} reward {:>8.2} avg {:>8.2} eps {:.3}",
            episode.outcome, episode.total_reward, episode.moving_average, episode.epsilon
        ));
        if episode.new_best {
            bar.println(format!("{} new best moving average {:.2}", episode.episode, episode.moving_average));
        }
    });
    bar.finish_and_clear();

    match result {
        Ok(summary) => {
            println!();
            println!("Training complete!");
            println!("Episodes: {}", summary.episodes);
            println!(
                "Results: {} won, {} lost, {} drawn, {} aborted",
                summary.wins, summary.losses, summary.draws, summary.aborted
            );
            println!("Moving average reward: {:.2}", summary.moving_average);
            if let Some(best) = summary.best_average {
                println!("Best moving average: {:.2}", best);
            }
            println!("Total time: {:.2}s", summary.elapsed_seconds);
            if summary.stopped {
                println!("Stopped on request.");
            }
        }
        Err(e) => {
            error!("training failed: {}", e);
            process::exit(1);
        }
    }
}
