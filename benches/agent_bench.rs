//! Benchmarks for the decision step and the replay update path.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use arena_rl::rl::types::{CTX_ELIXIR, HAND_SIZE};
use arena_rl::rl::{
    Action, Agent, AgentConfig, CardId, CardSlot, EnvConfig, EpisodeId, ExperienceStore, Hand, Mode, Observation,
    ReplayConfig, Transition,
};

fn observation(env: &EnvConfig, rng: &mut StdRng) -> Observation {
    let mut obs = Observation::blank(env.grid_rows, env.grid_cols, env.spatial_channels);
    for row in 0..env.grid_rows {
        for col in 0..env.grid_cols {
            for channel in 0..env.spatial_channels {
                obs.spatial.set(row, col, channel, rng.gen::<f32>());
            }
        }
    }
    obs.context[CTX_ELIXIR] = 7.0;
    let mut slots = [CardSlot::Unknown; HAND_SIZE];
    for (i, slot) in slots.iter_mut().enumerate() {
        *slot = CardSlot::Known(CardId(i as u16 * 3));
    }
    obs.hand = Hand::new(slots);
    obs
}

fn filled_store(env: &EnvConfig, capacity: usize) -> ExperienceStore {
    let mut rng = StdRng::seed_from_u64(7);
    let store = ExperienceStore::new(ReplayConfig {
        capacity,
        ..Default::default()
    });
    let obs = Arc::new(observation(env, &mut rng));
    for i in 0..capacity as u64 {
        store.add(Transition {
            episode: EpisodeId(i / 100),
            step: (i % 100) as u32,
            observation: obs.clone(),
            action: Action::new((i % 4) as usize, env.placement.first_row, (i as usize) % env.grid_cols),
            reward: rng.gen_range(-1.0..1.0),
            next_observation: obs.clone(),
            done: i % 100 == 99,
            priority: rng.gen_range(0.01..2.0),
        });
    }
    store
}

fn select_action_benchmark(c: &mut Criterion) {
    let env = EnvConfig::default();
    let mut rng = StdRng::seed_from_u64(42);
    let obs = observation(&env, &mut rng);
    let mut agent = Agent::new(AgentConfig::default().with_seed(42).with_epsilon(0.0), &env, Mode::Train);

    c.bench_function("select_action_greedy", |b| b.iter(|| black_box(agent.select_action(black_box(&obs)))));
}

fn update_benchmark(c: &mut Criterion) {
    let env = EnvConfig::default();
    let store = filled_store(&env, 2_000);
    let mut rng = StdRng::seed_from_u64(42);
    let mut agent = Agent::new(AgentConfig::default().with_seed(42), &env, Mode::Train);

    c.bench_function("update_batch_32", |b| {
        b.iter(|| {
            let batch = store.sample(32, &mut rng).unwrap_or_default();
            black_box(agent.update(&batch))
        })
    });
}

fn sample_benchmark(c: &mut Criterion) {
    let env = EnvConfig::small();
    let store = filled_store(&env, 10_000);
    let mut rng = StdRng::seed_from_u64(42);

    c.bench_function("replay_sample_32_of_10000", |b| {
        b.iter(|| black_box(store.sample(black_box(32), &mut rng)))
    });
}

criterion_group!(benches, select_action_benchmark, update_benchmark, sample_benchmark);
criterion_main!(benches);
