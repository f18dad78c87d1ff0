use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use stepper_core::profile::{self, Goal, KinematicState, Mode};

// Plan and commit a full move, the way the engine loop does between pulses.
fn run_move(mut state: KinematicState) -> i64 {
    loop {
        let tick = profile::next_tick(&state);
        state.position += i64::from(tick.travel);
        state.velocity = tick.velocity;
        state.mode = tick.mode;
        if tick.mode == Mode::Idle {
            return state.position;
        }
    }
}

fn ready_state(target: i64) -> KinematicState {
    let mut s = KinematicState::at_rest(4000.0, 20_000.0, 20_000.0);
    s.goal = Goal::Position(target);
    s.mode = Mode::Accelerating;
    s
}

pub fn bench_planner(c: &mut Criterion) {
    let mut g = c.benchmark_group("planner");
    // Allow quick tweaking without CLI flags:
    //   BENCH_SAMPLE_SIZE=10 cargo bench -p stepper_core --bench profile
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(50);
    }

    g.bench_function("single_tick", |b| {
        let state = ready_state(100_000);
        b.iter(|| black_box(profile::next_tick(black_box(&state))));
    });

    for &steps in &[1_000i64, 10_000, 100_000] {
        g.bench_function(format!("full_move_{steps}"), |b| {
            b.iter_batched(
                || ready_state(steps),
                |s| black_box(run_move(s)),
                BatchSize::SmallInput,
            )
        });
    }
    g.finish();
}

criterion_group!(benches, bench_planner);
criterion_main!(benches);
