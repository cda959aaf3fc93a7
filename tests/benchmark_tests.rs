//! Performance benchmarks for the hot paths of a running match

use assert_approx_eq::assert_approx_eq;
use peer::engine::{move_interval_ms, ArenaEngine, SimulationEngine, TickInput};
use peer::replicator::{Replicator, ReplicatorAction};
use peer::timers::Scheduler;
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{
    negotiate_grid_size, Difficulty, Dimensions, Direction, Frame, GameSettings, GridSize, Packet,
    Point, RoomCode, Role,
};
use std::time::{Duration, Instant};

const ARENA: GridSize = GridSize {
    width: 800,
    height: 800,
};

fn settings() -> GameSettings {
    GameSettings {
        bombs_enabled: true,
        ..GameSettings::default()
    }
}

/// Benchmarks the reference engine stepping a busy arena
#[test]
fn benchmark_engine_step() {
    let mut engine = ArenaEngine::with_rng(StdRng::seed_from_u64(42));
    let settings = settings();
    let mut snapshot = engine.initial(&settings, ARENA);
    let turns = [Direction::Up, Direction::Left, Direction::Down, Direction::Right];

    let iterations = 10_000;
    let mut restarts = 0;
    let start = Instant::now();

    for i in 0..iterations {
        let input = TickInput {
            host: Some(turns[(i / 7) % 4]),
            client: Some(turns[(i / 5) % 4]),
            host_moves: true,
            client_moves: true,
        };
        let outcome = engine.step(&snapshot, &settings, &input, ARENA);
        snapshot = outcome.snapshot;
        if !snapshot.running {
            snapshot = engine.initial(&settings, ARENA);
            restarts += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Engine step: {} iterations ({} restarts) in {:?} ({:.2} μs/iter)",
        iterations,
        restarts,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks encoding and decoding a full UPDATE datagram
#[test]
fn benchmark_update_frame_codec() {
    let mut engine = ArenaEngine::with_rng(StdRng::seed_from_u64(7));
    let mut snapshot = engine.initial(&settings(), ARENA);
    snapshot.host.body = (0..200).map(|i| Point::new(i % 40, i / 40)).collect();
    snapshot.client.body = (0..200).map(|i| Point::new(i % 40, 39 - i / 40)).collect();

    let frame = Frame::Data(Packet::Update {
        snapshot: Box::new(snapshot),
    });

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = frame.encode().unwrap();
        let decoded = Frame::decode(&bytes).unwrap();
        assert!(matches!(decoded, Frame::Data(Packet::Update { .. })));
    }

    let duration = start.elapsed();
    println!(
        "UPDATE codec: {} iterations in {:?} ({:.2} μs/iter), {} bytes",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64,
        frame.encode().unwrap().len()
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks room code generation and normalization
#[test]
fn benchmark_room_codes() {
    let mut rng = StdRng::seed_from_u64(1);
    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let code = RoomCode::generate(&mut rng);
        let typed = code.as_str().to_lowercase();
        assert_eq!(RoomCode::parse(&typed), Some(code));
    }

    let duration = start.elapsed();
    println!(
        "Room codes: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks grid negotiation over many viewport pairs
#[test]
fn benchmark_grid_negotiation() {
    let iterations: u32 = 1_000_000;
    let start = Instant::now();

    for i in 0..iterations {
        let a = Dimensions::new(320 + i % 997, 240 + i % 613);
        let b = Dimensions::new(320 + i % 701, 240 + i % 809);
        let grid = negotiate_grid_size(a, b, 20);
        assert_eq!(grid.width % 20, 0);
        assert_eq!(grid, negotiate_grid_size(b, a, 20));
    }

    let duration = start.elapsed();
    println!(
        "Grid negotiation: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Stress tests the timer queue with a full lobby's worth of redundant sends
#[test]
fn stress_test_scheduler() {
    let base = Instant::now();
    let mut timers = Scheduler::new();

    let count = 10_000u64;
    let start = Instant::now();

    for i in 0..count {
        timers.schedule(base + Duration::from_millis((i * 37) % 5000), i);
    }
    let mut fired = 0;
    for step in 0..=50 {
        fired += timers.pop_due(base + Duration::from_millis(step * 100)).len();
    }

    let duration = start.elapsed();
    println!("Scheduler: {} timers in {:?}", count, duration);

    assert_eq!(fired as u64, count);
    assert!(timers.is_empty());
    assert!(duration.as_millis() < 1000);
}

/// Stress tests the host replicator with a flood of client inputs
#[test]
fn stress_test_remote_inputs() {
    let mut engine = ArenaEngine::with_rng(StdRng::seed_from_u64(3));
    let settings = settings();
    let mut replicator = Replicator::new(Role::Host);
    replicator.start_host(&mut engine, &settings, ARENA);

    let turns = [Direction::Up, Direction::Right, Direction::Down, Direction::Left];
    let base = Instant::now();
    let start = Instant::now();
    let mut updates = 0;

    for i in 0..10_000u64 {
        let packet = Packet::Input {
            direction: turns[(i % 4) as usize],
        };
        replicator.handle_packet(&packet);
        let now = base + Duration::from_millis(i * 16);
        updates += replicator
            .tick(&mut engine, &settings, now)
            .iter()
            .filter(|action| matches!(action, ReplicatorAction::Send(Packet::Update { .. })))
            .count();
        if !replicator.is_running() {
            replicator.start_host(&mut engine, &settings, ARENA);
        }
    }

    let duration = start.elapsed();
    println!(
        "Remote inputs: 10000 inputs, {} updates in {:?}",
        updates, duration
    );

    assert!(updates > 0);
    assert!(duration.as_millis() < 2000);
}

/// Checks the speed curve stays within its bounds across the score range
#[test]
fn benchmark_move_interval_curve() {
    let start = Instant::now();
    let mut total = 0.0f32;

    for score in 0..100_000u32 {
        for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            let interval = move_interval_ms(difficulty, score, score % 2 == 0);
            assert!(interval >= 40.0 * 0.6);
            total += interval;
        }
    }

    let duration = start.elapsed();
    println!("Move intervals: 300000 evaluations in {:?}", duration);

    assert!(total > 0.0);
    assert_approx_eq!(move_interval_ms(Difficulty::Easy, 0, false), 150.0);
    assert_approx_eq!(move_interval_ms(Difficulty::Hard, 10_000, false), 40.0);
    assert_approx_eq!(move_interval_ms(Difficulty::Medium, 100, true), 49.2, 1e-3);
    assert!(duration.as_millis() < 1000);
}
