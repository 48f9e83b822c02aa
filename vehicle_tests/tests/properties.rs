//! Seeded randomized checks of the replication core, no sockets involved.

use rand::{rngs::StdRng, Rng, SeedableRng};
use vehicle_shared::{
    math::{Transform, Vec3},
    moves::{InputState, Move, MoveQueue},
    physics::{step, BoxArena, Collision, OpenGround, VehicleParams, VehicleState},
    replication::{reconcile::reconcile, validate::AntiCheat, CanonicalState},
};

const SEEDS: u64 = 32;

fn random_moves(rng: &mut StdRng, count: usize) -> Vec<Move> {
    let mut t = 0.0;
    (0..count)
        .map(|_| {
            let dt = rng.gen_range(0.005..0.05);
            t += dt;
            let input = InputState::new(rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0));
            Move::from_input(input, dt, t)
        })
        .collect()
}

fn simulate(
    params: &VehicleParams,
    start: VehicleState,
    moves: &[Move],
    collision: &dyn Collision,
) -> VehicleState {
    moves
        .iter()
        .fold(start, |state, mv| step(params, &state, mv, collision))
}

#[test]
fn simulation_is_deterministic() {
    let params = VehicleParams::default();
    let arena = BoxArena::new(2_000.0);
    for seed in 0..SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let moves = random_moves(&mut rng, 200);
        let a = simulate(&params, VehicleState::default(), &moves, &arena);
        let b = simulate(&params, VehicleState::default(), &moves, &arena);
        assert_eq!(a, b, "seed {seed}");
        assert!(a.transform.translation.is_finite() && a.velocity.is_finite());
    }
}

#[test]
fn validator_accepts_exactly_when_clock_fits() {
    for seed in 0..SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut gate = AntiCheat::new();
        let mut server_time = 0.0_f32;
        let mut last_timestamp = 0.0_f32;

        for _ in 0..100 {
            server_time += rng.gen_range(0.0..0.05);
            let dt = rng.gen_range(0.0..0.06);
            last_timestamp += 0.01;
            let mv = Move::from_input(InputState::new(0.0, 1.0), dt, last_timestamp);

            let fits = gate.client_simulation_time() + dt <= server_time;
            let before = gate.client_simulation_time();
            let accepted = gate.admit(&mv, server_time).is_ok();
            assert_eq!(accepted, fits, "seed {seed}");
            if !accepted {
                assert_eq!(gate.client_simulation_time(), before);
            }
            assert!(gate.client_simulation_time() <= server_time);
        }
    }
}

#[test]
fn pruning_keeps_only_later_moves_in_order() {
    for seed in 0..SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let moves = random_moves(&mut rng, 64);
        let mut queue = MoveQueue::new(256);
        for mv in &moves {
            queue.push(*mv);
        }

        let acked = moves[rng.gen_range(0..moves.len())];
        queue.prune_acknowledged(&acked);

        let kept: Vec<Move> = queue.iter().copied().collect();
        let expected: Vec<Move> = moves
            .iter()
            .copied()
            .filter(|m| m.timestamp > acked.timestamp)
            .collect();
        assert_eq!(kept, expected, "seed {seed}");
    }
}

#[test]
fn reconciliation_matches_uninterrupted_prediction() {
    let params = VehicleParams::default();
    for seed in 0..SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let moves = random_moves(&mut rng, 120);
        let start = VehicleState {
            transform: Transform::from_translation(Vec3::new(0.0, 600.0, 0.0)),
            velocity: Vec3::ZERO,
        };
        let predicted = simulate(&params, start, &moves, &OpenGround);

        let mut pending = MoveQueue::new(256);
        for mv in &moves {
            pending.push(*mv);
        }

        // The server has processed some prefix of the same moves.
        let acked = rng.gen_range(1..moves.len());
        let server = simulate(&params, start, &moves[..acked], &OpenGround);
        let canonical = CanonicalState::new(server, moves[acked - 1]);

        let replayed = reconcile(&params, &canonical, &mut pending, &OpenGround);
        assert_eq!(pending.len(), moves.len() - acked, "seed {seed}");
        assert_eq!(replayed, predicted, "seed {seed}");
    }
}
