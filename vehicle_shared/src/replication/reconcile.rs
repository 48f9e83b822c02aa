//! Owning-client reconciliation.
//!
//! When a canonical state arrives the owning client snaps to it, forgets every
//! move the server has already processed, and replays the rest on top of the
//! authoritative state.

use tracing::trace;

use crate::{
    moves::MoveQueue,
    physics::{step, Collision, VehicleParams, VehicleState},
};

use super::CanonicalState;

/// Rebuilds the predicted state from `state` and the still-pending moves.
///
/// `pending` is pruned in place; the returned state is the authoritative
/// state advanced by every remaining move, in queue order.
pub fn reconcile(
    params: &VehicleParams,
    state: &CanonicalState,
    pending: &mut MoveQueue,
    collision: &dyn Collision,
) -> VehicleState {
    pending.prune_acknowledged(&state.last_move);

    let mut body = state.vehicle_state();
    for mv in pending.iter() {
        body = step(params, &body, mv, collision);
    }

    trace!(
        acked = state.last_move.timestamp,
        replayed = pending.len(),
        "reconciled prediction"
    );
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        math::{Transform, Vec3},
        moves::Move,
        physics::OpenGround,
    };

    fn drive(timestamp: f32) -> Move {
        Move {
            steering: 0.2,
            throttle: 1.0,
            delta_time: 0.1,
            timestamp,
        }
    }

    #[test]
    fn replay_matches_uninterrupted_prediction() {
        let params = VehicleParams::default();
        let moves: Vec<Move> = (1..=6).map(|i| drive(i as f32 * 0.1)).collect();

        // Prediction of every move from rest.
        let mut predicted = VehicleState::default();
        let mut queue = MoveQueue::default();
        for m in &moves {
            predicted = step(&params, &predicted, m, &OpenGround);
            queue.push(*m);
        }

        // The server has processed the first three.
        let mut server = VehicleState::default();
        for m in &moves[..3] {
            server = step(&params, &server, m, &OpenGround);
        }
        let canonical = CanonicalState::new(server, moves[2]);

        let reconciled = reconcile(&params, &canonical, &mut queue, &OpenGround);
        assert_eq!(queue.len(), 3);
        assert_eq!(reconciled, predicted);
    }

    #[test]
    fn correction_replaces_divergent_prediction() {
        let params = VehicleParams::default();
        let mut queue = MoveQueue::default();
        queue.push(drive(1.0));
        queue.push(drive(1.1));

        // Server says the car is somewhere else entirely.
        let server = VehicleState {
            transform: Transform::from_translation(Vec3::new(500.0, 0.0, 0.0)),
            velocity: Vec3::new(1.0, 0.0, 0.0),
        };
        let canonical = CanonicalState::new(server, drive(1.0));

        let reconciled = reconcile(&params, &canonical, &mut queue, &OpenGround);
        let expected = step(&params, &server, &drive(1.1), &OpenGround);
        assert_eq!(reconciled, expected);
        assert!(queue.iter().all(|m| m.timestamp > 1.0));
    }

    #[test]
    fn fully_acknowledged_queue_snaps_to_server() {
        let params = VehicleParams::default();
        let mut queue = MoveQueue::default();
        queue.push(drive(0.5));
        let server = VehicleState {
            velocity: Vec3::new(4.0, 0.0, 0.0),
            ..Default::default()
        };
        let reconciled = reconcile(
            &params,
            &CanonicalState::new(server, drive(0.5)),
            &mut queue,
            &OpenGround,
        );
        assert!(queue.is_empty());
        assert_eq!(reconciled, server);
    }
}
