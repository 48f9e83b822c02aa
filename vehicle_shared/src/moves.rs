//! Moves and the pending-move queue.
//!
//! A [`Move`] is one sampled input plus the time it covers. Moves are the unit
//! of prediction, transmission, validation and replay.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default bound on unacknowledged moves kept by an owning client.
pub const DEFAULT_MAX_PENDING_MOVES: usize = 256;

/// Raw control input sampled from the player.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InputState {
    pub steering: f32,
    pub throttle: f32,
}

impl InputState {
    pub fn new(steering: f32, throttle: f32) -> Self {
        Self { steering, throttle }
    }

    /// Controls clamped to `[-1, 1]`. Non-finite values become zero.
    pub fn clamped(self) -> Self {
        fn clamp_axis(v: f32) -> f32 {
            if v.is_finite() {
                v.clamp(-1.0, 1.0)
            } else {
                0.0
            }
        }
        Self {
            steering: clamp_axis(self.steering),
            throttle: clamp_axis(self.throttle),
        }
    }
}

/// One simulated input sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Move {
    pub steering: f32,
    pub throttle: f32,
    /// Seconds of simulation this move covers.
    pub delta_time: f32,
    /// Local time the move was produced at; strictly increasing per client.
    pub timestamp: f32,
}

impl Move {
    /// Builds a move from sampled input, clamping the controls.
    pub fn from_input(input: InputState, delta_time: f32, timestamp: f32) -> Self {
        let input = input.clamped();
        Self {
            steering: input.steering,
            throttle: input.throttle,
            delta_time,
            timestamp,
        }
    }

    /// `|steering| <= 1 && |throttle| <= 1`. NaN fails the check.
    pub fn is_input_valid(&self) -> bool {
        self.steering.abs() <= 1.0 && self.throttle.abs() <= 1.0
    }
}

/// Moves sent to the server but not yet covered by a canonical state, oldest
/// first.
#[derive(Debug, Clone)]
pub struct MoveQueue {
    moves: VecDeque<Move>,
    capacity: usize,
}

impl Default for MoveQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_MOVES)
    }
}

impl MoveQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            moves: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Appends at the tail. Drops the oldest move when full.
    pub fn push(&mut self, mv: Move) {
        self.moves.push_back(mv);
        while self.moves.len() > self.capacity {
            self.moves.pop_front();
        }
    }

    /// Discards every move acknowledged by `last_processed`, keeping only moves
    /// with a later timestamp, in order.
    pub fn prune_acknowledged(&mut self, last_processed: &Move) {
        self.moves.retain(|m| m.timestamp > last_processed.timestamp);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Move> {
        self.moves.iter()
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(timestamp: f32) -> Move {
        Move {
            timestamp,
            delta_time: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn prune_keeps_only_later_moves() {
        let mut q = MoveQueue::default();
        q.push(at(1.0));
        q.push(at(1.1));
        q.push(at(1.2));

        q.prune_acknowledged(&at(1.1));

        let left: Vec<f32> = q.iter().map(|m| m.timestamp).collect();
        assert_eq!(left, vec![1.2]);
    }

    #[test]
    fn prune_preserves_order() {
        let mut q = MoveQueue::default();
        for i in 0..6 {
            q.push(at(i as f32));
        }
        q.prune_acknowledged(&at(2.0));
        let left: Vec<f32> = q.iter().map(|m| m.timestamp).collect();
        assert_eq!(left, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn capacity_drops_oldest() {
        let mut q = MoveQueue::new(3);
        for i in 0..5 {
            q.push(at(i as f32));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.iter().next().map(|m| m.timestamp), Some(2.0));
    }

    #[test]
    fn from_input_clamps_controls() {
        let m = Move::from_input(InputState::new(-3.0, f32::NAN), 0.016, 1.0);
        assert_eq!(m.steering, -1.0);
        assert_eq!(m.throttle, 0.0);
        assert!(m.is_input_valid());
    }

    #[test]
    fn nan_input_is_invalid() {
        let m = Move {
            steering: f32::NAN,
            ..at(0.0)
        };
        assert!(!m.is_input_valid());
        let m = Move {
            throttle: 1.0001,
            ..at(0.0)
        };
        assert!(!m.is_input_valid());
    }
}
