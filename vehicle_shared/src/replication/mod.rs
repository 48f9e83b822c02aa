//! Vehicle replication.
//!
//! One [`ReplicatedVehicle`] exists per vehicle on every machine. Each tick it
//! is driven with the local machine's [`Role`] for that vehicle:
//! - `Authority` (server): validates and simulates moves, owns the
//!   [`CanonicalState`].
//! - `OwningProxy` (controlling client): predicts locally, queues moves until
//!   the server acknowledges them, reconciles on every canonical state.
//! - `RemoteProxy` (observing client): interpolates the cosmetic mesh between
//!   canonical states.
//!
//! Outward effects (moves to transmit, states to replicate) are reported as
//! events on an [`EventBus`] that the network layer drains.

pub mod interp;
pub mod reconcile;
pub mod validate;

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    event::EventBus,
    math::{Quat, Transform, Vec3},
    moves::{InputState, Move, MoveQueue, DEFAULT_MAX_PENDING_MOVES},
    physics::{step, Collision, VehicleParams, VehicleState},
};

use self::{
    interp::{InterpolatedPose, Interpolator},
    reconcile::reconcile,
    validate::{AntiCheat, MoveRejection},
};

/// Identifies a replicated vehicle across all machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub u64);

/// Relationship of the local machine to a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    None,
    RemoteProxy,
    OwningProxy,
    Authority,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::None => "None",
            Role::RemoteProxy => "RemoteProxy",
            Role::OwningProxy => "OwningProxy",
            Role::Authority => "Authority",
        };
        f.write_str(s)
    }
}

/// Authoritative vehicle state, replicated from the server to every client.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CanonicalState {
    pub transform: Transform,
    pub velocity: Vec3,
    /// Most recent move the server simulated to produce this state.
    pub last_move: Move,
}

impl CanonicalState {
    pub fn new(body: VehicleState, last_move: Move) -> Self {
        Self {
            transform: body.transform,
            velocity: body.velocity,
            last_move,
        }
    }

    pub fn vehicle_state(&self) -> VehicleState {
        VehicleState {
            transform: self.transform,
            velocity: self.velocity,
        }
    }
}

/// Cosmetic visual target moved by interpolation without touching collision.
pub trait MeshOffset: Send + Sync {
    fn world_transform(&self) -> Transform;
    fn set_world_location(&mut self, location: Vec3);
    fn set_world_rotation(&mut self, rotation: Quat);
}

/// Plain in-memory mesh pose, for headless processes and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshPose {
    pub transform: Transform,
}

impl MeshOffset for MeshPose {
    fn world_transform(&self) -> Transform {
        self.transform
    }

    fn set_world_location(&mut self, location: Vec3) {
        self.transform.translation = location;
    }

    fn set_world_rotation(&mut self, rotation: Quat) {
        self.transform.rotation = rotation;
    }
}

/// Owning proxy produced a move that must be sent to the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveProduced {
    pub vehicle: VehicleId,
    pub mv: Move,
}

/// Authority changed the canonical state; it must be replicated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateChanged {
    pub vehicle: VehicleId,
    pub state: CanonicalState,
}

/// Authority dropped a submitted move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveRejected {
    pub vehicle: VehicleId,
    pub reason: MoveRejection,
}

/// Per-tick inputs from the hosting process.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub role: Role,
    pub delta_time: f32,
    /// Local world time in seconds, used to stamp moves.
    pub now: f32,
    /// Sampled input when the vehicle is controlled on this machine.
    pub input: Option<InputState>,
}

/// Replication state for one vehicle on one machine.
pub struct ReplicatedVehicle {
    id: VehicleId,
    params: VehicleParams,
    collision: Option<Arc<dyn Collision>>,
    mesh: Option<Box<dyn MeshOffset>>,

    body: VehicleState,
    canonical: CanonicalState,

    /// Owning proxy: moves awaiting acknowledgement.
    pending: MoveQueue,
    /// Authority: per-connection move gate.
    anti_cheat: AntiCheat,
    /// Remote proxy.
    interp: Interpolator,

    unwired_reported: bool,
}

impl ReplicatedVehicle {
    pub fn new(id: VehicleId, params: VehicleParams, spawn: Transform) -> Self {
        let body = VehicleState {
            transform: spawn,
            velocity: Vec3::ZERO,
        };
        Self {
            id,
            params,
            collision: None,
            mesh: None,
            body,
            canonical: CanonicalState::new(body, Move::default()),
            pending: MoveQueue::new(DEFAULT_MAX_PENDING_MOVES),
            anti_cheat: AntiCheat::new(),
            interp: Interpolator::new(),
            unwired_reported: false,
        }
    }

    pub fn with_collision(mut self, collision: Arc<dyn Collision>) -> Self {
        self.collision = Some(collision);
        self
    }

    pub fn with_mesh_offset(mut self, mut mesh: Box<dyn MeshOffset>) -> Self {
        mesh.set_world_location(self.body.transform.translation);
        mesh.set_world_rotation(self.body.transform.rotation);
        self.mesh = Some(mesh);
        self
    }

    pub fn with_max_pending_moves(mut self, capacity: usize) -> Self {
        self.pending = MoveQueue::new(capacity);
        self
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// Physical (collision) state.
    pub fn body(&self) -> &VehicleState {
        &self.body
    }

    pub fn canonical(&self) -> &CanonicalState {
        &self.canonical
    }

    pub fn pending_moves(&self) -> &MoveQueue {
        &self.pending
    }

    pub fn mesh_transform(&self) -> Option<Transform> {
        self.mesh.as_ref().map(|m| m.world_transform())
    }

    pub fn client_simulation_time(&self) -> f32 {
        self.anti_cheat.client_simulation_time()
    }

    pub fn interpolator(&self) -> &Interpolator {
        &self.interp
    }

    /// True when every collaborator needed for simulation is attached.
    pub fn is_wired(&self) -> bool {
        self.collision.is_some()
    }

    /// Runs one tick of role-specific behaviour.
    pub fn tick(&mut self, ctx: &TickContext, events: &mut EventBus) {
        match ctx.role {
            Role::Authority => self.authority_tick(ctx, events),
            Role::OwningProxy => self.owning_tick(ctx, events),
            Role::RemoteProxy => self.remote_tick(ctx),
            Role::None => {}
        }
    }

    /// Authority: validate and simulate a move submitted by the owning client.
    ///
    /// Rejected moves leave every piece of state untouched.
    pub fn submit_move(
        &mut self,
        mv: Move,
        server_time: f32,
        events: &mut EventBus,
    ) -> Result<(), MoveRejection> {
        let Some(collision) = self.collision_or_report() else {
            return Ok(());
        };
        if let Err(reason) = self.anti_cheat.admit(&mv, server_time) {
            warn!(vehicle = ?self.id, %reason, "Rejected move");
            events.push(MoveRejected {
                vehicle: self.id,
                reason,
            });
            return Err(reason);
        }

        self.body = step(&self.params, &self.body, &mv, collision.as_ref());
        self.publish_canonical(mv, events);
        Ok(())
    }

    /// Replication callback: a canonical state arrived from the server.
    pub fn on_canonical_state(&mut self, role: Role, state: CanonicalState) {
        match role {
            Role::OwningProxy => self.owning_on_state(state),
            Role::RemoteProxy => self.remote_on_state(state),
            Role::Authority | Role::None => {
                debug!(vehicle = ?self.id, %role, "Ignoring replicated state");
            }
        }
    }

    fn authority_tick(&mut self, ctx: &TickContext, events: &mut EventBus) {
        // Remotely controlled vehicles only change through submit_move.
        let Some(input) = ctx.input else {
            return;
        };
        let Some(collision) = self.collision_or_report() else {
            return;
        };

        // Locally controlled on the server (listen server): no validation.
        let mv = Move::from_input(input, ctx.delta_time, ctx.now);
        self.body = step(&self.params, &self.body, &mv, collision.as_ref());
        self.sync_mesh_to_body();
        self.publish_canonical(mv, events);
    }

    fn owning_tick(&mut self, ctx: &TickContext, events: &mut EventBus) {
        let Some(collision) = self.collision_or_report() else {
            return;
        };

        let mv = Move::from_input(ctx.input.unwrap_or_default(), ctx.delta_time, ctx.now);
        self.body = step(&self.params, &self.body, &mv, collision.as_ref());
        self.sync_mesh_to_body();
        self.pending.push(mv);
        events.push(MoveProduced {
            vehicle: self.id,
            mv,
        });
    }

    fn remote_tick(&mut self, ctx: &TickContext) {
        let Some(pose) = self
            .interp
            .advance(ctx.delta_time, self.params.units_per_meter)
        else {
            return;
        };
        self.apply_interpolated(pose);
    }

    fn owning_on_state(&mut self, state: CanonicalState) {
        let Some(collision) = self.collision_or_report() else {
            return;
        };
        self.canonical = state;
        self.body = reconcile(&self.params, &state, &mut self.pending, collision.as_ref());
        self.sync_mesh_to_body();
        debug!(
            vehicle = ?self.id,
            acked = state.last_move.timestamp,
            pending = self.pending.len(),
            "Reconciled with server state"
        );
    }

    fn remote_on_state(&mut self, state: CanonicalState) {
        let first = !self.interp.has_target();
        let start = self.mesh_transform().unwrap_or(self.body.transform);
        self.interp.on_arrival(start, self.body.velocity, &state);
        self.canonical = state;

        // Collision always sits on the authoritative transform.
        self.body.transform = state.transform;
        if first {
            self.body.velocity = state.velocity;
            self.sync_mesh_to_body();
        }
        debug!(
            vehicle = ?self.id,
            span = self.interp.span_duration(),
            "Remote state arrived"
        );
    }

    fn apply_interpolated(&mut self, pose: InterpolatedPose) {
        self.body.velocity = pose.velocity;
        if let Some(mesh) = self.mesh.as_mut() {
            mesh.set_world_location(pose.location);
            mesh.set_world_rotation(pose.rotation);
        }
    }

    fn publish_canonical(&mut self, mv: Move, events: &mut EventBus) {
        self.canonical = CanonicalState::new(self.body, mv);
        events.push(StateChanged {
            vehicle: self.id,
            state: self.canonical,
        });
    }

    fn sync_mesh_to_body(&mut self) {
        if let Some(mesh) = self.mesh.as_mut() {
            mesh.set_world_location(self.body.transform.translation);
            mesh.set_world_rotation(self.body.transform.rotation);
        }
    }

    fn collision_or_report(&mut self) -> Option<Arc<dyn Collision>> {
        if self.collision.is_none() && !self.unwired_reported {
            warn!(vehicle = ?self.id, "Vehicle has no collision collaborator; skipping");
            self.unwired_reported = true;
        }
        self.collision.clone()
    }
}
