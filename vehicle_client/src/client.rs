//! Client implementation.
//!
//! The client maintains:
//! - A reliable stream to the server; its read half lives in a background
//!   task that forwards messages into a channel
//! - The vehicle this client owns, predicted locally and reconciled against
//!   canonical states
//! - Every other vehicle as a remote proxy, interpolated between states
//! - A local clock that stamps produced moves

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vehicle_shared::{
    config::SessionConfig,
    event::EventBus,
    math::Transform,
    moves::InputState,
    net::{ClientId, Inbound, NetMsg, ReliableConn, ReliableWriter, PROTOCOL_VERSION},
    physics::Collision,
    replication::{
        CanonicalState, MeshPose, MoveProduced, ReplicatedVehicle, Role, TickContext, VehicleId,
    },
};

/// Capacity of the inbound message channel.
const INBOUND_CAPACITY: usize = 1024;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Handshake done, simulating.
    Connected,
    /// The server went away or we left.
    Disconnected,
}

/// High-level game client.
pub struct GameClient {
    pub client_id: ClientId,
    pub state: ClientState,

    cfg: SessionConfig,
    collision: Arc<dyn Collision>,
    /// Vehicle assigned to us by the server.
    owned: VehicleId,

    writer: ReliableWriter,
    inbound_rx: mpsc::Receiver<(ClientId, Inbound)>,
    server_addr: SocketAddr,

    vehicles: BTreeMap<VehicleId, ReplicatedVehicle>,
    events: EventBus,

    /// Local simulation time; stamps every produced move.
    clock: f32,
    tick: u64,
    sent_moves: u64,
}

impl GameClient {
    /// Connects to a server and performs handshake.
    pub async fn connect(cfg: &SessionConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %server_addr, "Connecting to server");

        let mut conn = ReliableConn::connect(server_addr).await?;
        conn.send(&NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
        })
        .await?;

        let (client_id, owned) = match conn.recv().await? {
            NetMsg::Welcome { client_id, vehicle } => (client_id, vehicle),
            NetMsg::Disconnect { reason } => bail!("server refused connection: {reason}"),
            other => bail!("expected Welcome, got {other:?}"),
        };
        info!(client_id = ?client_id, vehicle = ?owned, "Connected to server");

        let (reader, writer) = conn.into_split();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        reader.spawn_forward(client_id, inbound_tx);

        Ok(Self {
            client_id,
            state: ClientState::Connected,
            collision: cfg.collision(),
            cfg: cfg.clone(),
            owned,
            writer,
            inbound_rx,
            server_addr,
            vehicles: BTreeMap::new(),
            events: EventBus::default(),
            clock: 0.0,
            tick: 0,
            sent_moves: 0,
        })
    }

    /// Vehicle this client controls.
    pub fn owned_vehicle_id(&self) -> VehicleId {
        self.owned
    }

    pub fn owned_vehicle(&self) -> Option<&ReplicatedVehicle> {
        self.vehicles.get(&self.owned)
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&ReplicatedVehicle> {
        self.vehicles.get(&id)
    }

    pub fn vehicle_ids(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.vehicles.keys().copied()
    }

    /// Local replication role of a vehicle.
    pub fn role_of(&self, id: VehicleId) -> Role {
        if id == self.owned {
            Role::OwningProxy
        } else {
            Role::RemoteProxy
        }
    }

    /// Local simulation time in seconds.
    pub fn clock(&self) -> f32 {
        self.clock
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn sent_moves(&self) -> u64 {
        self.sent_moves
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    fn spawn_local(&mut self, vehicle: VehicleId, transform: Transform) -> &mut ReplicatedVehicle {
        let collision = self.collision.clone();
        let params = self.cfg.vehicle;
        let capacity = self.cfg.max_pending_moves;
        self.vehicles.entry(vehicle).or_insert_with(|| {
            debug!(vehicle = ?vehicle, "Vehicle spawned locally");
            ReplicatedVehicle::new(vehicle, params, transform)
                .with_collision(collision)
                .with_mesh_offset(Box::<MeshPose>::default())
                .with_max_pending_moves(capacity)
        })
    }

    /// Drains every message the reader task has forwarded so far.
    pub fn poll_messages(&mut self) {
        while let Ok((_, inbound)) = self.inbound_rx.try_recv() {
            match inbound {
                Inbound::Message(msg) => self.handle_message(msg),
                Inbound::Closed => {
                    if self.state == ClientState::Connected {
                        info!("Server connection closed");
                    }
                    self.state = ClientState::Disconnected;
                }
            }
        }
    }

    fn handle_message(&mut self, msg: NetMsg) {
        match msg {
            NetMsg::Spawn { vehicle, transform } => {
                self.spawn_local(vehicle, transform);
            }
            NetMsg::StateUpdate { vehicle, state } => self.on_state_update(vehicle, state),
            NetMsg::Despawn { vehicle } => {
                if self.vehicles.remove(&vehicle).is_some() {
                    debug!(vehicle = ?vehicle, "Vehicle despawned");
                }
            }
            NetMsg::Disconnect { reason } => {
                info!(reason = %reason, "Disconnected by server");
                self.state = ClientState::Disconnected;
            }
            other => {
                debug!(?other, "Unhandled server message");
            }
        }
    }

    fn on_state_update(&mut self, vehicle: VehicleId, state: CanonicalState) {
        let role = self.role_of(vehicle);
        self.spawn_local(vehicle, state.transform)
            .on_canonical_state(role, state);
    }

    /// Advances one client tick: apply server messages, simulate every
    /// vehicle in its role and send the produced move.
    pub async fn tick(&mut self, input: InputState, dt_sec: f32) -> anyhow::Result<()> {
        self.poll_messages();
        if self.state == ClientState::Disconnected {
            return Ok(());
        }

        self.clock += dt_sec;
        let owned = self.owned;
        for (id, vehicle) in self.vehicles.iter_mut() {
            let (role, input) = if *id == owned {
                (Role::OwningProxy, Some(input))
            } else {
                (Role::RemoteProxy, None)
            };
            let ctx = TickContext {
                role,
                delta_time: dt_sec,
                now: self.clock,
                input,
            };
            vehicle.tick(&ctx, &mut self.events);
        }

        for produced in self.events.drain::<MoveProduced>() {
            let msg = NetMsg::SubmitMove {
                vehicle: produced.vehicle,
                mv: produced.mv,
            };
            if let Err(e) = self.writer.send(&msg).await {
                warn!(error = %e, "Failed to send move");
                self.state = ClientState::Disconnected;
                return Err(e);
            }
            self.sent_moves += 1;
        }
        self.events.clear();

        self.tick += 1;
        Ok(())
    }

    /// Sends a raw message to the server.
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        self.writer.send(msg).await
    }

    /// Tells the server we are leaving.
    pub async fn disconnect(&mut self, reason: &str) -> anyhow::Result<()> {
        if self.state == ClientState::Disconnected {
            return Ok(());
        }
        self.state = ClientState::Disconnected;
        self.writer
            .send(&NetMsg::Disconnect {
                reason: reason.to_string(),
            })
            .await
    }

    /// Human-readable status lines.
    pub fn status_lines(&self) -> Vec<String> {
        let mut out = vec![
            format!("State: {:?}", self.state),
            format!("Client ID: {:?}", self.client_id),
            format!("Tick: {}  Clock: {:.2}s", self.tick, self.clock),
            format!("Vehicles: {}", self.vehicles.len()),
        ];
        if let Some(car) = self.owned_vehicle() {
            let body = car.body();
            out.push(format!(
                "Own vehicle {:?}: pos ({:.0}, {:.0}, {:.0}) speed {:.0} pending {}",
                self.owned,
                body.transform.translation.x,
                body.transform.translation.y,
                body.transform.translation.z,
                body.velocity.len(),
                car.pending_moves().len()
            ));
        }
        out
    }
}
