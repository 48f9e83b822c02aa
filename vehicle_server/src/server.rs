//! Server implementation.
//!
//! This is the authoritative side of vehicle replication. It supports:
//! - Client handshake; one vehicle spawned per connection
//! - Per-client outbound queues; a client that stops reading is dropped
//! - `SubmitMove` validation and canonical simulation
//! - Canonical state replication to every client at `net_update_hz`
//! - An optional host vehicle driven on the server itself (listen server)
//!
//! Determinism notes:
//! - Server time advances only by the fixed step passed to `step`, never by
//!   the wall clock, so validation is reproducible in tests.
//! - Vehicles live in a `BTreeMap` so iteration order is stable.
//!
//! `step` never awaits a socket. `try_accept` waits at most its timeout; the
//! `Hello` exchange runs in a background task bounded by
//! `handshake_timeout_ms`.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, bail, Context};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::Instant,
};
use tracing::{debug, info, warn};
use vehicle_shared::{
    config::SessionConfig,
    event::EventBus,
    math::{Transform, Vec3},
    moves::{InputState, Move},
    net::{
        ClientId, Inbound, NetMsg, ReliableConn, ReliableListener, PROTOCOL_VERSION,
    },
    physics::Collision,
    replication::{
        CanonicalState, MoveRejected, ReplicatedVehicle, Role, StateChanged, TickContext, VehicleId,
    },
};

/// Spacing between spawn slots, in engine units.
const SPAWN_SPACING: f32 = 600.0;

/// Capacity of the shared inbound message channel.
const INBOUND_CAPACITY: usize = 4096;

/// Connections that said `Hello` and wait for a vehicle.
const GREETED_CAPACITY: usize = 64;

/// Connected client state.
struct ConnectedClient {
    outbox: mpsc::Sender<NetMsg>,
    peer: SocketAddr,
    vehicle: VehicleId,
    rejected_moves: u64,
}

/// Game server.
pub struct GameServer {
    pub cfg: SessionConfig,
    listener: ReliableListener,
    collision: Arc<dyn Collision>,

    clients: HashMap<ClientId, ConnectedClient>,
    vehicles: BTreeMap<VehicleId, ReplicatedVehicle>,
    next_vehicle: u64,

    /// Vehicle driven by server-local input, if any.
    host: Option<(VehicleId, InputState)>,

    inbound_tx: mpsc::Sender<(ClientId, Inbound)>,
    inbound_rx: mpsc::Receiver<(ClientId, Inbound)>,
    greeted_tx: mpsc::Sender<(ReliableConn, SocketAddr)>,
    greeted_rx: mpsc::Receiver<(ReliableConn, SocketAddr)>,
    events: EventBus,

    /// Latest canonical state per vehicle not yet pushed to clients.
    unsent: BTreeMap<VehicleId, CanonicalState>,
    since_push: f32,

    /// Server world time in seconds.
    time: f32,
    tick: u64,
}

impl GameServer {
    /// Binds the listener described by `cfg`.
    pub async fn bind(cfg: SessionConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = ReliableListener::bind(addr).await?;
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (greeted_tx, greeted_rx) = mpsc::channel(GREETED_CAPACITY);

        Ok(Self {
            collision: cfg.collision(),
            cfg,
            listener,
            clients: HashMap::new(),
            vehicles: BTreeMap::new(),
            next_vehicle: 1,
            host: None,
            inbound_tx,
            inbound_rx,
            greeted_tx,
            greeted_rx,
            events: EventBus::default(),
            unsent: BTreeMap::new(),
            since_push: 0.0,
            time: 0.0,
            tick: 0,
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Server world time in seconds.
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&ReplicatedVehicle> {
        self.vehicles.get(&id)
    }

    pub fn vehicle_ids(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.vehicles.keys().copied()
    }

    /// Vehicle owned by `client`, if connected.
    pub fn vehicle_of(&self, client: ClientId) -> Option<VehicleId> {
        self.clients.get(&client).map(|c| c.vehicle)
    }

    /// Number of moves dropped by validation for `client`.
    pub fn rejected_moves(&self, client: ClientId) -> u64 {
        self.clients.get(&client).map_or(0, |c| c.rejected_moves)
    }

    fn spawn_vehicle(&mut self) -> VehicleId {
        let id = VehicleId(self.next_vehicle);
        self.next_vehicle += 1;

        // Ids are never reused, so neither are slots.
        let slot = (id.0 - 1) as f32;
        let spawn = Transform::from_translation(Vec3::new(0.0, slot * SPAWN_SPACING, 0.0));
        let vehicle = ReplicatedVehicle::new(id, self.cfg.vehicle, spawn)
            .with_collision(self.collision.clone());
        self.unsent.insert(id, *vehicle.canonical());
        self.vehicles.insert(id, vehicle);

        debug!(vehicle = ?id, slot, "Spawned vehicle");
        id
    }

    /// Spawns a vehicle driven by server-local input (listen server).
    pub fn spawn_host_vehicle(&mut self, input: InputState) -> VehicleId {
        let id = self.spawn_vehicle();
        self.host = Some((id, input));
        info!(vehicle = ?id, "Host vehicle spawned");
        id
    }

    /// Replaces the input applied to the host vehicle each tick.
    pub fn set_host_input(&mut self, input: InputState) {
        if let Some((_, current)) = self.host.as_mut() {
            *current = input;
        }
    }

    /// Accepts exactly one client (handshake + initial replication).
    ///
    /// Waits for a connection; the `Hello` itself is bounded by the
    /// handshake timeout.
    pub async fn accept_one(&mut self) -> anyhow::Result<ClientId> {
        let (mut conn, peer) = self.listener.accept().await?;
        let limit = self.cfg.handshake_timeout();
        tokio::time::timeout(limit, expect_hello(&mut conn, peer))
            .await
            .map_err(|_| anyhow!("no Hello from {peer} within {limit:?}"))??;
        self.admit(conn, peer)
    }

    /// Accepts pending connections without stalling the tick loop.
    ///
    /// Waits up to `timeout` for a new connection and hands it to a background
    /// handshake, then admits every connection whose handshake has finished.
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Vec<ClientId>> {
        match tokio::time::timeout(timeout, self.listener.accept()).await {
            Ok(Ok((conn, peer))) => self.spawn_handshake(conn, peer),
            Ok(Err(e)) => return Err(e),
            Err(_) => {}
        }

        let mut admitted = Vec::new();
        while let Ok((conn, peer)) = self.greeted_rx.try_recv() {
            match self.admit(conn, peer) {
                Ok(client_id) => admitted.push(client_id),
                Err(e) => warn!(%peer, error = %e, "Could not admit client"),
            }
        }
        Ok(admitted)
    }

    fn spawn_handshake(&self, mut conn: ReliableConn, peer: SocketAddr) {
        let greeted = self.greeted_tx.clone();
        let limit = self.cfg.handshake_timeout();
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(limit, expect_hello(&mut conn, peer)).await;
            match outcome {
                Ok(Ok(())) => {
                    let _ = greeted.send((conn, peer)).await;
                }
                Ok(Err(e)) => warn!(%peer, error = %e, "Handshake failed"),
                Err(_) => warn!(%peer, ?limit, "Handshake timed out"),
            }
        });
    }

    /// Spawns the client's vehicle and starts its connection tasks.
    fn admit(&mut self, conn: ReliableConn, peer: SocketAddr) -> anyhow::Result<ClientId> {
        let client_id = ClientId::new_unique();
        let vehicle = self.spawn_vehicle();

        let (reader, writer) = conn.into_split();
        // Room for the whole initial snapshot.
        let capacity = self
            .cfg
            .client_queue_capacity
            .max(2 * self.vehicles.len() + 1);
        let outbox = writer.spawn_outbox(client_id, capacity);
        if let Err(e) = self.queue_initial_state(&outbox, client_id, vehicle) {
            self.vehicles.remove(&vehicle);
            self.unsent.remove(&vehicle);
            return Err(e);
        }

        let transform = self
            .vehicles
            .get(&vehicle)
            .map(|v| v.body().transform)
            .unwrap_or_default();
        self.broadcast(NetMsg::Spawn { vehicle, transform });

        reader.spawn_forward(client_id, self.inbound_tx.clone());
        self.clients.insert(
            client_id,
            ConnectedClient {
                outbox,
                peer,
                vehicle,
                rejected_moves: 0,
            },
        );

        info!(client_id = ?client_id, vehicle = ?vehicle, %peer, "Client connected");
        Ok(client_id)
    }

    /// Welcome plus a spawn and state for every vehicle, the client's own included.
    fn queue_initial_state(
        &self,
        outbox: &mpsc::Sender<NetMsg>,
        client_id: ClientId,
        vehicle: VehicleId,
    ) -> anyhow::Result<()> {
        outbox.try_send(NetMsg::Welcome { client_id, vehicle })?;
        for (id, v) in &self.vehicles {
            outbox.try_send(NetMsg::Spawn {
                vehicle: *id,
                transform: v.body().transform,
            })?;
            outbox.try_send(NetMsg::StateUpdate {
                vehicle: *id,
                state: *v.canonical(),
            })?;
        }
        Ok(())
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = self.cfg.tick_seconds();
        let interval = Duration::from_secs_f32(dt);
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += interval;
            self.step(dt)?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step.
    pub fn step(&mut self, dt_sec: f32) -> anyhow::Result<()> {
        self.time += dt_sec;
        self.recv_messages();
        self.simulate(dt_sec);
        self.collect_events();

        self.since_push += dt_sec;
        if self.since_push >= self.cfg.net_update_seconds() {
            self.since_push = 0.0;
            self.push_states();
        }

        self.tick += 1;
        Ok(())
    }

    fn recv_messages(&mut self) {
        while let Ok((client_id, inbound)) = self.inbound_rx.try_recv() {
            match inbound {
                Inbound::Message(NetMsg::SubmitMove { vehicle, mv }) => {
                    self.on_submit_move(client_id, vehicle, mv);
                }
                Inbound::Message(NetMsg::Disconnect { reason }) => {
                    info!(client_id = ?client_id, %reason, "Client left");
                    self.disconnect(client_id);
                }
                Inbound::Message(other) => {
                    debug!(client_id = ?client_id, ?other, "Unexpected client message");
                }
                Inbound::Closed => {
                    info!(client_id = ?client_id, "Connection closed");
                    self.disconnect(client_id);
                }
            }
        }
    }

    fn on_submit_move(&mut self, client_id: ClientId, vehicle: VehicleId, mv: Move) {
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };
        if client.vehicle != vehicle {
            warn!(
                client_id = ?client_id,
                vehicle = ?vehicle,
                "Move for a vehicle the client does not own"
            );
            client.rejected_moves += 1;
            return;
        }
        let Some(car) = self.vehicles.get_mut(&vehicle) else {
            return;
        };
        if car.submit_move(mv, self.time, &mut self.events).is_err() {
            client.rejected_moves += 1;
        }
    }

    fn simulate(&mut self, dt_sec: f32) {
        let host = self.host;
        for (id, vehicle) in self.vehicles.iter_mut() {
            let input = host.and_then(|(host_id, input)| (host_id == *id).then_some(input));
            let ctx = TickContext {
                role: Role::Authority,
                delta_time: dt_sec,
                now: self.time,
                input,
            };
            vehicle.tick(&ctx, &mut self.events);
        }
    }

    fn collect_events(&mut self) {
        for changed in self.events.drain::<StateChanged>() {
            // Last write wins.
            self.unsent.insert(changed.vehicle, changed.state);
        }
        let rejected = self.events.drain::<MoveRejected>();
        if !rejected.is_empty() {
            debug!(count = rejected.len(), "Moves rejected this tick");
        }
    }

    fn push_states(&mut self) {
        if self.unsent.is_empty() {
            return;
        }
        let unsent = std::mem::take(&mut self.unsent);
        for (vehicle, state) in unsent {
            // A client dropped earlier in this push takes its vehicle along.
            if self.vehicles.contains_key(&vehicle) {
                self.broadcast(NetMsg::StateUpdate { vehicle, state });
            }
        }
    }

    /// Queues `msg` for every client.
    ///
    /// A client whose queue is full or whose connection is gone is dropped, and
    /// the remaining clients are told to despawn its vehicle.
    fn broadcast(&mut self, msg: NetMsg) {
        let mut pending = VecDeque::from([msg]);
        while let Some(msg) = pending.pop_front() {
            let mut dead = Vec::new();
            for (id, client) in &self.clients {
                match client.outbox.try_send(msg.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(client_id = ?id, peer = %client.peer, "Client is not reading; dropping");
                        dead.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!(client_id = ?id, peer = %client.peer, "Client connection lost");
                        dead.push(*id);
                    }
                }
            }
            for id in dead {
                if let Some(vehicle) = self.remove_client(id) {
                    pending.push_back(NetMsg::Despawn { vehicle });
                }
            }
        }
    }

    fn remove_client(&mut self, client_id: ClientId) -> Option<VehicleId> {
        let client = self.clients.remove(&client_id)?;
        self.vehicles.remove(&client.vehicle);
        self.unsent.remove(&client.vehicle);
        Some(client.vehicle)
    }

    fn disconnect(&mut self, client_id: ClientId) {
        if let Some(vehicle) = self.remove_client(client_id) {
            self.broadcast(NetMsg::Despawn { vehicle });
        }
    }
}

/// Reads the opening `Hello` and checks its protocol version.
async fn expect_hello(conn: &mut ReliableConn, peer: SocketAddr) -> anyhow::Result<()> {
    match conn.recv().await? {
        NetMsg::Hello { protocol } if protocol == PROTOCOL_VERSION => Ok(()),
        NetMsg::Hello { protocol } => {
            let _ = conn
                .send(&NetMsg::Disconnect {
                    reason: format!("protocol {protocol} unsupported"),
                })
                .await;
            bail!("client {peer} speaks protocol {protocol}");
        }
        other => bail!("unexpected handshake msg: {other:?}"),
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(GameServer, SessionConfig)> {
    let cfg = SessionConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        ..Default::default()
    };
    let server = GameServer::bind(cfg.clone()).await?;

    let mut cfg = cfg;
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Registers a client whose outbound queue the test controls.
    fn attach(server: &mut GameServer, outbox: mpsc::Sender<NetMsg>) -> (ClientId, VehicleId) {
        let client_id = ClientId::new_unique();
        let vehicle = server.spawn_vehicle();
        server.clients.insert(
            client_id,
            ConnectedClient {
                outbox,
                peer: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
                vehicle,
                rejected_moves: 0,
            },
        );
        (client_id, vehicle)
    }

    fn queued(rx: &mut mpsc::Receiver<NetMsg>) -> Vec<NetMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn assert_despawned_last(seen: &[NetMsg], vehicle: VehicleId) {
        let at = seen
            .iter()
            .position(|m| *m == NetMsg::Despawn { vehicle })
            .expect("despawn broadcast");
        assert!(!seen[at..]
            .iter()
            .any(|m| matches!(m, NetMsg::StateUpdate { vehicle: v, .. } if *v == vehicle)));
    }

    #[tokio::test]
    async fn lost_connection_despawns_vehicle_for_remaining_clients() -> anyhow::Result<()> {
        let (mut server, _cfg) = bind_ephemeral(60).await?;
        let (watch_tx, mut watch_rx) = mpsc::channel(64);
        let (watcher, _) = attach(&mut server, watch_tx);
        let (lost_tx, lost_rx) = mpsc::channel(64);
        drop(lost_rx);
        let (lost, lost_vehicle) = attach(&mut server, lost_tx);

        // Both spawns are unsent, so this push reaches the closed queue.
        server.step(1.0)?;

        assert_eq!(server.client_count(), 1);
        assert_eq!(server.vehicle_of(lost), None);
        assert!(server.vehicle(lost_vehicle).is_none());
        assert!(server.vehicle_of(watcher).is_some());
        assert_despawned_last(&queued(&mut watch_rx), lost_vehicle);
        Ok(())
    }

    #[tokio::test]
    async fn client_that_stops_reading_is_dropped_without_blocking() -> anyhow::Result<()> {
        let (mut server, _cfg) = bind_ephemeral(60).await?;
        let (watch_tx, mut watch_rx) = mpsc::channel(64);
        attach(&mut server, watch_tx);
        let (stalled_tx, _stalled_rx) = mpsc::channel(1);
        stalled_tx.try_send(NetMsg::Despawn {
            vehicle: VehicleId(0),
        })?;
        let (stalled, stalled_vehicle) = attach(&mut server, stalled_tx);

        server.step(1.0)?;

        assert_eq!(server.vehicle_of(stalled), None);
        assert!(server.vehicle(stalled_vehicle).is_none());
        assert_despawned_last(&queued(&mut watch_rx), stalled_vehicle);
        Ok(())
    }

    #[tokio::test]
    async fn respawn_after_leave_does_not_overlap_live_vehicles() -> anyhow::Result<()> {
        let (mut server, _cfg) = bind_ephemeral(60).await?;
        let (tx, _rx) = mpsc::channel(64);
        let (first, _) = attach(&mut server, tx.clone());
        attach(&mut server, tx.clone());
        attach(&mut server, tx);
        server.disconnect(first);

        let fresh = server.spawn_vehicle();
        let spot = server.vehicle(fresh).expect("fresh vehicle").body().transform.translation;
        for id in server.vehicle_ids().filter(|id| *id != fresh) {
            let other = server.vehicle(id).expect("live vehicle").body().transform.translation;
            assert!(spot.distance(other) >= SPAWN_SPACING - 1e-3);
        }
        Ok(())
    }

    #[tokio::test]
    async fn host_vehicle_is_simulated_and_queued_for_replication() -> anyhow::Result<()> {
        let (mut server, _cfg) = bind_ephemeral(60).await?;
        let host = server.spawn_host_vehicle(InputState::new(0.0, 1.0));

        for _ in 0..3 {
            server.step(1.0 / 60.0)?;
        }

        let car = server.vehicle(host).expect("host vehicle");
        assert!(car.body().velocity.x > 0.0);
        assert_eq!(car.canonical().velocity, car.body().velocity);
        assert!(car.canonical().last_move.timestamp > 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn server_time_follows_fixed_steps() -> anyhow::Result<()> {
        let (mut server, _cfg) = bind_ephemeral(60).await?;
        for _ in 0..10 {
            server.step(0.1)?;
        }
        assert!((server.time() - 1.0).abs() < 1e-5);
        assert_eq!(server.tick_count(), 10);
        Ok(())
    }
}
