//! Shared harness for the socket-level integration tests.
//!
//! Client and server run in the same task and are stepped in lock-step with
//! a fixed `dt`; short sleeps let the connection reader tasks deliver frames
//! between steps.

use std::time::Duration;

use vehicle_client::GameClient;
use vehicle_server::GameServer;
use vehicle_shared::{config::SessionConfig, moves::InputState, net::ClientId};

/// Fixed step used by every harness helper.
pub const DT: f32 = 1.0 / 60.0;

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Lets the reader tasks forward whatever is in flight.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(3)).await;
}

/// Accepts on `server` while a new client connects to it.
pub async fn connect_client(
    server: &mut GameServer,
    cfg: &SessionConfig,
) -> anyhow::Result<(ClientId, GameClient)> {
    let (accepted, client) = tokio::join!(server.accept_one(), GameClient::connect(cfg));
    let client = client?;
    let accepted = accepted?;
    assert_eq!(accepted, client.client_id);
    Ok((accepted, client))
}

/// Steps the server alone, e.g. to put its clock ahead of new clients.
pub async fn step_server(server: &mut GameServer, ticks: u32) -> anyhow::Result<()> {
    for _ in 0..ticks {
        server.step(DT)?;
        settle().await;
    }
    Ok(())
}

/// Ticks every client with its input, then the server, `ticks` times.
pub async fn lockstep(
    server: &mut GameServer,
    clients: &mut [(&mut GameClient, InputState)],
    ticks: u32,
) -> anyhow::Result<()> {
    for _ in 0..ticks {
        for (client, input) in clients.iter_mut() {
            client.tick(*input, DT).await?;
        }
        settle().await;
        server.step(DT)?;
        settle().await;
    }
    Ok(())
}

/// Drains everything in flight on both sides: the server processes queued
/// moves and pushes states, then each client applies them.
pub async fn drain(server: &mut GameServer, clients: &mut [&mut GameClient]) -> anyhow::Result<()> {
    tokio::time::sleep(Duration::from_millis(30)).await;
    // Long enough for at least one replication push.
    let ticks = (server.cfg.net_update_seconds() / DT).ceil() as u32 + 2;
    step_server(server, ticks).await?;
    tokio::time::sleep(Duration::from_millis(30)).await;
    for client in clients.iter_mut() {
        client.poll_messages();
    }
    Ok(())
}
