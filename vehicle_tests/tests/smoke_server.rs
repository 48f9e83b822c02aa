use vehicle_server::server::{bind_ephemeral, GameServer};
use vehicle_shared::{config::SessionConfig, moves::InputState};

/// Smoke test: server can run a few ticks without panicking.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(60).await?;
    server.run_for_ticks(3).await?;
    assert_eq!(server.tick_count(), 3);
    Ok(())
}

#[tokio::test]
async fn host_vehicle_stops_at_arena_wall() -> anyhow::Result<()> {
    let cfg = SessionConfig {
        server_addr: "127.0.0.1:0".to_string(),
        arena_half_extent: Some(500.0),
        ..Default::default()
    };
    let dt = cfg.tick_seconds();
    let mut server = GameServer::bind(cfg).await?;
    let host = server.spawn_host_vehicle(InputState::new(0.0, 1.0));

    // Ten seconds of full throttle covers far more than five metres.
    for _ in 0..600 {
        server.step(dt)?;
    }

    let body = *server.vehicle(host).expect("host vehicle").body();
    assert!(body.transform.translation.x <= 500.0 + 1e-2);
    assert!(body.transform.translation.x > 490.0);
    assert!(body.transform.translation.is_finite());
    Ok(())
}

#[tokio::test]
async fn host_input_can_be_changed_while_running() -> anyhow::Result<()> {
    let (mut server, cfg) = bind_ephemeral(60).await?;
    let dt = cfg.tick_seconds();
    let host = server.spawn_host_vehicle(InputState::new(0.0, 1.0));
    for _ in 0..60 {
        server.step(dt)?;
    }
    let cruising = server.vehicle(host).expect("host vehicle").body().velocity.len();

    server.set_host_input(InputState::new(0.0, -1.0));
    for _ in 0..30 {
        server.step(dt)?;
    }
    let braking = server.vehicle(host).expect("host vehicle").body().velocity.len();
    assert!(braking < cruising);
    Ok(())
}
