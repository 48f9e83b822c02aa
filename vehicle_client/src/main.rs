//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p vehicle_client -- [--config session.json] [--addr 127.0.0.1:40000]
//!       [--tick-hz 60]
//!
//! The client connects to the server, drives its vehicle from console
//! commands, and shows the replicated state of every vehicle.
//!
//! Console commands:
//!   throttle <v>  - Hold throttle (-1..1)
//!   steer <v>     - Hold steering (-1..1)
//!   stop          - Release all controls
//!   status        - Show client status
//!   quit          - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;
use vehicle_client::client::{ClientState, GameClient};
use vehicle_client::input::{InputCommand, InputController};
use vehicle_shared::config::SessionConfig;

fn parse_args() -> anyhow::Result<SessionConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => SessionConfig::load(Path::new(&args[i + 1]))?,
        _ => SessionConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            "--config" => i += 2,
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Client connected. Type 'throttle 1', 'steer 0.5', 'status' or 'quit'.");
    println!();

    let mut input = InputController::new();
    let dt = cfg.tick_seconds();
    let tick_interval = Duration::from_secs_f32(dt);
    let status_every = u64::from(cfg.tick_hz.max(1)) * 5;
    let mut next_tick = tokio::time::Instant::now();

    loop {
        while let Ok(line) = console_rx.try_recv() {
            match InputCommand::parse(&line) {
                Some(InputCommand::Quit) => {
                    client.disconnect("quit").await?;
                    return Ok(());
                }
                Some(InputCommand::Status) => {
                    for line in client.status_lines() {
                        println!("{line}");
                    }
                }
                Some(cmd) => input.apply(cmd),
                None => println!("unknown command: {line}"),
            }
        }

        client.tick(input.sample(), dt).await?;

        if client.state == ClientState::Disconnected {
            println!("Disconnected from server.");
            break;
        }

        if client.tick_count() % status_every == 0 {
            if let Some(car) = client.owned_vehicle() {
                info!(
                    tick = client.tick_count(),
                    vehicles = client.vehicle_ids().count(),
                    pending = car.pending_moves().len(),
                    x = car.body().transform.translation.x,
                    y = car.body().transform.translation.y,
                    "Status"
                );
            }
        }

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }

    Ok(())
}
