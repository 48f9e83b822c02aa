//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p vehicle_server -- [--config session.json] [--addr 127.0.0.1:40000]
//!       [--tick-hz 60] [--host]
//!
//! The server listens for client connections, runs a fixed timestep simulation,
//! and broadcasts canonical vehicle states to connected clients.
//!
//! Console commands:
//!   throttle <v>  - Set host vehicle throttle (-1..1)
//!   steer <v>     - Set host vehicle steering (-1..1)
//!   stop          - Zero host vehicle input
//!   status        - Show server status
//!   quit          - Shutdown server

use std::env;
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use vehicle_server::server::GameServer;
use vehicle_shared::{config::SessionConfig, moves::InputState};

struct Args {
    cfg: SessionConfig,
    host: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    // The config file is the base layer; flags override it.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => SessionConfig::load(Path::new(&args[i + 1]))?,
        _ => SessionConfig::default(),
    };
    let mut host = false;

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
            "--host" => {
                host = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(Args { cfg, host })
}

fn spawn_console() -> mpsc::Receiver<String> {
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
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
    console_rx
}

/// Returns false when the server should shut down.
fn handle_console(server: &mut GameServer, host_input: &mut InputState, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let cmd = parts.next().unwrap_or_default();
    let value = parts.next().and_then(|v| v.parse::<f32>().ok());

    match (cmd, value) {
        ("throttle", Some(v)) => host_input.throttle = v,
        ("steer", Some(v)) => host_input.steering = v,
        ("stop", _) => *host_input = InputState::default(),
        ("status", _) => {
            println!(
                "time {:.2}s  tick {}  clients {}  vehicles {}",
                server.time(),
                server.tick_count(),
                server.client_count(),
                server.vehicle_ids().count()
            );
            return true;
        }
        ("quit", _) | ("exit", _) => return false,
        _ => {
            println!("unknown command: {line}");
            return true;
        }
    }
    *host_input = host_input.clamped();
    server.set_host_input(*host_input);
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, host } = parse_args()?;
    info!(
        addr = %cfg.server_addr,
        tick_hz = cfg.tick_hz,
        net_update_hz = cfg.net_update_hz,
        "Starting server"
    );

    let mut server = GameServer::bind(cfg.clone())
        .await
        .context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    let mut host_input = InputState::default();
    if host {
        server.spawn_host_vehicle(host_input);
    }

    let mut console = spawn_console();
    println!("Server ready. Type 'status' for info, 'quit' to exit.");
    println!();

    let tick_interval = Duration::from_secs_f32(cfg.tick_seconds());
    let mut next_tick = tokio::time::Instant::now();

    loop {
        match server.try_accept(Duration::from_millis(1)).await {
            Ok(admitted) => {
                for cid in admitted {
                    info!(client_id = ?cid, "New client accepted");
                }
            }
            Err(e) => warn!(error = %e, "Accept failed"),
        }

        while let Ok(line) = console.try_recv() {
            if !handle_console(&mut server, &mut host_input, &line) {
                info!("Shutting down");
                return Ok(());
            }
        }

        server.step(tick_interval.as_secs_f32())?;

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}
