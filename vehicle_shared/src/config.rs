//! Configuration system.
//!
//! Loads session configuration from JSON strings/files. Every field has a
//! default, so a partial file only overrides what it names.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    moves::DEFAULT_MAX_PENDING_MOVES,
    physics::{BoxArena, Collision, OpenGround, VehicleParams},
};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Maximum rate at which the server pushes canonical states.
    pub net_update_hz: u32,
    /// Bound on unacknowledged moves kept by an owning client.
    pub max_pending_moves: usize,
    /// Half size of the walled arena in engine units; open ground when unset.
    pub arena_half_extent: Option<f32>,
    /// How long a new connection may take to send `Hello`.
    pub handshake_timeout_ms: u64,
    /// Messages the server may queue for one client before dropping it.
    pub client_queue_capacity: usize,
    pub vehicle: VehicleParams,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 60,
            net_update_hz: 10,
            max_pending_moves: DEFAULT_MAX_PENDING_MOVES,
            arena_half_extent: None,
            handshake_timeout_ms: 2_000,
            client_queue_capacity: 1024,
            vehicle: VehicleParams::default(),
        }
    }
}

impl SessionConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Seconds per simulation tick.
    pub fn tick_seconds(&self) -> f32 {
        1.0 / self.tick_hz.max(1) as f32
    }

    /// Seconds between canonical state pushes.
    pub fn net_update_seconds(&self) -> f32 {
        1.0 / self.net_update_hz.max(1) as f32
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Collision world described by this config.
    pub fn collision(&self) -> Arc<dyn Collision> {
        match self.arena_half_extent {
            Some(half_extent) => Arc::new(BoxArena::new(half_extent)),
            None => Arc::new(OpenGround),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = SessionConfig::from_json_str(
            r#"{ "tick_hz": 30, "vehicle": { "mass": 1500.0 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.tick_hz, 30);
        assert_eq!(cfg.net_update_hz, 10);
        assert_eq!(cfg.vehicle.mass, 1500.0);
        assert_eq!(cfg.vehicle.units_per_meter, 100.0);
        assert_eq!(cfg.arena_half_extent, None);
        assert_eq!(cfg.handshake_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.client_queue_capacity, 1024);
    }

    #[test]
    fn tick_seconds_guards_zero_rate() {
        let cfg = SessionConfig {
            tick_hz: 0,
            ..Default::default()
        };
        assert_eq!(cfg.tick_seconds(), 1.0);
    }
}
