//! Networking primitives.
//!
//! Goals:
//! - Provide a reliable, ordered (TCP) channel with length-prefixed frames.
//! - Provide the handshake, move and replication messages used by
//!   client/server.
//! - Keep serialization explicit and versionable.
//!
//! The server tick loop never awaits a socket: each connection's read half is
//! owned by a background task that forwards decoded messages into an mpsc
//! channel, and its write half by a task fed from a bounded outbox.

use anyhow::{bail, Context};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::mpsc,
    task::JoinHandle,
};
use tracing::debug;

use crate::{
    math::Transform,
    moves::Move,
    replication::{CanonicalState, VehicleId},
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 2;

/// Upper bound on a single frame's payload.
pub const MAX_FRAME_LEN: usize = 1 << 20;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
    },
    /// Server assigns the client its id and the vehicle it owns.
    Welcome {
        client_id: ClientId,
        vehicle: VehicleId,
    },

    // ─── Vehicle lifecycle ───
    Spawn {
        vehicle: VehicleId,
        transform: Transform,
    },
    Despawn {
        vehicle: VehicleId,
    },

    // ─── Gameplay ───
    /// Client -> server: one move for the vehicle it owns.
    SubmitMove {
        vehicle: VehicleId,
        mv: Move,
    },
    /// Server -> all: latest canonical state of a vehicle.
    StateUpdate {
        vehicle: VehicleId,
        state: CanonicalState,
    },

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// Event forwarded by a connection's reader task.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(NetMsg),
    /// The peer closed the connection or sent garbage.
    Closed,
}

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg: &NetMsg) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<NetMsg> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("frame of {len} bytes exceeds limit");
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
    Ok(msg)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        // Moves are tiny and latency-sensitive.
        let _ = stream.set_nodelay(true);
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.stream).await
    }

    /// Splits into independently owned read and write halves.
    pub fn into_split(self) -> (ReliableReader, ReliableWriter) {
        let (read, write) = self.stream.into_split();
        (ReliableReader { half: read }, ReliableWriter { half: write })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableReader {
    half: OwnedReadHalf,
}

impl ReliableReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.half).await
    }

    /// Forwards every received message into `tx`, tagged with `key`, until the
    /// connection ends or the receiver is dropped.
    pub fn spawn_forward<K>(mut self, key: K, tx: mpsc::Sender<(K, Inbound)>) -> JoinHandle<()>
    where
        K: Copy + Send + std::fmt::Debug + 'static,
    {
        tokio::spawn(async move {
            loop {
                match self.recv().await {
                    Ok(msg) => {
                        if tx.send((key, Inbound::Message(msg))).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(?key, error = %e, "Connection reader stopped");
                        let _ = tx.send((key, Inbound::Closed)).await;
                        return;
                    }
                }
            }
        })
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableWriter {
    half: OwnedWriteHalf,
}

impl ReliableWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.half, msg).await
    }

    /// Moves the writer into a task that sends everything queued on the
    /// returned outbox, in order.
    ///
    /// The task stops when the socket fails or every sender is dropped; a
    /// stopped task closes the outbox, so `try_send` reports it.
    pub fn spawn_outbox<K>(mut self, key: K, capacity: usize) -> mpsc::Sender<NetMsg>
    where
        K: Copy + Send + std::fmt::Debug + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<NetMsg>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = self.send(&msg).await {
                    debug!(?key, error = %e, "Connection writer stopped");
                    return;
                }
            }
        });
        tx
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}
