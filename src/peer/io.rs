//! The per-peer reader and writer tasks.
//!
//! Every connection gets two tasks. The reader validates the handshake head,
//! then frames length-prefixed messages onto the session's shared inbound
//! channel; on any error or end-of-stream it publishes a final sentinel and
//! exits. The writer sends our handshake, then drains the peer's outbound
//! queue, prefixing each payload with its 4-byte big-endian length. The
//! empty payload encodes the keep-alive.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::error::PeerError;
use crate::constants::{MAX_FRAME_SIZE, PROTOCOL_STRING};

/// An inbound envelope from a peer's reader task.
///
/// `payload` is `None` exactly once, when the reader exits. On a healthy
/// connection the first `Some` payload is the synthetic 48-byte handshake
/// tail: reserved bytes, info hash, peer id.
#[derive(Debug)]
pub struct PeerMessage {
    pub addr: SocketAddr,
    pub payload: Option<Bytes>,
}

/// Spawns the reader and writer for one established connection.
pub fn spawn_peer_tasks(
    stream: TcpStream,
    addr: SocketAddr,
    handshake: Bytes,
    inbound: mpsc::Sender<PeerMessage>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    shutdown: watch::Receiver<bool>,
) {
    let (read_half, write_half) = stream.into_split();
    tokio::spawn(reader_task(read_half, addr, inbound, shutdown.clone()));
    tokio::spawn(writer_task(write_half, addr, handshake, outbound, shutdown));
}

async fn reader_task(
    mut socket: OwnedReadHalf,
    addr: SocketAddr,
    inbound: mpsc::Sender<PeerMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let result = tokio::select! {
        result = read_loop(&mut socket, addr, &inbound) => result,
        _ = shutdown.changed() => Ok(()),
    };
    if let Err(err) = result {
        debug!(peer = %addr, error = %err, "peer reader finished");
    }
    let _ = inbound
        .send(PeerMessage {
            addr,
            payload: None,
        })
        .await;
}

async fn read_loop(
    socket: &mut OwnedReadHalf,
    addr: SocketAddr,
    inbound: &mpsc::Sender<PeerMessage>,
) -> Result<(), PeerError> {
    let mut header = [0u8; 68];
    socket.read_exact(&mut header[..1]).await?;
    if header[0] as usize != PROTOCOL_STRING.len() {
        return Err(PeerError::InvalidHandshake);
    }
    socket.read_exact(&mut header[1..20]).await?;
    if &header[1..20] != PROTOCOL_STRING {
        return Err(PeerError::InvalidHandshake);
    }
    socket.read_exact(&mut header[20..]).await?;
    // The rest of the handshake travels as a synthetic first message.
    let tail = Bytes::copy_from_slice(&header[20..]);
    if inbound
        .send(PeerMessage {
            addr,
            payload: Some(tail),
        })
        .await
        .is_err()
    {
        return Ok(());
    }

    loop {
        let mut prefix = [0u8; 4];
        socket.read_exact(&mut prefix).await?;
        let length = u32::from_be_bytes(prefix);
        if length > MAX_FRAME_SIZE {
            return Err(PeerError::FrameTooLarge(length));
        }
        let mut payload = vec![0u8; length as usize];
        socket.read_exact(&mut payload).await?;
        if inbound
            .send(PeerMessage {
                addr,
                payload: Some(payload.into()),
            })
            .await
            .is_err()
        {
            return Ok(());
        }
    }
}

async fn writer_task(
    socket: OwnedWriteHalf,
    addr: SocketAddr,
    handshake: Bytes,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut socket = BufWriter::new(socket);
    if let Err(err) = write_loop(&mut socket, handshake, &mut outbound, &mut shutdown).await {
        debug!(peer = %addr, error = %err, "peer writer finished");
    }
}

async fn write_loop(
    socket: &mut BufWriter<OwnedWriteHalf>,
    handshake: Bytes,
    outbound: &mut mpsc::UnboundedReceiver<Bytes>,
    shutdown: &mut watch::Receiver<bool>,
) -> std::io::Result<()> {
    socket.write_all(&handshake).await?;
    socket.flush().await?;
    loop {
        let frame = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = shutdown.changed() => break,
        };
        socket.write_all(&(frame.len() as u32).to_be_bytes()).await?;
        socket.write_all(&frame).await?;
        socket.flush().await?;
    }
    Ok(())
}
