//! Bus Transport Abstraction
//!
//! The protocol engine is transport-agnostic: anything that can send a frame
//! and fan inbound frames out to subscribers works. A SocketCAN adapter, a
//! serial SLCAN bridge or the in-memory loopback below all satisfy the same
//! trait.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::{CanSimpleError, Result};
use crate::frame::CanFrame;

const BUS_CHANNEL_DEPTH: usize = 256;

/// Shared bus connection: write-only send plus a subscribable inbound stream
///
/// `send` must not block other senders; `subscribe` hands out an independent
/// cursor over the inbound broadcast stream.
#[async_trait]
pub trait CanTransport: Send + Sync {
    /// Queue a frame for transmission. No acknowledgement is awaited.
    async fn send(&self, frame: CanFrame) -> Result<()>;

    /// Subscribe to the inbound frame stream
    fn subscribe(&self) -> broadcast::Receiver<CanFrame>;
}

/// In-memory loopback bus for tests and simulation
///
/// Models the two directions of a shared bus separately: frames sent by the
/// host fan out to device endpoints, frames sent by devices fan out to host
/// subscribers. Senders never see their own traffic, matching the usual
/// SocketCAN configuration.
pub struct LoopbackBus {
    to_devices: broadcast::Sender<CanFrame>,
    to_host: broadcast::Sender<CanFrame>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        let (to_devices, _) = broadcast::channel(BUS_CHANNEL_DEPTH);
        let (to_host, _) = broadcast::channel(BUS_CHANNEL_DEPTH);
        LoopbackBus { to_devices, to_host }
    }

    /// Attach a simulated device to the bus
    pub fn device_side(&self) -> DeviceSide {
        DeviceSide {
            rx: self.to_devices.subscribe(),
            tx: self.to_host.clone(),
        }
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CanTransport for LoopbackBus {
    async fn send(&self, frame: CanFrame) -> Result<()> {
        trace!(
            id = %format_args!("{:#05x}", frame.id),
            data = %hex::encode(&frame.data),
            "host tx"
        );
        // Fire-and-forget: a bus with no listeners silently drops the frame
        let _ = self.to_devices.send(frame);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CanFrame> {
        self.to_host.subscribe()
    }
}

/// Device-side handle onto a [`LoopbackBus`]
pub struct DeviceSide {
    rx: broadcast::Receiver<CanFrame>,
    tx: broadcast::Sender<CanFrame>,
}

impl DeviceSide {
    /// Next frame sent by the host
    pub async fn recv(&mut self) -> Result<CanFrame> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Ok(frame),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    trace!(missed = n, "device side lagged behind host traffic");
                },
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(CanSimpleError::transport("loopback bus closed"));
                },
            }
        }
    }

    /// Broadcast a frame towards the host side
    pub fn send(&self, frame: CanFrame) -> Result<()> {
        self.tx
            .send(frame)
            .map(|_| ())
            .map_err(|_| CanSimpleError::transport("no host subscriber on loopback bus"))
    }
}
