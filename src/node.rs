//! Per-Node Session Management
//!
//! A [`NodeSession`] owns one node's identity and inbound frame stream. A
//! background listener drains the session's bus subscription: heartbeats feed
//! the latched state tracker, everything else addressed to the node lands in
//! a bounded reply queue. [`NodeSession::await_reply`] correlates replies to
//! requests over that queue; a registry of pending waiters keeps concurrent
//! waits for different opcodes independent, and one waiter's timeout never
//! stalls the others.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::axis::{describe_errors, RebootAction};
use crate::codec::{self, Heartbeat};
use crate::error::{CanSimpleError, Result};
use crate::frame::{routing_key, CanFrame, Opcode, MAX_NODE_ID};
use crate::transport::CanTransport;

const REPLY_QUEUE_DEPTH: usize = 64;
const ERROR_CHANNEL_DEPTH: usize = 16;

/// Device-reported runtime error, published on the session's side channel
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub node_id: u8,
    /// Raw heartbeat error bitmask
    pub bitmask: u32,
    /// Multi-line rendering of the set flags, ascending bit order
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// State shared between the session handle and its listener task
struct SessionShared {
    node_id: u8,
    latest: Mutex<Option<Heartbeat>>,
    target_state: Mutex<Option<u8>>,
    latched: AtomicBool,
    latch_tx: watch::Sender<bool>,
    error_tx: broadcast::Sender<ErrorReport>,
}

impl SessionShared {
    /// Fold a heartbeat into the latch.
    ///
    /// Returns the error bitmask when this observation is the first to reach
    /// the current target and the device reports errors; the caller owns the
    /// side effects (report + Clear_Errors). Latching is edge-triggered:
    /// repeat observations of the target are no-ops until an explicit
    /// re-target clears the latch.
    fn note_heartbeat(&self, heartbeat: Heartbeat) -> Option<u32> {
        *self.latest.lock() = Some(heartbeat);

        let target = self.target_state.lock();
        if *target == Some(heartbeat.axis_state) && !self.latched.swap(true, Ordering::SeqCst) {
            // send_replace: the latch must advance even with no subscriber yet
            self.latch_tx.send_replace(true);
            if heartbeat.axis_error != 0 {
                return Some(heartbeat.axis_error);
            }
        }
        None
    }

    fn set_target_state(&self, state: u8) {
        let mut target = self.target_state.lock();
        *target = Some(state);
        self.latched.store(false, Ordering::SeqCst);
        self.latch_tx.send_replace(false);
    }
}

/// Session for one node on the bus
///
/// Opening a session subscribes to the transport's broadcast stream and
/// spawns the listener task; dropping the session aborts it. All methods
/// take `&self`, so a session can be shared behind an `Arc`.
pub struct NodeSession {
    node_id: u8,
    transport: Arc<dyn CanTransport>,
    shared: Arc<SessionShared>,
    cursor: tokio::sync::Mutex<mpsc::Receiver<CanFrame>>,
    pending: DashMap<u32, (u64, oneshot::Sender<CanFrame>)>,
    ticket: AtomicU64,
    listener: JoinHandle<()>,
}

impl NodeSession {
    /// Open a session for `node_id` on the given transport
    ///
    /// Must be called within a Tokio runtime; the listener task starts
    /// consuming the bus subscription immediately.
    pub fn open(transport: Arc<dyn CanTransport>, node_id: u8) -> Result<Self> {
        if node_id > MAX_NODE_ID {
            return Err(CanSimpleError::invalid_parameter(format!(
                "node id {node_id} exceeds the 6-bit routing field (max {MAX_NODE_ID})"
            )));
        }

        let (queue_tx, queue_rx) = mpsc::channel(REPLY_QUEUE_DEPTH);
        let (latch_tx, _) = watch::channel(false);
        let (error_tx, _) = broadcast::channel(ERROR_CHANNEL_DEPTH);

        let shared = Arc::new(SessionShared {
            node_id,
            latest: Mutex::new(None),
            target_state: Mutex::new(None),
            latched: AtomicBool::new(false),
            latch_tx,
            error_tx,
        });

        let listener = tokio::spawn(listen(
            transport.subscribe(),
            Arc::clone(&shared),
            queue_tx,
            Arc::clone(&transport),
        ));

        debug!(node_id, "node session opened");

        Ok(NodeSession {
            node_id,
            transport,
            shared,
            cursor: tokio::sync::Mutex::new(queue_rx),
            pending: DashMap::new(),
            ticket: AtomicU64::new(0),
            listener,
        })
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Latest heartbeat observed for this node, if any
    pub fn latest_heartbeat(&self) -> Option<Heartbeat> {
        *self.shared.latest.lock()
    }

    /// Whether the current target state has been reached at least once
    pub fn reached_target(&self) -> bool {
        self.shared.latched.load(Ordering::SeqCst)
    }

    /// Currently awaited axis state, if any
    pub fn target_state(&self) -> Option<u8> {
        *self.shared.target_state.lock()
    }

    /// Subscribe to device-reported runtime errors
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorReport> {
        self.shared.error_tx.subscribe()
    }

    /// Forward a frame to the transport; no acknowledgement is awaited
    pub async fn send(&self, frame: CanFrame) -> Result<()> {
        trace!(
            node_id = self.node_id,
            id = %format_args!("{:#05x}", frame.id),
            data = %hex::encode(&frame.data),
            "tx"
        );
        self.transport.send(frame).await
    }

    /// Suspend until a frame with this node's routing key for `opcode`
    /// arrives, or the deadline fires
    ///
    /// Frames are consumed exactly once, in arrival order, from the session's
    /// reply queue. Concurrent calls for different opcodes are independent:
    /// whichever call currently drains the queue hands matching frames to the
    /// other registered waiters. Frames nobody is waiting for are discarded in
    /// order, so callers that must not see stale traffic call
    /// [`flush_pending`](Self::flush_pending) before issuing their request.
    ///
    /// # Errors
    ///
    /// [`CanSimpleError::ReplyTimeout`] when the deadline elapses; this is
    /// not retried internally.
    pub async fn await_reply(&self, opcode: Opcode, timeout: Duration) -> Result<CanFrame> {
        let key = routing_key(self.node_id, opcode);
        let ticket = self.ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, mut done) = oneshot::channel();
        if self.pending.insert(key, (ticket, tx)).is_some() {
            trace!(key, "displaced an earlier waiter for the same opcode");
        }

        match tokio::time::timeout(timeout, self.drive(&mut done)).await {
            Ok(result) => result,
            Err(_) => {
                // Deregister, but never a newer waiter that took over the slot
                self.pending.remove_if(&key, |_, (owner, _)| *owner == ticket);
                Err(CanSimpleError::ReplyTimeout {
                    node_id: self.node_id,
                    opcode: opcode as u8,
                })
            },
        }
    }

    /// Wait for our reply, draining the shared queue cursor if no other
    /// waiter holds it
    async fn drive(&self, mut done: &mut oneshot::Receiver<CanFrame>) -> Result<CanFrame> {
        let mut cursor = tokio::select! {
            biased;
            delivered = &mut done => return Self::delivered(delivered),
            guard = self.cursor.lock() => guard,
        };

        loop {
            tokio::select! {
                biased;
                delivered = &mut done => return Self::delivered(delivered),
                next = cursor.recv() => match next {
                    Some(frame) => self.dispatch(frame),
                    None => return Err(CanSimpleError::transport("session reply queue closed")),
                },
            }
        }
    }

    fn delivered(result: std::result::Result<CanFrame, oneshot::error::RecvError>) -> Result<CanFrame> {
        result.map_err(|_| {
            CanSimpleError::invalid_parameter("reply waiter superseded by a newer await for the same opcode")
        })
    }

    /// Hand a drained frame to its registered waiter, or discard it
    fn dispatch(&self, frame: CanFrame) {
        match self.pending.remove(&frame.id) {
            Some((_, (_, tx))) => {
                if tx.send(frame).is_err() {
                    trace!(node_id = self.node_id, "waiter vanished before delivery");
                }
            },
            None => {
                trace!(
                    node_id = self.node_id,
                    id = %format_args!("{:#05x}", frame.id),
                    "discarding frame with no pending waiter"
                );
            },
        }
    }

    /// Discard all frames currently buffered in the reply queue
    ///
    /// Does not wait for new frames. Used before a request whose reply must
    /// not be conflated with stale traffic.
    pub async fn flush_pending(&self) {
        let mut cursor = self.cursor.lock().await;
        let mut drained = 0usize;
        while cursor.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            debug!(node_id = self.node_id, drained, "flushed stale frames");
        }
    }

    /// Set the axis state the latch should track, clearing any previous latch
    ///
    /// Must be called before sending a state-change command so the latch
    /// tracks the newly requested target, not a stale one.
    pub fn set_target_state(&self, state: impl Into<u8>) {
        self.shared.set_target_state(state.into());
    }

    /// Re-target the latch and send a Set_Axis_State command
    pub async fn request_state(&self, state: impl Into<u8>) -> Result<()> {
        let state = state.into();
        self.set_target_state(state);
        self.send(codec::encode_state_command(self.node_id, state as u32)).await
    }

    /// Send a velocity setpoint with zero torque feedforward
    pub async fn set_velocity(&self, velocity: f32) -> Result<()> {
        self.set_velocity_with_torque(velocity, 0.0).await
    }

    /// Send a velocity setpoint with an explicit torque feedforward
    pub async fn set_velocity_with_torque(&self, velocity: f32, torque_feedforward: f32) -> Result<()> {
        self.send(codec::encode_velocity_command(self.node_id, velocity, torque_feedforward))
            .await
    }

    /// Send a position setpoint
    pub async fn set_position(
        &self,
        position: f32,
        velocity_feedforward: f32,
        torque_feedforward: f32,
    ) -> Result<()> {
        self.send(codec::encode_position_command(
            self.node_id,
            position,
            velocity_feedforward,
            torque_feedforward,
        ))
        .await
    }

    /// Send a Clear_Errors command
    pub async fn clear_errors(&self, identify: bool) -> Result<()> {
        self.send(codec::encode_clear_errors(self.node_id, identify)).await
    }

    /// Send a Reboot command
    pub async fn reboot(&self, action: RebootAction) -> Result<()> {
        self.send(codec::encode_reboot(self.node_id, action)).await
    }

    /// Resolve once the latch is set for the current target
    ///
    /// Latches set before the call began resolve immediately.
    pub async fn wait_latched(&self) {
        let mut latch_rx = self.shared.latch_tx.subscribe();
        // wait_for inspects the current value first, preserving edge-triggered
        // semantics for nodes that already reported
        let _ = latch_rx.wait_for(|latched| *latched).await;
    }
}

impl std::fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSession")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl Drop for NodeSession {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Listener task: drains the bus subscription for one node
async fn listen(
    mut bus_rx: broadcast::Receiver<CanFrame>,
    shared: Arc<SessionShared>,
    queue: mpsc::Sender<CanFrame>,
    transport: Arc<dyn CanTransport>,
) {
    let node_id = shared.node_id;
    loop {
        let frame = match bus_rx.recv().await {
            Ok(frame) => frame,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(node_id, missed, "listener lagged, frames lost");
                continue;
            },
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if frame.node_id() != node_id {
            continue;
        }

        if frame.opcode() == Some(Opcode::Heartbeat) {
            match codec::decode_heartbeat(&frame.data) {
                Ok(heartbeat) => {
                    if let Some(bitmask) = shared.note_heartbeat(heartbeat) {
                        report_axis_errors(&shared, &*transport, bitmask).await;
                    }
                },
                Err(err) => warn!(node_id, %err, "dropping malformed heartbeat"),
            }
            continue;
        }

        // Replies and other directed traffic go to the reply queue
        if let Err(mpsc::error::TrySendError::Full(frame)) = queue.try_send(frame) {
            warn!(
                node_id,
                id = %format_args!("{:#05x}", frame.id),
                "reply queue full, dropping frame"
            );
        }
    }
    debug!(node_id, "listener stopped, bus subscription closed");
}

/// Render, publish and clear a device-reported error bitmask
async fn report_axis_errors(shared: &SessionShared, transport: &dyn CanTransport, bitmask: u32) {
    let node_id = shared.node_id;
    let description = describe_errors(bitmask);
    warn!(
        node_id,
        bitmask = %format_args!("{bitmask:#010x}"),
        %description,
        "axis reported errors while reaching target state"
    );

    let _ = shared.error_tx.send(ErrorReport {
        node_id,
        bitmask,
        description,
        timestamp: Utc::now(),
    });

    if let Err(err) = transport.send(codec::encode_clear_errors(node_id, false)).await {
        warn!(node_id, %err, "failed to send Clear_Errors");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(node_id: u8) -> SessionShared {
        let (latch_tx, _) = watch::channel(false);
        let (error_tx, _) = broadcast::channel(4);
        SessionShared {
            node_id,
            latest: Mutex::new(None),
            target_state: Mutex::new(None),
            latched: AtomicBool::new(false),
            latch_tx,
            error_tx,
        }
    }

    fn heartbeat(state: u8, error: u32) -> Heartbeat {
        Heartbeat {
            axis_error: error,
            axis_state: state,
            procedure_result: 0,
            trajectory_done: false,
        }
    }

    #[test]
    fn test_latch_requires_target() {
        let shared = shared(1);
        assert_eq!(shared.note_heartbeat(heartbeat(8, 0)), None);
        assert!(!shared.latched.load(Ordering::SeqCst));
    }

    #[test]
    fn test_latch_idempotence() {
        let shared = shared(1);
        shared.set_target_state(8);

        // First matching heartbeat with errors latches and reports once
        assert_eq!(shared.note_heartbeat(heartbeat(8, 0b101)), Some(0b101));
        assert!(shared.latched.load(Ordering::SeqCst));

        // Repeats update the snapshot but produce no further side effects
        assert_eq!(shared.note_heartbeat(heartbeat(8, 0b101)), None);
        assert_eq!(shared.note_heartbeat(heartbeat(8, 0b111)), None);
        assert_eq!((*shared.latest.lock()).map(|hb| hb.axis_error), Some(0b111));
    }

    #[test]
    fn test_retarget_rearms_latch() {
        let shared = shared(1);
        shared.set_target_state(8);
        assert_eq!(shared.note_heartbeat(heartbeat(8, 0)), None);
        assert!(shared.latched.load(Ordering::SeqCst));

        shared.set_target_state(1);
        assert!(!shared.latched.load(Ordering::SeqCst));
        assert_eq!(shared.note_heartbeat(heartbeat(8, 0)), None);
        assert!(!shared.latched.load(Ordering::SeqCst));
        assert_eq!(shared.note_heartbeat(heartbeat(1, 0)), None);
        assert!(shared.latched.load(Ordering::SeqCst));
    }

    #[test]
    fn test_error_only_reported_on_first_transition() {
        let shared = shared(1);
        shared.set_target_state(8);

        // Non-matching heartbeats never report, even with errors set
        assert_eq!(shared.note_heartbeat(heartbeat(1, 0b1)), None);
        // Clean transition reports nothing
        assert_eq!(shared.note_heartbeat(heartbeat(8, 0)), None);
        // Errors appearing after the latch are not reported by the latch
        assert_eq!(shared.note_heartbeat(heartbeat(8, 0b1)), None);
    }
}
