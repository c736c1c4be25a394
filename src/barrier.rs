//! Multi-Node State Barrier
//!
//! Coordinated transitions: request the same axis state on every required
//! node, then block until each one's heartbeat latch has reported it.
//! Edge-triggered, so a node that already latched before the wait began
//! counts immediately and never needs to report twice.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use crate::error::{CanSimpleError, Result};
use crate::node::NodeSession;

/// Capability interface the barrier needs from a session
///
/// Implemented by [`NodeSession`]; small enough for tests to fake.
#[async_trait]
pub trait AxisGate: Send + Sync {
    fn node_id(&self) -> u8;

    /// Whether the current target has been reached at least once
    fn is_latched(&self) -> bool;

    /// Re-target the latch and send the state command
    async fn request_state(&self, state: u8) -> Result<()>;

    /// Resolve once the latch is set for the current target
    async fn wait_latched(&self);
}

#[async_trait]
impl AxisGate for NodeSession {
    fn node_id(&self) -> u8 {
        NodeSession::node_id(self)
    }

    fn is_latched(&self) -> bool {
        self.reached_target()
    }

    async fn request_state(&self, state: u8) -> Result<()> {
        NodeSession::request_state(self, state).await
    }

    async fn wait_latched(&self) {
        NodeSession::wait_latched(self).await;
    }
}

/// Drive every required node to `target_state` and wait for convergence
///
/// For each session whose node id is in `required`, the latch is re-targeted
/// and a Set_Axis_State command is sent; nodes outside `required` are left
/// alone. Returns once every required node has latched, in any reporting
/// order.
///
/// # Errors
///
/// [`CanSimpleError::ConfigError`] when a required node id has no session in
/// `sessions`; [`CanSimpleError::BarrierTimeout`] naming the nodes still
/// pending when the deadline fires.
pub async fn await_axis_state(
    sessions: &[&dyn AxisGate],
    target_state: u8,
    required: &[u8],
    timeout: Duration,
) -> Result<()> {
    let mut gated: Vec<&dyn AxisGate> = Vec::with_capacity(required.len());
    for node_id in required {
        let session = sessions
            .iter()
            .find(|s| s.node_id() == *node_id)
            .ok_or_else(|| {
                CanSimpleError::config(format!("required node {node_id} has no session"))
            })?;
        gated.push(*session);
    }

    for session in &gated {
        session.request_state(target_state).await?;
    }
    debug!(target_state, nodes = ?required, "awaiting state convergence");

    let converged = join_all(gated.iter().map(|s| s.wait_latched()));
    match tokio::time::timeout(timeout, converged).await {
        Ok(_) => Ok(()),
        Err(_) => {
            let pending: Vec<u8> = gated
                .iter()
                .filter(|s| !s.is_latched())
                .map(|s| s.node_id())
                .collect();
            Err(CanSimpleError::BarrierTimeout { pending })
        },
    }
}
