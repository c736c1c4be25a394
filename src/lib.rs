//! CANSimple Protocol Client (voltage_cansimple)
//!
//! An async-first client for the CANSimple request/reply protocol used by
//! ODrive-class multi-axis motor controllers on a broadcast CAN bus. This
//! library provides per-node session management, heartbeat-driven state
//! tracking, the endpoint read/write-with-verify sub-protocol used for
//! configuration, and multi-node barrier synchronization for coordinated
//! state transitions.
//!
//! # Features
//!
//! - **Reply Correlation**: concurrent, timeout-bounded waits on a shared
//!   broadcast stream, one independent waiter per opcode
//! - **Heartbeat Latching**: edge-triggered per-node state tracking; each
//!   node only needs to report a target state once
//! - **Write-Verify Configuration**: every endpoint write is read back and
//!   compared (float-aware, NaN-tolerant) before the next one is sent
//! - **Version Gating**: endpoint maps are resolved through a firmware
//!   version handshake and never applied to a mismatched device
//! - **Transport Agnostic**: any `send` + broadcast-subscribe bus works; an
//!   in-memory loopback bus ships for tests and simulation
//! - **Device Error Reporting**: heartbeat error bitmasks are rendered to
//!   human-readable descriptions and published on a side channel, never
//!   raised as operation failures
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │  ConfigRestore  │───►│    SdoClient    │───►│   NodeSession   │
//! │  (ordered keys) │    │ (write-verify)  │    │ (correlator)    │
//! └─────────────────┘    └─────────────────┘    └────────┬────────┘
//!          ┌─────────────────┐    ┌─────────────────┐    │
//!          │  await_axis_    │───►│  heartbeat      │◄───┤ listener
//!          │  state barrier  │    │  latches        │    │ task
//!          └─────────────────┘    └─────────────────┘    ▼
//!                                              ┌─────────────────┐
//!                                              │  CanTransport   │
//!                                              │ (bus broadcast) │
//!                                              └─────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use voltage_cansimple::{
//!     await_axis_state, AxisState, ConfigRestore, EndpointRegistry, NodeSession, SdoClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> voltage_cansimple::Result<()> {
//!     let transport = Arc::new(my_socketcan_adapter()?);
//!
//!     let mut registry = EndpointRegistry::new();
//!     registry.load_dir("flat_endpoints/")?;
//!
//!     // Configure one node via the version-gated endpoint protocol
//!     let session = NodeSession::open(transport.clone(), 21)?;
//!     let client = SdoClient::new(&session);
//!     let map = client.check_version(&registry).await?;
//!     ConfigRestore::new(client).apply_and_save(&map, &config).await?;
//!
//!     // Bring a group of axes into closed-loop control together
//!     let sessions: Vec<NodeSession> = [21, 22, 23, 24]
//!         .iter()
//!         .map(|id| NodeSession::open(transport.clone(), *id))
//!         .collect::<Result<_, _>>()?;
//!     let gates: Vec<&dyn voltage_cansimple::AxisGate> =
//!         sessions.iter().map(|s| s as _).collect();
//!     await_axis_state(
//!         &gates,
//!         AxisState::ClosedLoopControl.into(),
//!         &[21, 22, 23, 24],
//!         Duration::from_secs(10),
//!     )
//!     .await?;
//!
//!     sessions[0].set_velocity(1.0).await?;
//!     Ok(())
//! }
//! ```

pub mod axis;
pub mod barrier;
pub mod codec;
pub mod error;
pub mod frame;
pub mod node;
pub mod restore;
pub mod sdo;
pub mod transport;
pub mod value;

pub use axis::{describe_errors, AxisState, RebootAction};
pub use barrier::{await_axis_state, AxisGate};
pub use codec::{Heartbeat, VersionInfo};
pub use error::{CanSimpleError, Result};
pub use frame::{routing_key, CanFrame, Opcode};
pub use node::{ErrorReport, NodeSession};
pub use restore::{ConfigLayer, ConfigRestore};
pub use sdo::{EndpointDescriptor, EndpointMap, EndpointRegistry, SdoClient, DEFAULT_SDO_TIMEOUT};
pub use transport::{CanTransport, DeviceSide, LoopbackBus};
pub use value::{EndpointValue, EndpointValueType};
