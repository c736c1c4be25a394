//! Endpoint Maps and the SDO Client
//!
//! Endpoints are named, typed variables addressed by a numeric id that is
//! only meaningful for a specific firmware build. The map files are the
//! vendor's flat-endpoint JSON, keyed by firmware version; a session must
//! pass the version handshake before any endpoint is touched.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::codec;
use crate::error::{CanSimpleError, Result};
use crate::frame::Opcode;
use crate::node::NodeSession;
use crate::value::{EndpointValue, EndpointValueType};

/// Default reply deadline for SDO exchanges
pub const DEFAULT_SDO_TIMEOUT: Duration = Duration::from_secs(1);

/// One endpoint: numeric id plus wire type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EndpointDescriptor {
    pub id: u16,
    #[serde(rename = "type")]
    pub ty: EndpointValueType,
}

/// Version-tagged endpoint map, as loaded from a flat-endpoints JSON file
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointMap {
    pub fw_version: String,
    pub hw_version: String,
    pub endpoints: HashMap<String, EndpointDescriptor>,
}

impl EndpointMap {
    /// Parse a map from flat-endpoints JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| {
            CanSimpleError::SerializationError(format!("invalid endpoint map: {err}"))
        })
    }

    /// Resolve a path to its descriptor
    ///
    /// # Errors
    ///
    /// [`CanSimpleError::UnknownEndpoint`] when the path is absent.
    pub fn endpoint(&self, path: &str) -> Result<EndpointDescriptor> {
        self.endpoints
            .get(path)
            .copied()
            .ok_or_else(|| CanSimpleError::unknown_endpoint(path))
    }
}

/// Registry of endpoint maps, keyed by firmware version string
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    maps: HashMap<String, Arc<EndpointMap>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a map under its declared firmware version
    pub fn insert(&mut self, map: EndpointMap) {
        self.maps.insert(map.fw_version.clone(), Arc::new(map));
    }

    /// Load and register a single flat-endpoints JSON file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let json = std::fs::read_to_string(path.as_ref())?;
        self.insert(EndpointMap::from_json(&json)?);
        Ok(())
    }

    /// Load every `*.json` map in a directory
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                self.load_file(&path)?;
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Look up the map for a firmware version
    pub fn get(&self, fw_version: &str) -> Option<Arc<EndpointMap>> {
        self.maps.get(fw_version).cloned()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

/// Endpoint read/write client for one session
///
/// Every write is immediately read back and compared against the written
/// value, catching rejected or altered writes at the point of failure.
pub struct SdoClient<'a> {
    session: &'a NodeSession,
    timeout: Duration,
}

impl<'a> SdoClient<'a> {
    pub fn new(session: &'a NodeSession) -> Self {
        Self::with_timeout(session, DEFAULT_SDO_TIMEOUT)
    }

    pub fn with_timeout(session: &'a NodeSession, timeout: Duration) -> Self {
        SdoClient { session, timeout }
    }

    pub fn session(&self) -> &NodeSession {
        self.session
    }

    /// Query the device's version and resolve the matching endpoint map
    ///
    /// # Errors
    ///
    /// [`CanSimpleError::VersionMismatch`] when no map is registered for the
    /// decoded firmware, or when the resolved map's declared versions differ
    /// from the decoded ones (a wrong map file supplied by the caller).
    pub async fn check_version(&self, registry: &EndpointRegistry) -> Result<Arc<EndpointMap>> {
        let node_id = self.session.node_id();

        self.session.flush_pending().await;
        self.session.send(codec::encode_version_query(node_id)).await?;
        let reply = self.session.await_reply(Opcode::GetVersion, self.timeout).await?;
        let version = codec::decode_version_reply(&reply.data)?;
        debug!(node_id, %version, "device version decoded");

        let fw = version.fw_string();
        let hw = version.hw_string();
        let map = registry.get(&fw).ok_or_else(|| {
            CanSimpleError::version_mismatch(format!(
                "no endpoint map registered for firmware {fw} (node {node_id})"
            ))
        })?;

        if map.fw_version != fw {
            return Err(CanSimpleError::version_mismatch(format!(
                "endpoint map declares firmware {} but the device reports {fw}",
                map.fw_version
            )));
        }
        if map.hw_version != hw {
            return Err(CanSimpleError::version_mismatch(format!(
                "endpoint map declares hardware {} but the device reports {hw}",
                map.hw_version
            )));
        }

        Ok(map)
    }

    /// Read the current value of an endpoint
    pub async fn read(&self, map: &EndpointMap, path: &str) -> Result<EndpointValue> {
        let descriptor = map.endpoint(path)?;
        let node_id = self.session.node_id();

        self.session.flush_pending().await;
        self.session.send(codec::encode_sdo_read(node_id, descriptor.id)).await?;
        let reply = self.session.await_reply(Opcode::TxSdo, self.timeout).await?;
        codec::decode_sdo_reply(&reply.data, descriptor.ty)
    }

    /// Write an endpoint and verify the device's live value matches
    ///
    /// Float comparisons happen in f32 space (the written value is pruned to
    /// its f32 encoding first), and two NaNs compare equal.
    ///
    /// # Errors
    ///
    /// [`CanSimpleError::UnknownEndpoint`] for an unmapped path,
    /// [`CanSimpleError::InvalidData`] when the value does not fit the
    /// endpoint's type, [`CanSimpleError::WriteVerificationFailed`] when the
    /// readback differs from the written value.
    pub async fn write_and_verify(
        &self,
        map: &EndpointMap,
        path: &str,
        value: EndpointValue,
    ) -> Result<()> {
        let descriptor = map.endpoint(path)?;
        if value.value_type() != descriptor.ty {
            return Err(CanSimpleError::invalid_data(format!(
                "endpoint {path} is {}, got {}",
                descriptor.ty,
                value.value_type()
            )));
        }
        let node_id = self.session.node_id();

        self.session.send(codec::encode_sdo_write(node_id, descriptor.id, &value)).await?;

        // Discard the write acknowledgement (and anything else stale) so the
        // next TxSdo we consume is the readback
        self.session.flush_pending().await;

        self.session.send(codec::encode_sdo_read(node_id, descriptor.id)).await?;
        let reply = self.session.await_reply(Opcode::TxSdo, self.timeout).await?;
        let readback = codec::decode_sdo_reply(&reply.data, descriptor.ty)?;

        if value.verifies_against(&readback) {
            debug!(node_id, path, %value, "write verified");
            Ok(())
        } else {
            Err(CanSimpleError::WriteVerificationFailed {
                path: path.to_string(),
                expected: value,
                actual: readback,
            })
        }
    }
}
