//! Configuration Restore Engine
//!
//! Applies an ordered path→value mapping to a node through write-verify.
//! Order matters: mode switches must land before mode-specific parameters,
//! so the layer is applied strictly in insertion order and the first failure
//! aborts the rest of the batch. Merging override layers into a single
//! ordered mapping is the caller's job.

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::axis::RebootAction;
use crate::error::Result;
use crate::sdo::{EndpointMap, SdoClient};
use crate::value::EndpointValue;

/// One merged configuration source: insertion-ordered path→value mapping
pub type ConfigLayer = IndexMap<String, serde_json::Value>;

/// Write-verify driven configuration restore for one node
pub struct ConfigRestore<'a> {
    client: SdoClient<'a>,
}

impl<'a> ConfigRestore<'a> {
    pub fn new(client: SdoClient<'a>) -> Self {
        ConfigRestore { client }
    }

    /// Apply every entry of the layer, in insertion order
    ///
    /// Stops at the first failure and propagates it; entries already written
    /// stay written (the caller decides whether to retry the whole set).
    /// Returns the number of variables applied.
    pub async fn apply(&self, map: &EndpointMap, config: &ConfigLayer) -> Result<usize> {
        let node_id = self.client.session().node_id();
        info!(node_id, count = config.len(), "writing configuration");

        for (path, raw) in config {
            let descriptor = map.endpoint(path)?;
            let value = EndpointValue::from_json(descriptor.ty, raw)?;
            debug!(node_id, %path, %value, "write");
            self.client.write_and_verify(map, path, value).await?;
        }

        Ok(config.len())
    }

    /// Apply the layer, then persist it with a save-and-reboot
    pub async fn apply_and_save(&self, map: &EndpointMap, config: &ConfigLayer) -> Result<usize> {
        let applied = self.apply(map, config).await?;
        info!(node_id = self.client.session().node_id(), "saving configuration");
        self.client.session().reboot(RebootAction::Save).await?;
        Ok(applied)
    }
}
