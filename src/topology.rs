//! Network topology query.
//!
//! The generator exposes topology as a two-step operation on shared device
//! state: trigger a refresh for a named network, then read "the" network.
//! Two sessions interleaving those steps would read each other's topology,
//! so the pair runs under one process-wide lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::generator::TrafficGenerator;

/// Logical interface number -> physical port id.
pub type TopologyMap = BTreeMap<u32, String>;

static TOPOLOGY_LOCK: Mutex<()> = Mutex::const_new(());

pub struct TopologyQuery {
    generator: Arc<dyn TrafficGenerator>,
}

impl TopologyQuery {
    pub fn new(generator: Arc<dyn TrafficGenerator>) -> Self {
        Self { generator }
    }

    /// Fetch the current interface map of `network`. Never cached.
    pub async fn interfaces(&self, network: &str) -> Result<TopologyMap> {
        debug!(network, "waiting for topology lock");
        let _guard = TOPOLOGY_LOCK.lock().await;
        self.generator.trigger_topology_refresh(network).await?;
        let topology = self.generator.fetch_topology().await?;
        debug!(network, interfaces = topology.len(), "topology retrieved");
        Ok(topology)
    }
}
