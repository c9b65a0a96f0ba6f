//! Remote traffic generator surface.
//!
//! The orchestrator only depends on [`TrafficGenerator`]; the REST client in
//! [`rest`] is the production implementation.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::topology::TopologyMap;

pub mod rest;

#[cfg(test)]
pub(crate) mod fake;

/// One real-time statistics snapshot: counter name -> value.
pub type Statistics = BTreeMap<String, String>;

/// Run status as reported by the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running { progress: Option<u8> },
    Completed,
    Failed { reason: String },
}

/// Operations the orchestrator invokes on the traffic generator.
///
/// Every error is a [`crate::SessionError::RemoteOperation`] tagged with the
/// operation name.
#[async_trait]
pub trait TrafficGenerator: Send + Sync {
    /// First half of topology retrieval: ask the generator to load `network`.
    async fn trigger_topology_refresh(&self, network: &str) -> Result<()>;

    /// Second half: read the interface map of the network loaded last.
    async fn fetch_topology(&self) -> Result<TopologyMap>;

    /// Bind `ports`, in order, to the generator-side port group `group_id`.
    async fn bind_port_group(&self, group_id: u32, ports: &[String]) -> Result<()>;

    async fn unbind_ports(&self, ports: &[String]) -> Result<()>;

    /// Start `test_name` on `group_id`; returns the run's test id.
    async fn start_run(&self, test_name: &str, group_id: u32) -> Result<String>;

    async fn stop_run(&self, test_id: &str) -> Result<()>;

    async fn run_status(&self, test_id: &str) -> Result<RunStatus>;

    async fn realtime_statistics(&self, test_id: &str, view: &str) -> Result<Statistics>;

    async fn results_artifact(&self, test_id: &str) -> Result<Bytes>;

    /// Upload a test file; returns the test name the generator registered.
    async fn upload_test(&self, path: &Path) -> Result<String>;

    /// Upload a capture file; returns the file name the generator reports.
    async fn upload_pcap(&self, path: &Path) -> Result<String>;
}
