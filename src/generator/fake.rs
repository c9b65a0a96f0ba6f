//! In-memory generator used by unit tests.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{RunStatus, Statistics, TrafficGenerator};
use crate::error::{Result, SessionError};
use crate::topology::TopologyMap;

#[derive(Default)]
pub(crate) struct FakeGenerator {
    pub topology: Mutex<TopologyMap>,
    pub statuses: Mutex<VecDeque<RunStatus>>,
    pub statistics: Mutex<Statistics>,
    pub artifact: Mutex<Bytes>,
    pub pcap_name: Mutex<Option<String>>,
    /// How long `bind_port_group` takes.
    pub bind_delay: Mutex<Duration>,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn with_topology(entries: &[(u32, &str)]) -> Self {
        let fake = Self::default();
        *fake.topology.lock().unwrap() = entries
            .iter()
            .map(|(n, p)| (*n, p.to_string()))
            .collect();
        fake
    }

    /// Make `operation` return a remote error from now on.
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn push_status(&self, status: RunStatus) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, operation: &str) -> bool {
        self.calls()
            .iter()
            .any(|c| c.split(' ').next() == Some(operation))
    }

    fn record(&self, operation: &'static str, detail: String) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", operation, detail).trim_end().to_string());
        if self.failing.lock().unwrap().contains(operation) {
            return Err(SessionError::remote(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl TrafficGenerator for FakeGenerator {
    async fn trigger_topology_refresh(&self, network: &str) -> Result<()> {
        self.record("trigger_topology_refresh", network.to_string())
    }

    async fn fetch_topology(&self) -> Result<TopologyMap> {
        self.record("fetch_topology", String::new())?;
        Ok(self.topology.lock().unwrap().clone())
    }

    async fn bind_port_group(&self, group_id: u32, ports: &[String]) -> Result<()> {
        let delay = *self.bind_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.record("bind_port_group", format!("{} {}", group_id, ports.join(",")))
    }

    async fn unbind_ports(&self, ports: &[String]) -> Result<()> {
        self.record("unbind_ports", ports.join(","))
    }

    async fn start_run(&self, test_name: &str, group_id: u32) -> Result<String> {
        self.record("start_run", format!("{} {}", test_name, group_id))?;
        Ok("TEST-1 run".to_string())
    }

    async fn stop_run(&self, test_id: &str) -> Result<()> {
        self.record("stop_run", test_id.to_string())
    }

    async fn run_status(&self, test_id: &str) -> Result<RunStatus> {
        self.record("run_status", test_id.to_string())?;
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RunStatus::Completed))
    }

    async fn realtime_statistics(&self, test_id: &str, view: &str) -> Result<Statistics> {
        self.record("realtime_statistics", format!("{} {}", test_id, view))?;
        Ok(self.statistics.lock().unwrap().clone())
    }

    async fn results_artifact(&self, test_id: &str) -> Result<Bytes> {
        self.record("results_artifact", test_id.to_string())?;
        Ok(self.artifact.lock().unwrap().clone())
    }

    async fn upload_test(&self, path: &Path) -> Result<String> {
        self.record("upload_test", path.display().to_string())?;
        Ok(crate::descriptor::file_stem(path))
    }

    async fn upload_pcap(&self, path: &Path) -> Result<String> {
        self.record("upload_pcap", path.display().to_string())?;
        Ok(self
            .pcap_name
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| crate::descriptor::file_stem(path)))
    }
}
