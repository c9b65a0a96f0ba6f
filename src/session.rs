//! Test session lifecycle.
//!
//! [`TestSession`] is the only component with mutable session state. It
//! drives one test through
//!
//! ```text
//! Idle --load--> Reserved --start--> Running --stop / run ends--> Idle
//! ```
//!
//! and guarantees that a reservation group created by `load_configuration`
//! is released on every path out of Reserved/Running: stop, completion,
//! remote failure, and timeout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::artifacts::{self, ArtifactStore};
use crate::binding::{self, BindingPlan};
use crate::collector::{self, OutputFormat, StatisticsCollector};
use crate::config::{PollConfig, TrafficConfig};
use crate::descriptor::{DescriptorLoader, LoadedDescriptor};
use crate::error::{Result, SessionError};
use crate::generator::{RunStatus, TrafficGenerator};
use crate::registry::ReservationRegistry;
use crate::reservation::{ReservationCoordinator, ReservationDetails, ReservationGroup};
use crate::topology::{TopologyMap, TopologyQuery};

const RESULTS_MESSAGE: &str = "Please check attachments for results";
const NO_TEST_ID: &str = "test id not defined, run the test first";

// ---------------------------------------------------------------------------
// Settings and collaborators
// ---------------------------------------------------------------------------

/// Per-session settings, usually taken from [`TrafficConfig`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub reservation_id: String,
    pub environment_name: String,
    pub domain: Option<String>,
    pub remote_domain: Option<String>,
    pub admin_token: String,
    /// Directory receiving the local copy of each results artifact.
    pub results_dir: PathBuf,
    pub poll: PollConfig,
}

impl SessionSettings {
    pub fn from_config(config: &TrafficConfig) -> Self {
        Self {
            reservation_id: config.reservation.reservation_id.clone(),
            environment_name: config.reservation.environment_name.clone(),
            domain: config.reservation.domain.clone(),
            remote_domain: config.reservation.remote_domain.clone(),
            admin_token: config.artifacts.admin_token.clone(),
            results_dir: config.artifacts.results_dir.clone(),
            poll: config.poll.clone(),
        }
    }
}

/// External systems a session talks to. Injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn TrafficGenerator>,
    pub registry: Arc<dyn ReservationRegistry>,
    pub details: Arc<dyn ReservationDetails>,
    pub loader: Arc<dyn DescriptorLoader>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No reservation held.
    Idle,
    /// Descriptor loaded and ports reserved; ready to start.
    Reserved,
    /// A run has been started and not yet torn down.
    Running,
}

/// How the last run left Running (or Reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Stopped,
    Failed,
    TimedOut,
}

/// State of the loaded test. Outlives teardown so statistics and results
/// can still be collected for the last run.
#[derive(Debug)]
pub struct RunState {
    pub test_name: String,
    pub network_name: Option<String>,
    pub bound_interfaces: Vec<u32>,
    pub test_id: Option<String>,
    pub loaded_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    group: Option<ReservationGroup>,
}

impl RunState {
    pub fn group_id(&self) -> Option<u32> {
        self.group.as_ref().map(|g| g.group_id)
    }
}

/// Serializable view of a session for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub reservation_id: String,
    pub phase: SessionPhase,
    pub last_outcome: Option<RunOutcome>,
    pub test_name: Option<String>,
    pub network_name: Option<String>,
    pub bound_interfaces: Vec<u32>,
    pub test_id: Option<String>,
    pub group_id: Option<u32>,
    pub ordered_ports: Vec<String>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Binding plan
// ---------------------------------------------------------------------------

/// Load a descriptor and resolve its interfaces against the current
/// topology and reserved-port table, without reserving anything.
pub async fn plan_bindings(
    loader: &dyn DescriptorLoader,
    topology: &TopologyQuery,
    details: &dyn ReservationDetails,
    path: &Path,
) -> Result<(LoadedDescriptor, BindingPlan)> {
    let loaded = loader.load(path).await?;
    let interfaces = match loaded.descriptor.network_name.as_deref() {
        Some(network) => topology.interfaces(network).await?,
        None => TopologyMap::new(),
    };
    let reserved = details.reserved_ports().await?;
    debug!(reserved = ?reserved, topology = ?interfaces, "resolving port bindings");

    let plan = binding::resolve(&loaded.descriptor.interfaces, &interfaces, &reserved)?;
    Ok((loaded, plan))
}

// ---------------------------------------------------------------------------
// TestSession
// ---------------------------------------------------------------------------

pub struct TestSession {
    settings: SessionSettings,
    generator: Arc<dyn TrafficGenerator>,
    details: Arc<dyn ReservationDetails>,
    loader: Arc<dyn DescriptorLoader>,
    artifacts: Arc<dyn ArtifactStore>,
    topology: TopologyQuery,
    coordinator: ReservationCoordinator,
    collector: StatisticsCollector,
    phase: SessionPhase,
    run: Option<RunState>,
    last_outcome: Option<RunOutcome>,
}

impl TestSession {
    pub fn new(settings: SessionSettings, collaborators: Collaborators) -> Self {
        let Collaborators {
            generator,
            registry,
            details,
            loader,
            artifacts,
        } = collaborators;

        Self {
            topology: TopologyQuery::new(generator.clone()),
            coordinator: ReservationCoordinator::new(
                settings.reservation_id.clone(),
                registry,
                generator.clone(),
            ),
            collector: StatisticsCollector::new(generator.clone()),
            settings,
            generator,
            details,
            loader,
            artifacts,
            phase: SessionPhase::Idle,
            run: None,
            last_outcome: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.last_outcome
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let run = self.run.as_ref();
        SessionSnapshot {
            reservation_id: self.settings.reservation_id.clone(),
            phase: self.phase,
            last_outcome: self.last_outcome,
            test_name: run.map(|r| r.test_name.clone()),
            network_name: run.and_then(|r| r.network_name.clone()),
            bound_interfaces: run.map(|r| r.bound_interfaces.clone()).unwrap_or_default(),
            test_id: run.and_then(|r| r.test_id.clone()),
            group_id: run.and_then(RunState::group_id),
            ordered_ports: run
                .and_then(|r| r.group.as_ref())
                .map(|g| g.ordered_ports.clone())
                .unwrap_or_default(),
            loaded_at: run.map(|r| r.loaded_at),
            started_at: run.and_then(|r| r.started_at),
        }
    }

    /// Load a test descriptor, bind its interfaces and reserve the ports.
    ///
    /// Loading and reserving are one step: on any failure the session stays
    /// Idle and holds no registry group. Reloading while Reserved releases
    /// the previous group first.
    pub async fn load_configuration(&mut self, path: &Path) -> Result<()> {
        const OP: &str = "load_configuration";
        match self.phase {
            SessionPhase::Running => {
                return Err(SessionError::sequence(
                    OP,
                    "a test is running, stop it before loading another configuration",
                ))
            }
            SessionPhase::Reserved => {
                info!("reloading configuration, releasing previous reservation");
                self.teardown(None).await?;
            }
            SessionPhase::Idle => {}
        }

        let (loaded, plan) = plan_bindings(
            self.loader.as_ref(),
            &self.topology,
            self.details.as_ref(),
            path,
        )
        .await?;
        for b in &plan.bindings {
            debug!(
                interface = b.interface,
                port = %b.port,
                logical = %b.logical_name,
                "associating interface"
            );
        }

        let group = self.coordinator.reserve(&plan.ordered_ports()).await?;
        info!(
            test_name = %loaded.test_name,
            group_id = group.group_id,
            ports = ?group.ordered_ports,
            "configuration loaded, ports reserved"
        );

        self.run = Some(RunState {
            test_name: loaded.test_name,
            network_name: loaded.descriptor.network_name,
            bound_interfaces: plan.interfaces(),
            test_id: None,
            loaded_at: Utc::now(),
            started_at: None,
            group: Some(group),
        });
        self.phase = SessionPhase::Reserved;
        self.last_outcome = None;
        Ok(())
    }

    /// Upload a capture file to the generator. Does not change state.
    pub async fn upload_pcap(&self, path: &Path) -> Result<String> {
        let reported = self.generator.upload_pcap(path).await?;
        let local = capture_name(path);
        info!(reported = %reported, local = %local, "pcap upload response");
        if reported.is_empty() || !local.to_lowercase().contains(&reported.to_lowercase()) {
            return Err(SessionError::remote(
                "upload_pcap",
                format!("unable to load pcap file, generator reported '{}'", reported),
            ));
        }
        Ok(reported)
    }

    /// Start the loaded test. Returns the generator's test id.
    ///
    /// With `blocking`, waits for the run to end and tears the reservation
    /// down before returning. Without it the session stays Running until
    /// [`TestSession::stop_traffic`].
    pub async fn start_traffic(&mut self, blocking: bool) -> Result<String> {
        const OP: &str = "start_traffic";
        let (test_name, group_id) = match (self.phase, self.run.as_ref()) {
            (SessionPhase::Reserved, Some(run)) => match run.group_id() {
                Some(group_id) => (run.test_name.clone(), group_id),
                None => return Err(SessionError::sequence(OP, "load configuration first")),
            },
            (SessionPhase::Running, _) => {
                return Err(SessionError::sequence(OP, "a test is already running"))
            }
            _ => return Err(SessionError::sequence(OP, "load configuration first")),
        };

        let test_id = match self.generator.start_run(&test_name, group_id).await {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "start failed, releasing reservation");
                self.teardown_quietly(RunOutcome::Failed).await;
                return Err(err);
            }
        };

        if let Some(run) = self.run.as_mut() {
            run.test_id = Some(test_id.clone());
            run.started_at = Some(Utc::now());
        }
        self.phase = SessionPhase::Running;
        info!(test_id = %test_id, test_name = %test_name, group_id, blocking, "test started");

        if !blocking {
            return Ok(test_id);
        }

        match self.wait_for_completion(&test_id).await {
            Ok(()) => {
                self.teardown(Some(RunOutcome::Completed)).await?;
                Ok(test_id)
            }
            Err(err) => {
                let outcome = if matches!(err, SessionError::Timeout { .. }) {
                    if let Err(stop_err) = self.generator.stop_run(&test_id).await {
                        warn!(test_id = %test_id, error = %stop_err, "stop after timeout failed");
                    }
                    RunOutcome::TimedOut
                } else {
                    RunOutcome::Failed
                };
                error!(test_id = %test_id, error = %err, "run did not complete, tearing down");
                self.teardown_quietly(outcome).await;
                Err(err)
            }
        }
    }

    /// Stop the running test and release its reservation.
    ///
    /// The reservation is released even when the stop request fails.
    pub async fn stop_traffic(&mut self) -> Result<()> {
        const OP: &str = "stop_traffic";
        let test_id = self.require_test_id(OP)?;
        if self.phase != SessionPhase::Running {
            return Err(SessionError::sequence(
                OP,
                format!("test {} is not running", test_id),
            ));
        }

        if let Err(err) = self.generator.stop_run(&test_id).await {
            error!(test_id = %test_id, error = %err, "stop failed, releasing reservation");
            self.teardown_quietly(RunOutcome::Failed).await;
            return Err(err);
        }

        info!(test_id = %test_id, "test stopped");
        self.teardown(Some(RunOutcome::Stopped)).await
    }

    /// Stop a running test, or release a reservation that was never started.
    /// A no-op when Idle.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.phase {
            SessionPhase::Running => self.stop_traffic().await,
            SessionPhase::Reserved => {
                info!("releasing unused reservation");
                self.teardown(None).await
            }
            SessionPhase::Idle => Ok(()),
        }
    }

    /// Render a live statistics snapshot of the current or last run.
    pub async fn get_statistics(&self, view: &str, format: &str) -> Result<String> {
        let test_id = self.require_test_id("get_statistics")?;
        let format: OutputFormat = format.parse()?;
        let stats = self.collector.realtime_statistics(&test_id, view).await?;
        collector::render(&stats, format)
    }

    /// Fetch the results report, keep a local copy and attach it to the
    /// reservation in the artifact store.
    pub async fn get_results(&self) -> Result<String> {
        let test_id = self.require_test_id("get_results")?;
        let report = self.collector.results_artifact(&test_id).await?;

        let local = artifacts::persist_local(
            &self.settings.results_dir,
            &self.settings.reservation_id,
            &report,
        )
        .await?;

        let domain = artifacts::resolve_domain(
            self.settings.remote_domain.as_deref(),
            self.settings.domain.as_deref(),
        );
        let file_name = artifacts::artifact_file_name(&self.settings.environment_name, &test_id);
        self.artifacts
            .authenticate(&self.settings.admin_token, &domain)
            .await?;
        self.artifacts
            .upload(&self.settings.reservation_id, &file_name, report)
            .await?;

        info!(
            test_id = %test_id,
            domain = %domain,
            file_name = %file_name,
            local = %local.display(),
            "results published"
        );
        Ok(RESULTS_MESSAGE.to_string())
    }

    fn require_test_id(&self, operation: &'static str) -> Result<String> {
        self.run
            .as_ref()
            .and_then(|r| r.test_id.clone())
            .ok_or_else(|| SessionError::sequence(operation, NO_TEST_ID))
    }

    async fn wait_for_completion(&self, test_id: &str) -> Result<()> {
        let max_polls = self.settings.poll.max_polls.max(1);
        let interval = self.settings.poll.interval();
        let started = Instant::now();

        for poll in 1..=max_polls {
            match self.generator.run_status(test_id).await? {
                RunStatus::Completed => {
                    info!(test_id, polls = poll, elapsed = ?started.elapsed(), "run completed");
                    return Ok(());
                }
                RunStatus::Failed { reason } => {
                    return Err(SessionError::remote("run", reason));
                }
                RunStatus::Running { progress } => {
                    debug!(test_id, poll, ?progress, "run in progress");
                }
            }
            if poll < max_polls {
                tokio::time::sleep(interval).await;
            }
        }

        Err(SessionError::Timeout {
            operation: "start_traffic",
            polls: max_polls,
            elapsed: started.elapsed(),
        })
    }

    /// Release the held group, if any, and return to Idle. The group is
    /// taken out of the run state before release so it is never released
    /// twice, even if the release itself fails.
    async fn teardown(&mut self, outcome: Option<RunOutcome>) -> Result<()> {
        self.phase = SessionPhase::Idle;
        if outcome.is_some() {
            self.last_outcome = outcome;
        }
        let group = self.run.as_mut().and_then(|r| r.group.take());
        match group {
            Some(group) => self.coordinator.release(group).await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// Teardown on an error path: a release failure is logged so the
    /// original error is the one returned.
    async fn teardown_quietly(&mut self, outcome: RunOutcome) {
        if let Err(e) = self.teardown(Some(outcome)).await {
            error!(error = %e, "failed to release reservation during teardown");
        }
    }
}

/// Local name a capture upload is checked against: the file name up to its
/// first dot, tolerating Windows-style separators.
fn capture_name(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let file = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    file.split('.').next().unwrap_or_default().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
