//! TOML configuration for trafficctl.
//!
//! Layered model: explicit path, then the `TRAFFICCTL_CONFIG` environment
//! variable, then `/etc/trafficctl/trafficctl.toml`, then compiled-in
//! defaults. Every section may be omitted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const CONFIG_ENV: &str = "TRAFFICCTL_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/trafficctl/trafficctl.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the orchestrator process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub reservation: ReservationConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TrafficConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded trafficctl configuration");
        Ok(config.with_reservation_id())
    }

    /// Resolve configuration from, in order:
    /// 1. `explicit` (a `--config` flag). Errors here are fatal.
    /// 2. The path in `TRAFFICCTL_CONFIG`.
    /// 3. `/etc/trafficctl/trafficctl.toml`.
    /// 4. Compiled-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "TRAFFICCTL_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default().with_reservation_id())
    }

    /// Standalone runs have no infrastructure reservation; give them a
    /// unique id so registry groups stay scoped to this process.
    fn with_reservation_id(mut self) -> Self {
        if self.reservation.reservation_id.trim().is_empty() {
            self.reservation.reservation_id = uuid::Uuid::new_v4().to_string();
            debug!(
                reservation_id = %self.reservation.reservation_id,
                "generated standalone reservation id"
            );
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Remote traffic generator REST endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Base URL of the generator's REST API, e.g. `https://10.0.0.5`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Per-request timeout (seconds).
    pub request_timeout_sec: u64,
    /// Chassis controllers ship self-signed certificates.
    pub accept_invalid_certs: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            request_timeout_sec: 60,
            accept_invalid_certs: true,
        }
    }
}

impl GeneratorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }
}

// ---------------------------------------------------------------------------
// Poll
// ---------------------------------------------------------------------------

/// Bounds for the blocking run wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Delay between run-status polls (milliseconds).
    pub interval_ms: u64,
    /// Upper bound on status polls before the wait is reported as timed out.
    pub max_polls: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_polls: 720,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// The infrastructure reservation this process runs inside.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    /// Infrastructure reservation id. Generated when left empty.
    pub reservation_id: String,
    /// Environment name, used to name uploaded result artifacts.
    pub environment_name: String,
    /// Domain of the local reservation.
    pub domain: Option<String>,
    /// Domain of a remote/delegated reservation; preferred over `domain`.
    pub remote_domain: Option<String>,
    /// Physical ports set aside for this reservation: port id -> logical name.
    pub ports: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Artifact store endpoint and local results directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Base URL of the artifact store API.
    pub server_address: String,
    /// Admin token used to authenticate uploads.
    pub admin_token: String,
    /// Directory receiving the local copy of every results artifact.
    pub results_dir: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            server_address: "http://localhost:9000".to_string(),
            admin_token: String::new(),
            results_dir: PathBuf::from("results"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
