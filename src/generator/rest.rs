//! REST client for the traffic generator's management API.
//!
//! Authentication is a cookie session opened by [`RestGenerator::connect`].
//! Every non-2xx response becomes a `RemoteOperation` error carrying the
//! HTTP status and response body.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client, Response};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{RunStatus, Statistics, TrafficGenerator};
use crate::config::GeneratorConfig;
use crate::error::{Result, SessionError};
use crate::topology::TopologyMap;

const LOGIN: &str = "/api/v1/auth/session";
const NETWORK_RETRIEVE: &str = "/api/v1/bps/network/operations/retrieve";
const NETWORK: &str = "/api/v1/bps/network/";
const PORTS_RESERVE: &str = "/api/v1/bps/ports/operations/reserve";
const PORTS_UNRESERVE: &str = "/api/v1/bps/ports/operations/unreserve";
const TEST_START: &str = "/api/v1/bps/tests/operations/start";
const TEST_STOP: &str = "/api/v1/bps/tests/operations/stop";
const TEST_RTS: &str = "/api/v1/bps/tests/operations/getrts";
const TEST_REPORT: &str = "/api/v1/bps/tests/operations/exportTestReport";
const UPLOAD_TEST: &str = "/api/v1/bps/upload";
const UPLOAD_PCAP: &str = "/api/v1/bps/captures/operations/importCapture";

pub struct RestGenerator {
    client: Client,
    base_url: String,
}

impl RestGenerator {
    /// Build the HTTP client and open an authenticated session.
    pub async fn connect(config: &GeneratorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .cookie_store(true)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| SessionError::remote("connect", e))?;

        let generator = Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        };

        let body = json!({ "username": config.username, "password": config.password });
        generator.post_json("login", LOGIN, &body).await?;
        info!(base_url = %generator.base_url, user = %config.username, "generator session opened");
        Ok(generator)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json(
        &self,
        operation: &'static str,
        path: &str,
        body: &Value,
    ) -> Result<Response> {
        debug!(operation, path, "generator request");
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| SessionError::remote(operation, e))?;
        check(operation, resp).await
    }

    async fn post_for_value(
        &self,
        operation: &'static str,
        path: &str,
        body: &Value,
    ) -> Result<Value> {
        let resp = self.post_json(operation, path, body).await?;
        read_json(operation, resp).await
    }

    async fn upload(&self, operation: &'static str, path: &str, file: &Path) -> Result<Value> {
        let content = tokio::fs::read(file).await.map_err(|e| {
            SessionError::remote(operation, format!("cannot read {}: {}", file.display(), e))
        })?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let form = multipart::Form::new()
            .text("force", "true")
            .part("file", multipart::Part::bytes(content).file_name(file_name));

        let resp = self
            .client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .map_err(|e| SessionError::remote(operation, e))?;
        let resp = check(operation, resp).await?;
        read_json(operation, resp).await
    }
}

async fn check(operation: &'static str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SessionError::remote(
        operation,
        format!("HTTP {}: {}", status.as_u16(), body.trim()),
    ))
}

async fn read_json(operation: &'static str, resp: Response) -> Result<Value> {
    resp.json::<Value>()
        .await
        .map_err(|e| SessionError::remote(operation, format!("invalid response body: {}", e)))
}

fn string_field(operation: &'static str, value: &Value, keys: &[&str]) -> Result<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(scalar_to_string))
        .ok_or_else(|| {
            SessionError::remote(operation, format!("response has no {} field", keys.join("/")))
        })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accepts either `{"1": "1/0", ...}` or
/// `[{"number": 1, "port": "1/0"}, ...]` under `interfaces`.
pub(crate) fn parse_topology(data: &Value) -> Result<TopologyMap> {
    const OP: &str = "fetch_topology";
    let mut topology = TopologyMap::new();
    match data.get("interfaces") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (number, port) in map {
                let number = number.trim().parse::<u32>().map_err(|_| {
                    SessionError::remote(OP, format!("interface key '{}' is not a number", number))
                })?;
                let port = scalar_to_string(port).ok_or_else(|| {
                    SessionError::remote(OP, format!("interface {} has no port id", number))
                })?;
                topology.insert(number, port);
            }
        }
        Some(Value::Array(entries)) => {
            for entry in entries {
                let number = entry
                    .get("number")
                    .and_then(scalar_to_string)
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or_else(|| SessionError::remote(OP, "interface entry without a number"))?;
                let port = string_field(OP, entry, &["port", "id"])?;
                topology.insert(number, port);
            }
        }
        Some(other) => {
            return Err(SessionError::remote(
                OP,
                format!("unexpected interfaces payload: {}", other),
            ))
        }
    }
    Ok(topology)
}

pub(crate) fn parse_run_status(data: &Value) -> RunStatus {
    let progress = data
        .get("progress")
        .and_then(scalar_to_string)
        .and_then(|p| p.parse::<f64>().ok())
        .map(|p| p.clamp(0.0, 100.0) as u8);

    let status = data
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase);

    match status.as_deref() {
        Some("completed") | Some("passed") | Some("done") | Some("stopped") => RunStatus::Completed,
        Some("failed") | Some("error") | Some("aborted") | Some("canceled") => RunStatus::Failed {
            reason: data
                .get("error")
                .and_then(scalar_to_string)
                .unwrap_or_else(|| status.clone().unwrap_or_default()),
        },
        Some(_) => RunStatus::Running { progress },
        None if progress == Some(100) => RunStatus::Completed,
        None => RunStatus::Running { progress },
    }
}

#[async_trait]
impl TrafficGenerator for RestGenerator {
    async fn trigger_topology_refresh(&self, network: &str) -> Result<()> {
        self.post_json("trigger_topology_refresh", NETWORK_RETRIEVE, &json!({ "name": network }))
            .await?;
        Ok(())
    }

    async fn fetch_topology(&self) -> Result<TopologyMap> {
        let resp = self
            .client
            .get(self.url(NETWORK))
            .send()
            .await
            .map_err(|e| SessionError::remote("fetch_topology", e))?;
        let resp = check("fetch_topology", resp).await?;
        let data = read_json("fetch_topology", resp).await?;
        parse_topology(&data)
    }

    async fn bind_port_group(&self, group_id: u32, ports: &[String]) -> Result<()> {
        let body = json!({ "group": group_id, "ports": ports, "force": true });
        self.post_json("bind_port_group", PORTS_RESERVE, &body).await?;
        Ok(())
    }

    async fn unbind_ports(&self, ports: &[String]) -> Result<()> {
        if ports.is_empty() {
            return Ok(());
        }
        self.post_json("unbind_ports", PORTS_UNRESERVE, &json!({ "ports": ports }))
            .await?;
        Ok(())
    }

    async fn start_run(&self, test_name: &str, group_id: u32) -> Result<String> {
        let body = json!({ "modelname": test_name, "group": group_id });
        let data = self.post_for_value("start_run", TEST_START, &body).await?;
        string_field("start_run", &data, &["testid", "runid"])
    }

    async fn stop_run(&self, test_id: &str) -> Result<()> {
        self.post_json("stop_run", TEST_STOP, &json!({ "testid": test_id }))
            .await?;
        Ok(())
    }

    async fn run_status(&self, test_id: &str) -> Result<RunStatus> {
        let data = self
            .post_for_value("run_status", TEST_RTS, &json!({ "runid": test_id }))
            .await?;
        Ok(parse_run_status(&data))
    }

    async fn realtime_statistics(&self, test_id: &str, view: &str) -> Result<Statistics> {
        let body = json!({ "runid": test_id, "statsGroup": view });
        let data = self
            .post_for_value("realtime_statistics", TEST_RTS, &body)
            .await?;
        let values = data
            .get("values")
            .and_then(Value::as_object)
            .ok_or_else(|| SessionError::remote("realtime_statistics", "response has no values"))?;
        Ok(values
            .iter()
            .map(|(k, v)| (k.clone(), scalar_to_string(v).unwrap_or_else(|| v.to_string())))
            .collect())
    }

    async fn results_artifact(&self, test_id: &str) -> Result<Bytes> {
        let body = json!({ "testid": test_id, "reportType": "pdf" });
        let resp = self.post_json("results_artifact", TEST_REPORT, &body).await?;
        resp.bytes()
            .await
            .map_err(|e| SessionError::remote("results_artifact", e))
    }

    async fn upload_test(&self, path: &Path) -> Result<String> {
        let data = self.upload("upload_test", UPLOAD_TEST, path).await?;
        string_field("upload_test", &data, &["name", "result"])
    }

    async fn upload_pcap(&self, path: &Path) -> Result<String> {
        let data = self.upload("upload_pcap", UPLOAD_PCAP, path).await?;
        string_field("upload_pcap", &data, &["name", "result"])
    }
}
