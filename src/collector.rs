//! Statistics and results collection.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::generator::{Statistics, TrafficGenerator};

/// Thin adapter over the generator's statistics and results endpoints.
pub struct StatisticsCollector {
    generator: Arc<dyn TrafficGenerator>,
}

impl StatisticsCollector {
    pub fn new(generator: Arc<dyn TrafficGenerator>) -> Self {
        Self { generator }
    }

    pub async fn realtime_statistics(&self, test_id: &str, view: &str) -> Result<Statistics> {
        let stats = self.generator.realtime_statistics(test_id, view).await?;
        debug!(test_id, view, counters = stats.len(), "statistics snapshot");
        Ok(stats)
    }

    pub async fn results_artifact(&self, test_id: &str) -> Result<Bytes> {
        let artifact = self.generator.results_artifact(test_id).await?;
        debug!(test_id, bytes = artifact.len(), "results artifact retrieved");
        Ok(artifact)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(SessionError::Format {
                operation: "get_statistics",
                format: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Render one snapshot.
///
/// JSON: keys sorted, four-space indent. CSV: a header of the sorted keys and
/// a single data row; an empty snapshot has no header and is an error.
pub fn render(stats: &Statistics, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let mut out = Vec::new();
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
            let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
            stats
                .serialize(&mut ser)
                .map_err(|e| SessionError::remote("render_statistics", e))?;
            String::from_utf8(out).map_err(|e| SessionError::remote("render_statistics", e))
        }
        OutputFormat::Csv => {
            if stats.is_empty() {
                return Err(SessionError::remote(
                    "get_statistics",
                    "statistics view returned no values, nothing to render as csv",
                ));
            }
            let csv_err = |e: csv::Error| SessionError::remote("render_statistics", e);
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record(stats.keys()).map_err(csv_err)?;
            writer.write_record(stats.values()).map_err(csv_err)?;
            let out = writer
                .into_inner()
                .map_err(|e| SessionError::remote("render_statistics", e))?;
            let text = String::from_utf8(out)
                .map_err(|e| SessionError::remote("render_statistics", e))?;
            Ok(text.trim_end_matches(['\r', '\n']).to_string())
        }
    }
}
