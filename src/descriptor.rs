//! Test descriptor loading.
//!
//! A descriptor is the exported test file: a `testmodel` element naming the
//! generator-side network and listing the numbered logical interfaces the
//! test drives. Loading uploads the file to the generator (which returns the
//! test name it registered) and parses the interface list locally.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Result, SessionError};
use crate::generator::TrafficGenerator;

/// Parsed, read-only view of a test file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDescriptor {
    /// Generator-side network the test's interfaces live in.
    pub network_name: Option<String>,
    /// Logical interface numbers in author order.
    pub interfaces: Vec<u32>,
}

impl TestDescriptor {
    /// Parse the `testmodel` element of an exported test file.
    pub fn parse(path: &Path, xml: &str) -> Result<Self> {
        let invalid = |reason: String| SessionError::Descriptor {
            path: path.to_path_buf(),
            reason,
        };

        let doc = roxmltree::Document::parse(xml).map_err(|e| invalid(e.to_string()))?;
        let model = doc
            .descendants()
            .find(|n| n.has_tag_name("testmodel"))
            .ok_or_else(|| invalid("no testmodel element".to_string()))?;

        let network_name = model
            .attribute("network")
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let mut interfaces = Vec::new();
        for node in model.children().filter(|n| n.has_tag_name("interface")) {
            let raw = node
                .attribute("number")
                .ok_or_else(|| invalid("interface element without a number".to_string()))?;
            let number = raw
                .trim()
                .parse::<u32>()
                .map_err(|_| invalid(format!("interface number '{}' is not an integer", raw)))?;
            interfaces.push(number);
        }

        Ok(Self {
            network_name,
            interfaces,
        })
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let xml = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SessionError::Descriptor {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Self::parse(path, &xml)
    }
}

/// A descriptor together with the name the generator registered it under.
#[derive(Debug, Clone)]
pub struct LoadedDescriptor {
    pub test_name: String,
    pub descriptor: TestDescriptor,
}

#[async_trait]
pub trait DescriptorLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<LoadedDescriptor>;
}

/// Uploads the test file to the generator, then parses it locally.
pub struct GeneratorDescriptorLoader {
    generator: Arc<dyn TrafficGenerator>,
}

impl GeneratorDescriptorLoader {
    pub fn new(generator: Arc<dyn TrafficGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl DescriptorLoader for GeneratorDescriptorLoader {
    async fn load(&self, path: &Path) -> Result<LoadedDescriptor> {
        // Parse first: a malformed file should never reach the generator.
        let descriptor = TestDescriptor::from_file(path).await?;
        let test_name = self.generator.upload_test(path).await?;
        info!(
            test_name = %test_name,
            network = ?descriptor.network_name,
            interfaces = ?descriptor.interfaces,
            "test descriptor loaded"
        );
        Ok(LoadedDescriptor {
            test_name,
            descriptor,
        })
    }
}

/// Parses locally without uploading. Used by `trafficctl plan`.
pub struct LocalDescriptorLoader;

#[async_trait]
impl DescriptorLoader for LocalDescriptorLoader {
    async fn load(&self, path: &Path) -> Result<LoadedDescriptor> {
        let descriptor = TestDescriptor::from_file(path).await?;
        let test_name = file_stem(path);
        debug!(test_name = %test_name, "descriptor parsed locally");
        Ok(LoadedDescriptor {
            test_name,
            descriptor,
        })
    }
}

/// File name without directories or extension.
pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| PathBuf::from(path).display().to_string())
}
