//! trafficctl -- test session orchestrator for remote traffic generators.
//!
//! This crate loads a test descriptor, binds its logical interfaces to
//! reserved hardware ports, drives the run, and collects statistics and
//! result artifacts, releasing every reserved port on the way out.

pub mod api;
pub mod artifacts;
pub mod binding;
pub mod collector;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod generator;
pub mod registry;
pub mod reservation;
pub mod session;
pub mod topology;

use std::sync::Arc;

use anyhow::{Context, Result};

pub use error::SessionError;

use crate::artifacts::RestArtifactStore;
use crate::config::TrafficConfig;
use crate::descriptor::GeneratorDescriptorLoader;
use crate::generator::rest::RestGenerator;
use crate::generator::TrafficGenerator;
use crate::registry::GroupRegistry;
use crate::reservation::StaticReservationDetails;
use crate::session::{Collaborators, SessionSettings, TestSession};

/// Connect to the generator and artifact store named in `config` and wire
/// up a session against them.
pub async fn build_session(config: &TrafficConfig) -> Result<TestSession> {
    let generator: Arc<dyn TrafficGenerator> = Arc::new(
        RestGenerator::connect(&config.generator)
            .await
            .with_context(|| {
                format!(
                    "failed to connect to generator at {}",
                    config.generator.base_url
                )
            })?,
    );
    let artifacts = RestArtifactStore::new(&config.artifacts.server_address)
        .context("failed to build artifact store client")?;

    tracing::info!(
        reservation_id = %config.reservation.reservation_id,
        generator = %config.generator.base_url,
        reserved_ports = config.reservation.ports.len(),
        "session wired"
    );

    Ok(TestSession::new(
        SessionSettings::from_config(config),
        Collaborators {
            loader: Arc::new(GeneratorDescriptorLoader::new(generator.clone())),
            generator,
            registry: Arc::new(GroupRegistry::default()),
            details: Arc::new(StaticReservationDetails::new(
                config.reservation.ports.clone(),
            )),
            artifacts: Arc::new(artifacts),
        },
    ))
}

/// Start the trafficctl daemon: one session behind the HTTP command API.
pub async fn serve(bind: &str, config: &TrafficConfig) -> Result<()> {
    let session = build_session(config).await?;
    let app = api::router(api::state::AppState::new(session));

    let addr: std::net::SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", bind))?;
    tracing::info!(%addr, "trafficctl listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
