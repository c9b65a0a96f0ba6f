use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trafficctl::collector::OutputFormat;
use trafficctl::config::{LoggingConfig, TrafficConfig};
use trafficctl::descriptor::LocalDescriptorLoader;
use trafficctl::generator::rest::RestGenerator;
use trafficctl::reservation::StaticReservationDetails;
use trafficctl::session::plan_bindings;
use trafficctl::topology::TopologyQuery;

#[derive(Parser)]
#[command(
    name = "trafficctl",
    about = "Test session orchestrator for remote traffic generators",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (overrides TRAFFICCTL_CONFIG and the system path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (HTTP command API around one session)
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },

    /// Load a test, reserve its ports, run it and release the ports
    Run {
        /// Exported test file
        #[arg(long)]
        test: PathBuf,

        /// Return after start and stop on Ctrl-C instead of waiting for the run
        #[arg(long)]
        no_wait: bool,

        /// Statistics view to print after the run
        #[arg(long)]
        stats_view: Option<String>,

        /// Statistics output format: json or csv
        #[arg(long, default_value = "json")]
        format: String,

        /// Publish the results report to the artifact store
        #[arg(long)]
        results: bool,
    },

    /// Show how a test's interfaces map onto reserved ports, without reserving
    Plan {
        /// Exported test file
        #[arg(long)]
        test: PathBuf,
    },

    /// Upload a capture file to the generator
    UploadPcap {
        #[arg(long)]
        file: PathBuf,
    },
}

fn init_tracing(logging: &LoggingConfig, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    if json || logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TrafficConfig::load_or_default(cli.config.as_deref())?;
    init_tracing(&config.logging, cli.json_logs);
    tracing::debug!(reservation_id = %config.reservation.reservation_id, "configuration resolved");

    match cli.command {
        Commands::Serve { bind } => {
            tracing::info!(%bind, "Starting trafficctl daemon");
            trafficctl::serve(&bind, &config).await?;
        }
        Commands::Run {
            test,
            no_wait,
            stats_view,
            format,
            results,
        } => {
            // Reject a bad format before any port is reserved.
            format.parse::<OutputFormat>()?;

            let mut session = trafficctl::build_session(&config).await?;
            session.load_configuration(&test).await?;

            if no_wait {
                let test_id = session.start_traffic(false).await?;
                println!("Test started: {}", test_id);
                println!("Running; press Ctrl-C to stop.");
                let interrupted = tokio::signal::ctrl_c().await;

                // The run is stopped on every path; errors are reported after.
                let stats = match &stats_view {
                    Some(view) => Some(session.get_statistics(view, &format).await),
                    None => None,
                };
                session.stop_traffic().await?;
                println!("Test stopped: {}", test_id);
                interrupted.context("failed to listen for Ctrl-C")?;
                if let Some(stats) = stats {
                    println!("{}", stats?);
                }
            } else {
                let finished = tokio::select! {
                    result = session.start_traffic(true) => Some(result),
                    _ = tokio::signal::ctrl_c() => None,
                };
                match finished {
                    Some(result) => {
                        let test_id = result?;
                        println!("Test completed: {}", test_id);
                        if let Some(view) = &stats_view {
                            println!("{}", session.get_statistics(view, &format).await?);
                        }
                    }
                    None => {
                        tracing::warn!("interrupted, stopping test and releasing ports");
                        session.shutdown().await?;
                        println!("Test interrupted");
                        return Ok(());
                    }
                }
            }

            if results {
                println!("{}", session.get_results().await?);
            }
        }
        Commands::Plan { test } => {
            let generator = Arc::new(RestGenerator::connect(&config.generator).await?);
            let details = StaticReservationDetails::new(config.reservation.ports.clone());
            let (loaded, plan) = plan_bindings(
                &LocalDescriptorLoader,
                &TopologyQuery::new(generator),
                &details,
                &test,
            )
            .await?;

            println!("\nBinding plan for {}", loaded.test_name);
            println!("{:<10} | {:<20} | Logical port", "Interface", "Port");
            println!("{:-<10}-|-{:-<20}-|-{:-<20}", "", "", "");
            for b in &plan.bindings {
                println!("{:<10} | {:<20} | {}", b.interface, b.port, b.logical_name);
            }
            if plan.is_empty() {
                println!("(test declares no interfaces)");
            }
            println!();
        }
        Commands::UploadPcap { file } => {
            let session = trafficctl::build_session(&config).await?;
            let name = session.upload_pcap(&file).await?;
            println!("Capture uploaded: {}", name);
        }
    }

    Ok(())
}
