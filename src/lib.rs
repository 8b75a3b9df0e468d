//! FabricBench -- GPU fabric benchmark launcher and streaming client.
//!
//! This crate provides the control-plane server that launches collective
//! benchmarks over mpirun, the client-side run coordinator that consumes
//! the streamed output, and the parsers for the bandwidth tables the
//! benchmarks print.

pub mod api;
pub mod config;
pub mod exec;
pub mod hostlist;
pub mod params;
pub mod parser;
pub mod precheck;
pub mod run;
pub mod script;
pub mod stream;

use anyhow::Result;

use crate::config::Config;

/// Start the FabricBench daemon: host list store, job runner, and API server.
pub async fn serve(config: Config) -> Result<()> {
    let hostlists = hostlist::HostListStore::new(&config.server.data_dir);
    hostlists.ensure()?;

    let runner = exec::JobRunner::new(config.launcher.clone());

    let addr: std::net::SocketAddr = config.server.bind.parse()?;
    let state = api::AppState::new(config, hostlists, runner);
    let app = api::router(state);

    tracing::info!(%addr, "FabricBench listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
