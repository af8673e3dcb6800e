//! Binary entrypoint: loads configuration, wires the engine's
//! collaborators together, recovers state from the filesystem, and serves
//! the control API.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use hovel::api::build_router;
use hovel::config::Config;
use hovel::container::ContainerController;
use hovel::credential::HttpCredentialValidator;
use hovel::engine::{BranchEngine, EngineConfig};
use hovel::logging;
use hovel::port_allocator::PortAllocator;
use hovel::registry::Registry;
use hovel::vcs::GitVcsAdapter;

#[tokio::main]
async fn main() -> hovel::Result<()> {
    let config = Config::from_env()?;
    logging::init(&config.rust_log);

    hovel::container::require_docker_binary()?;

    info!(
        host = %config.hovel_host,
        port = config.hovel_port,
        workspaces_root = %config.workspaces_root.display(),
        "starting hovel"
    );

    let registry = Registry::new(&config.workspaces_root)?;
    let ports = PortAllocator::new(config.base_branch_port, config.max_branch_port);
    let credential = Arc::new(HttpCredentialValidator::new());
    let vcs = Arc::new(GitVcsAdapter::new(std::env::current_dir()?));
    let container = Arc::new(ContainerController::new(Duration::from_secs(
        config.build_timeout_sec,
    )));

    let engine_config = EngineConfig {
        template_root: config.app_template_path.clone(),
        host: config.hovel_host.clone(),
        ttyd_command: config.ttyd_command.clone(),
        build_concurrency: config.build_concurrency,
    };

    let engine = Arc::new(BranchEngine::new(
        registry,
        ports,
        credential,
        vcs,
        container,
        engine_config,
    ));

    engine.recover().await?;

    let router = build_router(engine);
    let addr = format!("{}:{}", config.hovel_host, config.hovel_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "control API listening");

    axum::serve(listener, router).await?;

    Ok(())
}
