use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let (config, config_path) = sa_runtime::load_config()?;
    tracing::info!(config_path, "configuration loaded");
    sa_runtime::validate_or_bail(&config)?;

    let runtime = sa_runtime::build_runtime(config).await?;

    // No presentation layer lives in this crate (§2.1): a TUI, CLI, or
    // HTTP adapter would drive `RuntimeHandle::run_query` from here. This
    // binary's job ends at handing a ready runtime to whichever of those
    // gets wired in; for now it just proves the wiring boots and shuts
    // down cleanly on Ctrl-C.
    let session_id = runtime.create_session("default", "default");
    tracing::info!(session_id, "runtime ready, awaiting shutdown signal");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    runtime.shutdown().await?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sa_runtime=debug")))
        .json()
        .init();
}
