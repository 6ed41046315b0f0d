use mimalloc::MiMalloc;
use stash_api::setup;
use stash_core::Config;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let app = setup::initialize_app(config.clone()).await?;

    setup::server::start_server(&config, app.router).await?;

    if let Some(worker) = app.reconciliation {
        worker.shutdown().await;
    }
    tracing::info!("Server stopped");
    Ok(())
}
