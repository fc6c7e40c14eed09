mod device;
mod errors;
mod flow;
mod provider;
mod security;
mod settings;
mod store;
mod web;

use clap::Parser;
use miette::Result;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "syzygy",
    version,
    about = "Device-link authorization service for TV clients"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings (the pepper never appears in logs)
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(base_url = %settings.base_url(), "Loaded configuration");

    // init storage
    let kv = store::RedisStore::connect(&settings.store.url)
        .await
        .map_err(|e| miette::miette!("store connection failed: {e}"))?;
    let state_store = store::StateStore::new(Arc::new(kv));

    // explicit construction: every collaborator is built once here and
    // injected, including the single outbound HTTP client
    let digester = security::Digester::new(settings.security.pepper.clone());
    let provider = provider::ProviderOAuth::new(&settings.provider, settings.callback_url());
    let devices = Arc::new(device::DeviceManager::new(
        state_store.clone(),
        digester.clone(),
        provider.clone(),
    ));
    let flows = Arc::new(flow::FlowManager::new(
        state_store,
        digester,
        devices.clone(),
    ));

    // start web server
    web::serve(settings, flows, devices, provider).await?;
    Ok(())
}
