// src/main.rs

//! # Condition-Based Verification Service - Main Entry Point
//!
//! Verifiers ask whether a registered subject satisfies conditions such as
//! "age greater than 18" or "lives in Mumbai" and receive a yes/no per
//! condition with a proof token, without ever seeing the underlying data.
//!
//! ## Architecture Overview
//! 1. **Blockchain Layer**: `RegistryClient` reading the on-chain user registry
//! 2. **Services Layer**: Resolution, evaluation, orchestration, notifications and the API
//! 3. **Storage Layer**: Verification history
//! 4. **Proof Layer**: Per-condition proof tokens
//!
//! ## Configuration
//! Loaded from defaults, an optional `verifier.toml` and `VERIFIER__*`
//! environment variables (see [`settings`]). A `.env` file is honoured.

use crate::blockchain::registry_client::RegistryClient;
use crate::services::api_server::ApiServer;
use crate::services::identity_resolver::IdentityResolver;
use crate::services::notifier::{
    BroadcastHub, FanoutChannel, NotificationChannel, NotificationPublisher, WebhookChannel,
};
use crate::services::verifier::Verifier;
use crate::settings::Settings;
use crate::storage::history_store::InMemoryHistoryStore;
use anyhow::Context;
use dotenv::dotenv;
use std::sync::Arc;

// Module declarations (organized by functional domain)
mod blockchain; // Identity registry reads
mod models; // Data structures
mod proof; // Proof token encoding
mod services; // Business logic and API
mod settings; // Layered configuration
mod storage; // Verification history
mod utils; // Helper functions

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load environment and configuration
/// 2. Bind the registry client
/// 3. Wire history, notifications and the verifier
/// 4. Start API server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("Failed to load settings")?;
    let registry_address = settings.registry_address()?;

    let registry = RegistryClient::new(&settings.ledger.rpc_url, registry_address.address())
        .context("Failed to initialize RegistryClient - check RPC URL")?;
    log::info!(
        "Reading identities from registry {:?} via {}",
        registry.registry_address(),
        settings.ledger.rpc_url
    );
    let resolver = IdentityResolver::new(Arc::new(registry), settings.ledger_timeout());

    let hub = Arc::new(BroadcastHub::new(settings.notifications.channel_capacity));
    let channel: Arc<dyn NotificationChannel> = match &settings.notifications.webhook_url {
        Some(url) => {
            log::info!("Relaying notifications to {}", url);
            Arc::new(FanoutChannel::new(vec![
                hub.clone() as Arc<dyn NotificationChannel>,
                Arc::new(
                    WebhookChannel::new(url.clone(), settings.webhook_timeout())
                        .context("Failed to build notification relay client")?,
                ),
            ]))
        }
        None => hub.clone(),
    };

    let verifier = Verifier::new(
        resolver,
        Arc::new(InMemoryHistoryStore::new()),
        NotificationPublisher::new(channel),
    )
    .with_page_size(settings.history.page_size);

    let api_server = ApiServer::new(verifier, hub);

    let addr = settings.bind_address();
    log::info!("Available endpoints:");
    log::info!("- GET  /");
    log::info!("- POST /verify");
    log::info!("- GET  /verify/history?verifierId=<id>");
    log::info!("- GET  /user/:address");
    log::info!("- GET  /certificates/:address");
    log::info!("- GET  /ws/:channel");

    api_server.run(addr).await.context("API server stopped")?;
    Ok(())
}
