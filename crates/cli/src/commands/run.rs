//! `parley run`: wire every collaborator together and serve until Ctrl+C.

use parley_channels::{ChannelRegistry, ConsoleChannel, TelegramChannel, TelegramSettings};
use parley_config::{AclConfig, AppConfig};
use parley_context::ContextEngine;
use parley_core::access::{AccessControl, AllowAll};
use parley_dispatch::{Admission, Dispatcher};
use parley_providers::{build_adapter, build_from_config, build_speech};
use parley_security::access_policy;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run(console: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let setup = build_from_config(&config)?;
    let engine = Arc::new(ContextEngine::new(setup.context, setup.estimator));
    let adapter = Arc::new(build_adapter(&config, setup.provider));

    let mut registry = ChannelRegistry::new();
    let access: Arc<dyn AccessControl> = if console {
        registry.register(Arc::new(ConsoleChannel::new(&config.bot_name)));
        // the console user is the local operator
        Arc::new(AllowAll)
    } else {
        let acl = AclConfig::load().map_err(|e| format!("Failed to load access list: {e}"))?;
        registry.register(Arc::new(TelegramChannel::new(TelegramSettings::from_config(
            &config.telegram,
        )?)));
        access_policy(config.system.whitelist_enabled, &acl)
    };
    let registry = Arc::new(registry);

    let mut dispatcher = Dispatcher::new(
        registry.clone(),
        access,
        engine,
        adapter,
        Arc::new(Admission::new(config.dispatch.admission_capacity)),
    )
    .with_workers(config.dispatch.workers);

    match build_speech(&config) {
        Ok(speech) => dispatcher = dispatcher.with_speech(speech),
        Err(e) => warn!(error = %e, "Voice messages disabled"),
    }
    let dispatcher = Arc::new(dispatcher);

    let rx = registry.start_all().await?;
    info!(bot = %config.bot_name, channels = ?registry.list(), "Parley is running");
    if console {
        println!("{} is listening. Type a message, or `exit` to quit.", config.bot_name);
    }

    tokio::select! {
        _ = dispatcher.clone().run(rx) => info!("All channels closed"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    dispatcher.admission().close();
    registry.stop_all().await;
    Ok(())
}
