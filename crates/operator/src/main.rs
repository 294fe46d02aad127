use std::sync::Arc;

use kube::Client;
use tokio::sync::watch;
use tracing::{error, info};

use alertmanager_operator::{
    alertmanager::AlertmanagerClient,
    config::Config,
    metrics, operator::Operator,
    server,
    synthesizer::{SecretConfigStore, Synthesizer},
    watch::{WatchContext, WatcherRegistry},
    Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    metrics::register_metrics();

    // Load configuration
    let config = Config::load()?;
    info!("Loaded configuration: {:?}", config);

    let client = Client::try_default().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let alertmanager = Arc::new(AlertmanagerClient::new(&config.alertmanager)?);
    let store = Arc::new(SecretConfigStore::new(client.clone(), &config.secret));
    let synthesizer = Arc::new(Synthesizer::new(
        store,
        alertmanager.clone(),
        shutdown_rx.clone(),
    ));
    let registry = Arc::new(WatcherRegistry::new(WatchContext {
        client: client.clone(),
        alertmanager: alertmanager.clone(),
        shutdown: shutdown_rx.clone(),
    }));

    let operator = Arc::new(Operator::new(
        client,
        config.clone(),
        synthesizer,
        registry,
        alertmanager,
        shutdown_rx.clone(),
    ));

    info!("Starting server on {}", config.server.addr);
    let server_task = tokio::spawn(server::serve(config.server.addr.clone(), shutdown_rx));
    let operator_task = tokio::spawn(operator.run());

    wait_for_termination().await;
    info!("received termination signal, shutting down");
    let _ = shutdown_tx.send(true);

    let (operator_result, server_result) = tokio::join!(operator_task, server_task);
    for result in [operator_result, server_result] {
        match result {
            Ok(Err(e)) => error!("task exited with error: {}", e),
            Err(e) => error!("task panicked: {}", e),
            Ok(Ok(())) => {}
        }
    }

    Ok(())
}

async fn wait_for_termination() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
