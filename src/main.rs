use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use zoom_event_listener::config::Settings;
use zoom_event_listener::connection_manager::ConnectionManager;
use zoom_event_listener::shutdown;
use zoom_event_listener::telemetry;
use zoom_event_listener::websocket::LoggingUserCreatedHandler;

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration before tracing exists, so report plainly
    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Set accountId, clientId, clientSecret and url in .env.local or the environment.");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = telemetry::init_tracing(&settings.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }
    tracing::info!("Configuration loaded");

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Listener stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let manager = ConnectionManager::new(&settings, Arc::new(LoggingUserCreatedHandler))
        .context("failed to initialise connection manager")?;

    let signal_handle = tokio::spawn(shutdown::forward_signal(manager.shutdown_signal()));

    let result = manager.connect().await;
    signal_handle.abort();

    let summary = result.context("event subscription ended")?;
    tracing::info!(
        session_id = %summary.session_id,
        user_created_events = summary.user_created_events,
        "Listener finished"
    );
    Ok(())
}
