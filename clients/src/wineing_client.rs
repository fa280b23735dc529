//! # Wineing Client
//!
//! Connects to the engine, starts the configured tape (or real-time data),
//! counts the market data that arrives and, on Ctrl-C, shuts the engine down
//! before stopping its own workers.

use std::time::Duration;

use anyhow::Result;
use tokio::time::timeout;

use lib_wineing::configs::load_config;
use lib_wineing::control::{callback, default_callback, Command, Response};
use lib_wineing::loggers::setup_logging;
use lib_wineing::WineingClient;

mod shutdown;

/// How long to wait for the engine to acknowledge `SHUTDOWN`.
const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_secs(5);

fn log_response(context: &str, response: &Response) {
    if response.is_ok() {
        tracing::info!(request_id = ?response.id, "{} acknowledged", context);
    } else {
        tracing::error!(
            request_id = ?response.id,
            "{} failed: {}",
            context,
            response.text.as_deref().unwrap_or("no reason given")
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = load_config();
    let _log_guard = setup_logging(&config.log_dir(), config.log_level(), "wineing_client")?;
    let settings = config.settings()?;

    let client = tokio::select! {
        client = WineingClient::start(&settings) => client?,
        _ = shutdown::wait_for_signal() => {
            tracing::info!("Interrupted before the engine could be reached.");
            return Ok(());
        }
    };

    let api = client.api().clone();
    api.set_default_response_processor(Some(default_callback(|response| {
        log_response("Unsolicited message", &response)
    })));

    match config.tape() {
        Some(tape) => tracing::info!("Requesting tape {}", tape),
        None => tracing::info!("Requesting real-time data"),
    }
    api.start(
        config.tape(),
        Some(callback(|response| log_response("START", &response))),
    )
    .await?;

    shutdown::wait_for_signal().await;
    tracing::info!(
        received = client.market_received(),
        "Shutting down the engine"
    );

    let ack = api.request(Command::Shutdown, None).await?;
    match timeout(SHUTDOWN_ACK_TIMEOUT, ack).await {
        Ok(Ok(response)) => log_response("SHUTDOWN", &response),
        Ok(Err(_)) => tracing::warn!("SHUTDOWN callback was dropped without a response"),
        Err(_) => tracing::warn!(
            "No SHUTDOWN acknowledgement within {}s",
            SHUTDOWN_ACK_TIMEOUT.as_secs()
        ),
    }

    client.shutdown().await?;
    tracing::info!("Shutdown complete.");
    Ok(())
}
