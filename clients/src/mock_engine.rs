//! # Mock Engine
//!
//! Runs the in-process fake engine on fixed endpoints so `wineing_client` can
//! be exercised without the real engine. Stops on Ctrl-C or when a client
//! sends `SHUTDOWN`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use lib_wineing::loggers::setup_logging;
use lib_wineing::testkit::{EngineConfig, FakeEngine};

mod shutdown;

#[derive(Parser, Debug)]
#[clap(about = "Stand-in for the Wineing engine", version)]
struct Args {
    #[clap(long, env = "MOCK_ENGINE_REQUEST_ENDPOINT", default_value = "tcp://127.0.0.1:5555", help = "Endpoint to read requests from (bound).")]
    request_endpoint: String,

    #[clap(long, env = "MOCK_ENGINE_RESPONSE_ENDPOINT", default_value = "tcp://127.0.0.1:5556", help = "Client endpoint to send responses to (connected).")]
    response_endpoint: String,

    #[clap(long, env = "MOCK_ENGINE_MARKET_ENDPOINT", default_value = "tcp://127.0.0.1:5557", help = "Endpoint to publish market data on (bound).")]
    market_endpoint: String,

    #[clap(long, env = "MOCK_ENGINE_TAPES", value_delimiter = ',', help = "Tapes START accepts; any tape when empty.")]
    tapes: Vec<String>,

    #[clap(long, env = "MOCK_ENGINE_SYMBOLS", value_delimiter = ',', default_value = "AAPL,MSFT", help = "Symbols to stream.")]
    symbols: Vec<String>,

    #[clap(long, env = "MOCK_ENGINE_TICK_INTERVAL_MS", default_value_t = 100, help = "Milliseconds between market data ticks.")]
    tick_interval_ms: u64,

    #[clap(long, env = "MOCK_ENGINE_LOG_DIR", default_value = "./logs", help = "Directory for log files.")]
    log_dir: PathBuf,

    #[clap(long, env = "MOCK_ENGINE_LOG_LEVEL", default_value = "info", help = "Logging level (trace, debug, info, warn, error).")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let _log_guard = setup_logging(&args.log_dir, &args.log_level, "mock_engine")?;

    let mut config = EngineConfig::new(args.response_endpoint);
    config.request_address = args.request_endpoint;
    config.market_address = Some(args.market_endpoint);
    config.symbols = args.symbols;
    config.tick_interval = Duration::from_millis(args.tick_interval_ms);
    if !args.tapes.is_empty() {
        config = config.with_tapes(args.tapes);
    }

    let mut engine = FakeEngine::start(config).await?;
    tracing::info!(
        request = engine.request_endpoint(),
        market = ?engine.market_endpoint(),
        "Mock engine running"
    );

    let signal = shutdown::wait_for_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            request = engine.next_request() => match request {
                Some(request) => tracing::info!(
                    request_id = request.id(),
                    command = %request.command(),
                    payload = ?request.payload(),
                    "Request handled"
                ),
                None => {
                    tracing::info!("Engine stopped after SHUTDOWN");
                    break;
                }
            },
            _ = &mut signal => break,
        }
    }

    engine.shutdown().await?;
    tracing::info!("Shutdown complete.");
    Ok(())
}
