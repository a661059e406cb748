use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // a missing .env is fine
    let _ = dotenvy::dotenv();

    let config = match chat_gateway_lib::config::load(None) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("chat-gateway: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = chat_gateway_lib::logger::init(&config.gateway.log_level) {
        eprintln!("chat-gateway: {e}");
        return ExitCode::FAILURE;
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl-c received, shutting down");
                signal.cancel();
            }
            Err(e) => error!("cannot listen for ctrl-c: {e}"),
        }
    });

    match chat_gateway_lib::run(config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
