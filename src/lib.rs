pub mod commands;
pub mod config;
pub mod db;
pub mod doc_processor;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod logger;
pub mod pipeline;
pub mod prompt;
pub mod relay;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use commands::AppState;
use config::Config;
use db::ConversationStore;
use error::GatewayError;
use gateway::InferenceGateway;
use llm::router::ModelRouter;
use llm::Provider;
use pipeline::ChatPipeline;

/// Wire the pipeline and HTTP routes from a validated config.
pub fn build_app(config: &Config, shutdown: CancellationToken) -> Result<Router, GatewayError> {
    let provider = Provider::from_config(&config.backend)?;
    let pipeline = ChatPipeline::new(
        InferenceGateway::new(provider),
        ModelRouter::from_config(&config.backend),
        Arc::new(ConversationStore::new()),
        config.documents.limits(),
    );
    let state = AppState {
        pipeline: Arc::new(pipeline),
        shutdown,
    };
    Ok(commands::router(state, config.gateway.max_upload_bytes))
}

/// Serve until `shutdown` fires; in-flight requests are cancelled with it.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<(), GatewayError> {
    config.validate()?;
    let app = build_app(&config, shutdown.clone())?;

    let bind = &config.gateway.bind;
    let listener = TcpListener::bind(bind).await?;
    info!(
        %bind,
        endpoint = %config.backend.endpoint,
        text_model = %config.backend.text_model,
        vision_model = %config.backend.vision_model,
        "chat gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("chat gateway shut down");
    Ok(())
}
