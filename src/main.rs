use tracing_subscriber::EnvFilter;

use demand_predictor::{
    api::{self, AppState},
    chat::{ChatAssistant, GeminiClient},
    config::ServerConfig,
    model::{ModelRegistry, ModelVariant},
    pipeline::Pipeline,
    store::PredictionHistory,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("demand_predictor=info")),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let registry = ModelRegistry::load(&config.hour_paths(), &config.day_paths());
    for variant in [ModelVariant::Daily, ModelVariant::Hourly] {
        tracing::info!(
            variant = variant.label(),
            loaded = registry.is_loaded(variant),
            features = registry.feature_count(variant),
            "model status"
        );
    }
    let pipeline = Pipeline::new(registry).with_vector_logging(config.log_vectors);

    let chat = match &config.gemini_api_key {
        Some(key) => {
            tracing::info!(model = %config.gemini_model, "chat assistant enabled");
            ChatAssistant::new(Box::new(GeminiClient::new(key.clone(), config.gemini_model.clone())))
        }
        None => {
            tracing::warn!("GEMINI_API_KEY not set; chat assistant disabled");
            ChatAssistant::disabled()
        }
    };

    let state = AppState::new(pipeline, PredictionHistory::new(config.history_capacity), chat);
    let app = api::router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
