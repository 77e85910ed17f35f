use financial_research_agent::{agent::ResearchAgent, api::start_server, config::Settings};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    let settings = Settings::from_env()?;

    // Initialize tracing; RUST_LOG wins over LOG_LEVEL
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if settings.gemini_api_key.is_empty() {
        warn!("GEMINI_API_KEY not set - every analysis will return the fallback response");
    }

    info!(app = %settings.app_name, port = settings.port, "Starting API server");
    info!(
        strategy = ?settings.classifier_strategy,
        model = %settings.gemini_model,
        deadline_ms = settings.request_deadline.as_millis() as u64,
        "Pipeline configuration"
    );

    let agent = Arc::new(ResearchAgent::from_settings(&settings)?);

    start_server(agent, &settings.app_name, settings.port).await?;

    Ok(())
}
