use numa_assistant::{
    api::start_server,
    ledger::store::store_from_env,
    providers::{GeminiClient, SpeechClient},
    IntentMotor, Ledger, NumaConfig, Orchestrator,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = NumaConfig::from_env();
    if config.reasoning.api_key.is_empty() {
        warn!("GEMINI_API_KEY not set; reasoning calls will fail until configured");
    }

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Numa assistant - API server");
    info!("Port: {}", api_port);

    let speech_token = std::env::var("SPEECH_ACCESS_TOKEN").unwrap_or_default();
    let speech = Arc::new(SpeechClient::new(config.stt.clone(), speech_token)?);
    let gemini = Arc::new(GeminiClient::new(
        config.reasoning.api_key.clone(),
        &config.reasoning.model,
    )?);

    let fim = Arc::new(IntentMotor::new(
        speech,
        gemini.clone(),
        gemini.clone(),
        config.clone(),
    ));

    let ledger = Arc::new(Ledger::new(
        store_from_env(),
        fim.clone(),
        config.confidence_threshold,
        config.ant_expense_threshold,
    ));

    let auth_secret = config.auth_secret.clone();
    let orchestrator = Arc::new(Orchestrator::new(fim, ledger, config));

    info!("Orchestrator initialized");
    start_server(orchestrator, auth_secret, api_port).await?;

    Ok(())
}
