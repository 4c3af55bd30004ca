use numa_assistant::{
    ledger::store::InMemoryStore,
    providers::{FixedDocumentAnalysis, FixedTranscription, KeywordCategorizer, ScriptedReasoning},
    DocumentData, IntentMotor, Ledger, NumaConfig, Orchestrator,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Numa assistant - offline demo");

    let config = NumaConfig::default();

    // Deterministic providers so the demo runs without credentials
    let fim = Arc::new(IntentMotor::new(
        Arc::new(FixedTranscription::new("Gasté 500 pesos en el súper")),
        Arc::new(ScriptedReasoning::empty()),
        Arc::new(FixedDocumentAnalysis {
            data: DocumentData {
                vendor: Some("Soriana".to_string()),
                date: None,
                total_amount: Decimal::from_str("485.50")?,
            },
        }),
        config.clone(),
    ));

    let ledger = Arc::new(Ledger::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(KeywordCategorizer),
        config.confidence_threshold,
        config.ant_expense_threshold,
    ));

    let orchestrator = Orchestrator::new(fim, ledger, config);

    let owner = orchestrator
        .ledger()
        .register_user("demo@numa.dev", "Demo", "digest")
        .await?
        .id;

    println!("\n=== NUMA DEMO ===");

    let envelope = orchestrator.handle_voice(owner, b"fake-audio").await;
    println!("\n[voz] Gasté 500 pesos en el súper");
    println!("  -> {}", envelope.message.unwrap_or_default());

    for text in [
        "gasté 100 en luz y 200 en agua",
        "gasto",
        "¿cuánto gasté hoy?",
        "hola, ¿qué tal?",
    ] {
        let envelope = orchestrator.handle_text(owner, text).await;
        println!("\n[texto] {}", text);
        println!("  -> {}", envelope.message.unwrap_or_default());
    }

    Ok(())
}
