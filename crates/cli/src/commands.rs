use anyhow::{Context, Result};
use colored::Colorize;
use common::ProcessorConfig;
use conversations::{open_sqlite_store, ConversationStore};
use llm::{GenerationClient, LlmClient, LlmGenerationClient};
use processor::{ConversationProcessor, MonitorExit, MonitorLoop, MonitorSettings, ProcessOutcome};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

async fn open_store(config: &ProcessorConfig) -> Result<Arc<dyn ConversationStore>> {
    let store = open_sqlite_store(&config.store.database_path, config.store.pool_size)
        .await
        .with_context(|| {
            format!(
                "Failed to open database {}",
                config.store.database_path.display()
            )
        })?;
    Ok(Arc::new(store))
}

async fn build_processor(config: &ProcessorConfig) -> Result<ConversationProcessor> {
    let store = open_store(config).await?;
    let llm = LlmClient::from_config(&config.generation).context("Failed to create LLM client")?;
    let generator: Arc<dyn GenerationClient> = Arc::new(LlmGenerationClient::new(llm));
    Ok(ConversationProcessor::new(store, generator))
}

pub async fn monitor(config: &ProcessorConfig) -> Result<ExitCode> {
    let processor = build_processor(config).await?;
    let monitor = MonitorLoop::new(processor, MonitorSettings::from(&config.monitor));

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Monitoring stopped by user");
            ctrl_c_token.cancel();
        }
    });

    let (exit, stats) = monitor.run(token).await;
    info!(
        cycles = stats.cycles,
        processed = stats.records_processed,
        completed = stats.completed,
        failed = stats.failed,
        cycle_errors = stats.cycle_errors,
        "Monitor finished"
    );

    match exit {
        MonitorExit::Cancelled => Ok(ExitCode::SUCCESS),
        MonitorExit::TooManyErrors { errors } => {
            error!(errors, "Monitor halted after repeated failures");
            Ok(ExitCode::FAILURE)
        }
        MonitorExit::GenerationUnavailable => {
            error!(
                base_url = %config.generation.base_url,
                "Cannot connect to LLM server"
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

pub async fn process(config: &ProcessorConfig, id: &str) -> Result<ExitCode> {
    let processor = build_processor(config).await?;

    match processor.process_by_id(id).await {
        ProcessOutcome::Completed(result) => {
            let json = serde_json::to_string_pretty(&result)
                .context("Failed to serialize result")?;
            println!("{}", json);
            Ok(ExitCode::SUCCESS)
        }
        other => {
            warn!(conversation_id = %id, outcome = other.label(), "Conversation was not enriched");
            eprintln!("{} {}: {}", "✗".red(), id, other.label());
            Ok(ExitCode::FAILURE)
        }
    }
}

pub async fn status(config: &ProcessorConfig, id: &str) -> Result<ExitCode> {
    let store = open_store(config).await?;

    match store.status_of(id).await? {
        Some(status) => {
            println!("{}", status);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("not found");
            Ok(ExitCode::FAILURE)
        }
    }
}

pub async fn requeue(config: &ProcessorConfig, id: &str) -> Result<ExitCode> {
    let store = open_store(config).await?;

    if store.requeue(id).await? {
        println!("{} {} requeued", "✓".green(), id);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "{} {} is not in processing or failed state",
            "✗".red(),
            id
        );
        Ok(ExitCode::FAILURE)
    }
}
