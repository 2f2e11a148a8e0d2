use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{init_structured_logging, ProcessorConfig};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(name = "enricher")]
#[command(about = "Обогащение диалогов: резюме, ключевые слова и фразы через локальную LLM")]
#[command(version)]
struct Cli {
    /// TOML файл конфигурации
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Логи в JSON формате
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Непрерывно обрабатывать pending диалоги
    Monitor {
        /// Интервал проверки в секундах
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Обработать один диалог и вывести результат в JSON
    Process {
        /// ID диалога
        id: String,
    },
    /// Показать статус диалога
    Status {
        /// ID диалога
        id: String,
    },
    /// Вернуть зависший или упавший диалог в pending
    Requeue {
        /// ID диалога
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config =
        ProcessorConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Флаги CLI поверх файла и окружения
    if cli.json_logs {
        config.logging.json = true;
    }
    if let Commands::Monitor {
        interval: Some(secs),
    } = &cli.command
    {
        config.monitor.check_interval_secs = *secs;
        config.validate().context("Invalid --interval")?;
    }

    init_structured_logging(config.logging.to_logging_config())
        .context("Failed to initialize logging")?;

    match cli.command {
        Commands::Monitor { .. } => commands::monitor(&config).await,
        Commands::Process { id } => commands::process(&config, &id).await,
        Commands::Status { id } => commands::status(&config, &id).await,
        Commands::Requeue { id } => commands::requeue(&config, &id).await,
    }
}
