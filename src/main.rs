// projeto: lstmforecast
// file: src/main.rs
// Linha de comando do motor de previsão: upload, treino, previsão e comparação

use clap::{Parser, Subcommand};
use chrono::Utc;
use log::{error, info};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lstmforecast::config::AppConfig;
use lstmforecast::neural::utils::ForecastError;
use lstmforecast::services::metadata::TaskStatus;
use lstmforecast::services::{
    ComparisonService, DataService, ForecastEngine, MetadataStore, ModelService, PredictionRequest,
    TrainRequest, TrainingSupervisor,
};

const PROGRESS_POLL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(
    name = "lstm-forecast",
    version,
    about = "Previsão de preços de ações com LSTM, busca hyperband e rollout autorregressivo"
)]
struct Cli {
    /// Arquivo de configuração TOML (criado com valores padrão se não existir)
    #[arg(long, default_value = "lstmforecast.toml")]
    config: PathBuf,

    /// Logging detalhado
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Valida e armazena um CSV de preços diários
    Upload {
        #[arg(long, help = "Caminho do arquivo CSV")]
        file: PathBuf,
        #[arg(long, help = "Nome de exibição (padrão: nome do arquivo)")]
        name: Option<String>,
    },
    /// Lista os arquivos de dados armazenados
    Files,
    /// Remove um arquivo de dados que nenhum modelo usa
    DeleteFile {
        #[arg(long)]
        id: String,
    },
    /// Treina um modelo e aguarda o término
    Train {
        #[arg(long)]
        file_id: String,
        #[arg(long)]
        name: String,
        #[arg(long, help = "Horizonte de previsão em dias (1 a 30)")]
        days: usize,
        #[arg(long, help = "Semente aleatória para uma execução reproduzível")]
        seed: Option<u64>,
    },
    /// Lista as tarefas de treino
    Tasks,
    /// Mostra uma tarefa de treino
    Status {
        #[arg(long)]
        task_id: String,
    },
    /// Lista os modelos treinados
    Models,
    /// Remove um modelo
    DeleteModel {
        #[arg(long)]
        id: String,
        #[arg(long, help = "Remove também o arquivo do modelo")]
        purge: bool,
    },
    /// Gera a previsão a partir de uma data inicial
    Predict {
        #[arg(long)]
        model_id: String,
        #[arg(long)]
        file_id: String,
        #[arg(long, help = "AAAA-MM-DD")]
        start_date: String,
        #[arg(long, help = "Grava o resultado JSON neste arquivo")]
        output: Option<PathBuf>,
    },
    /// Compara de 2 a 10 modelos
    Compare {
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let start_time = Instant::now();
    match run(cli) {
        Ok(()) => {
            info!("🏁 Finalizado em {:.2}s", start_time.elapsed().as_secs_f64());
        }
        Err(e) => {
            error!("❌ {}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<(), ForecastError> {
    let config = AppConfig::load(&cli.config)?;
    config.ensure_directories()?;
    let store = Arc::new(MetadataStore::open(&config.paths.metadata_file)?);

    match cli.command {
        Commands::Upload { file, name } => {
            let service = DataService::new(Arc::clone(&store), &config.paths.uploads_dir, config.limits.clone())?;
            print_json(&service.upload_path(&file, name.as_deref())?)
        }
        Commands::Files => {
            let service = DataService::new(Arc::clone(&store), &config.paths.uploads_dir, config.limits.clone())?;
            print_json(&service.list()?)
        }
        Commands::DeleteFile { id } => {
            let service = DataService::new(Arc::clone(&store), &config.paths.uploads_dir, config.limits.clone())?;
            service.delete(&id)?;
            info!("🗑️ Arquivo {} removido", id);
            Ok(())
        }
        Commands::Train { file_id, name, days, seed } => {
            let supervisor = TrainingSupervisor::new(Arc::clone(&store), Arc::new(config.clone()))?;
            let task_id = supervisor.submit(TrainRequest {
                data_file_id: file_id,
                model_name: name,
                prediction_days: days,
                seed,
            })?;
            info!("🎯 Tarefa {} criada em {}", task_id, Utc::now().format("%Y-%m-%d %H:%M:%S"));

            let report = loop {
                let report = supervisor.wait_for(&task_id, PROGRESS_POLL)?;
                if report.status.is_terminal() {
                    break report;
                }
                if report.status == TaskStatus::Running && report.progress.current_epoch > 0 {
                    info!(
                        "📈 Época {}/{} | loss {:.6} | val_loss {:.6}",
                        report.progress.current_epoch, report.progress.total_epochs,
                        report.progress.current_loss, report.progress.current_val_loss
                    );
                }
            };
            supervisor.shutdown();
            print_json(&report)?;
            if report.status == TaskStatus::Failed {
                return Err(ForecastError::Training(report.error.unwrap_or_default()));
            }
            Ok(())
        }
        Commands::Tasks => print_json(&store.list_training_tasks()?),
        Commands::Status { task_id } => {
            let task = store.get_training_task(&task_id)?
                .ok_or_else(|| ForecastError::NotFound(format!("Training task {}", task_id)))?;
            print_json(&task)
        }
        Commands::Models => print_json(&ModelService::new(Arc::clone(&store)).list()?),
        Commands::DeleteModel { id, purge } => {
            ModelService::new(Arc::clone(&store)).delete(&id, purge)?;
            info!("🗑️ Modelo {} removido", id);
            Ok(())
        }
        Commands::Predict { model_id, file_id, start_date, output } => {
            let engine = ForecastEngine::new(Arc::clone(&store), config.limits.max_historical_points);
            let result = engine.predict(&PredictionRequest { model_id, data_file_id: file_id, start_date })?;
            match output {
                Some(path) => {
                    fs::write(&path, serde_json::to_string_pretty(&result)?)?;
                    info!("💾 Previsão salva em {}", path.display());
                    Ok(())
                }
                None => print_json(&result),
            }
        }
        Commands::Compare { ids } => print_json(&ComparisonService::new(Arc::clone(&store)).compare(&ids)?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ForecastError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}
