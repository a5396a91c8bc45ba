use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use leadscout::app;
use leadscout::learning::LearningStore;
use leadscout::orchestrator::BatchRequest;
use leadscout::store::ProspectStore;
use leadscout::term_generator::TermGenerator;
use leadscout_common::Config;

#[derive(Parser)]
#[command(name = "leadscout", about = "Adaptive lead prospecting search loop")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one batch of search tasks and print the batch report as JSON
    Advance {
        /// Index into the generated task list to start from
        #[arg(long, default_value_t = 0)]
        start_index: usize,

        /// Number of tasks to run
        #[arg(long, default_value_t = 10)]
        batch_size: usize,

        /// Concurrent tasks (capped at the session pool size)
        #[arg(long, default_value_t = 1)]
        parallelism: usize,
    },

    /// Preview the generated task list
    Terms {
        /// Only print the first N tasks
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print learning and campaign stats as JSON
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("leadscout=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.log_redacted();

    match cli.command {
        Commands::Advance {
            start_index,
            batch_size,
            parallelism,
        } => {
            let orchestrator = app::build_orchestrator(&config).await?;
            let report = orchestrator
                .advance_batch(BatchRequest {
                    start_index,
                    batch_size,
                    parallelism,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Terms { limit } => {
            let store = app::open_store(&config)?;
            let stats = LearningStore::new(store).snapshot().await?;
            let tasks = TermGenerator::fortaleza().generate(&stats, config.max_terms);
            info!(count = tasks.len(), "Generated tasks");
            for (i, task) in tasks.iter().take(limit.unwrap_or(usize::MAX)).enumerate() {
                println!("{i:>4}  {:<13} {}", task.strategy.as_str(), task.term);
            }
        }
        Commands::Stats => {
            let store = app::open_store(&config)?;
            let learning = store.get_learning_data().await?;
            let campaign = store.get_stats().await?;
            let summary = serde_json::json!({
                "campaign": campaign,
                "learning": {
                    "totalSearches": learning.total_searches,
                    "successRate": learning.success_rate_display(),
                    "bestNeighborhoods": learning.best_neighborhoods,
                    "bestBusinessTypes": learning.best_business_types,
                    "bestStrategies": learning.best_strategies,
                },
                "companies": store.all_companies().await?.len(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
