use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dictsync_pipeline::{show_table, JobConfig, SyncJob};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dictsync")]
#[command(about = "Text-value dictionary sync job")]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the sync job once (default).
    Sync,
    /// Print the current rows of the target table as JSON lines.
    Show,
}

#[derive(Debug, Args)]
struct ConfigOverrides {
    /// Target schema (default from DICTSYNC_SCHEMA).
    #[arg(long)]
    schema: Option<String>,
    /// Target table (default from DICTSYNC_TABLE).
    #[arg(long)]
    table: Option<String>,
    /// Source file pattern, e.g. `scratch/text_values/*.json`.
    #[arg(long)]
    source: Option<String>,
    /// Table storage root directory.
    #[arg(long)]
    store_root: Option<PathBuf>,
    /// Directory for per-run summary reports.
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    fn apply(self, mut config: JobConfig) -> JobConfig {
        if let Some(schema) = self.schema {
            config.schema = schema;
        }
        if let Some(table) = self.table {
            config.table = table;
        }
        if let Some(source) = self.source {
            config.source_pattern = source;
        }
        if let Some(store_root) = self.store_root {
            config.store_root = store_root;
        }
        if let Some(report_dir) = self.report_dir {
            config.report_dir = Some(report_dir);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.overrides.apply(JobConfig::from_env());

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = SyncJob::new(config).run_once().await?;
            println!(
                "sync complete: table={} deleted={} inserted={} run_id={}",
                summary.table, summary.deleted_rows, summary.inserted_rows, summary.run_id
            );
        }
        Commands::Show => {
            let rows = show_table(&config).await?;
            for row in rows {
                let line = serde_json::to_string(&row).context("serializing row")?;
                println!("{line}");
            }
        }
    }

    Ok(())
}
