use anyhow::Context;
use clap::{Parser, Subcommand};
use cropstats::config::Config;
use cropstats::db::Database;
use cropstats::constants::METRICS_SNAPSHOT_FILE;
use cropstats::{logging, metrics};
use cropstats::pipeline::Pipeline;
use cropstats::server::{self, AppState};
use cropstats::storage::{SqliteStorage, Storage};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "cropstats")]
#[command(about = "Clean, aggregate and serve agricultural production data")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file (default: ./config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean and aggregate the raw CSV and publish the artifacts
    Process {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Load the published artifacts into the database
    Load {
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        database: Option<PathBuf>,
    },
    /// Process then load
    Run {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        database: Option<PathBuf>,
    },
    /// Start the REST API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

fn process(config: &Config) -> anyhow::Result<()> {
    println!("🔄 Processing {}...", config.pipeline.input.display());
    let result = Pipeline::new(&config.pipeline).run()?;
    let report = &result.report;
    println!("\n📊 Pipeline results:");
    println!("   Loaded rows: {}", report.loaded_rows);
    println!("   Invalid years dropped: {}", report.invalid_year_rows);
    println!("   Duplicates removed: {}", report.duplicates_removed);
    println!("   Final rows: {}", report.final_rows);
    println!("   Production columns: {}", report.production_columns.len());
    println!("   Output: {}", config.pipeline.output_dir.display());
    if report.coercion_warnings > 0 {
        println!("⚠️  {} values could not be parsed and were treated as missing", report.coercion_warnings);
    }
    Ok(())
}

fn load(config: &Config) -> anyhow::Result<()> {
    println!("📥 Loading artifacts into {}...", config.database.path.display());
    let mut db = Database::open(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path.display()))?;
    let summary = db.load_artifacts(&config.pipeline.output_dir)?;
    println!(
        "✅ Loaded run {} ({} rows, {} years, {} decades, {} top producers)",
        summary.run_id,
        summary.processed_rows,
        summary.yearly_rows,
        summary.decade_rows,
        summary.top_producer_rows
    );
    Ok(())
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let handle = metrics::handle();
    if handle.is_none() {
        warn!("serving without /metrics");
    }
    let db = Database::open(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path.display()))?;
    let storage = SqliteStorage::new(db.into_connection())?;
    info!(products = storage.allowlist().names().len(), "storage ready");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.host, config.server.port))?;
    let state = AppState {
        storage: Arc::new(storage),
        metrics: handle,
    };
    server::start_server(state, addr, &config.server.static_dir).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();
    metrics::init_metrics();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    let batch = !matches!(cli.command, Commands::Serve { .. });
    let outcome = match cli.command {
        Commands::Process { input, output_dir } => {
            override_pipeline(&mut config, input, output_dir);
            process(&config)
        }
        Commands::Load {
            output_dir,
            database,
        } => {
            override_pipeline(&mut config, None, output_dir);
            if let Some(db) = database {
                config.database.path = db;
            }
            load(&config)
        }
        Commands::Run {
            input,
            output_dir,
            database,
        } => {
            override_pipeline(&mut config, input, output_dir);
            if let Some(db) = database {
                config.database.path = db;
            }
            println!("🚀 Running full pipeline (process + load)...");
            process(&config).and_then(|_| load(&config))
        }
        Commands::Serve {
            host,
            port,
            database,
        } => {
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            if let Some(db) = database {
                config.database.path = db;
            }
            serve(&config).await
        }
    };

    if batch {
        if let Err(e) = metrics::write_snapshot(Path::new(METRICS_SNAPSHOT_FILE)) {
            warn!(error = %e, "could not write metrics snapshot");
        }
    }

    if let Err(e) = &outcome {
        error!("command failed: {:#}", e);
        println!("❌ {:#}", e);
    }
    outcome
}

fn override_pipeline(config: &mut Config, input: Option<PathBuf>, output_dir: Option<PathBuf>) {
    if let Some(i) = input {
        config.pipeline.input = i;
    }
    if let Some(o) = output_dir {
        config.pipeline.output_dir = o;
    }
}
