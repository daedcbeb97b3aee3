mod commands;
mod report;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use config::AppConfig;
use harvester::{local::LocalClient, network::NetworkClient, CatalogClient};
use isde_core::models::Verdict;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "isde-monitor", version, about = "Health and metadata validity monitor for the Irish Spatial Data Exchange")]
struct Cli {
    /// Config file to use instead of the platform default location
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest every node, validate its records and write the report
    Run {
        /// XML Schema to validate records against
        #[arg(long)]
        schema: Option<PathBuf>,
        /// Markdown report destination
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Also dump the report tables as JSON
        #[arg(long)]
        json: Option<PathBuf>,
        /// JSONL audit log, overwritten on each run
        #[arg(long)]
        audit: Option<PathBuf>,
    },
    /// Validate local XML files or directories against the schema
    Validate {
        #[arg(long)]
        schema: Option<PathBuf>,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List the configured catalog nodes
    Endpoints,
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => config::load_from(path),
        None => {
            let cfg = config::load()?;
            if let Ok(path) = config::config_path() {
                tracing::debug!(path = %path.display(), "Using platform config");
            }
            Ok(cfg)
        }
    }
}

fn create_catalog_client(cfg: &AppConfig) -> anyhow::Result<Arc<dyn CatalogClient>> {
    let settings = commands::harvest_settings(cfg);
    match cfg.harvest.kind.as_str() {
        "network" => {
            tracing::info!(
                timeout_secs = settings.timeout.as_secs(),
                max_pages = settings.max_pages,
                page_size = settings.page_size,
                "Using network harvesting"
            );
            Ok(NetworkClient::new(settings)?)
        }
        "local" => {
            let root = cfg
                .harvest
                .local_root
                .clone()
                .context("harvest.local_root is required for the local client")?;
            tracing::info!(root = %root.display(), "Using local snapshot harvesting");
            Ok(LocalClient::new(root, settings))
        }
        other => bail!("unknown harvest client kind '{other}' (expected 'network' or 'local')"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Run {
            schema,
            out,
            json,
            audit,
        } => {
            let client = create_catalog_client(&cfg)?;
            let overrides = commands::RunOverrides {
                schema,
                markdown: out,
                json,
                audit,
            };
            let totals = commands::run(&cfg, client, overrides).await?;
            println!(
                "{} nodes ({} up, {} down), {} records checked: {} valid, {} invalid, {} malformed; {} not checked",
                totals.nodes,
                totals.nodes_up,
                totals.nodes_down,
                totals.records_checked,
                totals.valid,
                totals.invalid,
                totals.malformed,
                totals.records_not_checked
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { schema, paths } => {
            let schema_path = schema.unwrap_or_else(|| cfg.schema.path.clone());
            let schema = commands::load_schema(&schema_path)?;
            let files = commands::scan_paths(&paths)?;
            if files.is_empty() {
                bail!("no XML files found");
            }
            let checks = tokio::task::spawn_blocking(move || commands::validate_files(&schema, &files))
                .await
                .context("Validation panicked")?;
            for check in &checks {
                println!("{}", commands::describe_check(check));
            }
            let failed = checks.iter().filter(|c| c.verdict != Verdict::Valid).count();
            tracing::info!(files = checks.len(), failed, "Validation finished");
            Ok(if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Endpoints => {
            for line in commands::list_endpoints(&cfg)? {
                println!("{line}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
