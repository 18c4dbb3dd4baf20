use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use lead_pipeline::app::ports::CollectorPort;
use lead_pipeline::config::Config;
use lead_pipeline::constants;
use lead_pipeline::domain::{
    Fingerprint, LeadAddress, NormalizedLead, ProjectType, RawReference,
};
use lead_pipeline::infra::{all_exporters, JsonFileCollector};
use lead_pipeline::logging;
use lead_pipeline::metrics;
use lead_pipeline::pipeline::{
    Fingerprinter, HistoryStore, InMemoryHistoryStore, Orchestrator, SqliteHistoryStore,
};

#[derive(Parser)]
#[command(name = "lead_pipeline")]
#[command(about = "Daily lead list from permits, zoning notices and classifieds")]
#[command(version = "0.1.0")]
struct Cli {
    /// Config file (defaults to $LEAD_PIPELINE_CONFIG, then config/leads.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect, normalize, dedupe and score today's leads, then export them
    Run {
        /// Run date as YYYY-MM-DD (defaults to today, local time)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Output directory (overrides pipeline.output_dir)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also emit leads seen in earlier runs
        #[arg(long)]
        include_seen: bool,
        /// Use a throwaway in-memory history instead of the ledger
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the history entry for a fingerprint
    Lookup { fingerprint: String },
    /// Print the fingerprint and canonical key for an address
    Fingerprint {
        #[arg(long)]
        street: String,
        #[arg(long)]
        city: String,
        #[arg(long)]
        state: String,
        /// Project type, e.g. demolition or construction_start
        #[arg(long = "type", default_value = "unknown")]
        project_type: String,
        /// Observation date, only matters with a time bucket configured
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn collectors_for(config: &Config) -> Vec<Arc<dyn CollectorPort>> {
    let mut collectors: Vec<Arc<dyn CollectorPort>> = Vec::new();
    for source in &config.sources {
        match &source.input {
            Some(path) => collectors.push(Arc::new(JsonFileCollector::new(&source.id, path))),
            None => warn!(source = %source.id, "no input configured, source not collected"),
        }
    }
    collectors
}

fn write_metrics_snapshot(output_dir: &Path) {
    let Some(text) = metrics::render() else {
        return;
    };
    let path = output_dir.join("metrics.prom");
    match std::fs::write(&path, text) {
        Ok(()) => info!(path = %path.display(), "metrics snapshot written"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to write metrics snapshot"),
    }
}

async fn run_command(
    mut config: Config,
    date: Option<NaiveDate>,
    output: Option<PathBuf>,
    include_seen: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    let run_date = date.unwrap_or_else(|| Local::now().date_naive());
    if include_seen {
        config.pipeline.include_previously_seen = true;
    }
    let output_dir = output.unwrap_or_else(|| config.pipeline.output_dir.clone());

    let store: Arc<dyn HistoryStore> = if dry_run {
        info!("dry run: history is not persisted");
        Arc::new(InMemoryHistoryStore::with_resurfacing(
            config.history.resurface_after_days,
        ))
    } else {
        Arc::new(
            SqliteHistoryStore::open(&config.history.path, config.history.resurface_after_days)
                .with_context(|| format!("opening history at {}", config.history.path.display()))?,
        )
    };

    let orchestrator = Orchestrator::from_config(&config, store)?;
    let report = orchestrator
        .run_with_collectors(collectors_for(&config), run_date)
        .await?;

    let s = &report.summary;
    println!("\n📊 Run {} for {}", s.run_id, s.run_date);
    println!("   Raw records: {}", s.raw_records_in);
    println!("   Leads emitted: {} ({} new)", s.leads_emitted, s.new_leads_emitted);
    println!("   Duplicates suppressed: {}", s.duplicates_suppressed);
    println!("   Errors: {}", s.error_count());

    for exporter in all_exporters() {
        match exporter.export(&report, &output_dir).await {
            Ok(path) => println!("   {} → {}", exporter.format(), path.display()),
            Err(e) => error!(format = exporter.format(), error = %format!("{:#}", e), "export failed"),
        }
    }
    write_metrics_snapshot(&output_dir);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _guard = logging::init_logging(Path::new(constants::DEFAULT_LOG_DIR));

    let cli = Cli::parse();
    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;
    info!(path = %config_path.display(), sources = config.sources.len(), "config loaded");

    match cli.command {
        Commands::Run {
            date,
            output,
            include_seen,
            dry_run,
        } => {
            metrics::init_metrics();
            run_command(config, date, output, include_seen, dry_run).await?;
        }
        Commands::Lookup { fingerprint } => {
            let store =
                SqliteHistoryStore::open(&config.history.path, config.history.resurface_after_days)?;
            match store.lookup(&Fingerprint::from_hex(fingerprint.trim().to_lowercase()))? {
                Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
                None => println!("not in history"),
            }
        }
        Commands::Fingerprint {
            street,
            city,
            state,
            project_type,
            date,
        } => {
            let Some(project_type) = ProjectType::parse(&project_type) else {
                bail!("unknown project type '{}'", project_type);
            };
            let lead = NormalizedLead {
                address: LeadAddress {
                    street,
                    unit: None,
                    city,
                    state,
                    postal_code: None,
                },
                project_type,
                project_description: String::new(),
                sources: Vec::new(),
                date_first_observed: date.unwrap_or_else(|| Local::now().date_naive()),
                date_degraded: false,
                raw_reference: RawReference {
                    source_id: "cli".into(),
                    reference: "cli".into(),
                },
            };
            let identity = Fingerprinter::new(config.fingerprint.clone()).identify(&lead);
            println!("{}", serde_json::to_string_pretty(&identity)?);
        }
    }
    Ok(())
}
