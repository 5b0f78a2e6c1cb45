//! CIE-10-ES harvester CLI
//!
//! # Usage
//!
//! ```bash
//! # Procedure codes: taxonomy, expansion, details, CSV + bulk index
//! cie-harvest procedures --csv cie10-es-procedures.csv
//!
//! # Diagnoses without touching the search index
//! cie-harvest diagnoses --no-index
//!
//! # Drug index, one PUT per document, against another cluster
//! cie-harvest --index-url http://search:9200 chemicals --per-document
//! ```
//!
//! Settings come from `--config` (YAML), then `CIE_HARVEST_*` variables or
//! flags. A `.env` file is read when present.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use cie_harvest::pipeline::{ChemicalPipeline, DiagnosisPipeline, Harvest, IndexMode, RunOptions};
use cie_harvest::{EciemapsClient, FailureReport, HarvestConfig, HttpIndexSink, ProcedurePipeline};

#[derive(Parser, Debug)]
#[command(name = "cie-harvest")]
#[command(version)]
#[command(about = "Harvest CIE-10-ES codes into CSV files and a search index")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML settings file
    #[arg(long, global = true, env = "CIE_HARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// eCIEMaps base URL
    #[arg(long, global = true, env = "CIE_HARVEST_API_BASE")]
    api_base: Option<String>,

    /// Search cluster base URL
    #[arg(long, global = true, env = "CIE_HARVEST_INDEX_URL")]
    index_url: Option<String>,

    /// Draw progress bars on stderr
    #[arg(long, global = true)]
    progress: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Procedure codes (CIE-10-PCS)
    Procedures(OutputArgs),
    /// Diagnosis codes (CIE-10-MC)
    Diagnoses(OutputArgs),
    /// Drug and chemical index
    Chemicals(OutputArgs),
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// CSV output path (defaults to cie10-es-<dataset>.csv)
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Skip the search index
    #[arg(long)]
    no_index: bool,

    /// PUT documents one by one instead of `_bulk`
    #[arg(long, conflicts_with = "no_index")]
    per_document: bool,
}

impl OutputArgs {
    fn options(self, dataset: &str, show_progress: bool) -> RunOptions {
        let index_mode = if self.no_index {
            IndexMode::Disabled
        } else if self.per_document {
            IndexMode::PerDocument
        } else {
            IndexMode::Bulk
        };
        RunOptions {
            csv_path: Some(
                self.csv
                    .unwrap_or_else(|| PathBuf::from(format!("cie10-es-{}.csv", dataset))),
            ),
            index_mode,
            show_progress,
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<HarvestConfig> {
    let mut config = match &cli.config {
        Some(path) => HarvestConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => HarvestConfig::default(),
    };
    if let Some(api_base) = &cli.api_base {
        config.api_base = api_base.clone();
    }
    if let Some(index_url) = &cli.index_url {
        config.index_url = index_url.clone();
    }
    config.validate().context("Invalid settings")?;
    Ok(config)
}

fn print_failures(failures: &FailureReport) {
    eprintln!("{}", failures);
    for failure in failures.iter() {
        eprintln!("  [{}] {}: {}", failure.stage, failure.key, failure.reason);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let api = EciemapsClient::new(&config).context("Failed to build eCIEMaps client")?;
    let sink = HttpIndexSink::new(&config).context("Failed to build index client")?;

    match cli.command {
        Commands::Procedures(args) => {
            let options = args.options("procedures", cli.progress);
            let report = ProcedurePipeline::new(Harvest::new(&api, &sink, &config, options))
                .run()
                .await
                .context("Procedure harvest failed")?;
            println!("{}", report.summary());
            print_failures(&report.failures);
        }
        Commands::Diagnoses(args) => {
            let options = args.options("diagnoses", cli.progress);
            let report = DiagnosisPipeline::new(Harvest::new(&api, &sink, &config, options))
                .run()
                .await
                .context("Diagnosis harvest failed")?;
            println!("{}", report.summary());
            print_failures(&report.failures);
        }
        Commands::Chemicals(args) => {
            let options = args.options("chemicals", cli.progress);
            let report = ChemicalPipeline::new(Harvest::new(&api, &sink, &config, options))
                .run()
                .await
                .context("Chemical harvest failed")?;
            println!("{}", report.summary());
            print_failures(&report.failures);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
