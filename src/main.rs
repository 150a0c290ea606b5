//! Model Test Bench campaign runner
//!
//! ## Usage
//!
//! ```bash
//! # Run a campaign through the platform bridge configured in mtb.yaml
//! mtb-campaign run --config mtb.yaml
//!
//! # Run against the in-memory model (optionally loaded from a JSON snapshot)
//! mtb-campaign run --config mtb.yaml --dry-run
//! mtb-campaign run --config mtb.yaml --dry-run model.json
//!
//! # Resolve every subscription and print the provisioning plan
//! mtb-campaign check --config mtb.yaml
//!
//! # Parse a single subscription entry
//! mtb-campaign binding 'Bus1:u0=mtb_s_1:S~2.0 * x'
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use mtb_core::case::rank_width;
use mtb_core::export::export_path;
use mtb_core::logging::{write_run_manifest, JsonlLayer, RunManifest};
use mtb_core::resolver;
use mtb_core::{
    Binding, BridgePlatform, Campaign, CampaignConfig, CampaignReport, CampaignState, CaseSheet,
    MemoryPlatform, Platform,
};

/// Model Test Bench campaign runner
#[derive(Parser, Debug)]
#[command(name = "mtb-campaign")]
#[command(version)]
#[command(about = "Provision, run and export a campaign of simulation test cases")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the whole campaign
    Run {
        /// Campaign configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Use the in-memory platform, optionally loaded from a model snapshot
        #[arg(long, value_name = "MODEL")]
        dry_run: Option<Option<PathBuf>>,
    },

    /// Resolve subscriptions and print the provisioning plan
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Parse one subscription entry
    Binding {
        entry: String,
    },
}

fn setup_logging(verbose: bool, logs: Option<(&Path, &str)>) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let jsonl = logs.and_then(|(dir, project)| match JsonlLayer::new(dir, project) {
        Ok(layer) => Some(layer),
        Err(e) => {
            eprintln!("Failed to initialize JSONL logging: {}", e);
            None
        }
    });
    let logs_path = jsonl.as_ref().map(|l| l.log_path().to_path_buf());

    let subscriber = tracing_subscriber::registry()
        .with(jsonl)
        .with(console)
        .with(filter);
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global subscriber");

    if let Some(path) = logs_path {
        tracing::info!(path = %path.display(), "JSONL logging enabled");
    }
}

fn load(config_path: &Path) -> Result<(CampaignConfig, CaseSheet)> {
    let config = CampaignConfig::load_from(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    let sheet = CaseSheet::load(&config.case_sheet).with_context(|| {
        format!("Failed to load case sheet {}", config.case_sheet.display())
    })?;
    Ok((config, sheet))
}

fn run_campaign<P, F>(config: CampaignConfig, sheet: CaseSheet, connect: F) -> Result<CampaignReport>
where
    P: Platform,
    F: FnOnce() -> mtb_core::CampaignResult<P>,
{
    let mut campaign = Campaign::new(config, sheet);
    let report = campaign.run(connect).map_err(|e| {
        // Last state before `Failed`
        let stage = campaign
            .history()
            .iter()
            .rev()
            .nth(1)
            .copied()
            .unwrap_or(CampaignState::Idle);
        anyhow::Error::new(e).context(format!("Campaign failed while {}", stage))
    })?;
    Ok(report)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, dry_run } => {
            let (config, sheet) = load(&config)?;
            let logs_dir = config.effective_logs_dir();
            setup_logging(
                cli.verbose,
                logs_dir.as_deref().map(|dir| (dir, sheet.project.as_str())),
            );
            tracing::info!(
                project = %sheet.project,
                cases = sheet.cases().len(),
                "Starting campaign"
            );

            let report = match dry_run {
                Some(model) => run_campaign(config, sheet, move || match model {
                    Some(path) => MemoryPlatform::load_snapshot(path),
                    None => Ok(MemoryPlatform::test_bench()),
                })?,
                None => {
                    let bridge = config
                        .bridge
                        .clone()
                        .context("No bridge configured; use --dry-run for the in-memory platform")?;
                    run_campaign(config, sheet, move || {
                        BridgePlatform::spawn(&bridge.program, &bridge.args)
                    })?
                }
            };

            let report_json = serde_json::to_value(&report)?;
            if let Some(dir) = logs_dir {
                let manifest = RunManifest::new(&report.project, report_json.clone());
                let path = write_run_manifest(&dir, &manifest)
                    .context("Failed to write run manifest")?;
                tracing::info!(path = %path.display(), "Run manifest written");
            }
            println!("{}", serde_json::to_string_pretty(&report_json)?);
        }

        Commands::Check { config } => {
            setup_logging(cli.verbose, None);
            let (config, mut sheet) = load(&config)?;

            let entries = resolver::campaign_entries(
                &sheet.bindings,
                &config.subscriptions,
                &config.slots,
                &sheet.channels,
            )?;
            let summary = resolver::resolve(entries.iter().map(String::as_str), &mut sheet.channels)
                .context("Failed to resolve subscriptions")?;

            let width = rank_width(sheet.max_rank());
            let cases: Vec<_> = sheet
                .cases()
                .iter()
                .map(|case| {
                    serde_json::json!({
                        "rank": case.rank,
                        "context": case.context_name(width),
                        "dynamic": case.is_dynamic(),
                        "export": case.is_dynamic().then(|| {
                            export_path(&config.export_dir, &sheet.project, case.rank)
                                .display()
                                .to_string()
                        }),
                    })
                })
                .collect();
            let channels: Vec<_> = sheet
                .channels
                .iter()
                .map(|channel| {
                    serde_json::json!({
                        "name": channel.name(),
                        "kind": channel.kind_name(),
                        "bindings": channel.binding_count(),
                    })
                })
                .collect();

            let plan = serde_json::json!({
                "project": sheet.project,
                "bindings": summary,
                "cases": cases,
                "channels": channels,
            });
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }

        Commands::Binding { entry } => match Binding::parse(&entry) {
            Some(binding) => println!("{}", serde_json::to_string_pretty(&binding)?),
            None => println!("no match"),
        },
    }

    Ok(())
}
