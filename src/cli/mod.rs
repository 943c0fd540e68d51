//! CLI parser and command dispatch.

mod export;
mod freshness;
mod report;

use clap::{Parser, Subcommand};

use crate::config::{self, MINISTRIES, REGIONS};
use crate::models::Cohort;

#[derive(Parser)]
#[command(name = "spe")]
#[command(about = "Analyse du service public de l'alimentation (SPE) sur le Registre National des Cantines")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one cohort: fetch, geocode, classify, audit and rank
    Report {
        /// Line ministry perimeter
        #[arg(long, conflicts_with = "region")]
        ministere: Option<String>,
        /// ATE-region perimeter
        #[arg(long)]
        region: Option<String>,
        /// Data year of the télédéclaration campaign
        #[arg(short, long, env = "SPE_YEAR")]
        year: Option<String>,
        /// Emit the full report as JSON instead of text
        #[arg(long)]
        json: bool,
        /// Number of ranked rows to display (0 = all)
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print the CSV export URLs for a cohort
    Export {
        /// Line ministry perimeter
        #[arg(long, conflicts_with = "region")]
        ministere: Option<String>,
        /// ATE-region perimeter
        #[arg(long)]
        region: Option<String>,
        /// Data year of the télédéclaration campaign
        #[arg(short, long, env = "SPE_YEAR")]
        year: Option<String>,
    },

    /// Show when the upstream dataset was last refreshed
    Freshness,

    /// List the known ministry and region perimeters
    Cohorts,
}

/// Cohort from the mutually exclusive perimeter flags.
fn cohort_from_flags(ministere: Option<String>, region: Option<String>) -> anyhow::Result<Cohort> {
    match (ministere, region) {
        (Some(name), None) => Ok(Cohort::ministry(&name)),
        (None, Some(region)) => Ok(Cohort::ate_region(&region)),
        _ => anyhow::bail!("select a perimeter with --ministere <name> or --region <name>"),
    }
}

/// Latest data year with a published declaration resource.
fn default_year() -> String {
    config::TELEDECLARATION_RESOURCES
        .last()
        .map(|(year, _)| year.to_string())
        .unwrap_or_else(|| "2024".to_string())
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Report {
            ministere,
            region,
            year,
            json,
            limit,
        } => {
            let cohort = cohort_from_flags(ministere, region)?;
            let year = year.unwrap_or_else(default_year);
            report::run(cohort, &year, json, limit).await
        }
        Commands::Export {
            ministere,
            region,
            year,
        } => {
            let cohort = cohort_from_flags(ministere, region)?;
            let year = year.unwrap_or_else(default_year);
            export::run(&cohort, &year)
        }
        Commands::Freshness => freshness::run().await,
        Commands::Cohorts => {
            println!("Ministères:");
            for ministry in MINISTRIES {
                println!("  {ministry}");
            }
            println!("\nRégions (périmètre ATE):");
            for region in REGIONS {
                match config::ria_target(region) {
                    Some(target) => println!("  {region} (cible RIA: {target})"),
                    None => println!("  {region}"),
                }
            }
            println!("\nCampagnes de télédéclaration publiées (année de données):");
            for (year, resource_id) in config::teledeclaration_years() {
                println!("  {year} ({resource_id})");
            }
            Ok(())
        }
    }
}
