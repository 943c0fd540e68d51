//! The `report` command: run the full pipeline for one cohort and render the
//! result.

use std::sync::Arc;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::config::{ApiConfig, SpeRules};
use crate::geocode::{
    GeoResolver, GeoResolverConfig, HttpCommunesClient, HttpRegistryClient, MemoryGeoCache,
};
use crate::models::Cohort;
use crate::pipeline::{
    CohortReport, Orchestrator, PipelineEvent, PipelineStage, SessionRunner,
};
use crate::tabular::HttpTabularClient;

pub async fn run(cohort: Cohort, year: &str, json: bool, limit: usize) -> anyhow::Result<()> {
    let api = ApiConfig::from_env();
    let tabular = Arc::new(HttpTabularClient::new(&api));
    let resolver = GeoResolver::new(
        Arc::new(HttpRegistryClient::new(&api)),
        Arc::new(HttpCommunesClient::new(&api)),
        Arc::new(MemoryGeoCache::default()),
        GeoResolverConfig::default(),
    );
    let orchestrator = Orchestrator::new(tabular, resolver, SpeRules::default());

    let runner = SessionRunner::new();
    let cancel = runner.begin();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let renderer = tokio::spawn(render_events(events_rx, json));

    let result = orchestrator.run(&cohort, year, &cancel, &events_tx).await;
    drop(events_tx);
    let _ = renderer.await;

    let report = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, limit);
    }
    Ok(())
}

fn stage_label(stage: PipelineStage) -> &'static str {
    match stage {
        PipelineStage::Establishments => "Fetching establishments",
        PipelineStage::Declarations => "Fetching télédéclarations",
        PipelineStage::Geocoding => "Geocoding",
        PipelineStage::Analysis => "Analyzing",
    }
}

/// Consume pipeline events and keep one progress bar per stage. Quiet in JSON
/// mode so stdout stays machine-readable.
async fn render_events(mut events: mpsc::UnboundedReceiver<PipelineEvent>, quiet: bool) {
    let mut bar: Option<ProgressBar> = None;
    while let Some(event) = events.recv().await {
        if quiet {
            continue;
        }
        match event {
            PipelineEvent::StageStarted { stage } => {
                println!("{} {}", style("→").cyan(), stage_label(stage));
            }
            PipelineEvent::PageFetched { fetched, total, .. } => {
                let bar = bar.get_or_insert_with(|| {
                    let bar = ProgressBar::new(total);
                    bar.set_style(
                        ProgressStyle::default_bar()
                            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
                            .unwrap()
                            .progress_chars("█▓░"),
                    );
                    bar
                });
                bar.set_length(total);
                bar.set_position(fetched as u64);
            }
            PipelineEvent::GeoProgress { done, total } => {
                let bar = bar.get_or_insert_with(|| {
                    let bar = ProgressBar::new(total as u64);
                    bar.set_style(
                        ProgressStyle::default_bar()
                            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
                            .unwrap()
                            .progress_chars("█▓░"),
                    );
                    bar
                });
                bar.set_length(total as u64);
                bar.set_position(done as u64);
            }
            PipelineEvent::StageCompleted { stage, count } => {
                if let Some(bar) = bar.take() {
                    bar.finish_and_clear();
                }
                println!(
                    "{} {}: {} rows",
                    style("✓").green(),
                    stage_label(stage),
                    count
                );
            }
        }
    }
}

fn print_report(report: &CohortReport, limit: usize) {
    let stats = &report.stats;
    println!();
    println!(
        "{} {} — campagne {} (données {})",
        style("■").cyan(),
        style(report.cohort.label()).bold(),
        report
            .year
            .parse::<u32>()
            .map(|y| (y + 1).to_string())
            .unwrap_or_else(|_| report.year.clone()),
        report.year
    );
    if report.establishments_partial || report.declarations_partial {
        println!(
            "{} données partielles: la pagination s'est arrêtée avant le total annoncé",
            style("!").yellow()
        );
    }
    if !report.declarations_available {
        println!(
            "{} aucune ressource de télédéclaration publiée pour {}",
            style("!").yellow(),
            report.year
        );
    }
    if !report.campaign_years.contains(&report.year) {
        println!(
            "{} année {} absente des colonnes du registre (années connues: {})",
            style("!").yellow(),
            report.year,
            report.campaign_years.join(", ")
        );
    }

    println!("\n  Établissements      {}", stats.total);
    println!(
        "  Télédéclarés        {} ({}%)",
        stats.declared.count, stats.declared.pct
    );
    println!(
        "  Comptes actifs      {} ({}%)",
        stats.active.count, stats.active.pct
    );
    if let Some(avg) = stats.avg_daily_meals {
        println!("  Couverts/jour moyen {:.0}", avg);
    }
    if let Some(avg) = stats.avg_yearly_meals {
        println!("  Couverts/an moyen   {:.0}", avg);
    }
    println!(
        "  Qualité des données {} fiche(s) signalée(s), score {}",
        stats.quality.flagged, stats.quality.score
    );
    println!(
        "  Géocodage           {} adresse, {} commune, {} non résolus",
        stats.geo.by_address, stats.geo.by_municipality, stats.geo.unresolved
    );

    if stats.egalim.with_ratio_data > 0 {
        println!(
            "  EGalim              bio ≥ 20%: {}/{} ({}%), durable ≥ 50%: {}/{} ({}%)",
            stats.egalim.bio_objective.count,
            stats.egalim.with_ratio_data,
            stats.egalim.bio_objective.pct,
            stats.egalim.durable_objective.count,
            stats.egalim.with_ratio_data,
            stats.egalim.durable_objective.pct
        );
    }
    if let Some(ria) = &stats.ria {
        match ria.target {
            Some(target) => println!("  RIA                 {} / cible {}", ria.count, target),
            None => println!("  RIA                 {}", ria.count),
        }
    }

    if !stats.management.is_empty() {
        println!("\n  Mode de gestion:");
        for (label, count) in &stats.management {
            println!("    {label:<20} {count}");
        }
    }
    if !stats.regions.is_empty() {
        println!("\n  Régions:");
        for (label, count) in &stats.regions {
            println!("    {label:<30} {count}");
        }
    }

    let shown = if limit == 0 {
        report.establishments.len()
    } else {
        limit.min(report.establishments.len())
    };
    if shown > 0 {
        println!(
            "\n{} À traiter en priorité ({} premiers):",
            style("→").cyan(),
            shown
        );
        for row in &report.establishments[..shown] {
            let name = row.establishment.name.as_deref().unwrap_or("(sans nom)");
            let city = row.establishment.city.as_deref().unwrap_or("-");
            let glyph = match row.priority {
                0 => style("✗").red(),
                1 => style("?").yellow(),
                2 | 3 => style("!").yellow(),
                _ => style("✓").green(),
            };
            let mut notes: Vec<String> = Vec::new();
            if row.priority == 1 {
                notes.push("à vérifier".to_string());
            }
            for flag in &row.flags {
                notes.push(flag.label().to_lowercase());
            }
            if !row.has_declaration {
                notes.push(format!("pas de télédéclaration {}", report.year));
            }
            if notes.is_empty() {
                println!("  {glyph} {name} ({city})");
            } else {
                println!("  {glyph} {name} ({city}) — {}", notes.join(", "));
            }
        }
    }
}
