//! Cohort aggregation pipeline.
//!
//! One run is a pure function of (cohort, data year): fetch the cohort's
//! establishments, fetch its télédéclarations for the year, geocode, then
//! classify, audit and rank every row into a report. Progress flows over an
//! mpsc channel and a cancellation token is honored between stages, pages
//! and batches.

mod stats;

pub use stats::{CohortStats, EgalimStats, RiaStats, Share};

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::audit::{self, QualityFlag, QualityStats};
use crate::cancel::CancelToken;
use crate::classify::{SpeClassifier, SpeLabel};
use crate::config::{
    self, SpeRules, API_PAGE_SIZE, DECLARATION_PAGE_CEILING, ESTABLISHMENT_PAGE_CEILING,
};
use crate::error::{Result, SpeError};
use crate::geocode::{CachedLocation, GeoResolver};
use crate::models::{
    detect_campaign_years, Cohort, Declaration, DeclarationSet, Establishment,
};
use crate::rank;
use crate::tabular::{PageFetcher, TabularClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Establishments,
    Declarations,
    Geocoding,
    Analysis,
}

/// Progress events, observational only. A dropped receiver never stalls the
/// run.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted {
        stage: PipelineStage,
    },
    PageFetched {
        stage: PipelineStage,
        fetched: usize,
        total: u64,
    },
    GeoProgress {
        done: usize,
        total: usize,
    },
    StageCompleted {
        stage: PipelineStage,
        count: usize,
    },
}

/// One establishment with everything the analysis derived for it.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedEstablishment {
    pub establishment: Establishment,
    pub classification: SpeLabel,
    pub flags: BTreeSet<QualityFlag>,
    pub location: Option<CachedLocation>,
    pub declaration: Option<Declaration>,
    /// Declaration found for the year, or the registry's own yearly flag.
    pub has_declaration: bool,
    pub priority: u8,
}

#[derive(Debug, Serialize)]
pub struct CohortReport {
    pub cohort: Cohort,
    pub year: String,
    pub generated_at: DateTime<Utc>,
    /// Ranked rows, most urgent first.
    pub establishments: Vec<EnrichedEstablishment>,
    pub establishments_partial: bool,
    /// Data years advertised by the registry columns of the fetched rows.
    pub campaign_years: Vec<String>,
    /// False when no declaration resource exists for the year.
    pub declarations_available: bool,
    pub declarations_partial: bool,
    pub declaration_count: usize,
    pub stats: CohortStats,
}

pub struct Orchestrator {
    tabular: Arc<dyn TabularClient>,
    resolver: GeoResolver,
    classifier: SpeClassifier,
    rules: SpeRules,
}

impl Orchestrator {
    pub fn new(tabular: Arc<dyn TabularClient>, resolver: GeoResolver, rules: SpeRules) -> Self {
        Self {
            tabular,
            resolver,
            classifier: SpeClassifier::new(rules.clone()),
            rules,
        }
    }

    pub async fn run(
        &self,
        cohort: &Cohort,
        year: &str,
        cancel: &CancelToken,
        events: &UnboundedSender<PipelineEvent>,
    ) -> Result<CohortReport> {
        info!(cohort = cohort.label(), year, "pipeline run started");

        let _ = events.send(PipelineEvent::StageStarted {
            stage: PipelineStage::Establishments,
        });
        let fetcher = PageFetcher::new(self.tabular.as_ref(), ESTABLISHMENT_PAGE_CEILING);
        let fetched = fetcher
            .fetch_all(
                &config::canteen_resources(),
                &cohort.establishment_filters(),
                API_PAGE_SIZE,
                cancel,
                |p| {
                    let _ = events.send(PipelineEvent::PageFetched {
                        stage: PipelineStage::Establishments,
                        fetched: p.fetched,
                        total: p.total,
                    });
                },
            )
            .await?;
        let establishments: Vec<Establishment> = fetched
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| Establishment::from_row(row, i))
            .collect();
        let campaign_years = detect_campaign_years(&fetched.rows);
        if !campaign_years.iter().any(|y| y == year) {
            warn!(year, "selected year not advertised by the registry columns");
        }
        let _ = events.send(PipelineEvent::StageCompleted {
            stage: PipelineStage::Establishments,
            count: establishments.len(),
        });

        let _ = events.send(PipelineEvent::StageStarted {
            stage: PipelineStage::Declarations,
        });
        let (declarations, declarations_partial) =
            self.fetch_declarations(cohort, year, cancel, events).await?;
        let _ = events.send(PipelineEvent::StageCompleted {
            stage: PipelineStage::Declarations,
            count: declarations.len(),
        });

        let _ = events.send(PipelineEvent::StageStarted {
            stage: PipelineStage::Geocoding,
        });
        let geo = self
            .resolver
            .resolve_batch(&establishments, cancel, |p| {
                let _ = events.send(PipelineEvent::GeoProgress {
                    done: p.done,
                    total: p.total,
                });
            })
            .await?;
        let _ = events.send(PipelineEvent::StageCompleted {
            stage: PipelineStage::Geocoding,
            count: geo.located.len(),
        });

        let _ = events.send(PipelineEvent::StageStarted {
            stage: PipelineStage::Analysis,
        });
        if cancel.is_cancelled() {
            return Err(SpeError::Cancelled);
        }

        let mut rows: Vec<EnrichedEstablishment> = establishments
            .into_iter()
            .map(|establishment| {
                let legal_category = establishment
                    .well_formed_siret()
                    .and_then(|siret| geo.legal_categories.get(siret))
                    .map(String::as_str);
                let classification = self.classifier.classify(&establishment, legal_category);
                let flags = audit::audit(&establishment);
                let declaration = establishment
                    .well_formed_siret()
                    .and_then(|siret| declarations.get(siret))
                    .cloned();
                let has_declaration =
                    declaration.is_some() || establishment.has_declaration_flag(year);
                let location = geo.located.get(&establishment.id).cloned();
                let priority = rank::priority(classification, &flags, has_declaration);
                EnrichedEstablishment {
                    establishment,
                    classification,
                    flags,
                    location,
                    declaration,
                    has_declaration,
                    priority,
                }
            })
            .collect();
        rank::rank_by(&mut rows, |row| row.priority);

        let quality = QualityStats::from_audits(
            &rows.iter().map(|r| r.flags.clone()).collect::<Vec<_>>(),
        );
        let stats = stats::compute(cohort, &rows, quality, geo.stats, &self.rules);
        let _ = events.send(PipelineEvent::StageCompleted {
            stage: PipelineStage::Analysis,
            count: rows.len(),
        });

        info!(
            cohort = cohort.label(),
            year,
            establishments = rows.len(),
            declarations = declarations.len(),
            "pipeline run finished"
        );
        Ok(CohortReport {
            cohort: cohort.clone(),
            year: year.to_string(),
            generated_at: Utc::now(),
            establishments: rows,
            establishments_partial: fetched.partial,
            campaign_years,
            declarations_available: declarations.resource_available,
            declarations_partial,
            declaration_count: declarations.len(),
            stats,
        })
    }

    /// Declarations for the year, keyed by canteen SIRET. A year without a
    /// published resource yields an empty, unavailable set; a failing fetch
    /// degrades to an empty partial one instead of aborting the run.
    async fn fetch_declarations(
        &self,
        cohort: &Cohort,
        year: &str,
        cancel: &CancelToken,
        events: &UnboundedSender<PipelineEvent>,
    ) -> Result<(DeclarationSet, bool)> {
        let Some(resource_id) = config::teledeclaration_resource(year) else {
            info!(year, "no declaration resource published for the year");
            return Ok((DeclarationSet::new(year, false), false));
        };

        let fetcher = PageFetcher::new(self.tabular.as_ref(), DECLARATION_PAGE_CEILING);
        let fetched = fetcher
            .fetch_all(
                &[resource_id.to_string()],
                &cohort.declaration_filters(),
                API_PAGE_SIZE,
                cancel,
                |p| {
                    let _ = events.send(PipelineEvent::PageFetched {
                        stage: PipelineStage::Declarations,
                        fetched: p.fetched,
                        total: p.total,
                    });
                },
            )
            .await;

        let mut set = DeclarationSet::new(year, true);
        match fetched {
            Ok(outcome) => {
                for row in &outcome.rows {
                    if let Some(declaration) = Declaration::from_row(row) {
                        set.insert(declaration);
                    }
                }
                Ok((set, outcome.partial))
            }
            Err(SpeError::Cancelled) => Err(SpeError::Cancelled),
            Err(err) => {
                warn!(year, error = %err, "declaration fetch failed, continuing without");
                Ok((set, true))
            }
        }
    }
}

/// Serializes runs: starting a new one cancels the previous in-flight run,
/// whose late results are discarded through its `Err(Cancelled)` exit.
#[derive(Default)]
pub struct SessionRunner {
    current: Mutex<Option<CancelToken>>,
}

impl SessionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a new run, cancelling whatever run held the slot before.
    pub fn begin(&self) -> CancelToken {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.take() {
            previous.cancel();
        }
        let token = CancelToken::new();
        *current = Some(token.clone());
        token
    }

    pub fn cancel_current(&self) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = current.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_runner_cancels_previous_run() {
        let runner = SessionRunner::new();
        let first = runner.begin();
        assert!(!first.is_cancelled());
        let second = runner.begin();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_cancel_current_is_idempotent() {
        let runner = SessionRunner::new();
        let token = runner.begin();
        runner.cancel_current();
        runner.cancel_current();
        assert!(token.is_cancelled());
    }
}
