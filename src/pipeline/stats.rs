//! Cohort summary statistics assembled from the enriched rows.

use serde::Serialize;

use super::EnrichedEstablishment;
use crate::audit::QualityStats;
use crate::config::{self, EGALIM_BIO_OBJECTIVE, EGALIM_DURABLE_OBJECTIVE};
use crate::geocode::GeoStats;
use crate::models::Cohort;

/// A count with its share of the cohort, in percent.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Share {
    pub count: usize,
    pub pct: f64,
}

impl Share {
    fn of(count: usize, total: usize) -> Self {
        let pct = if total == 0 {
            0.0
        } else {
            (1000.0 * count as f64 / total as f64).round() / 10.0
        };
        Self { count, pct }
    }
}

/// EGalim attainment among declarations carrying at least one ratio.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EgalimStats {
    /// Declarations with usable sourcing data.
    pub with_ratio_data: usize,
    /// Bio purchases at or above the 20 % objective.
    pub bio_objective: Share,
    /// Bio plus quality purchases at or above the 50 % objective.
    pub durable_objective: Share,
}

/// Inter-administrative restaurant coverage, ATE-region mode only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RiaStats {
    pub count: usize,
    /// DGAFP target for the region, when one is published.
    pub target: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CohortStats {
    pub total: usize,
    pub declared: Share,
    pub active: Share,
    pub avg_daily_meals: Option<f64>,
    pub avg_yearly_meals: Option<f64>,
    /// Management-type labels with counts, sorted by count descending then
    /// label.
    pub management: Vec<(String, usize)>,
    /// Region breakdown, ministry mode only.
    pub regions: Vec<(String, usize)>,
    pub egalim: EgalimStats,
    pub ria: Option<RiaStats>,
    pub quality: QualityStats,
    pub geo: GeoStats,
}

fn breakdown(labels: impl Iterator<Item = String>) -> Vec<(String, usize)> {
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    let mut out: Vec<(String, usize)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// An establishment counts as a RIA site when its sector list carries one of
/// the configured RIA keywords.
pub fn is_ria(est: &crate::models::Establishment, rules: &crate::config::SpeRules) -> bool {
    est.sectors().iter().any(|sector| {
        let normalized = crate::classify::normalize(sector);
        rules.ria_sectors.iter().any(|kw| normalized.contains(kw.as_str()))
    })
}

pub fn compute(
    cohort: &Cohort,
    rows: &[EnrichedEstablishment],
    quality: QualityStats,
    geo: GeoStats,
    rules: &crate::config::SpeRules,
) -> CohortStats {
    let total = rows.len();
    let declared = rows.iter().filter(|r| r.has_declaration).count();
    let active = rows
        .iter()
        .filter(|r| r.establishment.active_on_ma_cantine)
        .count();

    let with_ratio: Vec<_> = rows
        .iter()
        .filter_map(|r| r.declaration.as_ref())
        .filter(|d| d.has_ratio_data())
        .collect();
    let bio = with_ratio
        .iter()
        .filter(|d| d.bio_pct() >= EGALIM_BIO_OBJECTIVE)
        .count();
    let durable = with_ratio
        .iter()
        .filter(|d| d.egalim_total_pct() >= EGALIM_DURABLE_OBJECTIVE)
        .count();

    let ria = cohort.region().map(|region| RiaStats {
        count: rows
            .iter()
            .filter(|r| is_ria(&r.establishment, rules))
            .count(),
        target: config::ria_target(region),
    });

    let regions = match cohort {
        Cohort::Ministry { .. } => breakdown(
            rows.iter()
                .filter_map(|r| r.establishment.region_lib.clone()),
        ),
        Cohort::AteRegion { .. } => Vec::new(),
    };

    CohortStats {
        total,
        declared: Share::of(declared, total),
        active: Share::of(active, total),
        avg_daily_meals: average(rows.iter().filter_map(|r| r.establishment.daily_meal_count)),
        avg_yearly_meals: average(rows.iter().filter_map(|r| r.establishment.yearly_meal_count)),
        management: breakdown(rows.iter().map(|r| {
            r.establishment
                .management_type
                .map(|m| m.label().to_string())
                .unwrap_or_else(|| "Inconnu".to_string())
        })),
        regions,
        egalim: EgalimStats {
            with_ratio_data: with_ratio.len(),
            bio_objective: Share::of(bio, with_ratio.len()),
            durable_objective: Share::of(durable, with_ratio.len()),
        },
        ria,
        quality,
        geo,
    }
}
