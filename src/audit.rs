//! Data-quality audit of registry rows.
//!
//! Flags are a fixed vocabulary; an establishment carries zero or more. The
//! cohort score is the share of establishments with at least one flag, so
//! lower is better.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::models::{EconomicModel, Establishment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    InactiveAccount,
    MissingSiret,
    MissingName,
    MissingDailyMealCount,
    MissingProductionType,
    MissingManagementType,
    MissingEconomicModel,
    NonPublicEconomicModel,
    MultipleSectors,
}

impl QualityFlag {
    /// French display label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InactiveAccount => "Compte inactif sur ma-cantine",
            Self::MissingSiret => "SIRET manquant ou invalide",
            Self::MissingName => "Nom manquant",
            Self::MissingDailyMealCount => "Couverts par jour manquants",
            Self::MissingProductionType => "Type de production manquant",
            Self::MissingManagementType => "Mode de gestion manquant",
            Self::MissingEconomicModel => "Modèle économique manquant",
            Self::NonPublicEconomicModel => "Modèle économique non public",
            Self::MultipleSectors => "Secteurs multiples",
        }
    }
}

/// Audit one establishment. A malformed SIRET counts as missing.
pub fn audit(establishment: &Establishment) -> BTreeSet<QualityFlag> {
    let mut flags = BTreeSet::new();
    if !establishment.active_on_ma_cantine {
        flags.insert(QualityFlag::InactiveAccount);
    }
    if establishment.well_formed_siret().is_none() {
        flags.insert(QualityFlag::MissingSiret);
    }
    if establishment.name.is_none() {
        flags.insert(QualityFlag::MissingName);
    }
    if establishment.daily_meal_count.is_none() {
        flags.insert(QualityFlag::MissingDailyMealCount);
    }
    if establishment.production_type.is_none() {
        flags.insert(QualityFlag::MissingProductionType);
    }
    if establishment.management_type.is_none() {
        flags.insert(QualityFlag::MissingManagementType);
    }
    match &establishment.economic_model {
        None => {
            flags.insert(QualityFlag::MissingEconomicModel);
        }
        Some(EconomicModel::Public) => {}
        Some(_) => {
            flags.insert(QualityFlag::NonPublicEconomicModel);
        }
    }
    if establishment.has_multiple_sectors() {
        flags.insert(QualityFlag::MultipleSectors);
    }
    flags
}

/// Cohort-level quality summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityStats {
    /// Count per flag, only flags that occurred.
    pub by_flag: BTreeMap<QualityFlag, usize>,
    /// Establishments carrying at least one flag.
    pub flagged: usize,
    /// `round(100 * flagged / total)`, 0 on an empty cohort.
    pub score: u32,
}

impl QualityStats {
    pub fn from_audits(audits: &[BTreeSet<QualityFlag>]) -> Self {
        let mut stats = Self::default();
        for flags in audits {
            if !flags.is_empty() {
                stats.flagged += 1;
            }
            for flag in flags {
                *stats.by_flag.entry(*flag).or_insert(0) += 1;
            }
        }
        if !audits.is_empty() {
            stats.score = ((100.0 * stats.flagged as f64) / audits.len() as f64).round() as u32;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn establishment(fields: Value) -> Establishment {
        let row: Map<String, Value> = fields.as_object().cloned().unwrap();
        Establishment::from_row(&row, 0)
    }

    #[test]
    fn test_clean_row_has_no_flags() {
        let est = establishment(json!({
            "siret": "11000000000001",
            "name": "Cantine X",
            "daily_meal_count": 120,
            "production_type": "central",
            "management_type": "direct",
            "economic_model": "public",
            "active_on_ma_cantine": "True",
            "sector_list": "RIA"
        }));
        assert!(audit(&est).is_empty());
    }

    #[test]
    fn test_inactive_and_missing_siret() {
        let est = establishment(json!({
            "siret": "1234",
            "name": "Cantine Y",
            "daily_meal_count": 80,
            "production_type": "site",
            "management_type": "conceded",
            "economic_model": "public",
            "active_on_ma_cantine": "False"
        }));
        let flags = audit(&est);
        assert!(flags.contains(&QualityFlag::InactiveAccount));
        assert!(flags.contains(&QualityFlag::MissingSiret));
        assert_eq!(flags.len(), 2);
    }

    #[test]
    fn test_non_public_economic_model() {
        let est = establishment(json!({"economic_model": "private"}));
        assert!(audit(&est).contains(&QualityFlag::NonPublicEconomicModel));
        let missing = establishment(json!({}));
        assert!(audit(&missing).contains(&QualityFlag::MissingEconomicModel));
    }

    #[test]
    fn test_cohort_score_rounds() {
        let audits = vec![
            BTreeSet::from([QualityFlag::MissingName]),
            BTreeSet::new(),
            BTreeSet::new(),
        ];
        let stats = QualityStats::from_audits(&audits);
        assert_eq!(stats.flagged, 1);
        assert_eq!(stats.score, 33);
        assert_eq!(stats.by_flag[&QualityFlag::MissingName], 1);
    }

    #[test]
    fn test_empty_cohort_scores_zero() {
        assert_eq!(QualityStats::from_audits(&[]).score, 0);
    }

    #[test]
    fn test_all_flagged_scores_exactly_100() {
        let audits = vec![
            BTreeSet::from([QualityFlag::MissingSiret]),
            BTreeSet::from([QualityFlag::InactiveAccount, QualityFlag::MissingName]),
            BTreeSet::from([QualityFlag::MultipleSectors]),
        ];
        let stats = QualityStats::from_audits(&audits);
        assert_eq!(stats.flagged, 3);
        assert_eq!(stats.score, 100);
    }
}
