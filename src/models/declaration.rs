//! Télédéclaration records and their per-year index.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

/// One EGalim télédéclaration for one canteen and one data year.
#[derive(Debug, Clone, Serialize)]
pub struct Declaration {
    pub canteen_siret: String,
    /// Bio purchase ratio, fraction in [0, 1].
    pub ratio_bio: Option<f64>,
    /// EGalim-quality purchases excluding bio, fraction in [0, 1].
    pub ratio_egalim_non_bio: Option<f64>,
    pub declaration_type: Option<String>,
}

impl Declaration {
    /// Parse one row of a télédéclaration resource. Rows without a canteen
    /// SIRET cannot be joined and are dropped.
    pub fn from_row(row: &Map<String, Value>) -> Option<Self> {
        let siret = match row.get("canteen_siret") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return None,
        };
        Some(Self {
            canteen_siret: siret,
            ratio_bio: ratio_field(row, "teledeclaration_ratio_bio"),
            ratio_egalim_non_bio: ratio_field(row, "teledeclaration_ratio_egalim_hors_bio"),
            declaration_type: row
                .get("teledeclaration_type")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Both ratios null means the declaration carries no usable sourcing
    /// data.
    pub fn has_ratio_data(&self) -> bool {
        self.ratio_bio.is_some() || self.ratio_egalim_non_bio.is_some()
    }

    /// Combined EGalim ratio (bio + quality excluding bio), in percent.
    pub fn egalim_total_pct(&self) -> f64 {
        (self.ratio_bio.unwrap_or(0.0) + self.ratio_egalim_non_bio.unwrap_or(0.0)) * 100.0
    }

    pub fn bio_pct(&self) -> f64 {
        self.ratio_bio.unwrap_or(0.0) * 100.0
    }
}

fn ratio_field(row: &Map<String, Value>, key: &str) -> Option<f64> {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Declarations for one data year, indexed by canteen SIRET. Fully replaced
/// whenever the cohort or year changes, never merged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeclarationSet {
    pub year: String,
    /// Whether a declaration resource exists upstream for this year at all.
    pub resource_available: bool,
    by_siret: HashMap<String, Declaration>,
}

impl DeclarationSet {
    pub fn new(year: &str, resource_available: bool) -> Self {
        Self {
            year: year.to_string(),
            resource_available,
            by_siret: HashMap::new(),
        }
    }

    /// Last write wins when source pages carry duplicates for a SIRET.
    pub fn insert(&mut self, declaration: Declaration) {
        self.by_siret
            .insert(declaration.canteen_siret.clone(), declaration);
    }

    pub fn get(&self, siret: &str) -> Option<&Declaration> {
        self.by_siret.get(siret)
    }

    pub fn len(&self) -> usize {
        self.by_siret.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_siret.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_row_requires_siret() {
        assert!(Declaration::from_row(&row(json!({"teledeclaration_ratio_bio": 0.2}))).is_none());
        let d = Declaration::from_row(&row(json!({
            "canteen_siret": "11000000000001",
            "teledeclaration_ratio_bio": "0.25",
            "teledeclaration_ratio_egalim_hors_bio": 0.3
        })))
        .unwrap();
        assert_eq!(d.ratio_bio, Some(0.25));
        assert!((d.egalim_total_pct() - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_last_write_wins() {
        let mut set = DeclarationSet::new("2024", true);
        for ratio in [0.1, 0.4] {
            set.insert(Declaration {
                canteen_siret: "11000000000001".into(),
                ratio_bio: Some(ratio),
                ratio_egalim_non_bio: None,
                declaration_type: None,
            });
        }
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("11000000000001").unwrap().ratio_bio, Some(0.4));
    }
}
