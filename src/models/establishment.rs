//! Establishment model built from raw tabular API rows.
//!
//! Rows come back with loose typing (numbers as strings, booleans as
//! `"True"`/`"1"`, missing values as `""` or `"-"`), so parsing is tolerant
//! and every field that can be absent is an `Option`.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};

/// Management mode of a canteen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagementType {
    Direct,
    Conceded,
}

impl ManagementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Conceded => "conceded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "conceded" => Some(Self::Conceded),
            _ => None,
        }
    }

    /// French display label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Direct => "Gestion directe",
            Self::Conceded => "Gestion concédée",
        }
    }
}

/// Economic model declared for a canteen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EconomicModel {
    Public,
    Private,
    /// Unrecognized value, kept verbatim.
    Other(String),
}

impl EconomicModel {
    pub fn from_str(s: &str) -> Self {
        match s {
            "public" => Self::Public,
            "private" => Self::Private,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Other(s) => s,
        }
    }
}

/// One catering site from the Registre National des Cantines.
#[derive(Debug, Clone, Serialize)]
pub struct Establishment {
    /// Stable display id: the upstream row id when present, else a synthetic
    /// one derived from the row position.
    pub id: String,
    /// 14-digit identifier, when present. Identity key when well-formed.
    pub siret: Option<String>,
    pub name: Option<String>,
    pub city: Option<String>,
    pub city_insee_code: Option<String>,
    pub department: Option<String>,
    pub department_lib: Option<String>,
    pub region_lib: Option<String>,
    pub line_ministry: Option<String>,
    /// Delimited sector list (`,`, `;` or `|`).
    pub sector_list: Option<String>,
    pub management_type: Option<ManagementType>,
    pub economic_model: Option<EconomicModel>,
    pub production_type: Option<String>,
    pub active_on_ma_cantine: bool,
    pub daily_meal_count: Option<f64>,
    pub yearly_meal_count: Option<f64>,
    /// Data years whose registry column carries a truthy declaration flag.
    pub declaration_years: BTreeSet<String>,
}

/// Missing per the registry conventions: absent, null, empty or `"-"`.
pub fn is_missing_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            trimmed.is_empty() || trimmed == "-"
        }
        _ => false,
    }
}

/// Truthy per the registry conventions: `true`, `"True"`, `"true"` or `"1"`.
pub fn is_true_value(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.as_str(), "True" | "true" | "1"),
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

fn field_string(row: &Map<String, Value>, key: &str) -> Option<String> {
    let value = row.get(key);
    if is_missing_value(value) {
        return None;
    }
    match value {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn field_f64(row: &Map<String, Value>, key: &str) -> Option<f64> {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Year columns are named after the data year they flag, between 2021 and
/// 2025.
fn year_columns(row: &Map<String, Value>) -> impl Iterator<Item = (String, &Value)> {
    row.iter().filter_map(|(key, value)| {
        let year: String = key.chars().filter(|c| c.is_ascii_digit()).take(4).collect();
        if year.len() == 4 && ("2021".."2026").contains(&year.as_str()) && key.contains(&year) {
            Some((year, value))
        } else {
            None
        }
    })
}

impl Establishment {
    /// Parse one tabular API row. `index` is the absolute row position used
    /// for the synthetic id fallback.
    pub fn from_row(row: &Map<String, Value>, index: usize) -> Self {
        let declaration_years = year_columns(row)
            .filter(|(_, value)| is_true_value(Some(value)))
            .map(|(year, _)| year)
            .collect();

        Self {
            id: field_string(row, "id").unwrap_or_else(|| format!("row-{index}")),
            siret: field_string(row, "siret"),
            name: field_string(row, "name"),
            city: field_string(row, "city"),
            city_insee_code: field_string(row, "city_insee_code"),
            department: field_string(row, "department"),
            department_lib: field_string(row, "department_lib"),
            region_lib: field_string(row, "region_lib"),
            line_ministry: field_string(row, "line_ministry"),
            sector_list: field_string(row, "sector_list"),
            management_type: field_string(row, "management_type")
                .and_then(|s| ManagementType::from_str(&s)),
            economic_model: field_string(row, "economic_model")
                .map(|s| EconomicModel::from_str(&s)),
            production_type: field_string(row, "production_type"),
            active_on_ma_cantine: is_true_value(row.get("active_on_ma_cantine")),
            daily_meal_count: field_f64(row, "daily_meal_count"),
            yearly_meal_count: field_f64(row, "yearly_meal_count"),
            declaration_years,
        }
    }

    /// A SIRET is usable as an identity and geocoding key only when it is
    /// exactly 14 digits.
    pub fn well_formed_siret(&self) -> Option<&str> {
        self.siret
            .as_deref()
            .filter(|s| s.len() == 14 && s.bytes().all(|b| b.is_ascii_digit()))
    }

    /// Individual sectors from the delimited list.
    pub fn sectors(&self) -> Vec<&str> {
        self.sector_list
            .as_deref()
            .map(|list| {
                list.split([',', ';', '|'])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// More than one sector declared, a data-quality problem.
    pub fn has_multiple_sectors(&self) -> bool {
        self.sector_list
            .as_deref()
            .map(|list| list.contains([',', ';', '|']))
            .unwrap_or(false)
    }

    /// The registry's own boolean column says a declaration exists for the
    /// year. Used when the year's declaration resource is not published yet.
    pub fn has_declaration_flag(&self, year: &str) -> bool {
        self.declaration_years.contains(year)
    }
}

/// Campaign data years advertised by the row columns, always including the
/// defaults so year selection stays stable on sparse cohorts.
pub fn detect_campaign_years(rows: &[Map<String, Value>]) -> Vec<String> {
    let mut years: BTreeSet<String> = crate::config::DEFAULT_CAMPAIGN_YEARS
        .iter()
        .filter(|y| **y < "2025")
        .map(|y| y.to_string())
        .collect();
    if let Some(first) = rows.first() {
        for (year, _) in year_columns(first) {
            years.insert(year);
        }
    }
    years.into_iter().collect()
}
