//! Cohort descriptor: the perimeter whose establishments get analyzed.
//!
//! A value object passed explicitly to the orchestrator, so a run is a pure
//! function of (cohort, year). The filter builders are shared between the
//! JSON fetch and the CSV export URLs, keeping both byte-identical.

use serde::Serialize;
use unicode_normalization::UnicodeNormalization;
use url::Url;

use crate::config::ATE_MINISTRY;
use crate::error::Result;

/// Analysis perimeter: a line ministry, or the territorial state
/// administration (ATE) of one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Cohort {
    Ministry { name: String },
    AteRegion { region: String },
}

impl Cohort {
    pub fn ministry(name: &str) -> Self {
        Self::Ministry {
            name: name.to_string(),
        }
    }

    pub fn ate_region(region: &str) -> Self {
        Self::AteRegion {
            region: region.to_string(),
        }
    }

    /// Field-exact filters for the establishment dataset.
    pub fn establishment_filters(&self) -> Vec<(String, String)> {
        match self {
            Self::Ministry { name } => {
                vec![("line_ministry__exact".to_string(), name.clone())]
            }
            Self::AteRegion { region } => vec![
                ("line_ministry__exact".to_string(), ATE_MINISTRY.to_string()),
                ("region_lib__exact".to_string(), region.clone()),
            ],
        }
    }

    /// Same filters, prefixed the way the télédéclaration resources expose
    /// canteen fields.
    pub fn declaration_filters(&self) -> Vec<(String, String)> {
        match self {
            Self::Ministry { name } => {
                vec![("canteen_line_ministry__exact".to_string(), name.clone())]
            }
            Self::AteRegion { region } => vec![
                (
                    "canteen_line_ministry__exact".to_string(),
                    ATE_MINISTRY.to_string(),
                ),
                ("canteen_region_lib__exact".to_string(), region.clone()),
            ],
        }
    }

    /// Human label for logs and filenames.
    pub fn label(&self) -> &str {
        match self {
            Self::Ministry { name } => name,
            Self::AteRegion { region } => region,
        }
    }

    /// The ATE perimeter is the only one with a regional RIA target.
    pub fn region(&self) -> Option<&str> {
        match self {
            Self::AteRegion { region } => Some(region),
            Self::Ministry { .. } => None,
        }
    }
}

/// Filename-safe form of a label: accents stripped, everything non
/// alphanumeric collapsed to single underscores.
pub fn normalize_filename(label: &str) -> String {
    let stripped: String = label
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect();
    let mut out = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// CSV download URL for a tabular resource, carrying the exact same filters
/// as the JSON fetch so the export matches the displayed cohort.
pub fn export_csv_url(
    tabular_base: &str,
    resource_id: &str,
    filters: &[(String, String)],
) -> Result<String> {
    let mut url = Url::parse(&format!(
        "{}/resources/{}/data/csv/",
        tabular_base.trim_end_matches('/'),
        resource_id
    ))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in filters {
            pairs.append_pair(key, value);
        }
    }
    Ok(url.to_string())
}

/// Export filename for the establishment CSV.
pub fn establishments_filename(cohort: &Cohort) -> String {
    format!("etablissements_{}.csv", normalize_filename(cohort.label()))
}

/// Export filename for a campaign's télédéclaration CSV. Campaign year is
/// the data year plus one.
pub fn declarations_filename(cohort: &Cohort, data_year: &str) -> String {
    let campaign = data_year
        .parse::<u32>()
        .map(|y| (y + 1).to_string())
        .unwrap_or_else(|_| data_year.to_string());
    format!(
        "teledeclarations_campagne{}_{}.csv",
        campaign,
        normalize_filename(cohort.label())
    )
}
