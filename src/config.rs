//! Configuration: upstream endpoints, dataset resource ids, SPE rule tables
//! and EGalim objectives.
//!
//! Values come from the Registre National des Cantines publication on
//! data.gouv.fr. Base URLs are overridable through the environment so tests
//! and deployments behind a proxy can redirect them.

use std::collections::BTreeMap;
use std::time::Duration;

/// Registre National des Cantines dataset on data.gouv.fr.
pub const DATAGOUV_DATASET_ID: &str = "6482def590d4cf8cea3aa33e";

/// Current registry resource (XLSX, refreshed daily). The Parquet variant
/// stopped being updated on 2026-01-20 and was dropped from the chain.
pub const CANTEEN_RESOURCE_ID: &str = "408dca92-9028-4f66-93bf-f671111393ec";

/// Télédéclaration resources by data year. Data for year N is published
/// during campaign N+1.
pub const TELEDECLARATION_RESOURCES: &[(&str, &str)] = &[
    ("2021", "efe63a1a-c307-4238-81b0-ffa8536163c7"),
    ("2022", "84a09799-0845-4055-9101-e3a1a00fac2f"),
    ("2023", "25570c1c-9288-4fed-9d82-0f42444e12ab"),
    ("2024", "078cbd12-b553-4d0b-b74c-e79b19f7f61f"),
];

/// Campaign years assumed when the registry columns reveal nothing.
pub const DEFAULT_CAMPAIGN_YEARS: &[&str] = &["2021", "2022", "2023", "2024", "2025"];

/// Hard limit of the tabular API.
pub const API_PAGE_SIZE: u32 = 50;

/// Page ceilings bounding worst-case runtime against a misbehaving upstream.
/// Hitting one is normal termination, not an error.
pub const ESTABLISHMENT_PAGE_CEILING: u32 = 100;
pub const DECLARATION_PAGE_CEILING: u32 = 50;

/// Ministry value used by the ATE-region perimeter.
pub const ATE_MINISTRY: &str = "Préfecture - Administration Territoriale de l'État (ATE)";

/// EGalim art. 24 sourcing objectives for public collective catering, in
/// percent of purchases.
pub const EGALIM_BIO_OBJECTIVE: f64 = 20.0;
pub const EGALIM_DURABLE_OBJECTIVE: f64 = 50.0;

/// Line ministries present in the registry.
pub const MINISTRIES: &[&str] = &[
    "Enseignement supérieur et Recherche",
    "Intérieur et Outre-mer",
    "Économie et finances",
    "Agriculture, Alimentation et Forêts",
    "Services du Premier Ministre",
    "Justice",
    "Sport",
    "Environnement",
    "Éducation et Jeunesse",
    "Affaires étrangères",
    "Travail",
    "Culture",
    "Fonction Publiques",
    "Santé et Solidarités",
    "Présidence de la république - Autorités indépendantes (AAI, API)",
    "Cohésion des territoires - Relations avec les collectivités territoriales",
    "Mer",
];

pub const REGIONS: &[&str] = &[
    "Île-de-France",
    "Auvergne-Rhône-Alpes",
    "Nouvelle-Aquitaine",
    "Occitanie",
    "Provence-Alpes-Côte d'Azur",
    "Hauts-de-France",
    "Pays de la Loire",
    "Bretagne",
    "Bourgogne-Franche-Comté",
    "Grand Est",
    "Normandie",
    "Centre-Val de Loire",
    "La Réunion",
    "Corse",
    "Martinique",
    "Guadeloupe",
    "Guyane",
    "Mayotte",
];

/// DGAFP targets for inter-administrative restaurants (RIA) per region,
/// deadline 1 November 2025.
pub const RIA_TARGETS: &[(&str, u32)] = &[
    ("Auvergne-Rhône-Alpes", 12),
    ("Bourgogne-Franche-Comté", 4),
    ("Bretagne", 5),
    ("Centre-Val de Loire", 6),
    ("Corse", 1),
    ("Grand Est", 12),
    ("Hauts-de-France", 4),
    ("Île-de-France", 7),
    ("Normandie", 7),
    ("Nouvelle-Aquitaine", 12),
    ("Occitanie", 9),
    ("Provence-Alpes-Côte d'Azur", 4),
    ("Pays de la Loire", 10),
];

/// Rule tables for the SPE classifier. Keywords are matched against
/// normalized text (lowercase, accents stripped), see `classify`.
#[derive(Debug, Clone)]
pub struct SpeRules {
    /// Known state operators, matched in names and sector lists.
    pub state_operators: Vec<String>,
    /// Sector keywords flagging inter-administrative restaurants.
    pub ria_sectors: Vec<String>,
    /// Sector keywords naming a state administration.
    pub admin_sectors: Vec<String>,
    /// SIRET prefixes of state entities (12 excluded: collectivities).
    pub siret_prefixes: Vec<String>,
    /// Legal-category prefixes of national public establishments.
    pub legal_prefixes: Vec<String>,
    /// Legal-category exact codes confirmed in scope.
    pub legal_exact: Vec<String>,
    /// Legal-category prefix of territorial collectivities, which are never
    /// auto-confirmed.
    pub collectivity_prefix: String,
    /// Correctional-facility phrases for the Justice ministry rule.
    pub justice_phrases: Vec<String>,
    /// Justice acronyms, matched whole-word only.
    pub justice_acronyms: Vec<String>,
    /// Optional negative legal-category list producing the out-of-scope
    /// label. Empty by default: the rule set stays two-label and strictly
    /// additive.
    pub negative_prefixes: Vec<String>,
    pub negative_exact: Vec<String>,
}

impl Default for SpeRules {
    fn default() -> Self {
        fn owned(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        Self {
            state_operators: owned(&[
                "insee",
                "dgfip",
                "dgddi",
                "douane",
                "ddfip",
                "drfip",
                "dreal",
                "draaf",
                "ddt",
                "ddtm",
                "drac",
                "direccte",
                "dreets",
                "ddets",
                "ars",
                "dgac",
                "aviation civile",
                "gendarmerie",
                "police nationale",
                "crs",
                "afpa",
                "agence nationale pour la formation professionnelle",
            ]),
            ria_sectors: owned(&["ria", "inter-administratif"]),
            admin_sectors: owned(&[
                "administration centrale",
                "administration de l etat",
                "ministere",
                "prefecture",
                "sous-prefecture",
            ]),
            siret_prefixes: owned(&["11", "17", "18", "19"]),
            legal_prefixes: owned(&["71", "73", "74"]),
            legal_exact: owned(&[
                "4110", "4120", "4130", "4140", "4150", "4160", "8411", "8412", "8413", "7112",
                "7120", "7150", "7160",
            ]),
            collectivity_prefix: "72".to_string(),
            justice_phrases: owned(&[
                "centre penitentiaire",
                "centre de detention",
                "maison d arret",
                "etablissement penitentiaire",
                "maison centrale",
                "centre de semi-liberte",
                "etablissement pour mineurs",
                "mess",
            ]),
            justice_acronyms: owned(&["cp", "cd", "ma", "mc", "csl", "epm"]),
            negative_prefixes: Vec::new(),
            negative_exact: Vec::new(),
        }
    }
}

/// Upstream endpoints and client pacing.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Tabular data API, e.g. `https://tabular-api.data.gouv.fr/api`.
    pub tabular_base: String,
    /// data.gouv.fr dataset API, for the freshness fallback.
    pub datagouv_base: String,
    /// Business registry search API.
    pub registry_base: String,
    /// Geography API for commune centroids.
    pub geo_base: String,
    pub request_timeout: Duration,
    /// Fixed delay applied after each tabular request.
    pub request_delay: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            tabular_base: "https://tabular-api.data.gouv.fr/api".to_string(),
            datagouv_base: "https://www.data.gouv.fr/api/1".to_string(),
            registry_base: "https://recherche-entreprises.api.gouv.fr".to_string(),
            geo_base: "https://geo.api.gouv.fr".to_string(),
            request_timeout: Duration::from_secs(30),
            request_delay: Duration::from_millis(50),
        }
    }
}

impl ApiConfig {
    /// Build from the environment, falling back to the public endpoints.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(base) = std::env::var("SPE_TABULAR_API") {
            config.tabular_base = base;
        }
        if let Ok(base) = std::env::var("SPE_DATAGOUV_API") {
            config.datagouv_base = base;
        }
        if let Ok(base) = std::env::var("SPE_REGISTRY_API") {
            config.registry_base = base;
        }
        if let Ok(base) = std::env::var("SPE_GEO_API") {
            config.geo_base = base;
        }
        config
    }
}

/// Establishment resource chain: preferred first, fallbacks after. The
/// upstream periodically deprecates one file format for another without
/// synchronized downtime, so the fetcher tries each in order.
pub fn canteen_resources() -> Vec<String> {
    let mut resources = vec![CANTEEN_RESOURCE_ID.to_string()];
    if let Ok(fallback) = std::env::var("SPE_CANTEEN_RESOURCE_FALLBACK") {
        if !fallback.is_empty() {
            resources.push(fallback);
        }
    }
    resources
}

/// Resource id for a data year's télédéclarations, if published.
pub fn teledeclaration_resource(year: &str) -> Option<&'static str> {
    TELEDECLARATION_RESOURCES
        .iter()
        .find(|(y, _)| *y == year)
        .map(|(_, id)| *id)
}

/// DGAFP RIA target for a region.
pub fn ria_target(region: &str) -> Option<u32> {
    RIA_TARGETS
        .iter()
        .find(|(r, _)| *r == region)
        .map(|(_, n)| *n)
}

/// Map of data year to resource id, ordered by year, for display.
pub fn teledeclaration_years() -> BTreeMap<&'static str, &'static str> {
    TELEDECLARATION_RESOURCES.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teledeclaration_resource() {
        assert_eq!(
            teledeclaration_resource("2024"),
            Some("078cbd12-b553-4d0b-b74c-e79b19f7f61f")
        );
        assert_eq!(teledeclaration_resource("2025"), None);
    }

    #[test]
    fn test_teledeclaration_years_ordered() {
        let years: Vec<&str> = teledeclaration_years().into_keys().collect();
        assert_eq!(years, vec!["2021", "2022", "2023", "2024"]);
    }

    #[test]
    fn test_ria_target() {
        assert_eq!(ria_target("Corse"), Some(1));
        assert_eq!(ria_target("Mayotte"), None);
    }
}
