//! Tier-1 lookup against the business registry search API.
//!
//! One call returns both coordinates and the legal-category code, so the
//! classifier and the geocoder share a single SIRET-keyed request instead of
//! issuing two divergent ones.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::cache::{CachedLocation, GeoPrecision};
use crate::config::ApiConfig;
use crate::error::Result;

/// Outcome of one SIRET lookup. Misses and rate limits are never cached;
/// both stay eligible for the bounded retry pass.
#[derive(Debug)]
pub enum RegistryOutcome {
    Found(CachedLocation),
    Miss,
    RateLimited,
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn lookup_siret(&self, siret: &str) -> Result<RegistryOutcome>;
}

pub struct HttpRegistryClient {
    client: Client,
    base: String,
}

impl HttpRegistryClient {
    pub fn new(config: &ApiConfig) -> Self {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(config.request_timeout)
            .gzip(true)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base: config.registry_base.trim_end_matches('/').to_string(),
        }
    }
}

fn coord(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn record_location(record: &Value) -> Option<(f64, f64, Option<String>)> {
    let latitude = coord(record.get("latitude"))?;
    let longitude = coord(record.get("longitude"))?;
    let address = record
        .get("geo_adresse")
        .or_else(|| record.get("adresse"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some((latitude, longitude, address))
}

/// Pick coordinates from a search hit, in precedence order: the siège when
/// its SIRET equals the query, then a matching establishment with the same
/// SIRET, then the siège of the same legal entity as a municipality-grade
/// approximation.
pub fn select_location(result: &Value, siret: &str) -> Option<CachedLocation> {
    let legal_category = result
        .get("nature_juridique")
        .or_else(|| result.get("categorie_juridique"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let siege = result.get("siege");
    if let Some(siege) = siege {
        if siege.get("siret").and_then(Value::as_str) == Some(siret) {
            if let Some((latitude, longitude, label)) =
                record_location(siege)
            {
                return Some(CachedLocation {
                    latitude,
                    longitude,
                    precision: GeoPrecision::Address,
                    label,
                    legal_category,
                });
            }
        }
    }

    if let Some(matching) = result
        .get("matching_etablissements")
        .and_then(Value::as_array)
    {
        for record in matching {
            if record.get("siret").and_then(Value::as_str) == Some(siret) {
                if let Some((latitude, longitude, label)) =
                    record_location(record)
                {
                    return Some(CachedLocation {
                        latitude,
                        longitude,
                        precision: GeoPrecision::Address,
                        label,
                        legal_category,
                    });
                }
            }
        }
    }

    // Same legal entity, different site: approximate, not address-precise.
    if let Some(siege) = siege {
        if let Some((latitude, longitude, label)) =
            record_location(siege)
        {
            return Some(CachedLocation {
                latitude,
                longitude,
                precision: GeoPrecision::Municipality,
                label,
                legal_category,
            });
        }
    }

    None
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn lookup_siret(&self, siret: &str) -> Result<RegistryOutcome> {
        let url = format!("{}/search", self.base);
        let response = self
            .client
            .get(&url)
            .query(&[("q", siret), ("mtm_campaign", "spe-dashboard")])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                debug!(siret, error = %err, "registry lookup failed");
                return Ok(RegistryOutcome::Miss);
            }
        };
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Ok(RegistryOutcome::RateLimited);
        }
        if !response.status().is_success() {
            return Ok(RegistryOutcome::Miss);
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(_) => return Ok(RegistryOutcome::Miss),
        };
        let outcome = body
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|result| select_location(result, siret))
            .map(RegistryOutcome::Found)
            .unwrap_or(RegistryOutcome::Miss);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_siege_match_is_address_precise() {
        let result = json!({
            "nature_juridique": "7120",
            "siege": {"siret": "11000000000001", "latitude": "48.85", "longitude": "2.35",
                      "geo_adresse": "1 rue de la Paix"}
        });
        let loc = select_location(&result, "11000000000001").unwrap();
        assert_eq!(loc.precision, GeoPrecision::Address);
        assert_eq!(loc.latitude, 48.85);
        assert_eq!(loc.legal_category.as_deref(), Some("7120"));
        assert_eq!(loc.label.as_deref(), Some("1 rue de la Paix"));
    }

    #[test]
    fn test_matching_establishment_preferred_over_foreign_siege() {
        let result = json!({
            "siege": {"siret": "11000000000099", "latitude": 40.0, "longitude": 1.0},
            "matching_etablissements": [
                {"siret": "11000000000001", "latitude": 45.0, "longitude": 5.0}
            ]
        });
        let loc = select_location(&result, "11000000000001").unwrap();
        assert_eq!(loc.precision, GeoPrecision::Address);
        assert_eq!(loc.latitude, 45.0);
    }

    #[test]
    fn test_foreign_siege_fallback_is_approximate() {
        let result = json!({
            "siege": {"siret": "11000000000099", "latitude": 40.0, "longitude": 1.0}
        });
        let loc = select_location(&result, "11000000000001").unwrap();
        assert_eq!(loc.precision, GeoPrecision::Municipality);
    }

    #[test]
    fn test_no_coordinates_is_a_miss() {
        let result = json!({"siege": {"siret": "11000000000001"}});
        assert!(select_location(&result, "11000000000001").is_none());
    }
}
