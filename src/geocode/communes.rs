//! Tier-2 lookup: commune centroid from the geography API.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::cache::{CachedLocation, GeoPrecision};
use crate::config::ApiConfig;
use crate::error::Result;

#[async_trait]
pub trait CommunesClient: Send + Sync {
    /// Centroid of a commune by INSEE code, `None` on any failure.
    async fn lookup_insee(&self, insee: &str) -> Result<Option<CachedLocation>>;
}

pub struct HttpCommunesClient {
    client: Client,
    base: String,
}

impl HttpCommunesClient {
    pub fn new(config: &ApiConfig) -> Self {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(config.request_timeout)
            .gzip(true)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base: config.geo_base.trim_end_matches('/').to_string(),
        }
    }
}

/// The API returns GeoJSON order `[lon, lat]`.
pub fn parse_commune(body: &Value) -> Option<CachedLocation> {
    let coordinates = body
        .get("centre")?
        .get("coordinates")?
        .as_array()?;
    let longitude = coordinates.first()?.as_f64()?;
    let latitude = coordinates.get(1)?.as_f64()?;
    Some(CachedLocation {
        latitude,
        longitude,
        precision: GeoPrecision::Municipality,
        label: body.get("nom").and_then(Value::as_str).map(str::to_string),
        legal_category: None,
    })
}

#[async_trait]
impl CommunesClient for HttpCommunesClient {
    async fn lookup_insee(&self, insee: &str) -> Result<Option<CachedLocation>> {
        let url = format!("{}/communes/{}", self.base, insee);
        let response = self
            .client
            .get(&url)
            .query(&[("fields", "centre,nom")])
            .send()
            .await;
        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(insee, status = r.status().as_u16(), "commune lookup rejected");
                return Ok(None);
            }
            Err(err) => {
                debug!(insee, error = %err, "commune lookup failed");
                return Ok(None);
            }
        };
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(_) => return Ok(None),
        };
        Ok(parse_commune(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_commune_swaps_lon_lat() {
        let body = json!({"nom": "Ajaccio", "centre": {"coordinates": [8.73, 41.92]}});
        let loc = parse_commune(&body).unwrap();
        assert_eq!(loc.latitude, 41.92);
        assert_eq!(loc.longitude, 8.73);
        assert_eq!(loc.precision, GeoPrecision::Municipality);
        assert_eq!(loc.label.as_deref(), Some("Ajaccio"));
    }

    #[test]
    fn test_parse_commune_without_centre() {
        assert!(parse_commune(&json!({"nom": "X"})).is_none());
    }
}
