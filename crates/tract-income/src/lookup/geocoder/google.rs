use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::census::CensusCoordinateLookup;
use super::{GeocodeError, GeocodingBackend};
use crate::lookup::address::AddressCandidate;
use crate::lookup::geography::{Coordinates, GeocodedMatch, GeocoderKind};
use crate::lookup::http;

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: String,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

/// Secondary tier: Google's geocoder supplies coordinates and a formatted
/// address; the tract comes from the Census coordinates endpoint.
pub struct GoogleMapsGeocoder {
    client: Client,
    url: String,
    api_key: Option<String>,
    tracts: CensusCoordinateLookup,
}

impl GoogleMapsGeocoder {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        api_key: Option<String>,
        tracts: CensusCoordinateLookup,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
            tracts,
        }
    }
}

#[async_trait]
impl GeocodingBackend for GoogleMapsGeocoder {
    fn kind(&self) -> GeocoderKind {
        GeocoderKind::GoogleMaps
    }

    async fn try_match(&self, candidate: &AddressCandidate) -> Result<GeocodedMatch, GeocodeError> {
        let transport = |err: reqwest::Error| GeocodeError::transport(self.kind(), http::describe(&err));

        let mut request = self
            .client
            .get(&self.url)
            .query(&[("address", candidate.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        let response = request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(transport)?
            .json::<GeocodeResponse>()
            .await
            .map_err(transport)?;

        let first = match response.status.as_str() {
            "OK" => response.results.into_iter().next(),
            "ZERO_RESULTS" => None,
            other => {
                let detail = response
                    .error_message
                    .map(|message| format!("{other}: {message}"))
                    .unwrap_or_else(|| other.to_string());
                return Err(GeocodeError::transport(self.kind(), detail));
            }
        };
        let Some(first) = first else {
            return Err(GeocodeError::NoMatch {
                provider: self.kind(),
            });
        };

        let coordinates = Coordinates {
            latitude: first.geometry.location.lat,
            longitude: first.geometry.location.lng,
        };
        let geography = self
            .tracts
            .tract_at(coordinates)
            .await
            .map_err(|err| {
                GeocodeError::transport(
                    self.kind(),
                    format!("tract lookup failed: {}", http::describe(&err)),
                )
            })?
            .ok_or(GeocodeError::NoMatch {
                provider: self.kind(),
            })?;

        Ok(GeocodedMatch {
            candidate: candidate.as_str().to_string(),
            standardized_address: first.formatted_address,
            coordinates,
            geography,
            provider: self.kind(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn geocoder(server: &MockServer, key: Option<&str>) -> GoogleMapsGeocoder {
        let client = http::build_client(Duration::from_secs(5)).expect("client builds");
        let tracts =
            CensusCoordinateLookup::new(client.clone(), server.url("/coordinates"), "2020", "2020");
        GoogleMapsGeocoder::new(
            client,
            server.url("/geocode/json"),
            key.map(str::to_string),
            tracts,
        )
    }

    #[tokio::test]
    async fn combines_google_address_with_census_tract() {
        let server = MockServer::start_async().await;
        let geocode = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/geocode/json")
                    .query_param("address", "25 drake avenue new rochelle ny 10805")
                    .query_param("key", "test-key");
                then.status(200).json_body(json!({
                    "status": "OK",
                    "results": [
                        {
                            "formatted_address": "25 Drake Ave, New Rochelle, NY 10805, USA",
                            "geometry": { "location": { "lat": 40.9037, "lng": -73.7826 } }
                        }
                    ]
                }));
            })
            .await;
        let coordinates = server
            .mock_async(|when, then| {
                when.method(GET).path("/coordinates").query_param("y", "40.9037");
                then.status(200).json_body(json!({
                    "result": {
                        "geographies": {
                            "Census Tracts": [ { "STATE": "36", "COUNTY": "119", "TRACT": "006600" } ]
                        }
                    }
                }));
            })
            .await;

        let found = geocoder(&server, Some("test-key"))
            .try_match(&AddressCandidate::new("25 drake avenue new rochelle ny 10805"))
            .await
            .expect("match");

        geocode.assert_async().await;
        coordinates.assert_async().await;
        assert_eq!(found.provider, GeocoderKind::GoogleMaps);
        assert_eq!(
            found.standardized_address,
            "25 Drake Ave, New Rochelle, NY 10805, USA"
        );
        assert_eq!(found.geography.tract_id.as_str(), "36119006600");
    }

    #[tokio::test]
    async fn zero_results_is_no_match() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/geocode/json");
                then.status(200)
                    .json_body(json!({ "status": "ZERO_RESULTS", "results": [] }));
            })
            .await;

        let err = geocoder(&server, None)
            .try_match(&AddressCandidate::new("nowhere"))
            .await
            .expect_err("no results");
        assert_eq!(
            err,
            GeocodeError::NoMatch {
                provider: GeocoderKind::GoogleMaps
            }
        );
    }

    #[tokio::test]
    async fn denied_request_is_transport_failure_with_detail() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/geocode/json");
                then.status(200).json_body(json!({
                    "status": "REQUEST_DENIED",
                    "error_message": "You must use an API key to authenticate each request.",
                    "results": []
                }));
            })
            .await;

        let err = geocoder(&server, None)
            .try_match(&AddressCandidate::new("1 Main St"))
            .await
            .expect_err("denied");
        match err {
            GeocodeError::Transport { message, .. } => {
                assert!(message.starts_with("REQUEST_DENIED"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn point_outside_any_tract_is_no_match() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/geocode/json");
                then.status(200).json_body(json!({
                    "status": "OK",
                    "results": [
                        {
                            "formatted_address": "Atlantic Ocean",
                            "geometry": { "location": { "lat": 30.0, "lng": -40.0 } }
                        }
                    ]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/coordinates");
                then.status(200)
                    .json_body(json!({ "result": { "geographies": {} } }));
            })
            .await;

        let err = geocoder(&server, None)
            .try_match(&AddressCandidate::new("middle of the ocean"))
            .await
            .expect_err("no tract");
        assert!(matches!(err, GeocodeError::NoMatch { .. }));
    }
}
