use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{GeocodeError, GeocodingBackend};
use crate::lookup::address::AddressCandidate;
use crate::lookup::geography::{Coordinates, GeocodedMatch, GeocoderKind, TractGeography};
use crate::lookup::http;

const TRACT_LAYER: &str = "Census Tracts";
const BLOCK_GROUP_LAYER: &str = "Census Block Groups";

#[derive(Debug, Deserialize)]
struct OneLineEnvelope {
    result: OneLineResult,
}

#[derive(Debug, Deserialize)]
struct OneLineResult {
    #[serde(rename = "addressMatches", default)]
    address_matches: Vec<AddressMatch>,
}

#[derive(Debug, Deserialize)]
struct AddressMatch {
    #[serde(rename = "matchedAddress")]
    matched_address: Option<String>,
    coordinates: MatchCoordinates,
    #[serde(default)]
    geographies: Geographies,
}

#[derive(Debug, Deserialize)]
struct MatchCoordinates {
    x: f64,
    y: f64,
}

type Geographies = HashMap<String, Vec<GeographyRow>>;

#[derive(Debug, Deserialize)]
struct GeographyRow {
    #[serde(rename = "STATE")]
    state: Option<String>,
    #[serde(rename = "COUNTY")]
    county: Option<String>,
    #[serde(rename = "TRACT")]
    tract: Option<String>,
    #[serde(rename = "BLKGRP")]
    block_group: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CoordinatesEnvelope {
    result: CoordinatesResult,
}

#[derive(Debug, Deserialize)]
struct CoordinatesResult {
    #[serde(default)]
    geographies: Geographies,
}

/// First tract row with all three FIPS segments, or `None` for partial responses.
fn tract_from_geographies(geographies: &Geographies) -> Option<TractGeography> {
    let tract = geographies.get(TRACT_LAYER)?.first()?;
    let block_group = tract.block_group.as_deref().or_else(|| {
        geographies
            .get(BLOCK_GROUP_LAYER)
            .and_then(|rows| rows.first())
            .and_then(|row| row.block_group.as_deref())
    });

    match TractGeography::new(
        tract.state.as_deref()?,
        tract.county.as_deref()?,
        tract.tract.as_deref()?,
        block_group,
    ) {
        Ok(geography) => Some(geography),
        Err(err) => {
            debug!(error = %err, "census returned unusable tract geography");
            None
        }
    }
}

/// Primary tier: the U.S. Census one-line-address geographies endpoint.
pub struct CensusGeocoder {
    client: Client,
    url: String,
    benchmark: String,
    vintage: String,
}

impl CensusGeocoder {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        benchmark: impl Into<String>,
        vintage: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            benchmark: benchmark.into(),
            vintage: vintage.into(),
        }
    }
}

#[async_trait]
impl GeocodingBackend for CensusGeocoder {
    fn kind(&self) -> GeocoderKind {
        GeocoderKind::Census
    }

    async fn try_match(&self, candidate: &AddressCandidate) -> Result<GeocodedMatch, GeocodeError> {
        let transport = |err: reqwest::Error| GeocodeError::transport(self.kind(), http::describe(&err));

        let envelope = self
            .client
            .get(&self.url)
            .query(&[
                ("address", candidate.as_str()),
                ("benchmark", self.benchmark.as_str()),
                ("vintage", self.vintage.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(transport)?
            .json::<OneLineEnvelope>()
            .await
            .map_err(transport)?;

        let Some(first) = envelope.result.address_matches.into_iter().next() else {
            return Err(GeocodeError::NoMatch {
                provider: self.kind(),
            });
        };

        let geography = tract_from_geographies(&first.geographies).ok_or(GeocodeError::NoMatch {
            provider: self.kind(),
        })?;

        Ok(GeocodedMatch {
            candidate: candidate.as_str().to_string(),
            standardized_address: first
                .matched_address
                .unwrap_or_else(|| candidate.as_str().to_string()),
            coordinates: Coordinates {
                latitude: first.coordinates.y,
                longitude: first.coordinates.x,
            },
            geography,
            provider: self.kind(),
        })
    }
}

/// Reverse lookup of tract geography for a coordinate pair.
pub struct CensusCoordinateLookup {
    client: Client,
    url: String,
    benchmark: String,
    vintage: String,
}

impl CensusCoordinateLookup {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        benchmark: impl Into<String>,
        vintage: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            benchmark: benchmark.into(),
            vintage: vintage.into(),
        }
    }

    /// `Ok(None)` when the service answered but placed the point in no tract.
    pub async fn tract_at(
        &self,
        coordinates: Coordinates,
    ) -> Result<Option<TractGeography>, reqwest::Error> {
        let envelope = self
            .client
            .get(&self.url)
            .query(&[
                ("x", coordinates.longitude.to_string()),
                ("y", coordinates.latitude.to_string()),
                ("benchmark", self.benchmark.clone()),
                ("vintage", self.vintage.clone()),
                ("format", "json".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<CoordinatesEnvelope>()
            .await?;

        Ok(tract_from_geographies(&envelope.result.geographies))
    }
}
