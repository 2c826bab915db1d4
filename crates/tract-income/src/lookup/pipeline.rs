//! Single-address lookup: variation generation, two-tier geocoding, then the
//! ACS and FFIEC classifications for the resolved tract.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::address::{AddressInput, AddressVariationGenerator};
use super::classifier::TractClassifier;
use super::demographics::{AcsClient, DemographicFetcher, DemographicRecord, IncomeClassification};
use super::geocoder::{
    CensusCoordinateLookup, CensusGeocoder, GeocodingBackend, GeocodingResolver,
    GoogleMapsGeocoder,
};
use super::geography::GeocodedMatch;
use super::http;
use super::reference::{IncomeLevel, ReferenceTableLoader};
use crate::config::LookupConfig;
use crate::error::AppError;

/// Per-lookup switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupOptions {
    /// Try abbreviation, unit and punctuation variations after the original.
    pub fuzzy: bool,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self { fuzzy: true }
    }
}

/// Lifecycle of one address within a lookup or batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Resolving,
    Classifying,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidAddress,
    Resolution,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A geocoded address with whatever classifications could be attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedLookup {
    pub geocoded: GeocodedMatch,
    pub demographics: Option<DemographicRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demographics_error: Option<String>,
    pub income_classification: IncomeClassification,
    pub tract_income_level: Option<IncomeLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tract_income_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tract_income_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LookupOutcome {
    Resolved(Box<ResolvedLookup>),
    Failed { reason: FailureReason },
}

/// The outcome for one input address. Never persisted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<AddressInput>,
    pub original_address: String,
    #[serde(flatten)]
    pub outcome: LookupOutcome,
}

impl ResultRecord {
    pub fn failed(
        input: Option<AddressInput>,
        original_address: impl Into<String>,
        reason: FailureReason,
    ) -> Self {
        Self {
            input,
            original_address: original_address.into(),
            outcome: LookupOutcome::Failed { reason },
        }
    }

    pub fn resolved(&self) -> Option<&ResolvedLookup> {
        match &self.outcome {
            LookupOutcome::Resolved(resolved) => Some(resolved),
            LookupOutcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.outcome {
            LookupOutcome::Resolved(_) => None,
            LookupOutcome::Failed { reason } => Some(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.resolved().is_some()
    }

    pub fn state(&self) -> ItemState {
        if self.is_success() {
            ItemState::Done
        } else {
            ItemState::Failed
        }
    }

    /// ACS bucket label, or `Failed - <reason>` for unresolved addresses.
    pub fn income_label(&self) -> String {
        match &self.outcome {
            LookupOutcome::Resolved(resolved) => resolved.income_classification.label().to_string(),
            LookupOutcome::Failed { reason } => format!("Failed - {}", reason.message),
        }
    }

    /// FFIEC level label, `Error - <reason>` when the tract was not classified,
    /// and empty for unresolved addresses.
    pub fn ffiec_label(&self) -> String {
        let Some(resolved) = self.resolved() else {
            return String::new();
        };
        match (&resolved.tract_income_level, &resolved.tract_income_error) {
            (Some(level), _) => level.label().to_string(),
            (None, Some(error)) => format!("Error - {error}"),
            (None, None) => String::new(),
        }
    }
}

/// Owned pipeline state, built once and shared by every lookup in the process.
pub struct PipelineContext {
    generator: AddressVariationGenerator,
    resolver: GeocodingResolver,
    demographics: DemographicFetcher,
    classifier: TractClassifier,
}

impl PipelineContext {
    pub fn new(
        resolver: GeocodingResolver,
        demographics: DemographicFetcher,
        classifier: TractClassifier,
    ) -> Self {
        Self {
            generator: AddressVariationGenerator::default(),
            resolver,
            demographics,
            classifier,
        }
    }

    /// Wires the HTTP backends from configuration. Fails when the reference
    /// table cannot be loaded.
    pub fn from_config(
        config: &LookupConfig,
        reference: &ReferenceTableLoader,
    ) -> Result<Self, AppError> {
        let table = reference.load()?;
        let client = http::build_client(config.http_timeout)?;

        if config.google_maps_api_key.is_none() {
            warn!("GOOGLE_MAPS_API_KEY is not set; Google Maps fallback requests will be sent without a key");
        }

        let census = CensusGeocoder::new(
            client.clone(),
            config.census_geocoder_url.clone(),
            config.census_benchmark.clone(),
            config.census_vintage.clone(),
        );
        let coordinates = CensusCoordinateLookup::new(
            client.clone(),
            config.census_coordinates_url.clone(),
            config.census_benchmark.clone(),
            config.census_vintage.clone(),
        );
        let google = GoogleMapsGeocoder::new(
            client.clone(),
            config.google_geocode_url.clone(),
            config.google_maps_api_key.clone(),
            coordinates,
        );
        let backends: Vec<Arc<dyn GeocodingBackend>> = vec![
            Arc::new(census) as Arc<dyn GeocodingBackend>,
            Arc::new(google) as Arc<dyn GeocodingBackend>,
        ];

        let acs = AcsClient::new(
            client,
            config.acs_url.clone(),
            config.acs_year.clone(),
            config.census_api_key.clone(),
        );

        info!(
            tracts = table.len(),
            reference = table.source(),
            "lookup pipeline ready"
        );

        Ok(Self::new(
            GeocodingResolver::new(backends, config.http_timeout),
            DemographicFetcher::new(Arc::new(acs), config.http_timeout),
            TractClassifier::new(table),
        ))
    }

    pub fn reference_source(&self) -> &str {
        self.classifier.source()
    }

    pub async fn lookup(&self, input: &AddressInput, options: LookupOptions) -> ResultRecord {
        self.lookup_observed(input, options, |_| {}).await
    }

    /// Like [`lookup`](Self::lookup), reporting each state transition to `observe`.
    pub async fn lookup_observed<F>(
        &self,
        input: &AddressInput,
        options: LookupOptions,
        mut observe: F,
    ) -> ResultRecord
    where
        F: FnMut(ItemState) + Send,
    {
        observe(ItemState::Pending);
        let original_address = input.one_line();

        if let Err(err) = input.validate() {
            observe(ItemState::Failed);
            return ResultRecord::failed(
                Some(input.clone()),
                original_address,
                FailureReason::new(FailureKind::InvalidAddress, err.to_string()),
            );
        }

        observe(ItemState::Resolving);
        let candidates = if options.fuzzy {
            self.generator.generate(input)
        } else {
            self.generator.original(input)
        };
        debug!(address = %original_address, candidates = candidates.len(), "resolving address");

        let geocoded = match self.resolver.resolve(&candidates).await {
            Ok(found) => found,
            Err(failure) => {
                info!(
                    address = %original_address,
                    attempts = failure.attempts,
                    "address could not be resolved"
                );
                observe(ItemState::Failed);
                return ResultRecord::failed(
                    Some(input.clone()),
                    original_address,
                    FailureReason::new(FailureKind::Resolution, failure.to_string()),
                );
            }
        };

        observe(ItemState::Classifying);
        let tract_id = geocoded.geography.tract_id.clone();

        let (demographics, demographics_error) =
            match self.demographics.fetch(&geocoded.geography).await {
                Ok(record) => (Some(record), None),
                Err(err) => {
                    warn!(tract = %tract_id, error = %err, "demographics unavailable");
                    (None, Some(err.to_string()))
                }
            };
        let income_classification = demographics
            .as_ref()
            .map(|record| record.income_classification)
            .unwrap_or(IncomeClassification::DataNotAvailable);

        let (tract_income_level, tract_income_error, tract_income_source) =
            match self.classifier.classify(&tract_id) {
                Ok(level) => (
                    Some(level),
                    None,
                    Some(self.classifier.source().to_string()),
                ),
                Err(err) => {
                    debug!(tract = %tract_id, "tract outside FFIEC coverage");
                    (None, Some(err.to_string()), None)
                }
            };

        observe(ItemState::Done);
        ResultRecord {
            input: Some(input.clone()),
            original_address,
            outcome: LookupOutcome::Resolved(Box::new(ResolvedLookup {
                geocoded,
                demographics,
                demographics_error,
                income_classification,
                tract_income_level,
                tract_income_error,
                tract_income_source,
            })),
        }
    }
}
