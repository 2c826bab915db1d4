//! Two-tier geocoding: every candidate against the primary backend, then every
//! candidate against the secondary backend, first structured match wins.

mod census;
mod google;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::address::AddressCandidate;
use super::geography::{GeocodedMatch, GeocoderKind};

pub use census::{CensusCoordinateLookup, CensusGeocoder};
pub use google::GoogleMapsGeocoder;

/// Why a single backend call did not yield a match. Neither variant is fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeocodeError {
    #[error("{} request failed: {message}", .provider.label())]
    Transport {
        provider: GeocoderKind,
        message: String,
    },
    #[error("{} found no match with tract geography", .provider.label())]
    NoMatch { provider: GeocoderKind },
}

impl GeocodeError {
    pub fn transport(provider: GeocoderKind, message: impl Into<String>) -> Self {
        Self::Transport {
            provider,
            message: message.into(),
        }
    }
}

/// Every candidate on every backend was tried without a match.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Address not found in Census geocoding database")]
pub struct ResolutionFailure {
    pub candidates_tried: usize,
    pub attempts: usize,
    pub last_error: Option<GeocodeError>,
}

/// One geocoding provider behind a uniform capability.
#[async_trait]
pub trait GeocodingBackend: Send + Sync {
    fn kind(&self) -> GeocoderKind;

    /// Match one candidate. A response without tract geography is `NoMatch`.
    async fn try_match(&self, candidate: &AddressCandidate) -> Result<GeocodedMatch, GeocodeError>;
}

/// Walks the backends in order; adding a tier is a matter of pushing another backend.
pub struct GeocodingResolver {
    backends: Vec<Arc<dyn GeocodingBackend>>,
    call_timeout: Duration,
}

impl GeocodingResolver {
    pub fn new(backends: Vec<Arc<dyn GeocodingBackend>>, call_timeout: Duration) -> Self {
        Self {
            backends,
            call_timeout,
        }
    }

    pub async fn resolve(
        &self,
        candidates: &[AddressCandidate],
    ) -> Result<GeocodedMatch, ResolutionFailure> {
        let mut attempts = 0;
        let mut last_error = None;

        for (tier, backend) in self.backends.iter().enumerate() {
            if tier > 0 {
                info!(
                    provider = backend.kind().label(),
                    candidates = candidates.len(),
                    "primary geocoding exhausted, falling back"
                );
            }

            for (index, candidate) in candidates.iter().enumerate() {
                attempts += 1;
                match self.attempt(backend.as_ref(), candidate).await {
                    Ok(found) => {
                        debug!(
                            provider = backend.kind().label(),
                            variation = index + 1,
                            tract = %found.geography.tract_id,
                            "address matched"
                        );
                        return Ok(found);
                    }
                    Err(err) => {
                        match &err {
                            GeocodeError::Transport { .. } => {
                                warn!(variation = index + 1, error = %err, "geocoding call failed")
                            }
                            GeocodeError::NoMatch { .. } => {
                                debug!(variation = index + 1, candidate = %candidate, "no match")
                            }
                        }
                        last_error = Some(err);
                    }
                }
            }
        }

        Err(ResolutionFailure {
            candidates_tried: candidates.len(),
            attempts,
            last_error,
        })
    }

    async fn attempt(
        &self,
        backend: &dyn GeocodingBackend,
        candidate: &AddressCandidate,
    ) -> Result<GeocodedMatch, GeocodeError> {
        match tokio::time::timeout(self.call_timeout, backend.try_match(candidate)).await {
            Ok(result) => result,
            Err(_) => Err(GeocodeError::transport(
                backend.kind(),
                format!("no response within {:?}", self.call_timeout),
            )),
        }
    }
}
