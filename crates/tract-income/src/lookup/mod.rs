//! Address to census tract resolution with ACS and FFIEC income classification.

pub mod address;
pub mod batch;
pub mod classifier;
pub mod demographics;
pub mod geocoder;
pub mod geography;
pub mod http;
pub mod pipeline;
pub mod reference;
pub mod sink;

pub use address::{AddressCandidate, AddressInput, AddressParseError, AddressVariationGenerator};
pub use batch::{BatchEntry, BatchOptions, BatchOrchestrator, BatchReport, BatchSummary};
pub use classifier::{TractClassifier, TractNotFound};
pub use demographics::{
    AcsIncomeBucket, DemographicFetcher, DemographicRecord, DemographicsError,
    IncomeClassification, StatisticsProvider,
};
pub use geocoder::{GeocodeError, GeocodingBackend, GeocodingResolver, ResolutionFailure};
pub use geography::{Coordinates, GeocodedMatch, GeocoderKind, TractGeography, TractId};
pub use pipeline::{
    FailureKind, FailureReason, ItemState, LookupOptions, LookupOutcome, PipelineContext,
    ResolvedLookup, ResultRecord,
};
pub use reference::{IncomeLevel, ReferenceError, ReferenceTable, ReferenceTableLoader};
pub use sink::{CsvResultSink, ResultSink, SinkError};
