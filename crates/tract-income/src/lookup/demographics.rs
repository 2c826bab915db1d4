//! ACS five-year tract statistics, the per-run memo in front of them, and the
//! household-income buckets derived from the median income.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, info};

use super::geography::{TractGeography, TractId};
use super::http;

pub const MEDIAN_HOUSEHOLD_INCOME: &str = "B19013_001E";
pub const TOTAL_POPULATION: &str = "B01003_001E";
pub const TOTAL_HOUSING_UNITS: &str = "B25003_001E";
pub const OWNER_OCCUPIED_UNITS: &str = "B25003_002E";
pub const TRANSIT_COMMUTERS: &str = "B08301_010E";

pub const ACS_VARIABLES: [&str; 5] = [
    MEDIAN_HOUSEHOLD_INCOME,
    TOTAL_POPULATION,
    TOTAL_HOUSING_UNITS,
    OWNER_OCCUPIED_UNITS,
    TRANSIT_COMMUTERS,
];

const ACS_SURVEY: &str = "American Community Survey 5-Year Estimates";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DemographicsError {
    #[error("Census API error: {0}")]
    Transport(String),
    #[error("No ACS data found for tract {0}")]
    DataUnavailable(TractId),
}

/// Six ordered household-income buckets. Each threshold belongs to the higher bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AcsIncomeBucket {
    VeryLow,
    Low,
    Moderate,
    Middle,
    UpperMiddle,
    High,
}

impl AcsIncomeBucket {
    pub const ALL: [Self; 6] = [
        Self::VeryLow,
        Self::Low,
        Self::Moderate,
        Self::Middle,
        Self::UpperMiddle,
        Self::High,
    ];

    pub fn classify(median_income: u32) -> Self {
        match median_income {
            0..=29_999 => Self::VeryLow,
            30_000..=49_999 => Self::Low,
            50_000..=74_999 => Self::Moderate,
            75_000..=99_999 => Self::Middle,
            100_000..=149_999 => Self::UpperMiddle,
            _ => Self::High,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::VeryLow => "Very Low Income",
            Self::Low => "Low Income",
            Self::Moderate => "Moderate Income",
            Self::Middle => "Middle Income",
            Self::UpperMiddle => "Upper Middle Income",
            Self::High => "High Income",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncomeClassification {
    Bucket(AcsIncomeBucket),
    DataNotAvailable,
}

impl IncomeClassification {
    pub fn from_income(median_income: Option<u32>) -> Self {
        median_income
            .map(|income| Self::Bucket(AcsIncomeBucket::classify(income)))
            .unwrap_or(Self::DataNotAvailable)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Bucket(bucket) => bucket.label(),
            Self::DataNotAvailable => "Data Not Available",
        }
    }
}

impl Serialize for IncomeClassification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSource {
    pub survey: String,
    pub year: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemographicRecord {
    /// Absent when the Census Bureau suppressed the estimate.
    pub median_household_income: Option<u32>,
    pub total_population: u64,
    pub total_housing_units: u64,
    pub owner_occupied_housing: u64,
    pub public_transportation_commuters: u64,
    pub owner_occupied_rate: Option<f64>,
    pub income_classification: IncomeClassification,
    pub data_source: DataSource,
}

impl DemographicRecord {
    /// Builds a record from one ACS row keyed by variable name. Negative values
    /// are Census annotation sentinels such as `-666666666`.
    pub fn from_acs_values(values: &HashMap<String, String>, year: &str) -> Self {
        let number = |variable: &str| {
            values
                .get(variable)
                .and_then(|raw| raw.trim().parse::<i64>().ok())
                .filter(|value| *value >= 0)
        };
        let count = |variable: &str| number(variable).map_or(0, |value| value as u64);

        let median_household_income =
            number(MEDIAN_HOUSEHOLD_INCOME).and_then(|value| u32::try_from(value).ok());
        let total_housing_units = count(TOTAL_HOUSING_UNITS);
        let owner_occupied_housing = count(OWNER_OCCUPIED_UNITS);
        let owner_occupied_rate = (total_housing_units > 0).then(|| {
            let rate = owner_occupied_housing as f64 / total_housing_units as f64;
            (rate * 1000.0).round() / 1000.0
        });

        Self {
            median_household_income,
            total_population: count(TOTAL_POPULATION),
            total_housing_units,
            owner_occupied_housing,
            public_transportation_commuters: count(TRANSIT_COMMUTERS),
            owner_occupied_rate,
            income_classification: IncomeClassification::from_income(median_household_income),
            data_source: DataSource {
                survey: ACS_SURVEY.to_string(),
                year: year.to_string(),
            },
        }
    }
}

/// Source of per-tract statistics.
#[async_trait]
pub trait StatisticsProvider: Send + Sync {
    async fn fetch_tract(
        &self,
        geography: &TractGeography,
    ) -> Result<DemographicRecord, DemographicsError>;
}

/// Census Data API client for the ACS five-year detailed tables.
pub struct AcsClient {
    client: Client,
    url: String,
    year: String,
    api_key: Option<String>,
}

impl AcsClient {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        year: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            year: year.into(),
            api_key,
        }
    }
}

#[async_trait]
impl StatisticsProvider for AcsClient {
    async fn fetch_tract(
        &self,
        geography: &TractGeography,
    ) -> Result<DemographicRecord, DemographicsError> {
        let transport = |err: reqwest::Error| DemographicsError::Transport(http::describe(&err));

        let mut params = vec![
            ("get", ACS_VARIABLES.join(",")),
            ("for", format!("tract:{}", geography.tract_code)),
            ("in", format!("state:{}", geography.state_fips)),
            ("in", format!("county:{}", geography.county_fips)),
        ];
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }

        debug!(tract = %geography.tract_id, "fetching ACS statistics");
        let response = self
            .client
            .get(&self.url)
            .query(&params)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(transport)?;

        if response.status() == StatusCode::NO_CONTENT {
            return Err(DemographicsError::DataUnavailable(geography.tract_id.clone()));
        }

        let rows: Vec<Vec<Value>> = response.json().await.map_err(transport)?;
        let mut rows = rows.into_iter();
        let (Some(header), Some(first)) = (rows.next(), rows.next()) else {
            return Err(DemographicsError::DataUnavailable(geography.tract_id.clone()));
        };

        let values: HashMap<String, String> = header
            .iter()
            .zip(first.iter())
            .filter_map(|(name, value)| Some((cell_text(name)?, cell_text(value)?)))
            .collect();

        Ok(DemographicRecord::from_acs_values(&values, &self.year))
    }
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Memoizing front for a [`StatisticsProvider`]. Lookups for a tract already
/// seen in this process never reach the provider again.
pub struct DemographicFetcher {
    provider: Arc<dyn StatisticsProvider>,
    memo: DashMap<TractId, DemographicRecord>,
    call_timeout: Duration,
}

impl DemographicFetcher {
    pub fn new(provider: Arc<dyn StatisticsProvider>, call_timeout: Duration) -> Self {
        Self {
            provider,
            memo: DashMap::new(),
            call_timeout,
        }
    }

    pub async fn fetch(
        &self,
        geography: &TractGeography,
    ) -> Result<DemographicRecord, DemographicsError> {
        if let Some(record) = self.memo.get(&geography.tract_id) {
            debug!(tract = %geography.tract_id, "demographics memo hit");
            return Ok(record.clone());
        }

        let record = tokio::time::timeout(self.call_timeout, self.provider.fetch_tract(geography))
            .await
            .map_err(|_| {
                DemographicsError::Transport(format!("no response within {:?}", self.call_timeout))
            })??;

        // Concurrent fetches of one tract may race here; the first write wins.
        let stored = self
            .memo
            .entry(geography.tract_id.clone())
            .or_insert(record)
            .clone();
        info!(
            tract = %geography.tract_id,
            income = stored.income_classification.label(),
            "demographics fetched"
        );
        Ok(stored)
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn geography(tract: &str) -> TractGeography {
        TractGeography::new("36", "119", tract, None).expect("valid geography")
    }

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn bucket_boundaries_belong_to_the_higher_bucket() {
        let cases = [
            (29_999, AcsIncomeBucket::VeryLow),
            (30_000, AcsIncomeBucket::Low),
            (49_999, AcsIncomeBucket::Low),
            (50_000, AcsIncomeBucket::Moderate),
            (74_999, AcsIncomeBucket::Moderate),
            (75_000, AcsIncomeBucket::Middle),
            (99_999, AcsIncomeBucket::Middle),
            (100_000, AcsIncomeBucket::UpperMiddle),
            (149_999, AcsIncomeBucket::UpperMiddle),
            (150_000, AcsIncomeBucket::High),
        ];
        for (income, expected) in cases {
            assert_eq!(AcsIncomeBucket::classify(income), expected, "income {income}");
        }
    }

    #[test]
    fn suppressed_income_is_data_not_available() {
        let record = DemographicRecord::from_acs_values(
            &values(&[
                (MEDIAN_HOUSEHOLD_INCOME, "-666666666"),
                (TOTAL_POPULATION, "4120"),
                (TOTAL_HOUSING_UNITS, "0"),
            ]),
            "2022",
        );
        assert_eq!(record.median_household_income, None);
        assert_eq!(
            record.income_classification,
            IncomeClassification::DataNotAvailable
        );
        assert_eq!(record.income_classification.label(), "Data Not Available");
        assert_eq!(record.total_population, 4120);
        assert_eq!(record.owner_occupied_rate, None);
    }

    #[test]
    fn owner_occupied_rate_rounds_to_three_places() {
        let record = DemographicRecord::from_acs_values(
            &values(&[
                (MEDIAN_HOUSEHOLD_INCOME, "61250"),
                (TOTAL_HOUSING_UNITS, "3"),
                (OWNER_OCCUPIED_UNITS, "2"),
            ]),
            "2022",
        );
        assert_eq!(record.owner_occupied_rate, Some(0.667));
        assert_eq!(
            record.income_classification,
            IncomeClassification::Bucket(AcsIncomeBucket::Moderate)
        );
        assert_eq!(record.data_source.year, "2022");
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StatisticsProvider for CountingProvider {
        async fn fetch_tract(
            &self,
            geography: &TractGeography,
        ) -> Result<DemographicRecord, DemographicsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if geography.tract_code == "999999" {
                return Err(DemographicsError::DataUnavailable(geography.tract_id.clone()));
            }
            Ok(DemographicRecord::from_acs_values(
                &values(&[(MEDIAN_HOUSEHOLD_INCOME, "82000")]),
                "2022",
            ))
        }
    }

    #[tokio::test]
    async fn memo_prevents_repeat_calls_for_the_same_tract() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let fetcher = DemographicFetcher::new(provider.clone(), Duration::from_secs(10));

        let first = fetcher.fetch(&geography("006600")).await.expect("record");
        let second = fetcher.fetch(&geography("006600")).await.expect("record");
        fetcher.fetch(&geography("006700")).await.expect("record");

        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fetcher.memo_len(), 2);
    }

    /// Answers after a delay, so concurrent fetches of one tract overlap.
    struct SlowProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StatisticsProvider for SlowProvider {
        async fn fetch_tract(
            &self,
            _geography: &TractGeography,
        ) -> Result<DemographicRecord, DemographicsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(DemographicRecord::from_acs_values(
                &values(&[(MEDIAN_HOUSEHOLD_INCOME, "82000")]),
                "2022",
            ))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetches_of_one_tract_store_one_entry() {
        let provider = Arc::new(SlowProvider {
            calls: AtomicUsize::new(0),
        });
        let fetcher = DemographicFetcher::new(provider.clone(), Duration::from_secs(10));
        let tract = geography("006600");

        let (first, second) = tokio::join!(fetcher.fetch(&tract), fetcher.fetch(&tract));

        assert_eq!(first.expect("record"), second.expect("record"));
        assert_eq!(fetcher.memo_len(), 1);
        assert!(provider.calls.load(Ordering::SeqCst) <= 2);

        fetcher.fetch(&tract).await.expect("memo hit");
        assert!(provider.calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failures_are_not_memoized() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let fetcher = DemographicFetcher::new(provider.clone(), Duration::from_secs(10));

        for _ in 0..2 {
            let err = fetcher
                .fetch(&geography("999999"))
                .await
                .expect_err("unavailable");
            assert!(matches!(err, DemographicsError::DataUnavailable(_)));
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fetcher.memo_len(), 0);
    }

    fn acs_client(server: &MockServer) -> AcsClient {
        let client = http::build_client(Duration::from_secs(5)).expect("client builds");
        AcsClient::new(client, server.url("/data/2022/acs/acs5"), "2022", None)
    }

    #[tokio::test]
    async fn acs_client_maps_header_and_first_row() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/data/2022/acs/acs5")
                    .query_param("get", ACS_VARIABLES.join(","))
                    .query_param("for", "tract:006600");
                then.status(200).json_body(json!([
                    ["B19013_001E", "B01003_001E", "B25003_001E", "B25003_002E", "B08301_010E", "state", "county", "tract"],
                    ["48750", "5210", "1900", "760", "410", "36", "119", "006600"]
                ]));
            })
            .await;

        let record = acs_client(&server)
            .fetch_tract(&geography("006600"))
            .await
            .expect("record");

        mock.assert_async().await;
        assert_eq!(record.median_household_income, Some(48_750));
        assert_eq!(
            record.income_classification,
            IncomeClassification::Bucket(AcsIncomeBucket::Low)
        );
        assert_eq!(record.public_transportation_commuters, 410);
        assert_eq!(record.owner_occupied_rate, Some(0.4));
    }

    #[tokio::test]
    async fn acs_client_reports_missing_rows_and_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).query_param("for", "tract:000100");
                then.status(204);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).query_param("for", "tract:000200");
                then.status(200).json_body(json!([["B19013_001E"]]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).query_param("for", "tract:000300");
                then.status(500);
            })
            .await;

        let client = acs_client(&server);
        assert!(matches!(
            client.fetch_tract(&geography("000100")).await,
            Err(DemographicsError::DataUnavailable(_))
        ));
        assert!(matches!(
            client.fetch_tract(&geography("000200")).await,
            Err(DemographicsError::DataUnavailable(_))
        ));
        assert!(matches!(
            client.fetch_tract(&geography("000300")).await,
            Err(DemographicsError::Transport(_))
        ));
    }
}
