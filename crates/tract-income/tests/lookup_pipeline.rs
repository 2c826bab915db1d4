use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use tract_income::config::LookupConfig;
use tract_income::lookup::{
    AddressInput, BatchEntry, BatchOptions, BatchOrchestrator, CsvResultSink, GeocoderKind,
    IncomeLevel, LookupOptions, PipelineContext, ReferenceTableLoader,
};

const ONELINE: &str = "/geocoder/geographies/onelineaddress";
const COORDINATES: &str = "/geocoder/geographies/coordinates";
const GOOGLE: &str = "/maps/api/geocode/json";
const ACS: &str = "/data/2022/acs/acs5";

fn reference_file(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("FFIEC_Census_Tract_List.csv");
    let mut file = std::fs::File::create(&path).expect("create reference");
    file.write_all(
        b"FIPS code,Tract income level\n36119006600,Moderate\n17031839100,Low\n",
    )
    .expect("write reference");
    path
}

fn config(server: &MockServer, reference: PathBuf) -> LookupConfig {
    LookupConfig {
        census_geocoder_url: server.url(ONELINE),
        census_coordinates_url: server.url(COORDINATES),
        google_geocode_url: server.url(GOOGLE),
        google_maps_api_key: Some("test-key".into()),
        acs_url: server.url(ACS),
        reference_paths: vec![reference],
        http_timeout: Duration::from_secs(5),
        batch_delay: Duration::ZERO,
        ..LookupConfig::default()
    }
}

fn tract_json(state: &str, county: &str, tract: &str) -> serde_json::Value {
    json!({ "Census Tracts": [ { "STATE": state, "COUNTY": county, "TRACT": tract } ] })
}

async fn mock_acs(server: &MockServer, tract: &str, income: &str) {
    let tract = tract.to_string();
    let income = income.to_string();
    server
        .mock_async(move |when, then| {
            when.method(GET)
                .path(ACS)
                .query_param("for", format!("tract:{tract}"));
            then.status(200).json_body(json!([
                ["B19013_001E", "B01003_001E", "B25003_001E", "B25003_002E", "B08301_010E", "state", "county", "tract"],
                [income, "5210", "1900", "760", "410", "36", "119", tract]
            ]));
        })
        .await;
}

#[tokio::test]
async fn primary_match_never_calls_secondary() {
    let server = MockServer::start_async().await;
    let dir = TempDir::new().expect("temp dir");
    let loader = ReferenceTableLoader::new(vec![reference_file(&dir)]);

    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(ONELINE)
                .query_param("address", "25 Drake Ave, New Rochelle, NY 10805");
            then.status(200).json_body(json!({
                "result": {
                    "addressMatches": [{
                        "matchedAddress": "25 DRAKE AVE, NEW ROCHELLE, NY, 10805",
                        "coordinates": { "x": -73.7826, "y": 40.9037 },
                        "geographies": tract_json("36", "119", "006600")
                    }]
                }
            }));
        })
        .await;
    let google = server
        .mock_async(|when, then| {
            when.method(GET).path(GOOGLE);
            then.status(200)
                .json_body(json!({ "status": "ZERO_RESULTS", "results": [] }));
        })
        .await;
    mock_acs(&server, "006600", "61250").await;

    let context = PipelineContext::from_config(&config(&server, reference_file(&dir)), &loader)
        .expect("pipeline builds");
    let input = AddressInput::new("25 Drake Ave", "New Rochelle", "NY", Some("10805".into()));

    let record = context.lookup(&input, LookupOptions::default()).await;

    let resolved = record.resolved().expect("resolved");
    assert_eq!(resolved.geocoded.provider, GeocoderKind::Census);
    assert_eq!(
        resolved.geocoded.standardized_address,
        "25 DRAKE AVE, NEW ROCHELLE, NY, 10805"
    );
    assert_eq!(resolved.tract_income_level, Some(IncomeLevel::Moderate));
    assert_eq!(record.income_label(), "Moderate Income");
    assert_eq!(google.hits_async().await, 0);
}

#[tokio::test]
async fn secondary_provider_resolves_after_primary_exhausts() {
    let server = MockServer::start_async().await;
    let dir = TempDir::new().expect("temp dir");
    let loader = ReferenceTableLoader::new(vec![reference_file(&dir)]);

    let census = server
        .mock_async(|when, then| {
            when.method(GET).path(ONELINE);
            then.status(200)
                .json_body(json!({ "result": { "addressMatches": [] } }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(GOOGLE)
                .query_param("address", "1 Main St, Chicago, IL 60602");
            then.status(200)
                .json_body(json!({ "status": "ZERO_RESULTS", "results": [] }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(GOOGLE)
                .query_param("address", "1 main street, Chicago, IL 60602");
            then.status(200).json_body(json!({
                "status": "OK",
                "results": [{
                    "formatted_address": "1 N Main St, Chicago, IL 60602, USA",
                    "geometry": { "location": { "lat": 41.8827, "lng": -87.6233 } }
                }]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(COORDINATES);
            then.status(200).json_body(json!({
                "result": { "geographies": tract_json("17", "031", "839100") }
            }));
        })
        .await;
    mock_acs(&server, "839100", "-666666666").await;

    let context = PipelineContext::from_config(&config(&server, reference_file(&dir)), &loader)
        .expect("pipeline builds");
    let input = AddressInput::new("1 Main St", "Chicago", "IL", Some("60602".into()));

    let record = context.lookup(&input, LookupOptions::default()).await;

    let resolved = record.resolved().expect("resolved by secondary");
    assert_eq!(resolved.geocoded.provider, GeocoderKind::GoogleMaps);
    assert_eq!(
        resolved.geocoded.standardized_address,
        "1 N Main St, Chicago, IL 60602, USA"
    );
    assert_eq!(resolved.geocoded.geography.tract_id.as_str(), "17031839100");
    assert_eq!(record.income_label(), "Data Not Available");
    assert_eq!(record.ffiec_label(), "Low");
    // The original and the expanded variant both went to the primary first.
    assert_eq!(census.hits_async().await, 2);
}

#[tokio::test]
async fn batch_writes_csv_in_input_order() {
    let server = MockServer::start_async().await;
    let dir = TempDir::new().expect("temp dir");
    let loader = ReferenceTableLoader::new(vec![reference_file(&dir)]);

    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(ONELINE)
                .query_param("address", "25 Drake Ave, New Rochelle, NY 10805");
            then.status(200).json_body(json!({
                "result": {
                    "addressMatches": [{
                        "matchedAddress": "25 DRAKE AVE, NEW ROCHELLE, NY, 10805",
                        "coordinates": { "x": -73.7826, "y": 40.9037 },
                        "geographies": tract_json("36", "119", "006600")
                    }]
                }
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(ONELINE);
            then.status(200)
                .json_body(json!({ "result": { "addressMatches": [] } }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(GOOGLE);
            then.status(200)
                .json_body(json!({ "status": "ZERO_RESULTS", "results": [] }));
        })
        .await;
    mock_acs(&server, "006600", "61250").await;

    let lookup_config = config(&server, reference_file(&dir));
    let context = Arc::new(
        PipelineContext::from_config(&lookup_config, &loader).expect("pipeline builds"),
    );
    let batch = BatchOrchestrator::new(context, BatchOptions::from_config(&lookup_config));
    let output = dir.path().join("Results").join("out.csv");
    let mut sink = CsvResultSink::create(&output).expect("sink");

    let (report, written) = batch
        .run_into(
            vec![
                BatchEntry::from_line("25 Drake Ave, New Rochelle NY 10805"),
                BatchEntry::from_line("Nowhere"),
                BatchEntry::from_line("99 Phantom Rd, Atlantis ZZ 00000"),
            ],
            &mut sink,
        )
        .await;
    written.expect("results written");
    drop(sink);

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.successful, 1);
    let written = std::fs::read_to_string(&output).expect("csv written");
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(
        lines,
        vec![
            "original_address,income_level,ffiec_income_level",
            "\"25 Drake Ave, New Rochelle NY 10805\",Moderate Income,Moderate",
            "Nowhere,\"Failed - Address must be in format: \"\"Street, City State ZIP\"\"\",",
            "\"99 Phantom Rd, Atlantis ZZ 00000\",Failed - Address not found in Census geocoding database,",
        ]
    );
}
