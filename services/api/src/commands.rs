use crate::infra::{build_pipeline, interrupt_token, read_batch_entries, DeferredCsvSink};
use chrono::Local;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tract_income::config::AppConfig;
use tract_income::error::AppError;
use tract_income::lookup::sink::default_output_path;
use tract_income::lookup::{
    AddressInput, BatchOptions, BatchOrchestrator, BatchReport, CsvResultSink, LookupOptions,
    PipelineContext, ResultRecord, ResultSink,
};
use tract_income::telemetry;

#[derive(Args, Debug)]
pub(crate) struct LookupArgs {
    /// Street address, e.g. "25 Drake Ave"
    pub(crate) street: String,
    pub(crate) city: String,
    /// Two-letter state abbreviation
    pub(crate) state: String,
    #[arg(long)]
    pub(crate) zip: Option<String>,
    /// Print the result record as JSON instead of a report
    #[arg(long)]
    pub(crate) json: bool,
    /// Only try the address exactly as given
    #[arg(long)]
    pub(crate) no_fuzzy: bool,
    /// Also write the result as CSV (defaults to Results/census_results_<timestamp>.csv)
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    pub(crate) output_csv: Option<Option<PathBuf>>,
}

#[derive(Args, Debug)]
pub(crate) struct BatchArgs {
    /// CSV whose non-empty cells are "Street, City State ZIP" addresses
    pub(crate) csv: PathBuf,
    /// Write results as CSV (defaults to Results/census_results_<timestamp>.csv)
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    pub(crate) output_csv: Option<Option<PathBuf>>,
    /// Run every lookup but skip writing results
    #[arg(long)]
    pub(crate) dry_run: bool,
    /// Print the full batch report as JSON
    #[arg(long)]
    pub(crate) json: bool,
    /// Addresses in flight at once (overrides LOOKUP_CONCURRENCY)
    #[arg(long, value_parser = parse_concurrency)]
    pub(crate) concurrency: Option<usize>,
}

fn parse_concurrency(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("concurrency must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(err) => Err(err.to_string()),
    }
}

fn prepare() -> Result<(AppConfig, Arc<PipelineContext>), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let (_, pipeline) = build_pipeline(&config.lookup)?;
    Ok((config, pipeline))
}

fn resolve_output(target: Option<PathBuf>) -> PathBuf {
    target.unwrap_or_else(|| default_output_path(Local::now()))
}

pub(crate) async fn run_lookup(args: LookupArgs) -> Result<(), AppError> {
    let LookupArgs {
        street,
        city,
        state,
        zip,
        json,
        no_fuzzy,
        output_csv,
    } = args;

    let (_, pipeline) = prepare()?;
    let input = AddressInput::new(street, city, state, zip);
    let record = pipeline
        .lookup(&input, LookupOptions { fuzzy: !no_fuzzy })
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        render_lookup(&input, &record);
    }

    if let Some(target) = output_csv {
        let path = resolve_output(target);
        CsvResultSink::create(&path)?.write(std::slice::from_ref(&record))?;
        println!("\nResults saved to: {}", path.display());
    }

    Ok(())
}

pub(crate) async fn run_batch(args: BatchArgs) -> Result<(), AppError> {
    let BatchArgs {
        csv,
        output_csv,
        dry_run,
        json,
        concurrency,
    } = args;

    let (config, pipeline) = prepare()?;
    let entries = read_batch_entries(&csv)?;
    if entries.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "no addresses found in {}",
            csv.display()
        )));
    }

    let defaults = BatchOptions::from_config(&config.lookup);
    let options = BatchOptions {
        concurrency: concurrency.unwrap_or(defaults.concurrency),
        dry_run,
        ..defaults
    };
    let orchestrator =
        BatchOrchestrator::new(pipeline, options).with_cancellation(interrupt_token());

    let (report, saved) = match output_csv {
        Some(target) => {
            let mut sink = DeferredCsvSink::new(resolve_output(target));
            let (report, written) = orchestrator.run_into(entries, &mut sink).await;
            let saved = written.map(|()| sink.written_path().map(Path::to_path_buf));
            (report, saved)
        }
        None => (orchestrator.run(entries).await, Ok(None)),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render_batch(&report);
    }

    // Results are printed before a failed save is reported.
    match saved? {
        Some(path) => println!("\nResults saved to: {}", path.display()),
        None if report.dry_run => println!("\nDry run: results were not written"),
        None => {}
    }

    Ok(())
}

fn render_lookup(input: &AddressInput, record: &ResultRecord) {
    println!("Census demographics lookup");
    println!("- Address: {}", input.street);
    println!("- City: {}", input.city);
    println!("- State: {}", input.state);
    if let Some(zip) = input.zip() {
        println!("- ZIP: {zip}");
    }

    let Some(resolved) = record.resolved() else {
        if let Some(reason) = record.failure() {
            println!("\nLookup failed: {}", reason.message);
            println!("  Suggestions:");
            println!("  - Check the street spelling and number");
            println!("  - Include a ZIP code");
            println!("  - Use a full state abbreviation (e.g. NY)");
        }
        return;
    };

    let geocoded = &resolved.geocoded;
    println!("\nAddress found via {}", geocoded.provider.label());
    println!("- Standardized: {}", geocoded.standardized_address);
    println!(
        "- Coordinates: {:.4}, {:.4}",
        geocoded.coordinates.latitude, geocoded.coordinates.longitude
    );

    let geography = &geocoded.geography;
    println!("\nCensus tract");
    println!("- Tract ID: {}", geography.tract_id);
    println!("- State FIPS: {}", geography.state_fips);
    println!("- County FIPS: {}", geography.county_fips);
    println!("- Tract FIPS: {}", geography.tract_code);

    println!("\nIncome");
    match resolved
        .demographics
        .as_ref()
        .and_then(|record| record.median_household_income)
    {
        Some(income) => {
            println!("- Median household income: ${}", group_thousands(u64::from(income)));
            println!("- Income level: {}", resolved.income_classification.label());
        }
        None => println!("- Income data: Not Available"),
    }
    match (&resolved.tract_income_level, &resolved.tract_income_error) {
        (Some(level), _) => println!("- FFIEC tract income level: {level}"),
        (None, Some(err)) => println!("- FFIEC tract income level: Not Available ({err})"),
        (None, None) => println!("- FFIEC tract income level: Not Available"),
    }

    let Some(demographics) = &resolved.demographics else {
        if let Some(err) = &resolved.demographics_error {
            println!("\nDemographics unavailable: {err}");
        }
        return;
    };
    println!("\nPopulation and housing");
    println!(
        "- Total population: {}",
        group_thousands(demographics.total_population)
    );
    println!(
        "- Total housing units: {}",
        group_thousands(demographics.total_housing_units)
    );
    if let Some(rate) = demographics.owner_occupied_rate {
        println!("- Owner occupied rate: {:.1}%", rate * 100.0);
    }
    println!(
        "- Public transit commuters: {}",
        group_thousands(demographics.public_transportation_commuters)
    );
    println!(
        "\nData source: {} ({})",
        demographics.data_source.survey, demographics.data_source.year
    );
}

fn render_batch(report: &BatchReport) {
    let summary = &report.summary;
    println!("Batch processing results");
    println!("- Total addresses processed: {}", summary.total);
    println!("- Successful: {}", summary.successful);
    println!("- Failed: {}", summary.failed);
    if report.cancelled {
        println!("- Interrupted: remaining addresses were not looked up");
    }

    let failures: Vec<_> = report
        .records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| record.failure().map(|reason| (index + 1, record, reason)))
        .collect();
    if !failures.is_empty() {
        println!("\nFailed addresses:");
        for (item, record, reason) in failures {
            println!("  {item}. {}", record.original_address);
            println!("     {}", reason.message);
        }
    }

    if summary.successful > 0 {
        println!("\nIncome levels:");
        for (label, count) in &summary.income_levels {
            println!("  - {label}: {count} addresses");
        }
        println!("\nFFIEC tract income levels:");
        for (label, count) in &summary.ffiec_levels {
            println!("  - {label}: {count} addresses");
        }
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}
