use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use finbif_occurrences::api::{CancelToken, WarehouseHttpClient, MAX_OCCURRENCES};
use finbif_occurrences::app::{App, IngestOptions};
use finbif_occurrences::domain::{
    parse_wildcard, validate_access_token, validate_date_range, Crs, FeatureKind, QueryParams,
};
use finbif_occurrences::lookups::SessionLookups;
use finbif_occurrences::output::{GeoJsonLayerWriter, JsonOutput, TracingProgress};

#[derive(Parser)]
#[command(name = "finbif-occ")]
#[command(about = "Fetch FinBIF warehouse occurrences into geometry-partitioned GeoJSON layers")]
#[command(version, author)]
struct Cli {
    /// FinBIF API access token.
    #[arg(long, env = "FINBIF_ACCESS_TOKEN")]
    access_token: String,

    /// Taxon identifier filter (e.g. MX.37580).
    #[arg(long)]
    taxon: Option<String>,

    /// Collection identifier filter (e.g. HR.48).
    #[arg(long)]
    collection: Option<String>,

    /// Start of the event date range (YYYY-MM-DD).
    #[arg(long)]
    date_begin: Option<NaiveDate>,

    /// End of the event date range (YYYY-MM-DD).
    #[arg(long)]
    date_end: Option<NaiveDate>,

    /// Extra raw warehouse filter, repeatable (key=value).
    #[arg(long = "filter")]
    filters: Vec<String>,

    #[arg(long, value_enum, default_value = "euref")]
    crs: Crs,

    #[arg(long, value_enum, default_value = "center-point")]
    feature_kind: FeatureKind,

    /// Abort if the query matches more occurrences than this.
    #[arg(long, default_value_t = MAX_OCCURRENCES)]
    limit: u64,

    /// Language for collection names and enumeration labels.
    #[arg(long, default_value = "en")]
    lang: String,

    /// Use apitest.laji.fi instead of the production API.
    #[arg(long)]
    test_api: bool,

    /// Disable TLS certificate verification (self-signed certificate
    /// diagnosis only).
    #[arg(long)]
    insecure_tls: bool,

    /// Directory the per-geometry-kind GeoJSON layers are written to.
    #[arg(long, default_value = ".")]
    output: PathBuf,
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    validate_access_token(&cli.access_token)?;

    let mut params = QueryParams::new();
    params.set("crs", cli.crs.api_value());
    params.set("featureType", cli.feature_kind.api_value());
    if let Some(taxon) = &cli.taxon {
        params.set("taxonId", taxon.as_str());
    }
    if let Some(collection) = &cli.collection {
        params.set("collectionId", collection.as_str());
    }
    match (cli.date_begin, cli.date_end) {
        (Some(begin), Some(end)) => {
            validate_date_range(begin, end)?;
            params.set("time", format!("{begin}/{end}"));
        }
        (Some(begin), None) => params.set("time", format!("{begin}/")),
        (None, Some(end)) => params.set("time", format!("/{end}")),
        (None, None) => {}
    }
    for raw in &cli.filters {
        let (key, value) = parse_wildcard(raw)?;
        params.set(&key, value);
    }

    let client = WarehouseHttpClient::with_options(&cli.access_token, cli.test_api, cli.insecure_tls)?;
    let lookups = SessionLookups::load(&client, &cli.lang);
    let app = App::new(client, lookups);

    let mut writer = GeoJsonLayerWriter::new(&cli.output);
    let options = IngestOptions {
        crs: cli.crs,
        limit: cli.limit,
    };
    let report = app.ingest(
        &params,
        &options,
        &TracingProgress,
        &CancelToken::new(),
        &mut writer,
    )?;

    JsonOutput::print_report(&report).into_diagnostic()?;
    Ok(())
}
