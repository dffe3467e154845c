use geojson::Feature;
use serde::Serialize;
use serde_json::Map;
use tracing::{info, warn};

use crate::api::{fetch_occurrences, CancelToken, FetchStatus, ProgressSink, WarehouseClient};
use crate::dataset::{materialize, partition, LayerBuilder, MaterializeReport};
use crate::domain::{Crs, QueryParams};
use crate::error::IngestError;
use crate::geometry::normalize;
use crate::lookups::SessionLookups;
use crate::schema::unify;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub crs: Crs,
    pub limit: u64,
}

impl IngestOptions {
    pub fn new(crs: Crs) -> Self {
        Self {
            crs,
            limit: crate::api::MAX_OCCURRENCES,
        }
    }
}

/// Outcome of one ingestion run. A page-level fetch failure does not
/// discard the pages already fetched: the partial data is normalized and
/// materialized, and the error is carried here for the caller to present.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub total_reported: u64,
    pub pages_fetched: u32,
    pub features_fetched: usize,
    pub records_normalized: usize,
    /// Features whose geometry was missing, unconvertible or an
    /// unsupported composite. Skipped, never misfiled into a partition.
    pub geometry_failures: usize,
    pub cancelled: bool,
    pub fetch_error: Option<String>,
    #[serde(flatten)]
    pub layers: MaterializeReport,
}

/// Wires the pipeline stages together: fetch, per-feature geometry
/// normalization, schema unification, partitioning, materialization.
pub struct App<C: WarehouseClient> {
    client: C,
    lookups: SessionLookups,
}

impl<C: WarehouseClient> App<C> {
    pub fn new(client: C, lookups: SessionLookups) -> Self {
        Self { client, lookups }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn ingest(
        &self,
        params: &QueryParams,
        options: &IngestOptions,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
        builder: &mut dyn LayerBuilder,
    ) -> Result<IngestReport, IngestError> {
        let outcome = fetch_occurrences(&self.client, params, options.limit, sink, cancel);

        let (cancelled, fetch_error) = match &outcome.status {
            FetchStatus::Completed => (false, None),
            FetchStatus::Cancelled => (true, None),
            FetchStatus::Failed(err) => (false, Some(err.to_string())),
        };

        if outcome.features.is_empty() {
            if let FetchStatus::Failed(err) = outcome.status {
                return Err(err);
            }
            if !cancelled {
                return Err(IngestError::EmptyResult);
            }
            return Ok(IngestReport {
                total_reported: outcome.total_reported,
                pages_fetched: outcome.pages_fetched,
                features_fetched: 0,
                records_normalized: 0,
                geometry_failures: 0,
                cancelled,
                fetch_error,
                layers: MaterializeReport::default(),
            });
        }

        let features_fetched = outcome.features.len();
        let mut geometry_failures = 0usize;
        let mut raw_records = Vec::with_capacity(features_fetched);
        for feature in outcome.features {
            match convert_feature(feature, options.crs) {
                Ok(record) => raw_records.push(record),
                Err(err) => {
                    geometry_failures += 1;
                    warn!("skipping feature with unusable geometry: {err}");
                }
            }
        }

        let (records, schema) = unify(raw_records, &self.lookups);
        let records_normalized = records.len();
        let partitions = partition(records);
        let layers = materialize(partitions, &schema, options.crs, builder);

        info!(
            "ingested {records_normalized} of {features_fetched} features into {} layers ({geometry_failures} geometry failures)",
            layers.layers_built
        );

        Ok(IngestReport {
            total_reported: outcome.total_reported,
            pages_fetched: outcome.pages_fetched,
            features_fetched,
            records_normalized,
            geometry_failures,
            cancelled,
            fetch_error,
            layers,
        })
    }
}

fn convert_feature(
    feature: Feature,
    crs: Crs,
) -> Result<(geo::Geometry<f64>, Map<String, serde_json::Value>), IngestError> {
    let geometry = feature
        .geometry
        .ok_or_else(|| IngestError::UnsupportedGeometry("feature without geometry".to_string()))?;
    let geometry = geo::Geometry::<f64>::try_from(geometry)
        .map_err(|err| IngestError::UnsupportedGeometry(err.to_string()))?;
    let geometry = normalize(geometry, crs)?;
    Ok((geometry, feature.properties.unwrap_or_default()))
}
