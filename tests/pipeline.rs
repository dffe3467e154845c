use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use assert_matches::assert_matches;
use geojson::{Feature, JsonObject};
use serde_json::json;

use finbif_occurrences::api::{CancelToken, NoopProgress, PageResponse, WarehouseClient};
use finbif_occurrences::app::{App, IngestOptions};
use finbif_occurrences::dataset::LayerBuilder;
use finbif_occurrences::domain::{Crs, QueryParams};
use finbif_occurrences::error::IngestError;
use finbif_occurrences::geometry::GeometryKind;
use finbif_occurrences::lookups::SessionLookups;
use finbif_occurrences::output::GeoJsonLayerWriter;
use finbif_occurrences::schema::{ColumnSchema, NormalizedRecord};

fn feature(geometry: geojson::Value, props: &[(&str, serde_json::Value)]) -> Feature {
    let mut properties = JsonObject::new();
    for (key, value) in props {
        properties.insert(key.to_string(), value.clone());
    }
    Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geometry)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn geom_point(x: f64, y: f64) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::Point(vec![x, y]))
}

fn square() -> geojson::Value {
    geojson::Value::Polygon(vec![vec![
        vec![0.0, 0.0],
        vec![10.0, 0.0],
        vec![10.0, 10.0],
        vec![0.0, 10.0],
        vec![0.0, 0.0],
    ]])
}

struct MockWarehouse {
    pages: Mutex<VecDeque<Result<PageResponse, IngestError>>>,
    collections_available: bool,
}

impl MockWarehouse {
    fn new(pages: Vec<Result<PageResponse, IngestError>>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            collections_available: true,
        }
    }
}

impl WarehouseClient for MockWarehouse {
    fn fetch_page(&self, _params: &QueryParams, _page: u32) -> Result<PageResponse, IngestError> {
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected page request")
    }

    fn fetch_collections(&self, _lang: &str) -> Result<HashMap<String, String>, IngestError> {
        if self.collections_available {
            Ok(HashMap::from([(
                "HR.48".to_string(),
                "iNaturalist Suomi".to_string(),
            )]))
        } else {
            Err(IngestError::Connection("collections down".to_string()))
        }
    }

    fn fetch_range(
        &self,
        range: &str,
        _lang: &str,
    ) -> Result<HashMap<String, String>, IngestError> {
        if range == "MY.atlasCodeEnum" {
            Ok(HashMap::from([(
                "MY.atlasCodeEnum1".to_string(),
                "Unsuitable habitat".to_string(),
            )]))
        } else {
            Err(IngestError::Connection("range down".to_string()))
        }
    }
}

#[derive(Default)]
struct CollectingBuilder {
    layers: Vec<(GeometryKind, usize, Vec<String>)>,
}

impl LayerBuilder for CollectingBuilder {
    fn build_layer(
        &mut self,
        kind: GeometryKind,
        schema: &ColumnSchema,
        records: &[NormalizedRecord],
        _crs: Crs,
    ) -> bool {
        let names = schema.names().iter().map(|n| n.to_string()).collect();
        self.layers.push((kind, records.len(), names));
        true
    }
}

fn heterogeneous_page() -> PageResponse {
    let features = vec![
        feature(
            geojson::Value::Point(vec![25.0, 60.0]),
            &[
                ("unit.unitId", json!("u1")),
                ("unit.keywords[0]", json!("a")),
                ("unit.keywords[1]", json!("b")),
                ("document.collectionId", json!("http://tun.fi/HR.48")),
                ("unit.atlasCode", json!("http://tun.fi/MY.atlasCodeEnum1")),
            ],
        ),
        feature(
            geojson::Value::GeometryCollection(vec![
                geom_point(1.0, 1.0),
                geom_point(2.0, 2.0),
                geom_point(3.0, 3.0),
            ]),
            &[("unit.unitId", json!("u2"))],
        ),
        feature(
            geojson::Value::GeometryCollection(vec![
                geom_point(20.0, 20.0),
                geojson::Geometry::new(square()),
            ]),
            &[("unit.unitId", json!("u3"))],
        ),
        feature(
            geojson::Value::GeometryCollection(vec![
                geojson::Geometry::new(geojson::Value::GeometryCollection(vec![geom_point(
                    0.0, 0.0,
                )])),
                geom_point(1.0, 1.0),
            ]),
            &[("unit.unitId", json!("u4"))],
        ),
        feature(
            geojson::Value::LineString(vec![vec![0.0, 0.0], vec![1.0, 1.0]]),
            &[("unit.unitId", json!("u5"))],
        ),
    ];
    PageResponse {
        total: 5,
        last_page: Some(1),
        next_page: None,
        features,
    }
}

#[test]
fn full_pipeline_partitions_and_reports() {
    let client = MockWarehouse::new(vec![Ok(heterogeneous_page())]);
    let lookups = SessionLookups::load(&client, "en");
    let app = App::new(client, lookups);

    let mut builder = CollectingBuilder::default();
    let report = app
        .ingest(
            &QueryParams::new(),
            &IngestOptions::new(Crs::Euref),
            &NoopProgress,
            &CancelToken::new(),
            &mut builder,
        )
        .unwrap();

    assert_eq!(report.features_fetched, 5);
    // The nested collection is rejected, counted, and excluded.
    assert_eq!(report.geometry_failures, 1);
    assert_eq!(report.records_normalized, 4);
    assert_eq!(report.layers.records_rendered, 4);
    assert_eq!(report.layers.layers_failed, 0);
    assert!(!report.cancelled);
    assert!(report.fetch_error.is_none());

    let kinds: Vec<GeometryKind> = builder.layers.iter().map(|(kind, _, _)| *kind).collect();
    assert_eq!(
        kinds,
        vec![
            GeometryKind::Point,
            GeometryKind::LineString,
            GeometryKind::MultiPoint,
            GeometryKind::MultiPolygon,
        ]
    );
    // Partition sizes sum to the normalized record count.
    let sum: usize = builder.layers.iter().map(|(_, len, _)| *len).sum();
    assert_eq!(sum, report.records_normalized);

    // One schema shared by every partition, with families collapsed and
    // the derived collection-name column present.
    let first_names = &builder.layers[0].2;
    for (_, _, names) in &builder.layers {
        assert_eq!(names, first_names);
    }
    assert!(first_names.contains(&"unit.keywords".to_string()));
    assert!(!first_names.iter().any(|n| n.contains('[')));
    assert!(first_names.contains(&"document.collectionName".to_string()));
}

#[test]
fn partial_fetch_is_materialized_and_error_surfaced() {
    let page_one = PageResponse {
        total: 4,
        last_page: Some(2),
        next_page: Some(2),
        features: vec![feature(
            geojson::Value::Point(vec![25.0, 60.0]),
            &[("unit.unitId", json!("u1"))],
        )],
    };
    let client = MockWarehouse::new(vec![
        Ok(page_one),
        Err(IngestError::Timeout { seconds: 60 }),
    ]);
    let lookups = SessionLookups::load(&client, "en");
    let app = App::new(client, lookups);

    let mut builder = CollectingBuilder::default();
    let report = app
        .ingest(
            &QueryParams::new(),
            &IngestOptions::new(Crs::Wgs84),
            &NoopProgress,
            &CancelToken::new(),
            &mut builder,
        )
        .unwrap();

    assert_eq!(report.records_normalized, 1);
    assert_eq!(report.layers.layers_built, 1);
    assert!(report.fetch_error.as_deref().unwrap().contains("timed out"));
}

#[test]
fn limit_exceeded_is_an_error_with_no_layers() {
    let page = PageResponse {
        total: 600_000,
        last_page: Some(60),
        next_page: Some(2),
        features: vec![feature(
            geojson::Value::Point(vec![25.0, 60.0]),
            &[("unit.unitId", json!("u1"))],
        )],
    };
    let client = MockWarehouse::new(vec![Ok(page)]);
    let lookups = SessionLookups::load(&client, "en");
    let app = App::new(client, lookups);

    let mut builder = CollectingBuilder::default();
    let err = app
        .ingest(
            &QueryParams::new(),
            &IngestOptions::new(Crs::Euref),
            &NoopProgress,
            &CancelToken::new(),
            &mut builder,
        )
        .unwrap_err();

    assert_matches!(err, IngestError::LimitExceeded { .. });
    assert!(builder.layers.is_empty());
}

#[test]
fn missing_lookup_tables_degrade_to_raw_codes() {
    let mut client = MockWarehouse::new(vec![Ok(heterogeneous_page())]);
    client.collections_available = false;
    let lookups = SessionLookups::load(&client, "en");
    assert!(lookups.collection_name("HR.48").is_none());
    // Ranges other than the atlas codes failed too; labels fall back to
    // the raw code at unification time.
    assert!(lookups.range_label("MX.iucnStatuses", "MX.x").is_none());
    assert_eq!(
        lookups.range_label("MY.atlasCodeEnum", "MY.atlasCodeEnum1"),
        Some("Unsuitable habitat")
    );
}

#[test]
fn geojson_writer_produces_one_file_per_partition() {
    let dir = tempfile::tempdir().unwrap();
    let client = MockWarehouse::new(vec![Ok(heterogeneous_page())]);
    let lookups = SessionLookups::load(&client, "en");
    let app = App::new(client, lookups);

    let mut writer = GeoJsonLayerWriter::new(dir.path());
    let report = app
        .ingest(
            &QueryParams::new(),
            &IngestOptions::new(Crs::Euref),
            &NoopProgress,
            &CancelToken::new(),
            &mut writer,
        )
        .unwrap();

    assert_eq!(report.layers.layers_built, 4);
    assert_eq!(writer.written().len(), 4);
    let point_layer = dir.path().join("FinBIF_Point_Occurrences.geojson");
    assert!(point_layer.exists());

    let text = std::fs::read_to_string(point_layer).unwrap();
    let parsed: geojson::FeatureCollection = text.parse().unwrap();
    assert_eq!(parsed.features.len(), 1);
    let crs = &parsed.foreign_members.unwrap()["crs"];
    assert_eq!(crs["properties"]["name"], json!("EPSG:3067"));
}
