use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use geojson::{Feature, FeatureCollection};
use serde::Serialize;
use tracing::{error, info};

use crate::api::ProgressSink;
use crate::app::IngestReport;
use crate::dataset::LayerBuilder;
use crate::domain::Crs;
use crate::geometry::GeometryKind;
use crate::schema::{ColumnSchema, NormalizedRecord};

/// File-backed layer builder: writes one GeoJSON FeatureCollection per
/// geometry-kind partition, the headless counterpart of a GIS host's
/// in-memory layer.
pub struct GeoJsonLayerWriter {
    directory: PathBuf,
    written: Vec<PathBuf>,
}

impl GeoJsonLayerWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn write_collection(
        &self,
        path: &Path,
        collection: &FeatureCollection,
    ) -> Result<(), io::Error> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, collection)?;
        writer.flush()
    }
}

impl LayerBuilder for GeoJsonLayerWriter {
    fn build_layer(
        &mut self,
        kind: GeometryKind,
        schema: &ColumnSchema,
        records: &[NormalizedRecord],
        crs: Crs,
    ) -> bool {
        let features = records
            .iter()
            .map(|record| {
                let properties = schema
                    .names()
                    .iter()
                    .zip(&record.attributes)
                    .map(|(name, value)| (name.to_string(), value.to_json()))
                    .collect();
                Feature {
                    bbox: None,
                    geometry: Some(geojson::Geometry::new(geojson::Value::from(
                        &record.geometry,
                    ))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        // Legacy named-CRS member so the host knows which reference the
        // coordinates are in.
        let mut foreign = serde_json::Map::new();
        foreign.insert(
            "crs".to_string(),
            serde_json::json!({
                "type": "name",
                "properties": { "name": crs.epsg() }
            }),
        );
        let collection = FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(foreign),
        };

        let path = self
            .directory
            .join(format!("FinBIF_{kind}_Occurrences.geojson"));
        match self.write_collection(&path, &collection) {
            Ok(()) => {
                info!("wrote {} features to {}", records.len(), path.display());
                self.written.push(path);
                true
            }
            Err(err) => {
                error!("failed to write {}: {err}", path.display());
                false
            }
        }
    }
}

/// Progress reporting for headless runs: page counts go to the log
/// instead of a progress bar widget.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn set_bound(&self, bound: u64) {
        info!("fetching {bound} pages");
    }

    fn set_value(&self, value: u64) {
        info!("fetched page {value}");
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &IngestReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
