use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::domain::Crs;
use crate::geometry::GeometryKind;
use crate::schema::{ColumnSchema, NormalizedRecord};

/// Host collaborator that turns one geometry-kind partition into a
/// renderable layer. Failure is reported as `false`, never a panic; the
/// materializer counts it and moves on.
pub trait LayerBuilder {
    fn build_layer(
        &mut self,
        kind: GeometryKind,
        schema: &ColumnSchema,
        records: &[NormalizedRecord],
        crs: Crs,
    ) -> bool;
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MaterializeReport {
    pub layers_built: usize,
    pub layers_failed: usize,
    pub records_rendered: usize,
}

/// Groups unified records by their single geometry kind. Schema
/// unification ran before this point, so one shared schema covers every
/// partition.
pub fn partition(
    records: Vec<NormalizedRecord>,
) -> BTreeMap<GeometryKind, Vec<NormalizedRecord>> {
    let mut partitions: BTreeMap<GeometryKind, Vec<NormalizedRecord>> = BTreeMap::new();
    for record in records {
        match GeometryKind::of(&record.geometry) {
            Some(kind) => partitions.entry(kind).or_default().push(record),
            // Normalization guarantees single-kind geometries; anything
            // else would be a bug upstream, so refuse to misfile it.
            None => warn!("record with non-normalized geometry skipped at partitioning"),
        }
    }
    partitions
}

pub fn materialize(
    partitions: BTreeMap<GeometryKind, Vec<NormalizedRecord>>,
    schema: &ColumnSchema,
    crs: Crs,
    builder: &mut dyn LayerBuilder,
) -> MaterializeReport {
    let mut report = MaterializeReport::default();
    for (kind, records) in partitions {
        debug!("building {kind} layer with {} records", records.len());
        if builder.build_layer(kind, schema, &records, crs) {
            report.layers_built += 1;
            report.records_rendered += records.len();
        } else {
            warn!("layer construction failed for {kind}");
            report.layers_failed += 1;
        }
    }
    report
}
