use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use geo::Geometry;
use regex::Regex;
use serde_json::{Map, Value};

use crate::lookups::{
    SessionLookups, ADMIN_STATUS_RANGE, ATLAS_CLASS_RANGE, ATLAS_CODE_RANGE, IUCN_STATUS_RANGE,
};

/// Columns whose values carry enumeration codes from the warehouse,
/// remapped to labels through the session lookup tables.
const ENUM_COLUMNS: [(&str, &str); 5] = [
    ("unit.atlasCode", ATLAS_CODE_RANGE),
    ("unit.atlasClass", ATLAS_CLASS_RANGE),
    (
        "unit.linkings.originalTaxon.administrativeStatuses",
        ADMIN_STATUS_RANGE,
    ),
    ("unit.linkings.taxon.threatenedStatus", IUCN_STATUS_RANGE),
    (
        "unit.linkings.originalTaxon.latestRedListStatusFinland.status",
        IUCN_STATUS_RANGE,
    ),
];

const COLLECTION_ID_COLUMN: &str = "document.collectionId";
const COLLECTION_NAME_COLUMN: &str = "document.collectionName";

/// Fields with a known type; everything else is inferred from the values.
const FIELD_TYPES: [(&str, ColumnType); 13] = [
    ("gathering.eventDate.begin", ColumnType::Date),
    ("gathering.eventDate.end", ColumnType::Date),
    ("document.loadDate", ColumnType::Date),
    ("gathering.displayDateTime", ColumnType::DateTime),
    ("unit.linkings.taxon.taxonomicOrder", ColumnType::Integer),
    (
        "unit.linkings.originalTaxon.taxonomicOrder",
        ColumnType::Integer,
    ),
    (
        "gathering.interpretations.coordinateAccuracy",
        ColumnType::Integer,
    ),
    (
        "unit.linkings.originalTaxon.occurrenceCountFinland",
        ColumnType::Integer,
    ),
    (
        "unit.linkings.originalTaxon.latestRedListStatusFinland.year",
        ColumnType::Integer,
    ),
    ("unit.interpretations.individualCount", ColumnType::Integer),
    ("unit.linkings.originalTaxon.sensitive", ColumnType::Boolean),
    ("unit.linkings.originalTaxon.finnish", ColumnType::Boolean),
    (
        "unit.linkings.originalTaxon.cursiveName",
        ColumnType::Boolean,
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    Double,
    Boolean,
    Date,
    DateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    pub fn to_json(&self) -> Value {
        match self {
            AttrValue::Null => Value::Null,
            AttrValue::String(s) => Value::String(s.clone()),
            AttrValue::Integer(i) => Value::from(*i),
            AttrValue::Double(d) => Value::from(*d),
            AttrValue::Boolean(b) => Value::Bool(*b),
            AttrValue::Date(d) => Value::String(d.to_string()),
            AttrValue::DateTime(dt) => Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
        }
    }
}

/// Ordered column schema shared by every record in a unified batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    columns: Vec<(String, ColumnType)>,
}

impl ColumnSchema {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| *ty)
    }
}

/// One record after unification: a single-kind geometry plus attribute
/// values positionally aligned with the shared [`ColumnSchema`].
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub geometry: Geometry<f64>,
    pub attributes: Vec<AttrValue>,
}

/// Reconciles heterogeneous per-record property bags into a dense,
/// consistently ordered and typed table. Two passes: discover the unified
/// column set, then materialize every record against it.
pub fn unify(
    records: Vec<(Geometry<f64>, Map<String, Value>)>,
    lookups: &SessionLookups,
) -> (Vec<NormalizedRecord>, ColumnSchema) {
    let plan = ColumnPlan::discover(records.iter().map(|(_, props)| props));

    // Dense string table, one row per record, in plan column order.
    let rows: Vec<Vec<Option<String>>> = records
        .iter()
        .map(|(_, props)| plan.materialize_row(props, lookups))
        .collect();

    let types = resolve_types(&plan.columns, &rows);
    let schema = ColumnSchema {
        columns: plan
            .columns
            .iter()
            .cloned()
            .zip(types.iter().copied())
            .collect(),
    };

    let normalized = records
        .into_iter()
        .zip(rows)
        .map(|((geometry, _), row)| NormalizedRecord {
            geometry,
            attributes: row
                .into_iter()
                .zip(types.iter())
                .map(|(raw, ty)| coerce(raw, *ty))
                .collect(),
        })
        .collect();

    (normalized, schema)
}

/// The unified column set plus the source keys feeding each column.
struct ColumnPlan {
    columns: Vec<String>,
    /// column name -> property keys combined into it, in index order.
    sources: HashMap<String, Vec<String>>,
}

impl ColumnPlan {
    fn discover<'a>(property_maps: impl Iterator<Item = &'a Map<String, Value>>) -> Self {
        // `keyword[0]`, `keyword[1]`, ... collapse into `keyword`; an
        // optional suffix after the index stays part of the base name.
        let indexed = Regex::new(r"^(.+?)\[(\d+)\](.*)$").unwrap();

        let mut columns: Vec<String> = Vec::new();
        let mut sources: HashMap<String, Vec<(u64, String)>> = HashMap::new();

        for props in property_maps {
            for key in props.keys() {
                let (column, index) = match indexed.captures(key) {
                    Some(caps) => (
                        format!("{}{}", &caps[1], &caps[3]),
                        caps[2].parse::<u64>().unwrap_or(u64::MAX),
                    ),
                    None => (key.clone(), 0),
                };
                if !columns.contains(&column) {
                    columns.push(column.clone());
                }
                let members = sources.entry(column).or_default();
                if !members.iter().any(|(_, k)| k == key) {
                    members.push((index, key.clone()));
                }
            }
        }

        // The derived collection-name column sits right after its source.
        if let Some(pos) = columns.iter().position(|c| c == COLLECTION_ID_COLUMN) {
            if !columns.contains(&COLLECTION_NAME_COLUMN.to_string()) {
                columns.insert(pos + 1, COLLECTION_NAME_COLUMN.to_string());
            }
        }

        let sources = sources
            .into_iter()
            .map(|(column, mut members)| {
                members.sort_by_key(|(index, _)| *index);
                (
                    column,
                    members.into_iter().map(|(_, key)| key).collect::<Vec<_>>(),
                )
            })
            .collect();

        Self { columns, sources }
    }

    fn materialize_row(
        &self,
        props: &Map<String, Value>,
        lookups: &SessionLookups,
    ) -> Vec<Option<String>> {
        self.columns
            .iter()
            .map(|column| {
                if column == COLLECTION_NAME_COLUMN {
                    let derived = props
                        .get(COLLECTION_ID_COLUMN)
                        .and_then(value_to_string)
                        .and_then(|id| lookups.collection_name(strip_uri_prefix(&id)))
                        .map(str::to_string);
                    // A record may carry the name directly; the lookup
                    // takes precedence when it resolves.
                    if derived.is_some() {
                        return derived;
                    }
                }

                let keys = match self.sources.get(column) {
                    Some(keys) => keys,
                    None => return None,
                };
                let parts: Vec<String> = keys
                    .iter()
                    .filter_map(|key| props.get(key).and_then(value_to_string))
                    .filter(|part| !part.trim().is_empty())
                    .collect();
                let raw = match parts.len() {
                    0 => return None,
                    1 => parts.into_iter().next().unwrap(),
                    _ => parts.join(", "),
                };
                Some(remap_enum(column, raw, lookups))
            })
            .collect()
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Codes may arrive as bare identifiers or URI-suffixed
/// (`http://tun.fi/MY.atlasCodeEnum1` style); only the last path segment
/// feeds the lookup.
fn strip_uri_prefix(value: &str) -> &str {
    value.rsplit('/').next().unwrap_or(value)
}

fn remap_enum(column: &str, raw: String, lookups: &SessionLookups) -> String {
    let range = match ENUM_COLUMNS
        .iter()
        .find(|(name, _)| *name == column)
        .map(|(_, range)| *range)
    {
        Some(range) => range,
        None => return raw,
    };
    // Collapsed families joined several codes; remap each one.
    raw.split(", ")
        .map(|code| {
            let stripped = strip_uri_prefix(code);
            lookups
                .range_label(range, stripped)
                .unwrap_or(code)
                .to_string()
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Explicit table first, inference second. A column whose observed values
/// do not all coerce to the chosen type demotes to String so that
/// materialization is total.
fn resolve_types(columns: &[String], rows: &[Vec<Option<String>>]) -> Vec<ColumnType> {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let observed = || {
                rows.iter()
                    .filter_map(move |row| row[i].as_deref())
                    .filter(|v| !v.trim().is_empty())
            };

            let candidate = FIELD_TYPES
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, ty)| *ty)
                .unwrap_or_else(|| infer_type(observed()));

            let holds = |ty: ColumnType| observed().all(|v| coerce_str(v, ty).is_some());
            if candidate == ColumnType::String || holds(candidate) {
                candidate
            } else {
                ColumnType::String
            }
        })
        .collect()
}

fn infer_type<'a>(values: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut any = false;
    let mut all_int = true;
    let mut all_double = true;
    let mut all_bool = true;
    for value in values {
        any = true;
        all_int &= value.parse::<i64>().is_ok();
        all_double &= value.parse::<f64>().is_ok();
        all_bool &= matches!(value, "true" | "false");
    }
    if !any {
        ColumnType::String
    } else if all_int {
        ColumnType::Integer
    } else if all_double {
        ColumnType::Double
    } else if all_bool {
        ColumnType::Boolean
    } else {
        ColumnType::String
    }
}

fn coerce(raw: Option<String>, ty: ColumnType) -> AttrValue {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return AttrValue::Null,
    };
    // Types were validated against every observed value in resolve_types,
    // but a String fallback keeps this total regardless.
    coerce_str(&raw, ty).unwrap_or(AttrValue::String(raw))
}

fn coerce_str(value: &str, ty: ColumnType) -> Option<AttrValue> {
    match ty {
        ColumnType::String => Some(AttrValue::String(value.to_string())),
        ColumnType::Integer => value.parse::<i64>().ok().map(AttrValue::Integer),
        ColumnType::Double => value.parse::<f64>().ok().map(AttrValue::Double),
        ColumnType::Boolean => match value {
            "true" => Some(AttrValue::Boolean(true)),
            "false" => Some(AttrValue::Boolean(false)),
            _ => None,
        },
        ColumnType::Date => parse_date(value).map(AttrValue::Date),
        ColumnType::DateTime => parse_datetime(value).map(AttrValue::DateTime),
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    // Date-only display values widen to midnight.
    parse_date(value).map(|date| date.and_hms_opt(0, 0, 0).unwrap())
}
