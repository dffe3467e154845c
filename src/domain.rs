use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Coordinate reference systems the warehouse can serve occurrence
/// geometries in. ETRS-TM35FIN and YKJ cover Finnish data only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum Crs {
    Euref,
    Ykj,
    Wgs84,
}

impl Crs {
    /// Value of the `crs` query parameter understood by the warehouse.
    pub fn api_value(&self) -> &'static str {
        match self {
            Crs::Euref => "EUREF",
            Crs::Ykj => "YKJ",
            Crs::Wgs84 => "WGS84",
        }
    }

    pub fn epsg(&self) -> &'static str {
        match self {
            Crs::Euref => "EPSG:3067",
            Crs::Ykj => "EPSG:2393",
            Crs::Wgs84 => "EPSG:4326",
        }
    }

    /// Geographic CRSs measure in degrees, so buffer distances must be
    /// angular rather than linear.
    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.api_value())
    }
}

impl FromStr for Crs {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "EUREF" | "ETRS-TM35FIN" | "EPSG:3067" => Ok(Crs::Euref),
            "YKJ" | "EPSG:2393" => Ok(Crs::Ykj),
            "WGS84" | "EPSG:4326" => Ok(Crs::Wgs84),
            other => Err(IngestError::Malformed(format!("unknown CRS: {other}"))),
        }
    }
}

/// Shape the warehouse reduces each occurrence geometry to before
/// returning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureKind {
    CenterPoint,
    Envelope,
    OriginalFeature,
}

impl FeatureKind {
    pub fn api_value(&self) -> &'static str {
        match self {
            FeatureKind::CenterPoint => "CENTER_POINT",
            FeatureKind::Envelope => "ENVELOPE",
            FeatureKind::OriginalFeature => "ORIGINAL_FEATURE",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.api_value())
    }
}

/// Insertion-ordered query parameters for a warehouse request.
///
/// The warehouse treats repeated keys as a mistake, so `set` replaces an
/// existing key in place instead of appending a duplicate. The paginator
/// relies on this to make its own keys (`format`, `page`, `pageSize`,
/// `selected`) win over anything a caller-supplied wildcard filter set.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    entries: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn validate_access_token(token: &str) -> Result<(), IngestError> {
    if token.trim().is_empty() {
        return Err(IngestError::MissingAccessToken);
    }
    Ok(())
}

/// A wildcard filter is a raw `key=value` pair passed straight through to
/// the warehouse; both halves must be non-blank.
pub fn parse_wildcard(raw: &str) -> Result<(String, String), IngestError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| IngestError::InvalidWildcard(raw.to_string()))?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() || value.is_empty() {
        return Err(IngestError::InvalidWildcard(raw.to_string()));
    }
    Ok((key.to_string(), value.to_string()))
}

pub fn validate_date_range(begin: NaiveDate, end: NaiveDate) -> Result<(), IngestError> {
    if begin > end {
        return Err(IngestError::InvalidDateRange {
            begin: begin.to_string(),
            end: end.to_string(),
        });
    }
    Ok(())
}
