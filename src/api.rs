use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use geojson::Feature;
use serde::Deserialize;
use tracing::warn;

use crate::domain::QueryParams;
use crate::error::IngestError;

pub const PRODUCTION_API_BASE: &str = "https://api.laji.fi/v0/";
pub const TEST_API_BASE: &str = "https://apitest.laji.fi/v0/";
pub const REQUEST_TIMEOUT_SECS: u64 = 60;
pub const PAGE_SIZE: u32 = 10_000;

/// Hard ceiling on how many occurrences one fetch may pull. The first page
/// already reports the match count, so over-limit queries fail before any
/// further page is requested.
pub const MAX_OCCURRENCES: u64 = 500_000;

/// Field projection requested from the warehouse. Everything downstream
/// (schema typing, enum remapping) is keyed to these names.
pub const SELECTED_FIELDS: &str = "document.linkings.collectionQuality,document.loadDate,\
unit.linkings.taxon.threatenedStatus,unit.linkings.originalTaxon.administrativeStatuses,\
unit.linkings.taxon.taxonomicOrder,unit.linkings.originalTaxon.latestRedListStatusFinland.status,\
gathering.displayDateTime,gathering.interpretations.biogeographicalProvinceDisplayname,\
gathering.interpretations.coordinateAccuracy,unit.abundanceUnit,unit.atlasCode,unit.atlasClass,\
gathering.locality,unit.unitId,unit.linkings.taxon.scientificName,\
unit.interpretations.individualCount,unit.interpretations.recordQuality,unit.abundanceString,\
gathering.eventDate.begin,gathering.eventDate.end,gathering.gatheringId,document.collectionId,\
unit.det,unit.lifeStage,unit.linkings.taxon.id,unit.notes,unit.sex,document.documentId,\
document.notes,document.secureReasons,gathering.notes,gathering.team,unit.keywords,\
unit.linkings.taxon.nameSwedish,unit.linkings.taxon.nameEnglish,document.dataSource";

/// One page of the warehouse unit list endpoint. `next_page` is the
/// authoritative termination signal; `last_page` only feeds progress bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub last_page: Option<u32>,
    #[serde(default)]
    pub next_page: Option<u32>,
    #[serde(default)]
    pub features: Vec<Feature>,
}

pub trait WarehouseClient {
    fn fetch_page(&self, params: &QueryParams, page: u32) -> Result<PageResponse, IngestError>;
    fn fetch_collections(&self, lang: &str) -> Result<HashMap<String, String>, IngestError>;
    fn fetch_range(&self, range: &str, lang: &str)
        -> Result<HashMap<String, String>, IngestError>;
}

/// Receives fetch progress: total page count once known, then the index of
/// each completed page.
pub trait ProgressSink {
    fn set_bound(&self, bound: u64);
    fn set_value(&self, value: u64);
}

pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn set_bound(&self, _bound: u64) {}
    fn set_value(&self, _value: u64) {}
}

/// Cooperative cancellation flag, checked once per page boundary and never
/// mid-request. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum FetchStatus {
    Completed,
    Cancelled,
    Failed(IngestError),
}

/// Result of walking the paginated list endpoint. Features accumulated
/// before a failure or cancellation are preserved, never discarded.
#[derive(Debug)]
pub struct FetchOutcome {
    pub features: Vec<Feature>,
    pub pages_fetched: u32,
    pub total_reported: u64,
    pub status: FetchStatus,
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self.status, FetchStatus::Completed)
    }
}

/// Walks the warehouse list endpoint page by page until `nextPage` is
/// absent, the record ceiling is exceeded, a page fails, or the token is
/// cancelled. Strictly sequential: page N+1 is only requested after page N
/// has been consumed.
pub fn fetch_occurrences(
    client: &dyn WarehouseClient,
    params: &QueryParams,
    limit: u64,
    sink: &dyn ProgressSink,
    cancel: &CancelToken,
) -> FetchOutcome {
    let mut params = params.clone();
    // Pagination-owned keys always win over caller-supplied filters.
    params.remove("page");
    params.set("format", "geojson");
    params.set("pageSize", PAGE_SIZE.to_string());
    params.set("selected", SELECTED_FIELDS);

    let mut features: Vec<Feature> = Vec::new();
    let mut pages_fetched = 0u32;
    let mut total_reported = 0u64;
    let mut page = 1u32;

    loop {
        if cancel.is_cancelled() {
            return FetchOutcome {
                features,
                pages_fetched,
                total_reported,
                status: FetchStatus::Cancelled,
            };
        }

        let response = match client.fetch_page(&params, page) {
            Ok(response) => response,
            Err(err) => {
                return FetchOutcome {
                    features,
                    pages_fetched,
                    total_reported,
                    status: FetchStatus::Failed(err),
                };
            }
        };

        if page == 1 {
            total_reported = response.total;
            if response.total > limit {
                return FetchOutcome {
                    features: Vec::new(),
                    pages_fetched: 1,
                    total_reported,
                    status: FetchStatus::Failed(IngestError::LimitExceeded {
                        total: response.total,
                        limit,
                    }),
                };
            }
            let bound = response
                .last_page
                .map(u64::from)
                .unwrap_or_else(|| estimated_page_count(response.total, PAGE_SIZE));
            sink.set_bound(bound.max(1));
        }

        features.extend(response.features);
        pages_fetched += 1;
        sink.set_value(u64::from(page));

        match response.next_page {
            Some(next) => page = next,
            None => {
                return FetchOutcome {
                    features,
                    pages_fetched,
                    total_reported,
                    status: FetchStatus::Completed,
                };
            }
        }
    }
}

fn estimated_page_count(total: u64, page_size: u32) -> u64 {
    let page_size = u64::from(page_size);
    (total + page_size - 1) / page_size
}

#[derive(Clone)]
pub struct WarehouseHttpClient {
    client: reqwest::blocking::Client,
    base_url: String,
    access_token: String,
}

impl WarehouseHttpClient {
    pub fn new(access_token: &str) -> Result<Self, IngestError> {
        Self::with_options(access_token, false, false)
    }

    /// `danger_disable_tls_verification` exists for diagnosing self-signed
    /// certificates on intercepting proxies. It is never the default and
    /// every client built with it logs a warning.
    pub fn with_options(
        access_token: &str,
        use_test_api: bool,
        danger_disable_tls_verification: bool,
    ) -> Result<Self, IngestError> {
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(format!("finbif-occurrences/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));
        if danger_disable_tls_verification {
            warn!("TLS certificate verification is disabled for this session");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|err| IngestError::Connection(err.to_string()))?;
        let base_url = if use_test_api {
            TEST_API_BASE
        } else {
            PRODUCTION_API_BASE
        };
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::blocking::Response,
    ) -> Result<T, IngestError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "warehouse request failed".to_string());
            return Err(IngestError::HttpStatus { status, message });
        }
        response
            .json::<T>()
            .map_err(|err| IngestError::Malformed(err.to_string()))
    }

    /// Retry budget for the auxiliary lookup endpoints only; the main page
    /// loop fails fast instead.
    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, IngestError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(map_transport_error(err));
                }
            }
        }
    }
}

impl WarehouseClient for WarehouseHttpClient {
    fn fetch_page(&self, params: &QueryParams, page: u32) -> Result<PageResponse, IngestError> {
        let url = format!("{}warehouse/query/unit/list", self.base_url);
        let query: Vec<(&str, &str)> = params.iter().collect();
        let page_param = page.to_string();
        let response = self
            .client
            .get(&url)
            .query(&query)
            .query(&[
                ("page", page_param.as_str()),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .map_err(map_transport_error)?;
        Self::read_json(response)
    }

    fn fetch_collections(&self, lang: &str) -> Result<HashMap<String, String>, IngestError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CollectionEntry {
            id: String,
            #[serde(default)]
            long_name: Option<String>,
        }
        #[derive(Deserialize)]
        struct CollectionsResponse {
            #[serde(default)]
            results: Vec<CollectionEntry>,
        }

        let url = format!("{}collections", self.base_url);
        let response = self.send_with_retries(|| {
            self.client.get(&url).query(&[
                ("pageSize", "1500"),
                ("lang", lang),
                ("access_token", self.access_token.as_str()),
            ])
        })?;
        let parsed: CollectionsResponse = Self::read_json(response)?;
        Ok(parsed
            .results
            .into_iter()
            .filter_map(|entry| entry.long_name.map(|name| (entry.id, name)))
            .collect())
    }

    fn fetch_range(
        &self,
        range: &str,
        lang: &str,
    ) -> Result<HashMap<String, String>, IngestError> {
        #[derive(Deserialize)]
        struct RangeEntry {
            id: String,
            value: String,
        }

        let url = format!("{}metadata/ranges/{range}", self.base_url);
        let response = self.send_with_retries(|| {
            self.client.get(&url).query(&[
                ("lang", lang),
                ("access_token", self.access_token.as_str()),
            ])
        })?;
        let entries: Vec<RangeEntry> = Self::read_json(response)?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.id, entry.value))
            .collect())
    }
}

fn map_transport_error(err: reqwest::Error) -> IngestError {
    if err.is_timeout() {
        IngestError::Timeout {
            seconds: REQUEST_TIMEOUT_SECS,
        }
    } else if err.is_connect() {
        IngestError::Connection(err.to_string())
    } else if let Some(status) = err.status() {
        IngestError::HttpStatus {
            status: status.as_u16(),
            message: err.to_string(),
        }
    } else {
        IngestError::Connection(err.to_string())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
