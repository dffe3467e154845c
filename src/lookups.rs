use std::collections::HashMap;

use tracing::warn;

use crate::api::WarehouseClient;

/// Enumeration ranges whose codes are remapped to human-readable labels.
pub const ADMIN_STATUS_RANGE: &str = "MX.adminStatusEnum";
pub const IUCN_STATUS_RANGE: &str = "MX.iucnStatuses";
pub const ATLAS_CODE_RANGE: &str = "MY.atlasCodeEnum";
pub const ATLAS_CLASS_RANGE: &str = "MY.atlasClassEnum";

const RANGES: [&str; 4] = [
    ADMIN_STATUS_RANGE,
    IUCN_STATUS_RANGE,
    ATLAS_CODE_RANGE,
    ATLAS_CLASS_RANGE,
];

/// Per-session cache of the code-to-label tables used while unifying
/// record schemas. Loaded once up front and passed by reference into the
/// pipeline; a table that cannot be fetched stays empty and the affected
/// columns keep their raw codes.
#[derive(Debug, Clone, Default)]
pub struct SessionLookups {
    collection_names: HashMap<String, String>,
    ranges: HashMap<String, HashMap<String, String>>,
}

impl SessionLookups {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(client: &dyn WarehouseClient, lang: &str) -> Self {
        let collection_names = match client.fetch_collections(lang) {
            Ok(names) => names,
            Err(err) => {
                warn!("failed to load collection names, keeping raw ids: {err}");
                HashMap::new()
            }
        };

        let mut ranges = HashMap::new();
        for range in RANGES {
            match client.fetch_range(range, lang) {
                Ok(table) => {
                    ranges.insert(range.to_string(), table);
                }
                Err(err) => {
                    warn!("failed to load enumeration range {range}, keeping raw codes: {err}");
                }
            }
        }

        Self {
            collection_names,
            ranges,
        }
    }

    pub fn collection_name(&self, id: &str) -> Option<&str> {
        self.collection_names.get(id).map(String::as_str)
    }

    pub fn range_label(&self, range: &str, code: &str) -> Option<&str> {
        self.ranges
            .get(range)
            .and_then(|table| table.get(code))
            .map(String::as_str)
    }

    #[cfg(test)]
    pub fn with_tables(
        collection_names: HashMap<String, String>,
        ranges: HashMap<String, HashMap<String, String>>,
    ) -> Self {
        Self {
            collection_names,
            ranges,
        }
    }
}
