//! In-memory model of a published chart repository index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::charts::ChartId;

/// Object name of the published index, relative to the repository prefix.
pub const INDEX_FILE_NAME: &str = "index.yaml";

/// One version entry in the index.
///
/// Only `name` and `version` are interpreted here; everything else the chart
/// tooling wrote (digest, urls, description, dependencies, ...) is carried
/// opaquely and survives a load/dump round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub metadata: serde_yaml::Mapping,
}

impl IndexEntry {
    /// Identity under which this entry participates in reconciliation.
    ///
    /// Entries with a missing or empty name or version have no identity: they
    /// are invisible to diffing and are never matched or removed.
    pub fn chart_id(&self) -> Option<ChartId> {
        match (self.name.as_deref(), self.version.as_deref()) {
            (Some(name), Some(version)) if !name.is_empty() && !version.is_empty() => {
                Some(ChartId::new(name, version))
            }
            _ => None,
        }
    }
}

/// The published index document: a mapping from chart name to the entries for
/// each of its versions, plus whatever top-level fields the tooling emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<IndexEntry>>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

impl Default for IndexDocument {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            generated: None,
            entries: BTreeMap::new(),
            extra: serde_yaml::Mapping::new(),
        }
    }
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl IndexDocument {
    pub fn load(data: &[u8]) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_slice(data)
    }

    pub fn dump(&self) -> Result<Vec<u8>, serde_yaml::Error> {
        serde_yaml::to_string(self).map(String::into_bytes)
    }

    /// All valid entries with their identities.
    pub fn charts(&self) -> impl Iterator<Item = (ChartId, &IndexEntry)> {
        self.entries
            .values()
            .flatten()
            .filter_map(|entry| entry.chart_id().map(|id| (id, entry)))
    }

    /// Map every valid entry to the archive key it claims exists under
    /// `prefix`. This is what reconciliation matches against the catalog.
    pub fn indexed_keys(&self, prefix: &str) -> BTreeMap<String, ChartId> {
        self.charts()
            .map(|(id, _)| (id.archive_key(prefix), id))
            .collect()
    }

    /// Remove the entry matching `id`, if any. Returns whether anything was
    /// removed; absence is not an error. Other versions of the same chart are
    /// untouched, and a chart whose last version goes away disappears from
    /// `entries` entirely.
    pub fn remove_entry(&mut self, id: &ChartId) -> bool {
        let Some(versions) = self.entries.get_mut(&id.name) else {
            return false;
        };
        let before = versions.len();
        versions.retain(|entry| entry.chart_id().as_ref() != Some(id));
        let removed = versions.len() < before;
        if versions.is_empty() {
            self.entries.remove(&id.name);
        }
        removed
    }

    /// Number of valid entries across all charts.
    pub fn chart_count(&self) -> usize {
        self.charts().count()
    }

    /// Stamp the document with the current time, as the chart tooling does on
    /// every regeneration.
    pub fn touch_generated(&mut self) {
        self.generated = Some(chrono::Utc::now().to_rfc3339());
    }
}
