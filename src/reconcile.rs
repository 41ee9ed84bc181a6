//! Diffing the published index against the archive catalog.

use std::collections::BTreeSet;

use crate::charts::ChartId;
use crate::index::IndexDocument;

/// Outcome of diffing one catalog snapshot against one index document.
#[derive(Debug, Default, PartialEq)]
pub struct Reconciliation {
    /// Archive keys present in the store but absent from the index.
    pub to_add: BTreeSet<String>,
    /// Identities whose claimed archive is gone from the store.
    pub to_remove: BTreeSet<ChartId>,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute the add/remove sets that make `index` match `catalog`.
///
/// Every valid entry is mapped back to the archive key it claims
/// (`prefix/name-version.tgz`); entries without a usable name and version are
/// invisible here, neither matched nor scheduled for removal. An empty
/// catalog is a legitimate snapshot and schedules every entry for removal;
/// callers must not reach this point on a failed listing.
pub fn reconcile(
    index: &IndexDocument,
    catalog: &BTreeSet<String>,
    prefix: &str,
) -> Reconciliation {
    let indexed = index.indexed_keys(prefix);
    let to_remove = indexed
        .iter()
        .filter(|(key, _)| !catalog.contains(*key))
        .map(|(_, id)| id.clone())
        .collect();
    let to_add = catalog
        .iter()
        .filter(|key| !indexed.contains_key(*key))
        .cloned()
        .collect();
    Reconciliation { to_add, to_remove }
}

/// Apply the removal half of a reconciliation to the in-memory document.
/// Returns how many entries actually went away.
pub fn apply_removals(index: &mut IndexDocument, reconciliation: &Reconciliation) -> usize {
    reconciliation
        .to_remove
        .iter()
        .filter(|id| index.remove_entry(id))
        .count()
}
