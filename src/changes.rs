//! Detecting what changed since the previous compile run.

use crate::{
    analysis::Analysis,
    compilers::Lookup,
    stamp::StampOracle,
    vfs::{VirtualFile, VirtualFileRef},
};
use std::collections::{BTreeMap, BTreeSet};

/// Everything found different from the previous analysis before the first
/// compile cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitialChanges {
    /// Sources not seen before.
    pub added: BTreeSet<VirtualFileRef>,
    /// Sources no longer part of the input set.
    pub removed: BTreeSet<VirtualFileRef>,
    /// Sources whose current stamp differs from the recorded one.
    pub modified: BTreeSet<VirtualFileRef>,
    /// Sources whose emitted products were deleted or clobbered externally.
    pub modified_products: BTreeSet<VirtualFileRef>,
    /// Libraries whose stamp moved or which no longer resolve.
    pub modified_libraries: BTreeSet<VirtualFileRef>,
    /// External binary names whose upstream API moved.
    pub modified_external: BTreeSet<String>,
}

impl InitialChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.modified.is_empty()
            && self.modified_products.is_empty()
            && self.modified_libraries.is_empty()
            && self.modified_external.is_empty()
    }
}

/// Compares the current input set and environment against `previous`.
pub fn detect(
    previous: &Analysis,
    sources: &BTreeMap<VirtualFileRef, VirtualFile>,
    oracle: &mut StampOracle<'_>,
    lookup: &dyn Lookup,
) -> InitialChanges {
    let mut changes = InitialChanges::default();

    oracle.prime_sources(sources.keys());

    for file in sources.keys() {
        if !previous.stamps.sources.contains_key(file) {
            changes.added.insert(file.clone());
        }
    }
    for (file, recorded) in &previous.stamps.sources {
        if !sources.contains_key(file) {
            changes.removed.insert(file.clone());
        } else if &oracle.source(file) != recorded {
            changes.modified.insert(file.clone());
        }
    }

    for (product, recorded) in &previous.stamps.products {
        if &oracle.product(product) != recorded {
            if let Some(owner) = previous.relations.owner_of_product(product) {
                trace!("product {product} of {owner} is stale");
                changes.modified_products.insert(owner.clone());
            }
        }
    }

    for (library, recorded) in &previous.stamps.libraries {
        // a library that no longer stamps counts as removed, i.e. modified
        if &oracle.library(library) != recorded {
            changes.modified_libraries.insert(library.clone());
        }
    }

    for (binary, recorded) in &previous.apis.external {
        match lookup.analyzed_class(binary) {
            Some(current) => {
                let inherited = previous.relations.has_external_inheritance_dep(binary);
                let moved = current.api_hash != recorded.api_hash
                    || (inherited && current.extra_hash != recorded.extra_hash);
                if moved {
                    changes.modified_external.insert(binary.clone());
                }
            }
            // the upstream unit is gone; conservatively treat as changed
            None => {
                changes.modified_external.insert(binary.clone());
            }
        }
    }

    debug!(
        "initial changes: {} added, {} removed, {} modified, {} stale products, {} libraries, {} external",
        changes.added.len(),
        changes.removed.len(),
        changes.modified.len(),
        changes.modified_products.len(),
        changes.modified_libraries.len(),
        changes.modified_external.len()
    );
    changes
}
