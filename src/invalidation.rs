//! Expanding detected changes into the set of sources that must recompile,
//! and the cycle loop that drives recompilation to a fixed point.
//!
//! Invalidation is name-hash based. A recompiled class only pulls in a
//! member-ref dependent when a name that dependent actually uses changed its
//! hash; inheritance dependents follow the extra hash unconditionally and
//! transitively. Changed sources themselves seed the first cycle without
//! speculative expansion, because real hash diffs only exist after they were
//! recompiled once.

use crate::{
    analysis::Analysis,
    api::{simple_name, AnalyzedClass, UseScope},
    callback::BuildCallback,
    changes::InitialChanges,
    class_files::ClassFileManager,
    compilers::{Compiler, DependencyChanges, Lookup, PreviousAnalysis},
    config::IncOptions,
    driver::CancelToken,
    error::{Error, Result},
    vfs::{FileConverter, VirtualFile, VirtualFileRef},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    sync::Arc,
};

/// Classes and sources picked for the next compile cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Invalidation {
    pub classes: BTreeSet<String>,
    pub sources: BTreeSet<VirtualFileRef>,
}

impl Invalidation {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Adds the owning source of every invalidated class.
fn resolve_sources(analysis: &Analysis, inv: &mut Invalidation) {
    for class in &inv.classes {
        if let Some(src) = analysis.relations.source_of_class(class) {
            inv.sources.insert(src.clone());
        }
    }
}

/// Transitive closure over inheritance edges, starting from dependents of an
/// already-changed class.
fn inherit_closure(
    analysis: &Analysis,
    seeds: impl IntoIterator<Item = String>,
    out: &mut BTreeSet<String>,
) {
    let mut queue: Vec<String> = seeds.into_iter().collect();
    while let Some(class) = queue.pop() {
        if out.insert(class.clone()) {
            queue.extend(analysis.relations.inheritance_dependents(&class).cloned());
        }
    }
}

/// Whether `dependent` uses any of the `modified` names in a matching scope.
fn uses_modified_name(
    analysis: &Analysis,
    dependent: &str,
    modified: &BTreeSet<(String, UseScope)>,
) -> bool {
    analysis.relations.used_names_of(dependent).any(|used| {
        used.scopes.iter().any(|scope| modified.contains(&(used.name.clone(), *scope)))
    })
}

/// Names considered changed between two API records. A record present on
/// only one side counts wholesale.
fn modified_names(
    old: Option<&AnalyzedClass>,
    new: Option<&AnalyzedClass>,
) -> BTreeSet<(String, UseScope)> {
    match (old, new) {
        (Some(old), Some(new)) => old.modified_names(new),
        (Some(only), None) | (None, Some(only)) => {
            only.name_hashes.iter().map(|n| (n.name.clone(), n.scope)).collect()
        }
        (None, None) => BTreeSet::new(),
    }
}

/// Dependents of an internal `class` whose API moved from `old` to `new`.
fn expand_internal(
    analysis: &Analysis,
    class: &str,
    old: Option<&AnalyzedClass>,
    new: Option<&AnalyzedClass>,
    out: &mut BTreeSet<String>,
) {
    let extra_changed = match (old, new) {
        (Some(old), Some(new)) => old.extra_hash != new.extra_hash,
        _ => true,
    };
    let has_macro =
        old.map_or(false, |c| c.has_macro) || new.map_or(false, |c| c.has_macro);
    let modified = modified_names(old, new);

    if extra_changed {
        let seeds: Vec<String> =
            analysis.relations.inheritance_dependents(class).cloned().collect();
        inherit_closure(analysis, seeds, out);
    }
    for dependent in analysis.relations.member_ref_dependents(class) {
        if out.contains(dependent) {
            continue;
        }
        if has_macro || uses_modified_name(analysis, dependent, &modified) {
            trace!("invalidating {dependent}, member ref on {class}");
            out.insert(dependent.clone());
        }
    }
}

/// Dependents of the external binary class `binary` whose API moved.
fn expand_external(
    analysis: &Analysis,
    binary: &str,
    old: Option<&AnalyzedClass>,
    new: Option<&AnalyzedClass>,
    out: &mut BTreeSet<String>,
) {
    let extra_changed = match (old, new) {
        (Some(old), Some(new)) => old.extra_hash != new.extra_hash,
        _ => true,
    };
    let has_macro =
        old.map_or(false, |c| c.has_macro) || new.map_or(false, |c| c.has_macro);
    let modified = modified_names(old, new);

    if extra_changed {
        let seeds: Vec<String> =
            analysis.relations.external_inheritance_dependents(binary).cloned().collect();
        inherit_closure(analysis, seeds, out);
    }
    for dependent in analysis.relations.external_member_ref_dependents(binary) {
        if out.contains(dependent) {
            continue;
        }
        if has_macro || uses_modified_name(analysis, dependent, &modified) {
            trace!("invalidating {dependent}, member ref on external {binary}");
            out.insert(dependent.clone());
        }
    }
}

/// Computes the first cycle's invalidation from the detected changes.
pub(crate) fn invalidate_initial(
    previous: &Analysis,
    changes: &InitialChanges,
    lookup: &dyn Lookup,
) -> Invalidation {
    let mut inv = Invalidation::default();

    for src in changes
        .added
        .iter()
        .chain(&changes.modified)
        .chain(&changes.modified_products)
    {
        inv.sources.insert(src.clone());
        inv.classes.extend(previous.relations.classes_of(src).cloned());
    }

    // classes of removed sources are gone for good; their dependents have to
    // find out now
    for src in &changes.removed {
        for class in previous.relations.classes_of(src) {
            expand_internal(
                previous,
                class,
                previous.apis.internal.get(class),
                None,
                &mut inv.classes,
            );
        }
    }

    for binary in &changes.modified_external {
        let fresh = lookup.analyzed_class(binary);
        expand_external(
            previous,
            binary,
            previous.apis.external.get(binary),
            fresh.as_ref(),
            &mut inv.classes,
        );
    }

    for library in &changes.modified_libraries {
        for binary in previous.relations.library_class_names.get(library) {
            let name = simple_name(binary);
            for src in previous.relations.library_deps.rget(library) {
                for class in previous.relations.classes_of(src) {
                    if previous.relations.used_names_of(class).any(|used| used.name == name) {
                        trace!("invalidating {class}, uses {name} from changed library {library}");
                        inv.classes.insert(class.clone());
                    }
                }
            }
        }
    }

    resolve_sources(previous, &mut inv);
    debug!(
        "initial invalidation: {} classes in {} sources",
        inv.classes.len(),
        inv.sources.len()
    );
    inv
}

/// One full incremental run: prune, compile, merge, recompute, iterated
/// until nothing new is invalidated.
pub(crate) struct CycleRunner<'a> {
    pub options: &'a IncOptions,
    pub converter: &'a dyn FileConverter,
    pub lookup: &'a dyn Lookup,
    pub manager: &'a dyn ClassFileManager,
    pub sources: &'a BTreeMap<VirtualFileRef, VirtualFile>,
    pub previous: &'a Analysis,
}

impl CycleRunner<'_> {
    pub fn run(
        &self,
        initial: Invalidation,
        changes: &InitialChanges,
        compiler: &mut dyn Compiler,
        cancel: &CancelToken,
    ) -> Result<Analysis> {
        let mut analysis = self.previous.clone();

        if !changes.removed.is_empty() {
            let stale: Vec<PathBuf> = changes
                .removed
                .iter()
                .flat_map(|src| analysis.relations.products_of(src))
                .map(|product| self.converter.to_path(product))
                .collect();
            self.manager.delete(&stale)?;
            analysis.remove_sources(&changes.removed);
        }

        let mut pending = initial;
        // sources gone from the input set cannot be recompiled
        pending.sources.retain(|src| self.sources.contains_key(src));

        let mut dep_changes = DependencyChanges {
            modified_libraries: changes.modified_libraries.iter().cloned().collect(),
            modified_classes: changes.modified_external.iter().cloned().collect(),
        };
        let mut escalated = false;
        let mut cycle = 0usize;

        while !pending.is_empty() {
            cycle += 1;
            if cycle > self.options.max_cycles {
                return Err(Error::CycleLimitExceeded(self.options.max_cycles));
            }
            if cancel.is_cancelled() {
                info!("cancellation requested, stopping before cycle {cycle}");
                return Err(Error::Cancelled);
            }

            if !escalated && self.options.recompile_all_fraction < 1.0 {
                let threshold =
                    (self.sources.len() as f64 * self.options.recompile_all_fraction) as usize;
                if pending.sources.len() > threshold {
                    debug!(
                        "invalidated {} of {} sources, escalating to a full recompile",
                        pending.sources.len(),
                        self.sources.len()
                    );
                    escalated = true;
                    pending.sources = self.sources.keys().cloned().collect();
                    pending.classes = pending
                        .sources
                        .iter()
                        .flat_map(|src| analysis.relations.classes_of(src).cloned())
                        .collect();
                }
            }
            debug!("cycle {cycle}: recompiling {} sources", pending.sources.len());

            // prune the invalidated sources' products before they are rebuilt
            let stale: Vec<PathBuf> = pending
                .sources
                .iter()
                .flat_map(|src| analysis.relations.products_of(src))
                .map(|product| self.converter.to_path(product))
                .collect();
            self.manager.delete(&stale)?;

            let before = Arc::new(analysis.clone());
            analysis.remove_sources(&pending.sources);

            let invalidated: Vec<VirtualFile> =
                pending.sources.iter().filter_map(|src| self.sources.get(src).cloned()).collect();
            let mut callback = BuildCallback::new(
                self.options,
                self.converter,
                self.lookup,
                self.manager,
                PreviousAnalysis::from(before.clone()),
            );
            compiler.compile(&invalidated, &dep_changes, &callback, self.manager)?;
            let delta = callback.get()?;
            analysis.merge(delta)?;
            if self.options.relations_debug {
                debug!("relations after cycle {cycle}:\n{}", analysis.relations);
            }

            // recompute from the APIs that actually moved in this cycle
            let recompiled: BTreeSet<String> = pending
                .sources
                .iter()
                .flat_map(|src| analysis.relations.classes_of(src).cloned())
                .chain(pending.classes.iter().cloned())
                .collect();
            let mut next = Invalidation::default();
            for class in &recompiled {
                let old = before.apis.internal.get(class);
                let new = analysis.apis.internal.get(class);
                let moved = match (old, new) {
                    (Some(old), Some(new)) => {
                        old.api_hash != new.api_hash || old.extra_hash != new.extra_hash
                    }
                    (None, None) => false,
                    _ => true,
                };
                if moved {
                    trace!("api of {class} changed in cycle {cycle}");
                    expand_internal(&analysis, class, old, new, &mut next.classes);
                }
            }
            // everything compiled in this cycle already saw the fresh APIs
            for class in &recompiled {
                next.classes.remove(class);
            }
            resolve_sources(&analysis, &mut next);
            next.sources.retain(|src| self.sources.contains_key(src));

            // upstream changes were presented to the first cycle only
            dep_changes = DependencyChanges::default();
            pending = next;
        }

        debug!("invalidation settled after {cycle} cycles");
        Ok(analysis)
    }
}
