//! The persistent result of analyzing one compile unit.
//!
//! An [`Analysis`] is a value: the engine never mutates the previous run's
//! snapshot, it builds the next one from an owned working copy. All maps are
//! ordered so snapshots serialize deterministically.

use crate::{
    api::{AnalyzedClass, ClassLike, UsedName},
    error::{Error, Result},
    problem::Problem,
    relations::{ExternalDependency, InternalDependency, Relations},
    stamp::Stamp,
    vfs::VirtualFileRef,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stamps for everything a compile run observed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamps {
    pub sources: BTreeMap<VirtualFileRef, Stamp>,
    pub products: BTreeMap<VirtualFileRef, Stamp>,
    pub libraries: BTreeMap<VirtualFileRef, Stamp>,
}

/// Analyzed classes, keyed by source class name for this unit's own classes
/// and by binary class name for upstream ones.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Apis {
    pub internal: BTreeMap<String, AnalyzedClass>,
    pub external: BTreeMap<String, AnalyzedClass>,
    /// Full shapes, retained only when API debugging is enabled.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub shapes: BTreeMap<String, Vec<ClassLike>>,
}

/// Diagnostics and entry points recorded for one source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Problems the compiler already showed to the user.
    pub reported: Vec<Problem>,
    pub unreported: Vec<Problem>,
    pub main_classes: Vec<String>,
}

/// One compile cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compilation {
    /// Cycle start, milliseconds since the epoch.
    pub start_time: u64,
}

/// An emitted artifact exported to the binary class namespace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NonLocalProduct {
    pub src_class: String,
    pub binary_name: String,
    pub file: VirtualFileRef,
    pub stamp: Stamp,
}

/// An emitted artifact invisible outside its source, e.g. an anonymous class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalProduct {
    pub file: VirtualFileRef,
    pub stamp: Stamp,
}

/// Everything the callback gathered about a single source in one cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalyzedSource {
    pub file: VirtualFileRef,
    pub stamp: Stamp,
    pub classes: Vec<AnalyzedClass>,
    pub info: SourceInfo,
    pub non_local_products: Vec<NonLocalProduct>,
    pub local_products: Vec<LocalProduct>,
    pub internal_deps: Vec<InternalDependency>,
    pub external_deps: Vec<ExternalDependency>,
    pub library_deps: Vec<(VirtualFileRef, Stamp)>,
    /// Binary class names observed in each referenced library file.
    pub library_class_names: Vec<(VirtualFileRef, String)>,
    pub used_names: BTreeMap<String, BTreeSet<UsedName>>,
    /// Retained shapes when API debugging is on.
    pub shapes: Vec<ClassLike>,
}

/// Snapshot of everything known about one compile unit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub stamps: Stamps,
    pub apis: Apis,
    pub relations: Relations,
    pub infos: BTreeMap<VirtualFileRef, SourceInfo>,
    pub compilations: Vec<Compilation>,
}

impl Analysis {
    pub fn is_empty(&self) -> bool {
        self.stamps.sources.is_empty() && self.compilations.is_empty()
    }

    /// All sources currently known.
    pub fn sources(&self) -> impl Iterator<Item = &VirtualFileRef> + '_ {
        self.stamps.sources.keys()
    }

    /// The analyzed class behind a binary class name, if this unit emitted
    /// it.
    pub fn class_for_binary(&self, binary: &str) -> Option<&AnalyzedClass> {
        let src_class = self.relations.class_of_binary(binary)?;
        self.apis.internal.get(src_class)
    }

    /// Registers one analyzed source.
    ///
    /// Fails with [`Error::InconsistentAnalysis`] when a binary class name is
    /// already claimed by a different source class. Self-dependencies are
    /// dropped, and a library file that doubles as a product is ignored so
    /// the two sets stay disjoint.
    pub fn add_source(&mut self, entry: AnalyzedSource) -> Result<()> {
        for product in &entry.non_local_products {
            if let Some(existing) = self.relations.class_of_binary(&product.binary_name) {
                if existing != &product.src_class {
                    return Err(Error::InconsistentAnalysis {
                        binary: product.binary_name.clone(),
                        first: existing.clone(),
                        second: product.src_class.clone(),
                    });
                }
            }
        }

        trace!("adding analyzed source {}", entry.file);
        self.stamps.sources.insert(entry.file.clone(), entry.stamp);
        for class in entry.classes {
            self.relations.src_classes.add(entry.file.clone(), class.name.clone());
            self.apis.internal.insert(class.name.clone(), class);
        }
        for product in entry.non_local_products {
            self.stamps.libraries.remove(&product.file);
            self.stamps.products.insert(product.file.clone(), product.stamp);
            self.relations.products.add(entry.file.clone(), product.file);
            self.relations.product_class_names.add(product.src_class, product.binary_name);
        }
        for product in entry.local_products {
            self.stamps.libraries.remove(&product.file);
            self.stamps.products.insert(product.file.clone(), product.stamp);
            self.relations.products.add(entry.file.clone(), product.file);
        }
        for dep in entry.internal_deps {
            if dep.from == dep.to {
                continue;
            }
            self.relations.internal_rel_mut(dep.context).add(dep.from, dep.to);
        }
        for dep in entry.external_deps {
            self.relations.external_rel_mut(dep.context).add(dep.from, dep.to_binary.clone());
            self.apis.external.insert(dep.to_binary, dep.api);
        }
        for (library, stamp) in entry.library_deps {
            if self.stamps.products.contains_key(&library) {
                continue;
            }
            self.stamps.libraries.insert(library.clone(), stamp);
            self.relations.library_deps.add(entry.file.clone(), library);
        }
        for (library, binary) in entry.library_class_names {
            self.relations.library_class_names.add(library, binary);
        }
        for (class, names) in entry.used_names {
            for name in names {
                self.relations.add_used_name(&class, name);
            }
        }
        for shape in entry.shapes {
            self.apis.shapes.entry(shape.name.clone()).or_default().push(shape);
        }
        self.infos.insert(entry.file, entry.info);
        Ok(())
    }

    /// Records a single name use after the fact.
    pub fn add_used_name(&mut self, class: &str, used: UsedName) {
        self.relations.add_used_name(class, used);
    }

    /// Drops every record owned by `sources`.
    pub fn remove_sources(&mut self, sources: &BTreeSet<VirtualFileRef>) {
        for src in sources {
            trace!("dropping analyzed source {src}");
            let classes: Vec<String> = self.relations.classes_of(src).cloned().collect();
            let products: Vec<VirtualFileRef> = self.relations.products_of(src).cloned().collect();

            for class in &classes {
                self.apis.internal.remove(class);
                self.apis.shapes.remove(class);
                self.relations.member_ref.remove_key(class.as_str());
                self.relations.inheritance.remove_key(class.as_str());
                self.relations.local_inheritance.remove_key(class.as_str());
                self.relations.ext_member_ref.remove_key(class.as_str());
                self.relations.ext_inheritance.remove_key(class.as_str());
                self.relations.ext_local_inheritance.remove_key(class.as_str());
                self.relations.product_class_names.remove_key(class.as_str());
                self.relations.used_names.remove(class);
            }
            for product in &products {
                self.stamps.products.remove(product);
            }
            self.relations.products.remove_key(src);
            self.relations.src_classes.remove_key(src);
            self.relations.library_deps.remove_key(src);
            self.stamps.sources.remove(src);
            self.infos.remove(src);
        }
        self.gc_libraries();
        self.gc_external_apis();
    }

    /// Merges `delta` into `self`. Sources present in both are replaced by
    /// the delta's record wholesale, so a recompiled source never leaves
    /// stale entries behind.
    pub fn merge(&mut self, delta: Analysis) -> Result<()> {
        let overlapping: BTreeSet<VirtualFileRef> = delta
            .stamps
            .sources
            .keys()
            .filter(|src| self.stamps.sources.contains_key(*src))
            .cloned()
            .collect();
        self.remove_sources(&overlapping);

        for (class, binary) in delta.relations.product_class_names.iter() {
            if let Some(existing) = self.relations.class_of_binary(binary) {
                if existing != class {
                    return Err(Error::InconsistentAnalysis {
                        binary: binary.clone(),
                        first: existing.clone(),
                        second: class.clone(),
                    });
                }
            }
        }

        self.stamps.sources.extend(delta.stamps.sources);
        self.stamps.products.extend(delta.stamps.products);
        for (library, stamp) in delta.stamps.libraries {
            if !self.stamps.products.contains_key(&library) {
                self.stamps.libraries.insert(library, stamp);
            }
        }
        self.apis.internal.extend(delta.apis.internal);
        self.apis.external.extend(delta.apis.external);
        for (class, shapes) in delta.apis.shapes {
            self.apis.shapes.entry(class).or_default().extend(shapes);
        }
        self.relations.merge(delta.relations);
        self.infos.extend(delta.infos);
        self.compilations.extend(delta.compilations);
        Ok(())
    }

    /// Drops library records no source references anymore.
    fn gc_libraries(&mut self) {
        let orphaned: Vec<VirtualFileRef> = self
            .stamps
            .libraries
            .keys()
            .filter(|library| !self.relations.library_deps.rcontains(*library))
            .cloned()
            .collect();
        for library in orphaned {
            self.stamps.libraries.remove(&library);
            self.relations.library_class_names.remove_key(&library);
        }
    }

    /// Drops upstream API records nothing depends on anymore.
    fn gc_external_apis(&mut self) {
        let relations = &self.relations;
        self.apis.external.retain(|binary, _| {
            relations.ext_member_ref.rcontains(binary.as_str())
                || relations.ext_inheritance.rcontains(binary.as_str())
                || relations.ext_local_inheritance.rcontains(binary.as_str())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::{AnalyzedClass, UseScope, UsedName},
        relations::DependencyContext,
        vfs::VirtualFileRef,
    };
    use pretty_assertions::assert_eq;

    fn class(name: &str, api_hash: u64) -> AnalyzedClass {
        AnalyzedClass {
            compile_timestamp: 1,
            name: name.to_string(),
            api_hash,
            extra_hash: api_hash,
            name_hashes: Vec::new(),
            has_macro: false,
        }
    }

    fn entry(file: &str, classes: &[(&str, u64)]) -> AnalyzedSource {
        AnalyzedSource {
            file: file.into(),
            stamp: Stamp::content_of(file.as_bytes()),
            classes: classes.iter().map(|(name, hash)| class(name, *hash)).collect(),
            info: SourceInfo::default(),
            non_local_products: classes
                .iter()
                .map(|(name, _)| NonLocalProduct {
                    src_class: name.to_string(),
                    binary_name: name.to_string(),
                    file: format!("classes/{name}.class").as_str().into(),
                    stamp: Stamp::LastModified(1),
                })
                .collect(),
            local_products: Vec::new(),
            internal_deps: Vec::new(),
            external_deps: Vec::new(),
            library_deps: Vec::new(),
            library_class_names: Vec::new(),
            used_names: BTreeMap::new(),
            shapes: Vec::new(),
        }
    }

    #[test]
    fn add_source_wires_every_table() {
        let mut analysis = Analysis::default();
        let mut e = entry("src/A.cls", &[("A", 1)]);
        e.internal_deps.push(InternalDependency {
            from: "A".to_string(),
            to: "B".to_string(),
            context: DependencyContext::MemberRef,
        });
        e.used_names
            .insert("A".to_string(), [UsedName::new("foo", [UseScope::Default])].into());
        analysis.add_source(e).unwrap();

        assert!(analysis.stamps.sources.contains_key(&VirtualFileRef::from("src/A.cls")));
        assert!(analysis.apis.internal.contains_key("A"));
        assert_eq!(
            analysis.relations.source_of_class("A"),
            Some(&VirtualFileRef::from("src/A.cls"))
        );
        assert_eq!(analysis.relations.class_of_binary("A"), Some(&"A".to_string()));
        assert_eq!(analysis.relations.used_names_of("A").count(), 1);
    }

    #[test]
    fn self_dependencies_are_dropped() {
        let mut analysis = Analysis::default();
        let mut e = entry("src/A.cls", &[("A", 1)]);
        e.internal_deps.push(InternalDependency {
            from: "A".to_string(),
            to: "A".to_string(),
            context: DependencyContext::MemberRef,
        });
        analysis.add_source(e).unwrap();
        assert!(analysis.relations.member_ref.is_empty());
    }

    #[test]
    fn conflicting_binary_names_are_rejected() {
        let mut analysis = Analysis::default();
        analysis.add_source(entry("src/A.cls", &[("A", 1)])).unwrap();

        let mut conflicting = entry("src/B.cls", &[("B", 2)]);
        conflicting.non_local_products[0].binary_name = "A".to_string();
        let err = analysis.add_source(conflicting).unwrap_err();
        assert!(matches!(err, Error::InconsistentAnalysis { binary, .. } if binary == "A"));
    }

    #[test]
    fn remove_sources_leaves_no_trace() {
        let mut analysis = Analysis::default();
        analysis.add_source(entry("src/A.cls", &[("A", 1)])).unwrap();
        let mut b = entry("src/B.cls", &[("B", 2)]);
        b.internal_deps.push(InternalDependency {
            from: "B".to_string(),
            to: "A".to_string(),
            context: DependencyContext::Inheritance,
        });
        b.library_deps.push(("lib/util.jar".into(), Stamp::LastModified(7)));
        analysis.add_source(b).unwrap();

        analysis.remove_sources(&BTreeSet::from([VirtualFileRef::from("src/B.cls")]));

        assert!(!analysis.stamps.sources.contains_key(&VirtualFileRef::from("src/B.cls")));
        assert!(!analysis.apis.internal.contains_key("B"));
        assert_eq!(analysis.relations.inheritance_dependents("A").count(), 0);
        // the library was only referenced by B and is gone with it
        assert!(analysis.stamps.libraries.is_empty());
        // A is untouched
        assert!(analysis.apis.internal.contains_key("A"));
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let mut analysis = Analysis::default();
        analysis.add_source(entry("src/A.cls", &[("A", 1)])).unwrap();
        let snapshot = analysis.clone();
        analysis.merge(Analysis::default()).unwrap();
        assert_eq!(analysis, snapshot);
    }

    #[test]
    fn merge_replaces_overlapping_sources_wholesale() {
        let mut analysis = Analysis::default();
        let mut old = entry("src/A.cls", &[("A", 1)]);
        old.used_names
            .insert("A".to_string(), [UsedName::new("stale", [UseScope::Default])].into());
        analysis.add_source(old).unwrap();

        let mut delta = Analysis::default();
        delta.add_source(entry("src/A.cls", &[("A", 9)])).unwrap();
        delta.compilations.push(Compilation { start_time: 2 });
        analysis.merge(delta).unwrap();

        assert_eq!(analysis.apis.internal["A"].api_hash, 9);
        // the stale used name did not survive the replacement
        assert_eq!(analysis.relations.used_names_of("A").count(), 0);
        assert_eq!(analysis.compilations.len(), 1);
    }

    #[test]
    fn snapshots_serialize_round_trip() {
        let mut analysis = Analysis::default();
        let mut e = entry("src/A.cls", &[("A", 1)]);
        e.used_names
            .insert("A".to_string(), [UsedName::new("foo", [UseScope::Default])].into());
        analysis.add_source(e).unwrap();
        analysis.compilations.push(Compilation { start_time: 5 });

        let json = serde_json::to_string(&analysis).unwrap();
        let back: Analysis = serde_json::from_str(&json).unwrap();
        assert_eq!(analysis, back);
    }
}
