//! The bidirectional relation maps invalidation runs over.
//!
//! Class graphs contain cycles, so relations are never stored as ownership
//! edges. Each relation is a pair of forward/reverse maps keyed by stable
//! identifiers: interned refs for files, dotted names for classes.

use crate::{
    api::{AnalyzedClass, UsedName},
    vfs::VirtualFileRef,
};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Borrow,
    collections::{BTreeMap, BTreeSet},
    fmt,
};

/// Distinguishes how one class depends on another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DependencyContext {
    /// A member of the target is referenced.
    MemberRef,
    /// The target is extended or implemented.
    Inheritance,
    /// The target is inherited by a class local to the depending source.
    LocalInheritance,
}

/// A dependency between two classes of this compile unit.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InternalDependency {
    pub from: String,
    pub to: String,
    pub context: DependencyContext,
}

/// A dependency on a binary class name emitted by another compile unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalDependency {
    pub from: String,
    pub to_binary: String,
    /// API of the target at the time the dependency was recorded.
    pub api: AnalyzedClass,
    pub context: DependencyContext,
}

/// A binary relation kept in both directions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rel<K: Ord, V: Ord> {
    forward: BTreeMap<K, BTreeSet<V>>,
    reverse: BTreeMap<V, BTreeSet<K>>,
}

impl<K: Ord, V: Ord> Default for Rel<K, V> {
    fn default() -> Self {
        Self { forward: BTreeMap::new(), reverse: BTreeMap::new() }
    }
}

impl<K: Ord + Clone, V: Ord + Clone> Rel<K, V> {
    pub fn add(&mut self, k: K, v: V) {
        self.forward.entry(k.clone()).or_default().insert(v.clone());
        self.reverse.entry(v).or_default().insert(k);
    }

    /// Values related to `k`.
    pub fn get<Q>(&self, k: &Q) -> impl Iterator<Item = &V> + '_
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.forward.get(k).into_iter().flatten()
    }

    /// Keys related to `v`.
    pub fn rget<Q>(&self, v: &Q) -> impl Iterator<Item = &K> + '_
    where
        V: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.reverse.get(v).into_iter().flatten()
    }

    /// First key related to `v`, for relations known to be functional in
    /// reverse.
    pub fn rfirst<Q>(&self, v: &Q) -> Option<&K>
    where
        V: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.reverse.get(v).and_then(|ks| ks.iter().next())
    }

    pub fn contains_key<Q>(&self, k: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.forward.contains_key(k)
    }

    pub fn rcontains<Q>(&self, v: &Q) -> bool
    where
        V: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.reverse.contains_key(v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.forward.keys()
    }

    pub fn rkeys(&self) -> impl Iterator<Item = &V> + '_ {
        self.reverse.keys()
    }

    /// Drops `k` and every pair it participates in.
    pub fn remove_key<Q>(&mut self, k: &Q)
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        if let Some(values) = self.forward.remove(k) {
            for v in values {
                if let Some(ks) = self.reverse.get_mut(&v) {
                    ks.remove(k);
                    if ks.is_empty() {
                        self.reverse.remove(&v);
                    }
                }
            }
        }
    }

    pub fn merge(&mut self, other: Self) {
        for (k, vs) in other.forward {
            for v in vs {
                self.add(k.clone(), v);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.forward.iter().flat_map(|(k, vs)| vs.iter().map(move |v| (k, v)))
    }

    pub fn len(&self) -> usize {
        self.forward.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// All cross-references an [`Analysis`](crate::analysis::Analysis) tracks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Relations {
    /// Source file ↔ classes defined in it.
    pub(crate) src_classes: Rel<VirtualFileRef, String>,
    /// Source file ↔ emitted products, local and non-local.
    pub(crate) products: Rel<VirtualFileRef, VirtualFileRef>,
    /// Source file ↔ library files it depends on.
    pub(crate) library_deps: Rel<VirtualFileRef, VirtualFileRef>,
    /// Library file ↔ binary class names observed inside it.
    pub(crate) library_class_names: Rel<VirtualFileRef, String>,
    /// Internal dependencies, split by context.
    pub(crate) member_ref: Rel<String, String>,
    pub(crate) inheritance: Rel<String, String>,
    pub(crate) local_inheritance: Rel<String, String>,
    /// External dependencies on binary class names, split by context.
    pub(crate) ext_member_ref: Rel<String, String>,
    pub(crate) ext_inheritance: Rel<String, String>,
    pub(crate) ext_local_inheritance: Rel<String, String>,
    /// Non-local source class ↔ emitted binary class name. Bijective.
    pub(crate) product_class_names: Rel<String, String>,
    /// Class → names it references.
    pub(crate) used_names: BTreeMap<String, BTreeSet<UsedName>>,
}

impl Relations {
    pub(crate) fn internal_rel_mut(&mut self, context: DependencyContext) -> &mut Rel<String, String> {
        match context {
            DependencyContext::MemberRef => &mut self.member_ref,
            DependencyContext::Inheritance => &mut self.inheritance,
            DependencyContext::LocalInheritance => &mut self.local_inheritance,
        }
    }

    pub(crate) fn external_rel_mut(&mut self, context: DependencyContext) -> &mut Rel<String, String> {
        match context {
            DependencyContext::MemberRef => &mut self.ext_member_ref,
            DependencyContext::Inheritance => &mut self.ext_inheritance,
            DependencyContext::LocalInheritance => &mut self.ext_local_inheritance,
        }
    }

    /// Classes defined in `src`.
    pub fn classes_of<'a>(&'a self, src: &VirtualFileRef) -> impl Iterator<Item = &'a String> + 'a {
        self.src_classes.get(src)
    }

    /// The single source defining `class`.
    pub fn source_of_class(&self, class: &str) -> Option<&VirtualFileRef> {
        self.src_classes.rfirst(class)
    }

    /// Products emitted for `src`.
    pub fn products_of<'a>(
        &'a self,
        src: &VirtualFileRef,
    ) -> impl Iterator<Item = &'a VirtualFileRef> + 'a {
        self.products.get(src)
    }

    /// The source that emitted `product`.
    pub fn owner_of_product(&self, product: &VirtualFileRef) -> Option<&VirtualFileRef> {
        self.products.rfirst(product)
    }

    /// The binary class name emitted for a non-local source class.
    pub fn binary_name_of(&self, src_class: &str) -> Option<&String> {
        self.product_class_names.get(src_class).next()
    }

    /// The source class behind an emitted binary class name.
    pub fn class_of_binary(&self, binary: &str) -> Option<&String> {
        self.product_class_names.rfirst(binary)
    }

    pub fn add_used_name(&mut self, class: &str, used: UsedName) {
        self.used_names.entry(class.to_string()).or_default().insert(used);
    }

    pub fn used_names_of<'a>(&'a self, class: &str) -> impl Iterator<Item = &'a UsedName> + 'a {
        self.used_names.get(class).into_iter().flatten()
    }

    /// Dependents that inherit from `class`, directly or through a local
    /// class.
    pub fn inheritance_dependents<'a>(
        &'a self,
        class: &str,
    ) -> impl Iterator<Item = &'a String> + 'a {
        self.inheritance.rget(class).chain(self.local_inheritance.rget(class))
    }

    /// Dependents that reference a member of `class`.
    pub fn member_ref_dependents<'a>(
        &'a self,
        class: &str,
    ) -> impl Iterator<Item = &'a String> + 'a {
        self.member_ref.rget(class)
    }

    /// Dependents that inherit from the external binary class `binary`.
    pub fn external_inheritance_dependents<'a>(
        &'a self,
        binary: &str,
    ) -> impl Iterator<Item = &'a String> + 'a {
        self.ext_inheritance.rget(binary).chain(self.ext_local_inheritance.rget(binary))
    }

    /// Dependents that reference a member of the external binary class
    /// `binary`.
    pub fn external_member_ref_dependents<'a>(
        &'a self,
        binary: &str,
    ) -> impl Iterator<Item = &'a String> + 'a {
        self.ext_member_ref.rget(binary)
    }

    /// Whether any recorded dependency on `binary` is an inheritance
    /// dependency.
    pub fn has_external_inheritance_dep(&self, binary: &str) -> bool {
        self.ext_inheritance.rcontains(binary) || self.ext_local_inheritance.rcontains(binary)
    }

    /// All (source class, binary name) pairs of emitted non-local products.
    pub fn product_class_name_pairs(&self) -> impl Iterator<Item = (&String, &String)> + '_ {
        self.product_class_names.iter()
    }

    pub(crate) fn merge(&mut self, other: Relations) {
        self.src_classes.merge(other.src_classes);
        self.products.merge(other.products);
        self.library_deps.merge(other.library_deps);
        self.library_class_names.merge(other.library_class_names);
        self.member_ref.merge(other.member_ref);
        self.inheritance.merge(other.inheritance);
        self.local_inheritance.merge(other.local_inheritance);
        self.ext_member_ref.merge(other.ext_member_ref);
        self.ext_inheritance.merge(other.ext_inheritance);
        self.ext_local_inheritance.merge(other.ext_local_inheritance);
        self.product_class_names.merge(other.product_class_names);
        for (class, names) in other.used_names {
            self.used_names.entry(class).or_default().extend(names);
        }
    }
}

impl fmt::Display for Relations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn section<K: fmt::Display + Ord + Clone, V: fmt::Display + Ord + Clone>(
            f: &mut fmt::Formatter<'_>,
            title: &str,
            rel: &Rel<K, V>,
        ) -> fmt::Result {
            writeln!(f, "{title} ({}):", rel.len())?;
            for (k, v) in rel.iter() {
                writeln!(f, "  {k} -> {v}")?;
            }
            Ok(())
        }

        section(f, "source classes", &self.src_classes)?;
        section(f, "products", &self.products)?;
        section(f, "library dependencies", &self.library_deps)?;
        section(f, "member references", &self.member_ref)?;
        section(f, "inheritance", &self.inheritance)?;
        section(f, "local inheritance", &self.local_inheritance)?;
        section(f, "external member references", &self.ext_member_ref)?;
        section(f, "external inheritance", &self.ext_inheritance)?;
        section(f, "product class names", &self.product_class_names)?;
        writeln!(f, "used names ({}):", self.used_names.len())?;
        for (class, names) in &self.used_names {
            for used in names {
                writeln!(f, "  {class} -> {}", used.name)?;
            }
        }
        Ok(())
    }
}
