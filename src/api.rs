//! Class API shapes and the hashes invalidation runs on.
//!
//! The compiler extracts an API shape per class-like definition and hands it
//! over through the callback. This module reduces those shapes to the three
//! digests the engine compares: a public API hash, an extra hash that also
//! covers trait-private members, and one hash per public name.

use md5::Digest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What kind of definition a [`ClassLike`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DefinitionKind {
    Class,
    Trait,
    Module,
    PackageModule,
}

impl DefinitionKind {
    /// Whether the definition lands in the class half of a companion pair.
    pub fn is_class_half(&self) -> bool {
        matches!(self, DefinitionKind::Class | DefinitionKind::Trait)
    }
}

/// Scope a simple name is used in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UseScope {
    Default,
    Implicit,
    PatternMatchTarget,
}

/// A simple-identifier reference from one class to a name it did not declare.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UsedName {
    pub name: String,
    pub scopes: BTreeSet<UseScope>,
}

impl UsedName {
    pub fn new(name: impl Into<String>, scopes: impl IntoIterator<Item = UseScope>) -> Self {
        Self { name: name.into(), scopes: scopes.into_iter().collect() }
    }
}

/// One member of a class-like definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    /// Canonical signature. Any change to it moves the owning hashes.
    pub signature: String,
    /// Implicit members hash under [`UseScope::Implicit`].
    pub implicit: bool,
}

impl Definition {
    pub fn new(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self { name: name.into(), signature: signature.into(), implicit: false }
    }

    pub fn implicit(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self { name: name.into(), signature: signature.into(), implicit: true }
    }
}

/// The API shape the compiler hands over for a single class-like definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLike {
    /// Source class name, dotted, with the canonical inner-class separator.
    pub name: String,
    pub kind: DefinitionKind,
    pub public: Vec<Definition>,
    /// Private members. They only ever reach a trait's extra hash.
    pub private: Vec<Definition>,
    /// Direct children of a sealed hierarchy rooted at this definition.
    pub sealed_children: Vec<String>,
    pub has_macro: bool,
}

impl ClassLike {
    pub fn new(name: impl Into<String>, kind: DefinitionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            public: Vec::new(),
            private: Vec::new(),
            sealed_children: Vec::new(),
            has_macro: false,
        }
    }
}

/// Per-name digest used to prune member-ref invalidation to dependents that
/// reference the changed name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NameHash {
    pub name: String,
    pub scope: UseScope,
    pub hash: u64,
}

/// Digest of a class's API at one point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzedClass {
    /// Start of the compile cycle that produced this record, ms since epoch.
    pub compile_timestamp: u64,
    /// Source class name.
    pub name: String,
    pub api_hash: u64,
    /// Like `api_hash` but additionally covering trait-private members and
    /// sealed children. Drives inheritance invalidation.
    pub extra_hash: u64,
    pub name_hashes: Vec<NameHash>,
    pub has_macro: bool,
}

impl AnalyzedClass {
    /// Names whose hash differs between `self` and `other`, including names
    /// present on only one side.
    pub fn modified_names(&self, other: &AnalyzedClass) -> BTreeSet<(String, UseScope)> {
        let left: BTreeMap<(&str, UseScope), u64> =
            self.name_hashes.iter().map(|n| ((n.name.as_str(), n.scope), n.hash)).collect();
        let right: BTreeMap<(&str, UseScope), u64> =
            other.name_hashes.iter().map(|n| ((n.name.as_str(), n.scope), n.hash)).collect();

        let mut out = BTreeSet::new();
        for (key, hash) in &left {
            if right.get(key) != Some(hash) {
                out.insert((key.0.to_string(), key.1));
            }
        }
        for key in right.keys() {
            if !left.contains_key(key) {
                out.insert((key.0.to_string(), key.1));
            }
        }
        out
    }
}

/// Hashes of one companion half, before merging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ApiHashes {
    pub api_hash: u64,
    pub extra_hash: u64,
    pub name_hashes: Vec<NameHash>,
    pub has_macro: bool,
}

/// 64-bit digest of a sequence of byte chunks.
pub(crate) fn hash64<I>(chunks: I) -> u64
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let mut hasher = md5::Md5::new();
    for chunk in chunks {
        hasher.update(chunk.as_ref());
        // separator, so concatenations of adjacent chunks don't collide
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Last segment of a dotted class name.
pub(crate) fn simple_name(class_name: &str) -> &str {
    class_name.rsplit('.').next().unwrap_or(class_name)
}

fn def_encoding(def: &Definition) -> String {
    let marker = if def.implicit { "implicit " } else { "" };
    format!("{marker}{}:{}", def.name, def.signature)
}

/// Reduces one API shape to its hashes.
///
/// The public hash covers the kind, the name and all public members. The
/// extra hash additionally covers sealed children and, for traits, private
/// members. With `use_optimized_sealed` the sealed children are kept out of
/// the public hash, so adding a child no longer invalidates every member-ref
/// dependent; pattern matches still see it through their own name hash.
pub(crate) fn hash_class_like(class: &ClassLike, use_optimized_sealed: bool) -> ApiHashes {
    let mut public: Vec<&Definition> = class.public.iter().collect();
    public.sort_by(|a, b| (&a.name, &a.signature).cmp(&(&b.name, &b.signature)));

    let mut sealed: Vec<&String> = class.sealed_children.iter().collect();
    sealed.sort();

    let mut api_parts: Vec<String> = vec![format!("{:?}", class.kind), class.name.clone()];
    api_parts.extend(public.iter().map(|d| def_encoding(d)));
    if !use_optimized_sealed {
        api_parts.extend(sealed.iter().map(|c| format!("sealed:{c}")));
    }
    let api_hash = hash64(api_parts.iter().map(String::as_bytes));

    let mut extra_parts: Vec<String> = vec![format!("{:?}", class.kind), class.name.clone()];
    extra_parts.extend(public.iter().map(|d| def_encoding(d)));
    extra_parts.extend(sealed.iter().map(|c| format!("sealed:{c}")));
    if class.kind == DefinitionKind::Trait {
        let mut private: Vec<&Definition> = class.private.iter().collect();
        private.sort_by(|a, b| (&a.name, &a.signature).cmp(&(&b.name, &b.signature)));
        extra_parts.extend(private.iter().map(|d| def_encoding(d)));
    }
    let extra_hash = hash64(extra_parts.iter().map(String::as_bytes));

    let mut groups: BTreeMap<(String, UseScope), Vec<String>> = BTreeMap::new();
    for def in &public {
        let scope = if def.implicit { UseScope::Implicit } else { UseScope::Default };
        groups.entry((def.name.clone(), scope)).or_default().push(def_encoding(def));
    }
    if !sealed.is_empty() {
        let entry = groups
            .entry((simple_name(&class.name).to_string(), UseScope::PatternMatchTarget))
            .or_default();
        entry.extend(sealed.iter().map(|c| c.to_string()));
    }
    let name_hashes = groups
        .into_iter()
        .map(|((name, scope), parts)| NameHash {
            name,
            scope,
            hash: hash64(parts.iter().map(String::as_bytes)),
        })
        .collect();

    ApiHashes { api_hash, extra_hash, name_hashes, has_macro: class.has_macro }
}

/// Merges the class and object halves of a companion pair into one record.
pub(crate) fn merge_companions(
    name: &str,
    class_half: Option<&ApiHashes>,
    object_half: Option<&ApiHashes>,
    compile_timestamp: u64,
) -> AnalyzedClass {
    let combine = |pick: fn(&ApiHashes) -> u64| -> u64 {
        match (class_half, object_half) {
            (Some(c), Some(o)) => hash64([pick(c).to_le_bytes(), pick(o).to_le_bytes()]),
            (Some(c), None) => pick(c),
            (None, Some(o)) => pick(o),
            (None, None) => hash64(std::iter::empty::<&[u8]>()),
        }
    };

    let mut name_hashes: BTreeMap<(String, UseScope), u64> = BTreeMap::new();
    for half in [class_half, object_half].into_iter().flatten() {
        for nh in &half.name_hashes {
            name_hashes
                .entry((nh.name.clone(), nh.scope))
                .and_modify(|hash| {
                    *hash = hash64([hash.to_le_bytes(), nh.hash.to_le_bytes()]);
                })
                .or_insert(nh.hash);
        }
    }

    AnalyzedClass {
        compile_timestamp,
        name: name.to_string(),
        api_hash: combine(|h| h.api_hash),
        extra_hash: combine(|h| h.extra_hash),
        name_hashes: name_hashes
            .into_iter()
            .map(|((name, scope), hash)| NameHash { name, scope, hash })
            .collect(),
        has_macro: class_half.map_or(false, |h| h.has_macro)
            || object_half.map_or(false, |h| h.has_macro),
    }
}
