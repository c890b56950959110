//! The sink the compiler reports into during one compile cycle.
//!
//! A single callback instance lives for exactly one cycle. Compiler worker
//! threads call into it concurrently and in no particular order; only the
//! terminal [`BuildCallback::get`] runs after the compile step has returned
//! and sees a consistent snapshot of everything reported before.

use crate::{
    analysis::{
        Analysis, AnalyzedSource, Compilation, LocalProduct, NonLocalProduct, SourceInfo,
    },
    api::{self, ApiHashes, ClassLike, UseScope, UsedName},
    class_files::ClassFileManager,
    compilers::{Lookup, PreviousAnalysis},
    config::IncOptions,
    error::{Error, Result},
    problem::{Problem, Severity, SourcePosition},
    relations::{DependencyContext, ExternalDependency, InternalDependency},
    stamp::Stamp,
    vfs::{FileConverter, VirtualFile, VirtualFileRef},
};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    mem,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// The capability set a compiler sees while reporting one compile step.
///
/// All operations are fire-and-forget and safe to call from any compiler
/// thread. Operations on the same source are expected to be serialized by
/// the compiler's per-source phase structure.
pub trait AnalysisCallback: Send + Sync {
    /// Registers a source before anything else is reported about it.
    fn start_source(&self, source: &VirtualFile);

    /// Buffers one compiler diagnostic.
    fn problem(
        &self,
        category: &str,
        position: SourcePosition,
        message: &str,
        severity: Severity,
        reported: bool,
    );

    /// Records a dependency between two classes of this compile unit.
    fn class_dependency(&self, on: &str, from: &str, context: DependencyContext);

    /// Records a dependency on a binary class name, resolving it against the
    /// previous analysis, this cycle's own outputs, the external lookup and
    /// finally the plain classpath, in that order.
    fn binary_dependency(
        &self,
        class_file: &Path,
        on_binary_name: &str,
        from_class: &str,
        from_source: &VirtualFileRef,
        context: DependencyContext,
    );

    /// Records an emitted class visible under a binary class name.
    fn generated_non_local_class(
        &self,
        source: &VirtualFileRef,
        class_file: &Path,
        binary_name: &str,
        src_class_name: &str,
    );

    /// Records an emitted class invisible outside its source.
    fn generated_local_class(&self, source: &VirtualFileRef, class_file: &Path);

    /// Hands over the API shape extracted for one class-like definition.
    fn api(&self, source: &VirtualFileRef, class: &ClassLike);

    /// Buffers an entry-point candidate.
    fn main_class(&self, source: &VirtualFileRef, class_name: &str);

    /// Records a simple-name use.
    fn used_name(&self, class_name: &str, name: &str, scopes: &BTreeSet<UseScope>);

    fn dependency_phase_completed(&self);
    fn api_phase_completed(&self);
    fn classes_in_output_jar(&self);

    /// Whether incremental bookkeeping is active at all.
    fn enabled(&self) -> bool {
        true
    }
}

/// Production callback: collects one cycle's worth of compiler reports and
/// finalizes them into an [`Analysis`] delta.
pub struct BuildCallback<'a> {
    options: &'a IncOptions,
    converter: &'a dyn FileConverter,
    lookup: &'a dyn Lookup,
    manager: &'a dyn ClassFileManager,
    previous: PreviousAnalysis,
    /// Start of this cycle, ms since the epoch. Stamped into every record.
    start_time: u64,

    started: DashSet<VirtualFileRef>,
    sources: DashMap<VirtualFileRef, VirtualFile>,
    /// Class-half APIs (classes and traits), keyed by source class name.
    class_apis: DashMap<String, ApiHashes>,
    /// Object-half APIs (modules), keyed by source class name.
    object_apis: DashMap<String, ApiHashes>,
    shapes: DashMap<VirtualFileRef, Vec<ClassLike>>,
    src_classes: DashMap<VirtualFileRef, BTreeSet<String>>,
    class_sources: DashMap<String, VirtualFileRef>,
    macro_sources: DashSet<VirtualFileRef>,
    internal_deps: DashSet<InternalDependency>,
    external_deps: Mutex<Vec<ExternalDependency>>,
    /// Class file emitted earlier in this cycle → owning source class.
    product_classes: DashMap<PathBuf, String>,
    library_files: DashMap<VirtualFileRef, VirtualFile>,
    library_classes: DashMap<VirtualFileRef, BTreeSet<String>>,
    library_deps: DashMap<VirtualFileRef, BTreeSet<VirtualFileRef>>,
    non_local_products: DashMap<VirtualFileRef, Vec<(PathBuf, String, String)>>,
    local_products: DashMap<VirtualFileRef, Vec<PathBuf>>,
    used_names: DashMap<String, BTreeMap<String, BTreeSet<UseScope>>>,
    main_classes: DashMap<VirtualFileRef, Vec<String>>,
    problems: DashMap<PathBuf, Vec<(Problem, bool)>>,
    /// First integration error observed by a fire-and-forget operation;
    /// surfaced by `get`.
    violation: Mutex<Option<Error>>,
    consumed: bool,
}

impl<'a> BuildCallback<'a> {
    pub fn new(
        options: &'a IncOptions,
        converter: &'a dyn FileConverter,
        lookup: &'a dyn Lookup,
        manager: &'a dyn ClassFileManager,
        previous: PreviousAnalysis,
    ) -> Self {
        let start_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            options,
            converter,
            lookup,
            manager,
            previous,
            start_time,
            started: DashSet::new(),
            sources: DashMap::new(),
            class_apis: DashMap::new(),
            object_apis: DashMap::new(),
            shapes: DashMap::new(),
            src_classes: DashMap::new(),
            class_sources: DashMap::new(),
            macro_sources: DashSet::new(),
            internal_deps: DashSet::new(),
            external_deps: Mutex::new(Vec::new()),
            product_classes: DashMap::new(),
            library_files: DashMap::new(),
            library_classes: DashMap::new(),
            library_deps: DashMap::new(),
            non_local_products: DashMap::new(),
            local_products: DashMap::new(),
            used_names: DashMap::new(),
            main_classes: DashMap::new(),
            problems: DashMap::new(),
            violation: Mutex::new(None),
            consumed: false,
        }
    }

    fn park(&self, err: Error) {
        let mut slot = self.violation.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Whether `source` belongs to the analyzed language.
    fn analyzed_source(&self, source: &VirtualFileRef) -> bool {
        source
            .extension()
            .map_or(false, |ext| self.options.analyzed_extensions.iter().any(|e| e == ext))
    }

    /// Finalizes the cycle into an analysis delta.
    ///
    /// May be called once, after the compile step has returned. Fails with
    /// [`Error::DoubleGet`] on reuse and with the parked error if any
    /// fire-and-forget operation detected an integration bug.
    pub fn get(&mut self) -> Result<Analysis> {
        if self.consumed {
            return Err(Error::DoubleGet);
        }
        self.consumed = true;
        if let Some(err) = self.violation.lock().take() {
            return Err(err);
        }

        let sources: BTreeMap<VirtualFileRef, VirtualFile> =
            mem::take(&mut self.sources).into_iter().collect();
        let src_classes: BTreeMap<VirtualFileRef, BTreeSet<String>> =
            mem::take(&mut self.src_classes).into_iter().collect();
        let class_sources: BTreeMap<String, VirtualFileRef> =
            mem::take(&mut self.class_sources).into_iter().collect();
        let mut class_apis: BTreeMap<String, ApiHashes> =
            mem::take(&mut self.class_apis).into_iter().collect();
        let mut object_apis: BTreeMap<String, ApiHashes> =
            mem::take(&mut self.object_apis).into_iter().collect();
        let mut shapes: BTreeMap<VirtualFileRef, Vec<ClassLike>> =
            mem::take(&mut self.shapes).into_iter().collect();
        let macro_sources: BTreeSet<VirtualFileRef> =
            mem::take(&mut self.macro_sources).into_iter().collect();
        let mut non_local_products: BTreeMap<VirtualFileRef, Vec<(PathBuf, String, String)>> =
            mem::take(&mut self.non_local_products).into_iter().collect();
        let mut local_products: BTreeMap<VirtualFileRef, Vec<PathBuf>> =
            mem::take(&mut self.local_products).into_iter().collect();
        let library_files: BTreeMap<VirtualFileRef, VirtualFile> =
            mem::take(&mut self.library_files).into_iter().collect();
        let library_classes: BTreeMap<VirtualFileRef, BTreeSet<String>> =
            mem::take(&mut self.library_classes).into_iter().collect();
        let mut library_deps: BTreeMap<VirtualFileRef, BTreeSet<VirtualFileRef>> =
            mem::take(&mut self.library_deps).into_iter().collect();
        let used_names: BTreeMap<String, BTreeMap<String, BTreeSet<UseScope>>> =
            mem::take(&mut self.used_names).into_iter().collect();
        let mut main_classes: BTreeMap<VirtualFileRef, Vec<String>> =
            mem::take(&mut self.main_classes).into_iter().collect();

        // attribute diagnostics to sources through their positions
        let mut problems: BTreeMap<VirtualFileRef, Vec<(Problem, bool)>> = BTreeMap::new();
        for (path, buffered) in mem::take(&mut self.problems) {
            problems.entry(self.converter.to_ref(&path)).or_default().extend(buffered);
        }

        // group dependencies by the source owning the depending class
        let mut internal_by_src: BTreeMap<VirtualFileRef, Vec<InternalDependency>> =
            BTreeMap::new();
        for dep in mem::take(&mut self.internal_deps) {
            match class_sources.get(&dep.from) {
                Some(src) => internal_by_src.entry(src.clone()).or_default().push(dep),
                None => trace!("dropping dependency from unknown class {}", dep.from),
            }
        }
        let mut external_by_src: BTreeMap<VirtualFileRef, Vec<ExternalDependency>> =
            BTreeMap::new();
        for dep in mem::take(&mut *self.external_deps.lock()) {
            match class_sources.get(&dep.from) {
                Some(src) => external_by_src.entry(src.clone()).or_default().push(dep),
                None => trace!("dropping external dependency from unknown class {}", dep.from),
            }
        }

        let mut analysis = Analysis::default();
        analysis.compilations.push(Compilation { start_time: self.start_time });

        for (file, virtual_file) in sources {
            let classes = src_classes.get(&file).cloned().unwrap_or_default();
            let macro_bearing = macro_sources.contains(&file);

            let mut analyzed = Vec::with_capacity(classes.len());
            let mut per_class_names: BTreeMap<String, BTreeSet<UsedName>> = BTreeMap::new();
            for class in &classes {
                let class_half = class_apis.remove(class);
                let object_half = object_apis.remove(class);
                let mut merged = api::merge_companions(
                    class,
                    class_half.as_ref(),
                    object_half.as_ref(),
                    self.start_time,
                );
                if !macro_bearing {
                    merged.has_macro = false;
                }
                if let Some(uses) = used_names.get(class) {
                    per_class_names.insert(
                        class.clone(),
                        uses.iter()
                            .map(|(name, scopes)| UsedName {
                                name: name.clone(),
                                scopes: scopes.clone(),
                            })
                            .collect(),
                    );
                }
                analyzed.push(merged);
            }

            let mut non_local = Vec::new();
            for (path, binary_name, src_class) in
                non_local_products.remove(&file).unwrap_or_default()
            {
                let stamp = Stamp::modified_from_file(&path).unwrap_or(Stamp::Missing);
                non_local.push(NonLocalProduct {
                    src_class,
                    binary_name,
                    file: self.converter.to_ref(&path),
                    stamp,
                });
            }
            let mut local = Vec::new();
            for path in local_products.remove(&file).unwrap_or_default() {
                let stamp = Stamp::modified_from_file(&path).unwrap_or(Stamp::Missing);
                local.push(LocalProduct { file: self.converter.to_ref(&path), stamp });
            }

            let libraries = library_deps.remove(&file).unwrap_or_default();
            let mut libs = Vec::with_capacity(libraries.len());
            let mut lib_classes = Vec::new();
            for library in libraries {
                let stamp = library_files
                    .get(&library)
                    .map(|f| Stamp::modified_from_file(f.path()).unwrap_or(Stamp::Missing))
                    .unwrap_or(Stamp::Missing);
                for binary in library_classes.get(&library).into_iter().flatten() {
                    lib_classes.push((library.clone(), binary.clone()));
                }
                libs.push((library, stamp));
            }

            let buffered = problems.remove(&file).unwrap_or_default();
            let info = SourceInfo {
                reported: buffered
                    .iter()
                    .filter(|(_, reported)| *reported)
                    .map(|(p, _)| p.clone())
                    .collect(),
                unreported: buffered
                    .iter()
                    .filter(|(_, reported)| !*reported)
                    .map(|(p, _)| p.clone())
                    .collect(),
                main_classes: main_classes.remove(&file).unwrap_or_default(),
            };

            let stamp = virtual_file.content_stamp().unwrap_or_else(|err| {
                trace!("compiled source not stampable: {err}");
                Stamp::Missing
            });

            analysis.add_source(AnalyzedSource {
                file: file.clone(),
                stamp,
                classes: analyzed,
                info,
                non_local_products: non_local,
                local_products: local,
                internal_deps: internal_by_src.remove(&file).unwrap_or_default(),
                external_deps: external_by_src.remove(&file).unwrap_or_default(),
                library_deps: libs,
                library_class_names: lib_classes,
                used_names: per_class_names,
                shapes: shapes.remove(&file).unwrap_or_default(),
            })?;
        }

        Ok(analysis)
    }
}

impl AnalysisCallback for BuildCallback<'_> {
    fn start_source(&self, source: &VirtualFile) {
        trace!("start source {}", source.id());
        if !self.started.insert(source.id().clone()) && self.options.strict_mode {
            self.park(Error::DoubleStartSource(source.id().clone()));
            return;
        }
        self.sources.insert(source.id().clone(), source.clone());
        self.src_classes.entry(source.id().clone()).or_default();
    }

    fn problem(
        &self,
        category: &str,
        position: SourcePosition,
        message: &str,
        severity: Severity,
        reported: bool,
    ) {
        let Some(path) = position.source.clone() else {
            // nothing to attribute the diagnostic to
            trace!("dropping unpositioned diagnostic: {message}");
            return;
        };
        let problem = Problem {
            category: category.to_string(),
            position,
            message: message.to_string(),
            severity,
        };
        self.problems.entry(path).or_default().push((problem, reported));
    }

    fn class_dependency(&self, on: &str, from: &str, context: DependencyContext) {
        if on == from {
            return;
        }
        self.internal_deps.insert(InternalDependency {
            from: from.to_string(),
            to: on.to_string(),
            context,
        });
    }

    fn binary_dependency(
        &self,
        class_file: &Path,
        on_binary_name: &str,
        from_class: &str,
        from_source: &VirtualFileRef,
        context: DependencyContext,
    ) {
        // a name this unit emitted in a previous run
        if let Some(prev) = self.previous.get() {
            if let Some(src_class) = prev.relations.class_of_binary(on_binary_name) {
                let src_class = src_class.clone();
                self.class_dependency(&src_class, from_class, context);
                return;
            }
        }
        // an output of an earlier phase of this very cycle
        if let Some(owner) = self.product_classes.get(class_file) {
            let owner = owner.value().clone();
            self.class_dependency(&owner, from_class, context);
            return;
        }
        // an upstream compile unit with an analysis of its own
        if let Some(api) = self.lookup.analyzed_class(on_binary_name) {
            self.external_deps.lock().push(ExternalDependency {
                from: from_class.to_string(),
                to_binary: on_binary_name.to_string(),
                api,
                context,
            });
            return;
        }
        // a plain library; the classpath entry is authoritative for its
        // identity, the reported class file is the fallback
        let library = self
            .lookup
            .on_classpath(on_binary_name)
            .unwrap_or_else(|| self.converter.to_virtual_file(class_file));
        trace!("library dependency {from_source} -> {}", library.id());
        self.library_classes
            .entry(library.id().clone())
            .or_default()
            .insert(on_binary_name.to_string());
        self.library_deps.entry(from_source.clone()).or_default().insert(library.id().clone());
        self.library_files.insert(library.id().clone(), library);
    }

    fn generated_non_local_class(
        &self,
        source: &VirtualFileRef,
        class_file: &Path,
        binary_name: &str,
        src_class_name: &str,
    ) {
        trace!("generated {binary_name} for {source}");
        self.non_local_products.entry(source.clone()).or_default().push((
            class_file.to_path_buf(),
            binary_name.to_string(),
            src_class_name.to_string(),
        ));
        self.product_classes.insert(class_file.to_path_buf(), src_class_name.to_string());
    }

    fn generated_local_class(&self, source: &VirtualFileRef, class_file: &Path) {
        trace!("generated local class {} for {source}", class_file.display());
        self.local_products.entry(source.clone()).or_default().push(class_file.to_path_buf());
    }

    fn api(&self, source: &VirtualFileRef, class: &ClassLike) {
        let hashes = api::hash_class_like(class, self.options.use_optimized_sealed);
        if class.has_macro && self.analyzed_source(source) {
            self.macro_sources.insert(source.clone());
        }
        if class.kind.is_class_half() {
            self.class_apis.insert(class.name.clone(), hashes);
        } else {
            self.object_apis.insert(class.name.clone(), hashes);
        }
        self.src_classes.entry(source.clone()).or_default().insert(class.name.clone());
        self.class_sources.insert(class.name.clone(), source.clone());
        if self.options.api_debug {
            self.shapes.entry(source.clone()).or_default().push(class.clone());
        }
    }

    fn main_class(&self, source: &VirtualFileRef, class_name: &str) {
        self.main_classes.entry(source.clone()).or_default().push(class_name.to_string());
    }

    fn used_name(&self, class_name: &str, name: &str, scopes: &BTreeSet<UseScope>) {
        self.used_names
            .entry(class_name.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .extend(scopes.iter().copied());
    }

    fn dependency_phase_completed(&self) {
        self.manager.dependency_phase_completed();
    }

    fn api_phase_completed(&self) {
        self.manager.api_phase_completed();
    }

    fn classes_in_output_jar(&self) {
        self.manager.classes_in_output_jar();
    }
}
