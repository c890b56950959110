//! End-to-end scenarios driving the incremental engine against a scripted
//! compiler for a small class-based language.

use smelter::{
    analysis::{AnalyzedSource, NonLocalProduct, SourceInfo},
    Analysis, AnalysisCallback, AnalyzedClass, CancelToken, ClassFileManager, ClassLike,
    CompileResult, Compiler, Definition, DefinitionKind, DependencyChanges, DependencyContext,
    Error, FileConverter, IncOptions, IncrementalDriver, Lookup, PreviousAnalysis,
    RootedConverter, Stamp, UseScope, VirtualFile, VirtualFileRef,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn simple(binary: &str) -> &str {
    binary.rsplit('.').next().unwrap_or(binary)
}

fn default_scope() -> BTreeSet<UseScope> {
    BTreeSet::from([UseScope::Default])
}

/// One class of the scripted language.
#[derive(Clone, Debug)]
struct SimClass {
    name: String,
    kind: DefinitionKind,
    /// Binary name the emitted class file is registered under; defaults to
    /// the class name.
    binary: Option<String>,
    public: Vec<(String, String)>,
    body: String,
    extends: Option<String>,
    extends_external: Option<String>,
    calls: Vec<(String, String)>,
    library_refs: Vec<String>,
    /// Library references the class never names in code, e.g. synthetic
    /// bridge references.
    quiet_library_refs: Vec<String>,
    has_macro: bool,
}

impl SimClass {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: DefinitionKind::Class,
            binary: None,
            public: Vec::new(),
            body: String::new(),
            extends: None,
            extends_external: None,
            calls: Vec::new(),
            library_refs: Vec::new(),
            quiet_library_refs: Vec::new(),
            has_macro: false,
        }
    }

    fn public(mut self, name: &str, signature: &str) -> Self {
        self.public.push((name.to_string(), signature.to_string()));
        self
    }

    fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    fn extends(mut self, parent: &str) -> Self {
        self.extends = Some(parent.to_string());
        self
    }

    fn extends_external(mut self, binary: &str) -> Self {
        self.extends_external = Some(binary.to_string());
        self
    }

    fn calls(mut self, class: &str, member: &str) -> Self {
        self.calls.push((class.to_string(), member.to_string()));
        self
    }

    fn library_ref(mut self, binary: &str) -> Self {
        self.library_refs.push(binary.to_string());
        self
    }

    fn quiet_library_ref(mut self, binary: &str) -> Self {
        self.quiet_library_refs.push(binary.to_string());
        self
    }

    fn binary(mut self, binary: &str) -> Self {
        self.binary = Some(binary.to_string());
        self
    }

    fn with_macro(mut self) -> Self {
        self.has_macro = true;
        self
    }

    fn binary_name(&self) -> &str {
        self.binary.as_deref().unwrap_or(&self.name)
    }

    fn shape(&self) -> ClassLike {
        let mut shape = ClassLike::new(self.name.as_str(), self.kind);
        shape.public = self
            .public
            .iter()
            .map(|(name, sig)| Definition::new(name.as_str(), sig.as_str()))
            .collect();
        shape.has_macro = self.has_macro;
        shape
    }
}

fn render_source(classes: &[SimClass]) -> String {
    let mut out = String::new();
    for class in classes {
        out.push_str(&format!("class {}", class.name));
        if let Some(parent) = &class.extends {
            out.push_str(&format!(" extends {parent}"));
        }
        if let Some(parent) = &class.extends_external {
            out.push_str(&format!(" extends {parent}"));
        }
        out.push_str(" {\n");
        for (name, sig) in &class.public {
            out.push_str(&format!("  def {name}: {sig}\n"));
        }
        for (target, member) in &class.calls {
            out.push_str(&format!("  // calls {target}.{member}\n"));
        }
        out.push_str(&format!("  // {}\n}}\n", class.body));
    }
    out
}

#[derive(Debug, Default)]
struct MapLookup {
    classpath: Mutex<BTreeMap<String, VirtualFile>>,
    analyses: Mutex<BTreeMap<String, Arc<Analysis>>>,
}

impl MapLookup {
    fn set_analysis(&self, binary: &str, analysis: Arc<Analysis>) {
        self.analyses.lock().insert(binary.to_string(), analysis);
    }
}

impl Lookup for MapLookup {
    fn on_classpath(&self, binary_name: &str) -> Option<VirtualFile> {
        self.classpath.lock().get(binary_name).cloned()
    }

    fn analysis_for(&self, binary_name: &str) -> Option<Arc<Analysis>> {
        self.analyses.lock().get(binary_name).cloned()
    }
}

/// The analysis of an upstream compile unit that emitted `binary`.
fn upstream_analysis(src_class: &str, binary: &str, api_hash: u64, extra_hash: u64) -> Arc<Analysis> {
    let mut analysis = Analysis::default();
    analysis
        .add_source(AnalyzedSource {
            file: VirtualFileRef::from("upstream/X.cls"),
            stamp: Stamp::content_of(b"upstream"),
            classes: vec![AnalyzedClass {
                compile_timestamp: 0,
                name: src_class.to_string(),
                api_hash,
                extra_hash,
                name_hashes: Vec::new(),
                has_macro: false,
            }],
            info: SourceInfo::default(),
            non_local_products: vec![NonLocalProduct {
                src_class: src_class.to_string(),
                binary_name: binary.to_string(),
                file: VirtualFileRef::from("upstream/X.class"),
                stamp: Stamp::LastModified(1),
            }],
            local_products: Vec::new(),
            internal_deps: Vec::new(),
            external_deps: Vec::new(),
            library_deps: Vec::new(),
            library_class_names: Vec::new(),
            used_names: BTreeMap::new(),
            shapes: Vec::new(),
        })
        .unwrap();
    Arc::new(analysis)
}

struct TestProject {
    _dir: TempDir,
    converter: Arc<RootedConverter>,
    lookup: Arc<MapLookup>,
    sources: BTreeMap<String, Vec<SimClass>>,
}

impl TestProject {
    fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let converter = Arc::new(RootedConverter::new(dir.path()));
        fs::create_dir_all(converter.root().join("src")).unwrap();
        fs::create_dir_all(converter.root().join("classes")).unwrap();
        fs::create_dir_all(converter.root().join("lib")).unwrap();
        Self {
            _dir: dir,
            converter,
            lookup: Arc::new(MapLookup::default()),
            sources: BTreeMap::new(),
        }
    }

    fn root(&self) -> &Path {
        self.converter.root()
    }

    fn source_id(stem: &str) -> String {
        format!("src/{stem}.cls")
    }

    fn write_source(&mut self, stem: &str, classes: Vec<SimClass>) {
        let id = Self::source_id(stem);
        let path = self.converter.to_path(&VirtualFileRef::from(id.as_str()));
        fs::write(&path, render_source(&classes)).unwrap();
        self.sources.insert(id, classes);
    }

    fn touch_whitespace(&self, stem: &str) {
        let path = self.converter.to_path(&VirtualFileRef::from(Self::source_id(stem).as_str()));
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push('\n');
        fs::write(&path, contents).unwrap();
    }

    fn remove_source(&mut self, stem: &str) {
        let id = Self::source_id(stem);
        let path = self.converter.to_path(&VirtualFileRef::from(id.as_str()));
        fs::remove_file(path).unwrap();
        self.sources.remove(&id);
    }

    fn input(&self) -> Vec<VirtualFile> {
        self.sources
            .keys()
            .map(|id| {
                let file_ref = VirtualFileRef::from(id.as_str());
                let path = self.converter.to_path(&file_ref);
                VirtualFile::new(file_ref, path)
            })
            .collect()
    }

    fn class_path(&self, binary: &str) -> PathBuf {
        self.root().join("classes").join(format!("{binary}.class"))
    }

    fn lib_path(&self, binary: &str) -> PathBuf {
        self.root().join("lib").join(format!("{binary}.jar"))
    }

    fn add_library(&self, binary: &str) {
        fs::write(self.lib_path(binary), format!("jar for {binary}")).unwrap();
    }

    fn delete_library(&self, binary: &str) {
        fs::remove_file(self.lib_path(binary)).unwrap();
    }

    fn disk_classes(&self) -> BTreeMap<String, Vec<u8>> {
        fs::read_dir(self.root().join("classes"))
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                (entry.file_name().to_string_lossy().into_owned(), fs::read(entry.path()).unwrap())
            })
            .collect()
    }
}

/// Scripted compiler: "compiles" the sources it is given by replaying their
/// class definitions into the callback and rewriting their class files.
struct FakeCompiler<'p> {
    project: &'p TestProject,
    invocations: Vec<BTreeSet<String>>,
    /// Fail after partially emitting this source.
    fail_on: Option<String>,
    /// Change every emitted signature on every call, to simulate a build
    /// that never settles.
    churn: bool,
    counter: u64,
}

impl<'p> FakeCompiler<'p> {
    fn new(project: &'p TestProject) -> Self {
        Self { project, invocations: Vec::new(), fail_on: None, churn: false, counter: 0 }
    }
}

impl Compiler for FakeCompiler<'_> {
    fn compile(
        &mut self,
        sources: &[VirtualFile],
        _changes: &DependencyChanges,
        callback: &dyn AnalysisCallback,
        manager: &dyn ClassFileManager,
    ) -> smelter::Result<()> {
        let ids: BTreeSet<String> = sources.iter().map(|f| f.id().id().to_string()).collect();
        self.invocations.push(ids);
        self.counter += 1;

        for file in sources {
            callback.start_source(file);
        }
        for file in sources {
            let id = file.id().id().to_string();
            let classes = self.project.sources.get(&id).cloned().unwrap_or_default();
            for class in &classes {
                let mut shape = class.shape();
                if self.churn {
                    for def in &mut shape.public {
                        def.signature = format!("{}#{}", def.signature, self.counter);
                    }
                }

                let out = self.project.class_path(class.binary_name());
                fs::write(&out, format!("{shape:?}//{}", class.body)).unwrap();
                manager.generated(std::slice::from_ref(&out));
                callback.generated_non_local_class(
                    file.id(),
                    &out,
                    class.binary_name(),
                    &class.name,
                );
                callback.api(file.id(), &shape);

                if let Some(parent) = &class.extends {
                    callback.class_dependency(parent, &class.name, DependencyContext::Inheritance);
                    callback.used_name(&class.name, simple(parent), &default_scope());
                }
                if let Some(parent) = &class.extends_external {
                    callback.binary_dependency(
                        &self.project.lib_path(parent),
                        parent,
                        &class.name,
                        file.id(),
                        DependencyContext::Inheritance,
                    );
                    callback.used_name(&class.name, simple(parent), &default_scope());
                }
                for (target, member) in &class.calls {
                    callback.class_dependency(target, &class.name, DependencyContext::MemberRef);
                    callback.used_name(&class.name, member, &default_scope());
                }
                for binary in &class.library_refs {
                    callback.binary_dependency(
                        &self.project.lib_path(binary),
                        binary,
                        &class.name,
                        file.id(),
                        DependencyContext::MemberRef,
                    );
                    callback.used_name(&class.name, simple(binary), &default_scope());
                }
                for binary in &class.quiet_library_refs {
                    callback.binary_dependency(
                        &self.project.lib_path(binary),
                        binary,
                        &class.name,
                        file.id(),
                        DependencyContext::MemberRef,
                    );
                }
            }
            if self.fail_on.as_deref() == Some(id.as_str()) {
                return Err(Error::CompileFailed(format!("scripted failure in {id}")));
            }
        }
        callback.dependency_phase_completed();
        callback.api_phase_completed();
        Ok(())
    }
}

fn driver(project: &TestProject, options: IncOptions) -> IncrementalDriver {
    IncrementalDriver::new(options, project.converter.clone(), project.lookup.clone())
}

fn transactional(project: &TestProject) -> IncOptions {
    IncOptions {
        transactional: true,
        staging_dir: Some(project.root().join(".staging")),
        ..Default::default()
    }
}

fn run(
    project: &TestProject,
    driver: &IncrementalDriver,
    previous: PreviousAnalysis,
) -> (CompileResult, Vec<BTreeSet<String>>) {
    let mut compiler = FakeCompiler::new(project);
    let result = driver
        .compile(project.input(), previous, &mut compiler, &CancelToken::new())
        .unwrap();
    (result, compiler.invocations)
}

fn ids(stems: &[&str]) -> BTreeSet<String> {
    stems.iter().map(|stem| TestProject::source_id(stem)).collect()
}

/// Checks the analysis against the on-disk state after a committed run.
fn assert_wellformed(project: &TestProject, analysis: &Analysis) {
    // every recorded source stamp matches the file
    for (src, stamp) in &analysis.stamps.sources {
        let path = project.converter.to_path(src);
        assert_eq!(stamp, &Stamp::content_from_file(&path).unwrap(), "stale stamp for {src}");
    }
    // the product class name mapping stays injective
    let mut by_binary: BTreeMap<&String, &String> = BTreeMap::new();
    for (class, binary) in analysis.relations.product_class_name_pairs() {
        if let Some(previous) = by_binary.insert(binary, class) {
            panic!("binary {binary} claimed by {previous} and {class}");
        }
    }
    // the tracked products are exactly what is on disk
    let on_disk: BTreeSet<String> = project.disk_classes().into_keys().collect();
    let tracked: BTreeSet<String> = analysis
        .stamps
        .products
        .keys()
        .map(|p| p.id().rsplit('/').next().unwrap().to_string())
        .collect();
    assert_eq!(on_disk, tracked);
}

#[test]
fn clean_build_then_noop() {
    let mut project = TestProject::new();
    project.write_source("A", vec![SimClass::new("A").public("foo", "():Int")]);
    project.write_source(
        "B",
        vec![SimClass::new("B").extends("A").calls("A", "foo").public("bar", "():String")],
    );

    let driver = driver(&project, IncOptions::default());
    let (first, invocations) = run(&project, &driver, PreviousAnalysis::Empty);
    assert!(first.changed);
    assert_eq!(invocations, vec![ids(&["A", "B"])]);
    assert_wellformed(&project, &first.analysis);

    // nothing changed, so the second run does not compile at all
    let (second, invocations) = run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));
    assert!(!second.changed);
    assert!(invocations.is_empty());
    assert_eq!(second.analysis, first.analysis);
}

#[test]
fn signature_change_ripples_to_dependents() {
    let mut project = TestProject::new();
    project.write_source("A", vec![SimClass::new("A").public("foo", "():Int")]);
    project.write_source(
        "B",
        vec![SimClass::new("B").extends("A").calls("A", "foo").public("bar", "():String")],
    );

    let driver = driver(&project, IncOptions::default());
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);
    let before = project.disk_classes();

    // foo now returns Long; B both inherits from A and calls foo
    project.write_source("A", vec![SimClass::new("A").public("foo", "():Long")]);
    let (second, invocations) =
        run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));

    assert!(second.changed);
    assert_eq!(invocations, vec![ids(&["A"]), ids(&["B"])]);
    assert_wellformed(&project, &second.analysis);

    let after = project.disk_classes();
    assert_ne!(before["A.class"], after["A.class"]);
    // B was rebuilt against the new A even though its own definition is the same
    assert_eq!(before.len(), after.len());
}

#[test]
fn body_change_stays_local() {
    let mut project = TestProject::new();
    project.write_source("A", vec![SimClass::new("A").public("foo", "():Int").body("return 1")]);
    project.write_source("B", vec![SimClass::new("B").extends("A").calls("A", "foo")]);

    let driver = driver(&project, IncOptions::default());
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);

    project.write_source("A", vec![SimClass::new("A").public("foo", "():Int").body("return 2")]);
    let (second, invocations) =
        run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));

    assert!(second.changed);
    // the API hash did not move, so B stays untouched
    assert_eq!(invocations, vec![ids(&["A"])]);
    assert_wellformed(&project, &second.analysis);
}

#[test]
fn whitespace_touch_recompiles_only_the_source() {
    let mut project = TestProject::new();
    project.write_source("A", vec![SimClass::new("A").public("foo", "():Int")]);
    project.write_source("B", vec![SimClass::new("B").calls("A", "foo")]);

    let driver = driver(&project, IncOptions::default());
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);

    project.touch_whitespace("A");
    let (second, invocations) =
        run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));

    assert!(second.changed);
    assert_eq!(invocations, vec![ids(&["A"])]);
}

#[test]
fn name_hash_pruning_skips_unrelated_members() {
    let mut project = TestProject::new();
    project.write_source(
        "A",
        vec![SimClass::new("A").public("foo", "():Int").public("bar", "():Int")],
    );
    // B only ever calls bar
    project.write_source("B", vec![SimClass::new("B").calls("A", "bar")]);

    let driver = driver(&project, IncOptions::default());
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);

    // foo changes, bar does not; B must not recompile
    project.write_source(
        "A",
        vec![SimClass::new("A").public("foo", "():Long").public("bar", "():Int")],
    );
    let (second, invocations) =
        run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));

    assert_eq!(invocations, vec![ids(&["A"])]);
    assert_wellformed(&project, &second.analysis);
}

#[test]
fn removed_source_is_pruned_without_recompiling() {
    let mut project = TestProject::new();
    project.write_source("A", vec![SimClass::new("A").public("foo", "():Int")]);
    project.write_source("B", vec![SimClass::new("B").public("bar", "():Int")]);

    let driver = driver(&project, IncOptions::default());
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);
    assert!(project.class_path("B").exists());

    project.remove_source("B");
    let (second, invocations) =
        run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));

    assert!(second.changed);
    assert!(invocations.is_empty());
    assert!(!project.class_path("B").exists());
    assert!(!second.analysis.stamps.sources.contains_key(&VirtualFileRef::from("src/B.cls")));
    assert_wellformed(&project, &second.analysis);
}

#[test]
fn removed_class_invalidates_its_dependents() {
    let mut project = TestProject::new();
    project.write_source("A", vec![SimClass::new("A").public("foo", "():Int")]);
    project.write_source("B", vec![SimClass::new("B").calls("A", "foo")]);

    let driver = driver(&project, IncOptions::default());
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);

    project.remove_source("A");
    let (second, invocations) =
        run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));

    // B referenced a name of the removed class and has to face the music
    assert_eq!(invocations, vec![ids(&["B"])]);
    assert!(second.changed);
}

#[test]
fn macro_classes_invalidate_member_ref_dependents_conservatively() {
    let mut project = TestProject::new();
    project.write_source(
        "A",
        vec![SimClass::new("A").public("foo", "():Int").public("gen", "():Tree").with_macro()],
    );
    // B calls gen, whose hash will not move
    project.write_source("B", vec![SimClass::new("B").calls("A", "gen")]);

    let driver = driver(&project, IncOptions::default());
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);

    // only foo changes; without the macro B would stay clean
    project.write_source(
        "A",
        vec![SimClass::new("A").public("foo", "():Long").public("gen", "():Tree").with_macro()],
    );
    let (second, invocations) =
        run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));

    assert_eq!(invocations, vec![ids(&["A"]), ids(&["B"])]);
    assert_wellformed(&project, &second.analysis);
}

#[test]
fn external_extra_hash_change_invalidates_inheritors() {
    let mut project = TestProject::new();
    project.lookup.set_analysis("pkg.X", upstream_analysis("X", "pkg.X", 1, 1));
    project.write_source("C", vec![SimClass::new("C").extends_external("pkg.X")]);
    project.write_source("D", vec![SimClass::new("D").public("d", "():Int")]);

    let driver = driver(&project, IncOptions::default());
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);

    // the upstream trait grew a private member; api hash is unchanged
    project.lookup.set_analysis("pkg.X", upstream_analysis("X", "pkg.X", 1, 2));
    let (second, invocations) =
        run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));

    assert_eq!(invocations, vec![ids(&["C"])]);
    assert_wellformed(&project, &second.analysis);

    // the re-recorded external API converges
    let (third, invocations) =
        run(&project, &driver, PreviousAnalysis::from(second.analysis.clone()));
    assert!(!third.changed);
    assert!(invocations.is_empty());
}

#[test]
fn library_change_without_matching_used_names_recompiles_nothing() {
    let mut project = TestProject::new();
    project.add_library("lib.Thing");
    project.write_source("D", vec![SimClass::new("D").quiet_library_ref("lib.Thing")]);

    let driver = driver(&project, IncOptions::default());
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);

    project.delete_library("lib.Thing");
    let (second, invocations) =
        run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));

    // D never names Thing, so the library delta does not force a recompile
    assert!(invocations.is_empty());
    assert!(second.changed);
}

#[test]
fn library_change_with_matching_used_names_recompiles_users() {
    let mut project = TestProject::new();
    project.add_library("lib.Helper");
    project.write_source("E", vec![SimClass::new("E").library_ref("lib.Helper")]);
    project.write_source("F", vec![SimClass::new("F").public("f", "():Int")]);

    let driver = driver(&project, IncOptions::default());
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);

    project.delete_library("lib.Helper");
    let (second, invocations) =
        run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));

    assert_eq!(invocations, vec![ids(&["E"])]);

    // a library that stays gone is not reported as changed again
    let (third, invocations) =
        run(&project, &driver, PreviousAnalysis::from(second.analysis.clone()));
    assert!(!third.changed);
    assert!(invocations.is_empty());
}

#[test]
fn compile_failure_rolls_back_the_output_set() {
    let mut project = TestProject::new();
    project.write_source("A", vec![SimClass::new("A").public("foo", "():Int")]);
    project.write_source("B", vec![SimClass::new("B").extends("A").calls("A", "foo")]);

    let options = transactional(&project);
    let driver = driver(&project, options);
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);
    let before = project.disk_classes();

    project.write_source("A", vec![SimClass::new("A").public("foo", "():Long")]);
    let mut compiler = FakeCompiler::new(&project);
    compiler.fail_on = Some(TestProject::source_id("A"));
    let err = driver
        .compile(
            project.input(),
            PreviousAnalysis::from(first.analysis.clone()),
            &mut compiler,
            &CancelToken::new(),
        )
        .unwrap_err();

    assert!(matches!(err, Error::CompileFailed(_)));
    // the workspace looks exactly like it did before the failed run
    assert_eq!(project.disk_classes(), before);

    // the previous analysis is still good for a retry
    let (second, invocations) =
        run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));
    assert_eq!(invocations, vec![ids(&["A"]), ids(&["B"])]);
    assert_wellformed(&project, &second.analysis);
}

#[test]
fn cycle_limit_exceeded_rolls_back() {
    let mut project = TestProject::new();
    project.write_source("A", vec![SimClass::new("A").public("a", "():Int").calls("B", "b")]);
    project.write_source("B", vec![SimClass::new("B").public("b", "():Int").calls("A", "a")]);

    let options = IncOptions { max_cycles: 3, ..transactional(&project) };
    let driver = driver(&project, options);
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);
    let before = project.disk_classes();

    project.touch_whitespace("A");
    let mut compiler = FakeCompiler::new(&project);
    compiler.churn = true;
    let err = driver
        .compile(
            project.input(),
            PreviousAnalysis::from(first.analysis.clone()),
            &mut compiler,
            &CancelToken::new(),
        )
        .unwrap_err();

    assert!(matches!(err, Error::CycleLimitExceeded(3)));
    assert_eq!(project.disk_classes(), before);
}

#[test]
fn invalidation_beyond_the_fraction_escalates_to_a_full_recompile() {
    let mut project = TestProject::new();
    project.write_source("A", vec![SimClass::new("A").public("a", "():Int")]);
    project.write_source("B", vec![SimClass::new("B").public("b", "():Int")]);
    project.write_source("C", vec![SimClass::new("C").public("c", "():Int")]);

    let options = IncOptions { recompile_all_fraction: 0.4, ..Default::default() };
    let driver = driver(&project, options);
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);

    project.write_source("A", vec![SimClass::new("A").public("a", "():Long")]);
    project.write_source("B", vec![SimClass::new("B").public("b", "():Long")]);
    let (second, invocations) =
        run(&project, &driver, PreviousAnalysis::from(first.analysis.clone()));

    // two of three invalidated sources crossed the threshold
    assert_eq!(invocations, vec![ids(&["A", "B", "C"])]);
    assert_wellformed(&project, &second.analysis);
}

#[test]
fn cancellation_returns_no_change() {
    let mut project = TestProject::new();
    project.write_source("A", vec![SimClass::new("A").public("a", "():Int")]);

    let driver = driver(&project, IncOptions::default());
    let (first, _) = run(&project, &driver, PreviousAnalysis::Empty);

    project.write_source("A", vec![SimClass::new("A").public("a", "():Long")]);
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut compiler = FakeCompiler::new(&project);
    let result = driver
        .compile(
            project.input(),
            PreviousAnalysis::from(first.analysis.clone()),
            &mut compiler,
            &cancel,
        )
        .unwrap();

    assert!(!result.changed);
    assert!(compiler.invocations.is_empty());
    assert_eq!(result.analysis, first.analysis);
}

#[test]
fn colliding_binary_names_fail_the_run() {
    let mut project = TestProject::new();
    project.write_source("A", vec![SimClass::new("A").binary("Dup").public("a", "():Int")]);
    project.write_source("B", vec![SimClass::new("B").binary("Dup").public("b", "():Int")]);

    let driver = driver(&project, IncOptions::default());
    let mut compiler = FakeCompiler::new(&project);
    let err = driver
        .compile(project.input(), PreviousAnalysis::Empty, &mut compiler, &CancelToken::new())
        .unwrap_err();

    assert!(matches!(err, Error::InconsistentAnalysis { binary, .. } if binary == "Dup"));
}
