//! Incremental compilation core for class-based compilers.
//!
//! Given a set of source files, the analysis a previous compilation
//! produced, and a function performing one full compile step, this crate
//! decides the minimum set of sources that must be recompiled so the
//! resulting artifact set is equivalent to a from-scratch build. It then
//! drives recompile cycles until a fixed point is reached, while managing
//! emitted class files so a failed run leaves the workspace unchanged.
//!
//! The compiler itself is external. It is driven through the
//! [`Compiler`](compilers::Compiler) seam and reports everything it learns
//! into an [`AnalysisCallback`]: class APIs, name uses, dependencies and
//! emitted products. From those reports the engine maintains an
//! [`Analysis`](analysis::Analysis) and, on later runs, uses per-name API
//! hashes to invalidate only dependents that can actually observe a change.

#![warn(rustdoc::all)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

pub mod error;
pub use error::{Error, Result};

pub mod vfs;
pub use vfs::{FileConverter, RootedConverter, VirtualFile, VirtualFileRef};

pub mod stamp;
pub use stamp::{Stamp, StampOracle};

pub mod api;
pub use api::{AnalyzedClass, ClassLike, Definition, DefinitionKind, NameHash, UseScope, UsedName};

pub mod problem;
pub use problem::{Problem, Severity, SourcePosition};

pub mod relations;
pub use relations::{DependencyContext, ExternalDependency, InternalDependency, Relations};

pub mod analysis;
pub use analysis::{Analysis, Compilation, SourceInfo};

mod class_files;
pub use class_files::{
    for_options as class_file_manager_for_options, ClassFileManager, DeleteImmediatelyManager,
    TransactionalManager,
};

pub mod compilers;
pub use compilers::{Compiler, DependencyChanges, Lookup, PreviousAnalysis};

mod callback;
pub use callback::{AnalysisCallback, BuildCallback};

pub mod changes;
pub use changes::InitialChanges;

mod invalidation;

mod config;
pub use config::IncOptions;

mod driver;
pub use driver::{CancelToken, CompileResult, IncrementalDriver};
