//! The seams through which the engine drives an external compiler.

use crate::{
    analysis::Analysis,
    api::AnalyzedClass,
    callback::AnalysisCallback,
    class_files::ClassFileManager,
    error::Result,
    vfs::{VirtualFile, VirtualFileRef},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single full compile step over an explicit source set.
///
/// Implementations report everything they learn into the callback, write all
/// outputs through the manager, and fail with
/// [`Error::Cancelled`](crate::Error::Cancelled) or
/// [`Error::CompileFailed`](crate::Error::CompileFailed).
pub trait Compiler {
    fn compile(
        &mut self,
        sources: &[VirtualFile],
        changes: &DependencyChanges,
        callback: &dyn AnalysisCallback,
        manager: &dyn ClassFileManager,
    ) -> Result<()>;
}

/// Summary of upstream changes handed to the compiler for one cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyChanges {
    pub modified_libraries: Vec<VirtualFileRef>,
    pub modified_classes: Vec<String>,
}

impl DependencyChanges {
    pub fn is_empty(&self) -> bool {
        self.modified_libraries.is_empty() && self.modified_classes.is_empty()
    }
}

/// Resolves binary class names that do not originate from this compile unit.
pub trait Lookup: Send + Sync {
    /// The classpath entry providing `binary_name`, if any.
    fn on_classpath(&self, binary_name: &str) -> Option<VirtualFile>;

    /// The analysis of the upstream unit that emitted `binary_name`.
    fn analysis_for(&self, binary_name: &str) -> Option<Arc<Analysis>>;

    /// The upstream API record behind `binary_name`, resolved through the
    /// owning analysis.
    fn analyzed_class(&self, binary_name: &str) -> Option<AnalyzedClass> {
        self.analysis_for(binary_name)?.class_for_binary(binary_name).cloned()
    }
}

/// The previous run's analysis, or nothing for a clean build.
#[derive(Clone, Debug, Default)]
pub enum PreviousAnalysis {
    #[default]
    Empty,
    Analysis(Arc<Analysis>),
}

impl PreviousAnalysis {
    pub fn get(&self) -> Option<&Arc<Analysis>> {
        match self {
            PreviousAnalysis::Empty => None,
            PreviousAnalysis::Analysis(analysis) => Some(analysis),
        }
    }
}

impl From<Analysis> for PreviousAnalysis {
    fn from(analysis: Analysis) -> Self {
        PreviousAnalysis::Analysis(Arc::new(analysis))
    }
}

impl From<Arc<Analysis>> for PreviousAnalysis {
    fn from(analysis: Arc<Analysis>) -> Self {
        PreviousAnalysis::Analysis(analysis)
    }
}
