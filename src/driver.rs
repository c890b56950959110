//! Glues change detection, invalidation and the class-file manager around an
//! external compile function.

use crate::{
    analysis::Analysis,
    changes,
    class_files,
    compilers::{Compiler, Lookup, PreviousAnalysis},
    config::IncOptions,
    error::{Error, Result},
    invalidation::{self, CycleRunner},
    stamp::StampOracle,
    vfs::{FileConverter, VirtualFile, VirtualFileRef},
};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Cooperative cancellation flag, polled between cycles.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one incremental run.
#[derive(Clone, Debug, PartialEq)]
pub struct CompileResult {
    /// False when the inputs were already up to date or the run was
    /// cancelled; the analysis is the previous one in that case.
    pub changed: bool,
    pub analysis: Analysis,
}

/// Entry point of the incremental engine.
///
/// The driver itself is single-threaded; only the supplied compile step may
/// fan out onto worker threads, all of which report into the cycle's
/// callback.
pub struct IncrementalDriver {
    options: IncOptions,
    converter: Arc<dyn FileConverter>,
    lookup: Arc<dyn Lookup>,
}

impl std::fmt::Debug for IncrementalDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalDriver")
            .field("options", &self.options)
            .field("converter", &self.converter)
            .field("lookup", &"Arc<dyn Lookup>")
            .finish()
    }
}

impl IncrementalDriver {
    pub fn new(
        options: IncOptions,
        converter: Arc<dyn FileConverter>,
        lookup: Arc<dyn Lookup>,
    ) -> Self {
        Self { options, converter, lookup }
    }

    pub fn options(&self) -> &IncOptions {
        &self.options
    }

    /// Runs the incremental compile loop over `sources`.
    ///
    /// Returns `(changed = false, previous)` when nothing needs to be done or
    /// when the run was cancelled. Any other failure rolls the class-file
    /// manager back before propagating, so the on-disk output set stays what
    /// it was before the run.
    pub fn compile(
        &self,
        sources: Vec<VirtualFile>,
        previous: PreviousAnalysis,
        compiler: &mut dyn Compiler,
        cancel: &CancelToken,
    ) -> Result<CompileResult> {
        let empty = Analysis::default();
        let previous: &Analysis = previous.get().map(Arc::as_ref).unwrap_or(&empty);
        let sources: BTreeMap<VirtualFileRef, VirtualFile> =
            sources.into_iter().map(|file| (file.id().clone(), file)).collect();

        let mut oracle = StampOracle::new(self.converter.as_ref());
        let detected = changes::detect(previous, &sources, &mut oracle, self.lookup.as_ref());
        if detected.is_empty() {
            debug!("no changes detected, analysis is up to date");
            return Ok(CompileResult { changed: false, analysis: previous.clone() });
        }

        let initial = invalidation::invalidate_initial(previous, &detected, self.lookup.as_ref());
        let manager = class_files::for_options(&self.options)?;
        let runner = CycleRunner {
            options: &self.options,
            converter: self.converter.as_ref(),
            lookup: self.lookup.as_ref(),
            manager: manager.as_ref(),
            sources: &sources,
            previous,
        };

        match runner.run(initial, &detected, compiler, cancel) {
            Ok(analysis) => {
                manager.complete(true)?;
                Ok(CompileResult { changed: true, analysis })
            }
            Err(Error::Cancelled) => {
                info!("compilation cancelled, keeping previous outputs");
                manager.complete(false)?;
                Ok(CompileResult { changed: false, analysis: previous.clone() })
            }
            Err(err) => {
                if let Err(rollback) = manager.complete(false) {
                    error!("rollback after failed compilation also failed: {rollback}");
                }
                Err(err)
            }
        }
    }
}
