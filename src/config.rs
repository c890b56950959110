use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tuning knobs for one incremental compile run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncOptions {
    /// Fail the cycle if the compiler registers the same source twice.
    pub strict_mode: bool,
    /// Retain the full API shapes handed over by the compiler, not just their
    /// hashes.
    pub api_debug: bool,
    /// Exclude sealed children from the public API hash. Pattern matches on
    /// the parent stay tracked through their own name hash.
    pub use_optimized_sealed: bool,
    /// Dump the relation tables after every cycle.
    pub relations_debug: bool,
    /// Stage deleted class files and roll back on failure instead of
    /// unlinking them immediately.
    pub transactional: bool,
    /// Staging area used by the transactional class-file manager.
    pub staging_dir: Option<PathBuf>,
    /// Escalate to a full recompile once this fraction of the input set is
    /// invalidated.
    pub recompile_all_fraction: f64,
    /// Upper bound on invalidation cycles per run.
    pub max_cycles: usize,
    /// Source extensions whose macro-bearing classes propagate invalidations
    /// conservatively.
    pub analyzed_extensions: Vec<String>,
}

impl Default for IncOptions {
    fn default() -> Self {
        Self {
            strict_mode: false,
            api_debug: false,
            use_optimized_sealed: false,
            relations_debug: false,
            transactional: false,
            staging_dir: None,
            recompile_all_fraction: 0.5,
            max_cycles: 16,
            analyzed_extensions: vec!["cls".to_string()],
        }
    }
}
