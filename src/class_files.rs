//! Scoped bookkeeping of emitted class artifacts.
//!
//! The compiler writes every output through the manager of the current run.
//! Depending on policy, deletions either happen on the spot or are staged so
//! a failed run can be rolled back file-for-file.

use crate::{
    config::IncOptions,
    error::{Error, Result},
};
use parking_lot::Mutex;
use std::{
    collections::BTreeSet,
    fmt, fs,
    io::Write as _,
    path::{Path, PathBuf},
};

/// Owns the lifecycle of emitted artifacts for one compile run.
pub trait ClassFileManager: fmt::Debug + Send + Sync {
    /// Records freshly written outputs.
    fn generated(&self, files: &[PathBuf]);

    /// Removes, or stages, stale outputs.
    fn delete(&self, files: &[PathBuf]) -> Result<()>;

    /// Ends the scope. With `success = false` the on-disk output set is
    /// restored to what it was when the manager was created.
    fn complete(&self, success: bool) -> Result<()>;

    /// Phase notifications forwarded from the compiler.
    fn dependency_phase_completed(&self) {}
    fn api_phase_completed(&self) {}
    fn classes_in_output_jar(&self) {}
}

/// Constructs the manager matching the configured policy.
pub fn for_options(options: &IncOptions) -> Result<Box<dyn ClassFileManager>> {
    if options.transactional {
        let staging = options.staging_dir.clone().ok_or_else(|| {
            Error::msg("transactional class-file management requires a staging directory")
        })?;
        Ok(Box::new(TransactionalManager::new(staging)?))
    } else {
        Ok(Box::new(DeleteImmediatelyManager))
    }
}

fn remove_file_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            trace!("deleted class file {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::Io(err)),
    }
}

/// Unlinks stale outputs on the spot. Completion is a no-op, so there is no
/// way back once a cycle has pruned files.
#[derive(Debug)]
pub struct DeleteImmediatelyManager;

impl ClassFileManager for DeleteImmediatelyManager {
    fn generated(&self, _files: &[PathBuf]) {}

    fn delete(&self, files: &[PathBuf]) -> Result<()> {
        for file in files {
            remove_file_if_present(file)?;
        }
        Ok(())
    }

    fn complete(&self, _success: bool) -> Result<()> {
        Ok(())
    }
}

const MANIFEST: &str = "moved.txt";

/// Stages deletions and records generated outputs so a failed run restores
/// the output set observed at creation.
///
/// Every staged move is appended to a manifest before the run continues, so
/// a crashed process leaves enough state behind for the next startup to
/// restore the staged files.
#[derive(Debug)]
pub struct TransactionalManager {
    staging: PathBuf,
    state: Mutex<TransactionState>,
}

#[derive(Debug, Default)]
struct TransactionState {
    /// staged file inside the staging dir → original location
    moved: Vec<(PathBuf, PathBuf)>,
    generated: BTreeSet<PathBuf>,
    counter: u64,
    completed: bool,
}

impl TransactionalManager {
    /// Opens a transaction scope under `staging`. A manifest left behind by a
    /// crashed run is replayed before the new scope starts.
    pub fn new(staging: impl Into<PathBuf>) -> Result<Self> {
        let staging = staging.into();
        if staging.join(MANIFEST).exists() {
            debug!("found stale staging area at {}, restoring", staging.display());
            restore_from_manifest(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        Ok(Self { staging, state: Mutex::new(TransactionState::default()) })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    fn manifest_path(&self) -> PathBuf {
        self.staging.join(MANIFEST)
    }
}

fn restore_from_manifest(staging: &Path) -> Result<()> {
    let manifest = staging.join(MANIFEST);
    let contents = fs::read_to_string(&manifest)?;
    for line in contents.lines() {
        let Some((staged, original)) = line.split_once('\t') else { continue };
        let staged = staging.join(staged);
        if staged.exists() {
            let original = Path::new(original);
            if let Some(parent) = original.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&staged, original)?;
            debug!("restored {}", original.display());
        }
    }
    fs::remove_file(&manifest)?;
    Ok(())
}

impl ClassFileManager for TransactionalManager {
    fn generated(&self, files: &[PathBuf]) {
        let mut state = self.state.lock();
        for file in files {
            trace!("tracking generated class file {}", file.display());
            state.generated.insert(file.clone());
        }
    }

    fn delete(&self, files: &[PathBuf]) -> Result<()> {
        let mut state = self.state.lock();
        for file in files {
            if state.generated.remove(file) {
                // an output of this very run is simply discarded
                remove_file_if_present(file)?;
                continue;
            }
            if !file.exists() {
                continue;
            }
            let staged_name = state.counter.to_string();
            state.counter += 1;
            let staged = self.staging.join(&staged_name);
            fs::rename(file, &staged)?;
            let mut manifest =
                fs::OpenOptions::new().create(true).append(true).open(self.manifest_path())?;
            writeln!(manifest, "{staged_name}\t{}", file.display())?;
            trace!("staged {} as {}", file.display(), staged.display());
            state.moved.push((staged, file.clone()));
        }
        Ok(())
    }

    fn complete(&self, success: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.completed {
            return Ok(());
        }
        state.completed = true;
        if success {
            for (staged, _) in state.moved.drain(..) {
                remove_file_if_present(&staged)?;
            }
        } else {
            for file in std::mem::take(&mut state.generated) {
                remove_file_if_present(&file)?;
            }
            for (staged, original) in state.moved.drain(..) {
                if staged.exists() {
                    if let Some(parent) = original.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::rename(&staged, &original)?;
                    debug!("restored {}", original.display());
                }
            }
        }
        let _ = fs::remove_file(self.manifest_path());
        Ok(())
    }
}
