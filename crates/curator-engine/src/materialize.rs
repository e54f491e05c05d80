//! The materialization orchestrator.
//!
//! Walks a dataset's resource graph in dependency order and drives
//! every resource to COMPLETE. Two-path protocol: producers write only
//! into the staging area (`<datapath>/.downloads/`); the orchestrator
//! alone moves staged output to its final location and flips the
//! persisted state, so consumers can never observe a half-written
//! artefact at a final path.
//!
//! Failure of one resource does not abort the run: its transitive
//! dependents are reported Blocked (naming the root cause) while
//! independent branches keep going.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use curator_core::is_shutdown_requested;

use crate::context::Context;
use crate::error::FetchError;
use crate::graph::Graph;
use crate::resource::{Resource, ResourceKind};
use crate::state::{ResourceState, StateFile};

pub(crate) const STAGING_DIR: &str = ".downloads";
const LOCK_FILENAME: &str = ".state.lock";

/// Terminal outcome of one resource in one materialization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Downloaded and committed during this pass.
    Completed,
    /// Was already COMPLETE; nothing ran.
    AlreadyComplete,
    /// Production failed; the message is the producer's error.
    Failed(String),
    /// Never attempted because a dependency did not complete. `root`
    /// names the resource whose failure started the chain.
    Blocked { root: String },
    /// Shutdown was requested before or during the attempt.
    Cancelled,
}

impl Outcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed | Self::AlreadyComplete)
    }
}

/// Per-resource outcomes of one pass, in declaration order.
#[derive(Debug)]
pub struct MaterializeReport {
    pub dataset: String,
    entries: Vec<(String, Outcome)>,
}

impl MaterializeReport {
    /// True only when every resource ended COMPLETE.
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|(_, o)| o.is_complete())
    }

    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| o)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Outcome)> {
        self.entries.iter().map(|(n, o)| (n.as_str(), o))
    }
}

/// Best-effort advisory lock. A stale or concurrent holder is logged,
/// not fatal.
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(datapath: &Path) -> io::Result<Self> {
        let path = datapath.join(LOCK_FILENAME);
        if let Ok(holder) = fs::read_to_string(&path) {
            log::warn!(
                "{} already held by pid {}; proceeding anyway",
                path.display(),
                holder.trim()
            );
        }
        fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Run one materialization pass over a validated resource graph.
pub(crate) fn run(
    dataset_id: &str,
    resources: &[Resource],
    graph: &Graph,
    ctx: &Context,
    force: bool,
) -> anyhow::Result<MaterializeReport> {
    let datapath = ctx.dataset_dir(dataset_id);
    fs::create_dir_all(&datapath)?;
    let _lock = LockGuard::acquire(&datapath)?;
    let state = StateFile::open(&datapath)?;

    let n = resources.len();
    let status = ctx.progress.status_line(dataset_id);
    status.set_message(format!("materializing {n} resources"));
    let outcomes: Vec<Mutex<Option<Outcome>>> = (0..n).map(|_| Mutex::new(None)).collect();
    let mut cleaned = vec![false; n];

    let done = |i: usize| outcomes[i].lock().unwrap().clone();
    let settle = |i: usize, o: Outcome| {
        *outcomes[i].lock().unwrap() = Some(o);
    };

    loop {
        if is_shutdown_requested() {
            for i in 0..n {
                if done(i).is_none() {
                    settle(i, Outcome::Cancelled);
                }
            }
            break;
        }

        // Propagate blocked status to fixpoint so a whole failed
        // branch settles without scheduling anything.
        loop {
            let mut changed = false;
            for i in 0..n {
                if done(i).is_some() {
                    continue;
                }
                let root = resources[i].deps.iter().find_map(|d| match done(d.0) {
                    Some(Outcome::Failed(_)) | Some(Outcome::Cancelled) => {
                        Some(resources[d.0].name.clone())
                    }
                    Some(Outcome::Blocked { root }) => Some(root),
                    _ => None,
                });
                if let Some(root) = root {
                    log::warn!("{}: blocked by {root}", resources[i].name);
                    settle(i, Outcome::Blocked { root });
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let ready: Vec<usize> = graph
            .order
            .iter()
            .copied()
            .filter(|&i| {
                done(i).is_none()
                    && resources[i].deps.iter().all(|d| {
                        done(d.0).map(|o| o.is_complete()).unwrap_or(false)
                    })
            })
            .collect();
        if ready.is_empty() {
            break;
        }

        // One wave: claim indices off a shared counter, bounded by the
        // configured worker count.
        let next = AtomicUsize::new(0);
        let workers = ctx.workers.min(ready.len());
        rayon::scope(|s| {
            for _ in 0..workers {
                s.spawn(|_| loop {
                    let k = next.fetch_add(1, Ordering::SeqCst);
                    if k >= ready.len() {
                        break;
                    }
                    let i = ready[k];
                    let outcome =
                        materialize_one(&resources[i], ctx, &datapath, &state, force);
                    settle(i, outcome);
                });
            }
        });

        // Eager cleanup: a transient whose dependents are all COMPLETE
        // is reclaimed immediately, not at the end of the run.
        for i in 0..n {
            if cleaned[i] || !resources[i].transient {
                continue;
            }
            let mine_done = done(i).map(|o| o.is_complete()).unwrap_or(false);
            let dependents_done = graph.dependents[i]
                .iter()
                .all(|&d| done(d).map(|o| o.is_complete()).unwrap_or(false));
            if mine_done && dependents_done {
                // Housekeeping only: a deletion failure must not take
                // down an otherwise successful pass
                if let Err(e) = cleanup_transient(&resources[i], &datapath, &state) {
                    log::warn!("{}: transient cleanup failed: {e}", resources[i].name);
                }
                cleaned[i] = true;
            }
        }
    }

    let entries: Vec<(String, Outcome)> = resources
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let o = done(i).unwrap_or(Outcome::Cancelled);
            (r.name.clone(), o)
        })
        .collect();
    let report = MaterializeReport {
        dataset: dataset_id.to_string(),
        entries,
    };

    status.finish_and_clear();
    if report.is_complete() {
        match fs::remove_dir_all(datapath.join(STAGING_DIR)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        log::info!("{dataset_id}: all {n} resources complete");
    } else {
        let failed = report.iter().filter(|(_, o)| !o.is_complete()).count();
        log::warn!("{dataset_id}: {failed}/{n} resources not complete");
    }
    Ok(report)
}

fn final_path(resource: &Resource, datapath: &Path) -> Option<PathBuf> {
    match &resource.kind {
        ResourceKind::File { filename, .. } => Some(datapath.join(filename)),
        ResourceKind::Folder { .. } => Some(datapath.join(&resource.name)),
        ResourceKind::Value { .. } | ResourceKind::Reference { .. } => None,
    }
}

fn staging_path(resource: &Resource, datapath: &Path) -> Option<PathBuf> {
    let artifact = match &resource.kind {
        ResourceKind::File { filename, .. } => filename.as_str(),
        ResourceKind::Folder { .. } => resource.name.as_str(),
        _ => return None,
    };
    Some(datapath.join(STAGING_DIR).join(artifact))
}

fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Drive one resource through its state machine. Returns the outcome;
/// state transitions are persisted as they happen.
fn materialize_one(
    resource: &Resource,
    ctx: &Context,
    datapath: &Path,
    state: &StateFile,
    force: bool,
) -> Outcome {
    let name = &resource.name;
    log::debug!("{name}: visiting {} resource", resource.kind.describe());
    match &resource.kind {
        ResourceKind::Value { producer } => {
            if state.state_of(name) == ResourceState::Complete && !force {
                return Outcome::AlreadyComplete;
            }
            match producer
                .fetch(ctx)
                .and_then(|()| state.set_state(name, ResourceState::Complete).map_err(Into::into))
            {
                Ok(()) => Outcome::Completed,
                Err(e) => {
                    log::error!("{name}: {e}");
                    let _ = state.set_state(name, ResourceState::None);
                    fail_outcome(e)
                }
            }
        }
        ResourceKind::Reference { target } => {
            if state.state_of(name) == ResourceState::Complete && !force {
                return Outcome::AlreadyComplete;
            }
            log::info!("{name}: materializing referenced dataset {}", target.id());
            match target.materialize(ctx, force) {
                Ok(report) if report.is_complete() => {
                    match state.set_state(name, ResourceState::Complete) {
                        Ok(()) => Outcome::Completed,
                        Err(e) => Outcome::Failed(e.to_string()),
                    }
                }
                Ok(_) => {
                    let e = FetchError::Upstream {
                        dataset: target.id().to_string(),
                    };
                    log::error!("{name}: {e}");
                    Outcome::Failed(e.to_string())
                }
                Err(e) => {
                    log::error!("{name}: {e}");
                    Outcome::Failed(e.to_string())
                }
            }
        }
        ResourceKind::File { producer, .. } | ResourceKind::Folder { producer } => {
            let final_path = final_path(resource, datapath)
                .unwrap_or_else(|| datapath.join(name));
            let staging = staging_path(resource, datapath)
                .unwrap_or_else(|| datapath.join(STAGING_DIR).join(name));
            match produce_to_disk(
                resource,
                producer.as_ref(),
                ctx,
                state,
                &final_path,
                &staging,
                force,
            ) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("{name}: {e}");
                    settle_failure(resource, producer.can_recover(), state, &staging);
                    fail_outcome(e)
                }
            }
        }
    }
}

fn fail_outcome(e: FetchError) -> Outcome {
    match e {
        FetchError::Cancelled => Outcome::Cancelled,
        other => Outcome::Failed(other.to_string()),
    }
}

/// On failure: PARTIAL when the staged bytes are worth keeping,
/// otherwise scrub staging and reset to NONE.
fn settle_failure(resource: &Resource, can_recover: bool, state: &StateFile, staging: &Path) {
    let keep = can_recover && staging.exists();
    if !keep {
        let _ = remove_path(staging);
    }
    let target = if keep {
        ResourceState::Partial
    } else {
        ResourceState::None
    };
    if let Err(e) = state.set_state(&resource.name, target) {
        log::error!("{}: failed to persist state: {e}", resource.name);
    }
}

fn produce_to_disk(
    resource: &Resource,
    producer: &dyn crate::resource::Producer,
    ctx: &Context,
    state: &StateFile,
    final_path: &Path,
    staging: &Path,
    force: bool,
) -> Result<Outcome, FetchError> {
    let name = &resource.name;
    let mut current = state.state_of(name);

    if current == ResourceState::Complete && !force {
        if final_path.exists() {
            log::debug!("{name}: already complete");
            return Ok(Outcome::AlreadyComplete);
        }
        // Metadata says complete but the artefact is gone; demote and
        // rebuild.
        log::warn!("{name}: recorded complete but missing on disk");
        state.set_state(name, ResourceState::None)?;
        current = ResourceState::None;
    }

    if force {
        remove_path(final_path)?;
        remove_path(staging)?;
        state.set_state(name, ResourceState::None)?;
    } else if current == ResourceState::None && final_path.exists() {
        // Artefact put in place outside our control (manual copy,
        // older tool); adopt it rather than re-download.
        log::info!("{name}: adopting existing {}", final_path.display());
        state.set_state(name, ResourceState::Complete)?;
        return Ok(Outcome::AlreadyComplete);
    } else if current == ResourceState::Partial && !producer.can_recover() {
        remove_path(staging)?;
        state.set_state(name, ResourceState::None)?;
    }

    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent)?;
    }
    state.set_state(name, ResourceState::Partial)?;

    let pb = ctx.progress.resource_bar(name);
    let result = producer.produce(ctx, staging, &pb);
    pb.finish_and_clear();
    result?;

    if let Some(checksum) = &resource.checksum {
        checksum.verify(staging)?;
    }

    remove_path(final_path)?;
    fs::rename(staging, final_path)?;
    state.set_state(name, ResourceState::Complete)?;
    log::info!("{name}: complete");
    Ok(Outcome::Completed)
}

/// Reclaim a transient resource once nothing will read it again.
fn cleanup_transient(
    resource: &Resource,
    datapath: &Path,
    state: &StateFile,
) -> anyhow::Result<()> {
    log::info!("{}: cleaning up transient resource", resource.name);
    if let Some(path) = final_path(resource, datapath) {
        remove_path(&path)?;
    }
    if let Some(staging) = staging_path(resource, datapath) {
        remove_path(&staging)?;
    }
    state.set_state(&resource.name, ResourceState::None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_complete_only_when_all_are() {
        let report = MaterializeReport {
            dataset: "d".into(),
            entries: vec![
                ("a".into(), Outcome::Completed),
                ("b".into(), Outcome::AlreadyComplete),
            ],
        };
        assert!(report.is_complete());

        let report = MaterializeReport {
            dataset: "d".into(),
            entries: vec![
                ("a".into(), Outcome::Completed),
                ("b".into(), Outcome::Blocked { root: "a".into() }),
            ],
        };
        assert!(!report.is_complete());
    }

    #[test]
    fn outcome_lookup_by_name() {
        let report = MaterializeReport {
            dataset: "d".into(),
            entries: vec![("a".into(), Outcome::Failed("boom".into()))],
        };
        assert_eq!(report.outcome("a"), Some(&Outcome::Failed("boom".into())));
        assert_eq!(report.outcome("missing"), None);
    }

    #[test]
    fn lock_guard_removes_file_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(LOCK_FILENAME);
        {
            let _guard = LockGuard::acquire(dir.path()).unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }
}
