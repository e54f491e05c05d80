//! Persisted per-resource lifecycle state.
//!
//! One metadata file per dataset, `<datapath>/.state.json`:
//!
//! ```text
//! {
//!   "version": 1,
//!   "resources": {
//!     "train_images": {"state": "complete"},
//!     ...
//!   }
//! }
//! ```
//!
//! The file is loaded once per materialization and rewritten (atomic
//! temp-file + rename) after every state transition. Entries for
//! resources no longer in the live graph are kept, and unknown extra
//! fields per entry round-trip untouched.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const STATE_VERSION: u32 = 1;

const STATE_FILENAME: &str = ".state.json";

/// Lifecycle state of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    /// Not started / no data on disk.
    None,
    /// Started but incomplete (error during download).
    Partial,
    /// Fully available at the final path.
    Complete,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Partial => "partial",
            Self::Complete => "complete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateEntry {
    state: ResourceState,
    /// Fields written by other (newer) builds; preserved on rewrite.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDoc {
    version: u32,
    resources: BTreeMap<String, StateEntry>,
}

impl Default for StateDoc {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            resources: BTreeMap::new(),
        }
    }
}

/// Handle on a dataset's state metadata file.
///
/// All mutation goes through an internal mutex: concurrent workers
/// finishing near-simultaneously serialize their read-modify-write,
/// so no transition is lost.
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    doc: Mutex<StateDoc>,
}

impl StateFile {
    /// Load the state file for a dataset directory.
    ///
    /// A missing file is an empty map, not an error. A version other
    /// than [`STATE_VERSION`] is a [`ConfigError`], never silently
    /// misinterpreted.
    pub fn open(datapath: &Path) -> Result<Self, ConfigError> {
        let path = datapath.join(STATE_FILENAME);
        let doc = if path.is_file() {
            let json = fs::read_to_string(&path).map_err(|e| ConfigError::StateFile {
                path: path.clone(),
                message: e.to_string(),
            })?;
            let doc: StateDoc =
                serde_json::from_str(&json).map_err(|e| ConfigError::StateFile {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            if doc.version != STATE_VERSION {
                return Err(ConfigError::UnknownStateVersion {
                    found: doc.version,
                    supported: STATE_VERSION,
                });
            }
            doc
        } else {
            StateDoc::default()
        };

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// State of a resource; NONE when no entry exists.
    pub fn state_of(&self, name: &str) -> ResourceState {
        let doc = self.doc.lock().unwrap();
        doc.resources
            .get(name)
            .map(|e| e.state)
            .unwrap_or(ResourceState::None)
    }

    /// Record a transition and persist it.
    ///
    /// No-op when the state is unchanged, so a materialization that
    /// performs zero transitions leaves the file byte-identical.
    pub fn set_state(&self, name: &str, state: ResourceState) -> io::Result<()> {
        let mut doc = self.doc.lock().unwrap();
        match doc.resources.get_mut(name) {
            Some(entry) if entry.state == state => return Ok(()),
            Some(entry) => entry.state = state,
            None => {
                doc.resources.insert(
                    name.to_string(),
                    StateEntry {
                        state,
                        extra: serde_json::Map::new(),
                    },
                );
            }
        }
        save(&self.path, &doc)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Atomic replace: write a temp file next to the target, then rename
/// over it. A crash mid-write never corrupts the existing file.
fn save(path: &Path, doc: &StateDoc) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(doc)?;
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sf = StateFile::open(dir.path()).unwrap();
        assert_eq!(sf.state_of("anything"), ResourceState::None);
    }

    #[test]
    fn state_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sf = StateFile::open(dir.path()).unwrap();
            sf.set_state("data", ResourceState::Partial).unwrap();
            sf.set_state("data", ResourceState::Complete).unwrap();
        }
        let sf = StateFile::open(dir.path()).unwrap();
        assert_eq!(sf.state_of("data"), ResourceState::Complete);
        assert_eq!(sf.state_of("other"), ResourceState::None);
    }

    #[test]
    fn unknown_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(STATE_FILENAME),
            r#"{"version": 2, "resources": {}}"#,
        )
        .unwrap();
        match StateFile::open(dir.path()) {
            Err(ConfigError::UnknownStateVersion { found: 2, .. }) => {}
            other => panic!("expected UnknownStateVersion, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STATE_FILENAME), b"not json").unwrap();
        assert!(matches!(
            StateFile::open(dir.path()),
            Err(ConfigError::StateFile { .. })
        ));
    }

    #[test]
    fn extra_fields_preserved_on_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(STATE_FILENAME),
            r#"{"version": 1, "resources": {"data": {"state": "complete", "etag": "abc"}}}"#,
        )
        .unwrap();

        let sf = StateFile::open(dir.path()).unwrap();
        sf.set_state("other", ResourceState::Complete).unwrap();

        let json = fs::read_to_string(dir.path().join(STATE_FILENAME)).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(doc["resources"]["data"]["etag"], "abc");
        assert_eq!(doc["resources"]["data"]["state"], "complete");
    }

    #[test]
    fn stale_entries_tolerated_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(STATE_FILENAME),
            r#"{"version": 1, "resources": {"removed_long_ago": {"state": "complete"}}}"#,
        )
        .unwrap();

        let sf = StateFile::open(dir.path()).unwrap();
        sf.set_state("live", ResourceState::Complete).unwrap();

        let json = fs::read_to_string(dir.path().join(STATE_FILENAME)).unwrap();
        assert!(json.contains("removed_long_ago"));
    }

    #[test]
    fn unchanged_state_does_not_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let sf = StateFile::open(dir.path()).unwrap();
        sf.set_state("data", ResourceState::Complete).unwrap();

        let before = fs::metadata(sf.path()).unwrap().modified().unwrap();
        let bytes = fs::read(sf.path()).unwrap();

        sf.set_state("data", ResourceState::Complete).unwrap();

        assert_eq!(fs::read(sf.path()).unwrap(), bytes);
        assert_eq!(fs::metadata(sf.path()).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn no_save_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let sf = StateFile::open(dir.path()).unwrap();
        assert_eq!(sf.state_of("x"), ResourceState::None);
        assert!(!sf.path().exists());
    }

    #[test]
    fn serde_spelling() {
        let json = serde_json::to_string(&ResourceState::Partial).unwrap();
        assert_eq!(json, r#""partial""#);
        let back: ResourceState = serde_json::from_str(r#""complete""#).unwrap();
        assert_eq!(back, ResourceState::Complete);
    }
}
