//! Indexed, concurrency-safe collection of execution results.
//!
//! A [`ResultStore`] maps (test case, matcher) to at most one
//! [`ExecutionResult`]. Workers insert concurrently; aggregation reads a
//! finished store. Stores persist to and load from a directory tree:
//!
//! ```text
//! <root>/<track>/<test_case>/<matcher>/alignment.json
//! <root>/<track>/<test_case>/<matcher>/meta.json
//! ```
//!
//! Each component is percent-encoded with [`encode_component`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::AlignmentCodec;
use crate::counters::COUNTERS;
use crate::domain::{CodecError, ExecutionResult, ResultKey, TestCase, TestCaseId};
use crate::obs;

const META_FILE: &str = "meta.json";
const ALIGNMENT_STEM: &str = "alignment";

/// What to do when a key is inserted twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Replace the earlier result and log a warning.
    #[default]
    Overwrite,
    /// Keep the earlier result and return [`StoreError::DuplicateKey`].
    Reject,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate result for {0}")]
    DuplicateKey(ResultKey),

    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed metadata {path:?}: {source}")]
    Meta {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{first} and {second} map to the same directory {path:?}")]
    PathCollision {
        path: PathBuf,
        first: ResultKey,
        second: ResultKey,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Sidecar written next to each persisted alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResultMeta {
    matcher: String,
    runtime_ms: u64,
}

/// Encode a name as a single path component.
///
/// `[A-Za-z0-9._-]` pass through and every other byte becomes `%XX`, so two
/// different names never share a directory. `""`, `"."` and `".."` get forms
/// the plain encoding never produces.
pub fn encode_component(name: &str) -> String {
    match name {
        "" => return "%".to_string(),
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Inverse of [`encode_component`]. `None` when `component` is not a valid encoding.
pub fn decode_component(component: &str) -> Option<String> {
    if component == "%" {
        return Some(String::new());
    }
    let bytes = component.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[derive(Debug, Default)]
pub struct ResultStore {
    policy: DuplicatePolicy,
    entries: RwLock<BTreeMap<ResultKey, Arc<ExecutionResult>>>,
}

impl ResultStore {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Insert a result. Under `Overwrite` the displaced result is returned.
    pub fn insert(&self, result: ExecutionResult) -> Result<Option<Arc<ExecutionResult>>, StoreError> {
        self.insert_shared(Arc::new(result))
    }

    pub fn insert_shared(
        &self,
        result: Arc<ExecutionResult>,
    ) -> Result<Option<Arc<ExecutionResult>>, StoreError> {
        let key = result.key();
        let mut entries = self.write();
        if entries.contains_key(&key) {
            match self.policy {
                DuplicatePolicy::Reject => {
                    obs::emit_store_duplicate(&key, false);
                    return Err(StoreError::DuplicateKey(key));
                }
                DuplicatePolicy::Overwrite => obs::emit_store_duplicate(&key, true),
            }
        }
        Ok(entries.insert(key, result))
    }

    pub fn get(&self, key: &ResultKey) -> Option<Arc<ExecutionResult>> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ResultKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All results, ordered by key.
    pub fn results(&self) -> Vec<Arc<ExecutionResult>> {
        self.read().values().cloned().collect()
    }

    pub fn by_matcher(&self, matcher: &str) -> Vec<Arc<ExecutionResult>> {
        self.read()
            .iter()
            .filter(|(k, _)| k.matcher == matcher)
            .map(|(_, v)| Arc::clone(v))
            .collect()
    }

    pub fn by_test_case(&self, id: &TestCaseId) -> Vec<Arc<ExecutionResult>> {
        self.read()
            .iter()
            .filter(|(k, _)| &k.test_case == id)
            .map(|(_, v)| Arc::clone(v))
            .collect()
    }

    pub fn by_track(&self, track: &str) -> Vec<Arc<ExecutionResult>> {
        self.read()
            .iter()
            .filter(|(k, _)| k.test_case.track == track)
            .map(|(_, v)| Arc::clone(v))
            .collect()
    }

    /// Distinct matcher names, sorted.
    pub fn matcher_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self.read().keys().map(|k| k.matcher.clone()).collect();
        names.into_iter().collect()
    }

    /// Distinct test cases, sorted by (track, name).
    pub fn test_cases(&self) -> Vec<Arc<TestCase>> {
        let mut seen = BTreeMap::new();
        for result in self.read().values() {
            seen.entry(result.test_case().id.clone())
                .or_insert_with(|| Arc::clone(result.test_case()));
        }
        seen.into_values().collect()
    }

    /// Write every result under `root`. Returns the number of results written.
    pub fn persist_to_dir(&self, root: &Path, codec: &dyn AlignmentCodec) -> Result<usize, StoreError> {
        let results = self.results();
        // Compared case-folded so case-insensitive filesystems cannot merge two keys.
        let mut claimed: HashMap<String, ResultKey> = HashMap::new();
        for result in &results {
            let key = result.key();
            let dir = result_dir(root, &key);
            let folded = dir.to_string_lossy().to_lowercase();
            if let Some(first) = claimed.get(&folded) {
                return Err(StoreError::PathCollision {
                    path: dir,
                    first: first.clone(),
                    second: key,
                });
            }
            claimed.insert(folded, key);
            fs::create_dir_all(&dir).map_err(io_err(&dir))?;

            let artifact = dir.join(format!("{ALIGNMENT_STEM}.{}", codec.extension()));
            if result.artifact_path() != Some(artifact.as_path()) {
                codec.write(&artifact, result.alignment()?)?;
            }

            let meta = ResultMeta {
                matcher: result.matcher_name().to_string(),
                runtime_ms: result.runtime().as_millis() as u64,
            };
            let meta_path = dir.join(META_FILE);
            let bytes = serde_json::to_vec_pretty(&meta).map_err(|source| StoreError::Meta {
                path: meta_path.clone(),
                source,
            })?;
            fs::write(&meta_path, bytes).map_err(io_err(&meta_path))?;
        }
        debug!(root = %root.display(), results = results.len(), "result store persisted");
        Ok(results.len())
    }

    /// Load a store from a directory written by [`ResultStore::persist_to_dir`].
    ///
    /// Directories are matched against `test_cases`; anything unknown is
    /// skipped with a warning. Alignments are parsed on first access.
    pub fn load_from_dir(
        root: &Path,
        test_cases: &[Arc<TestCase>],
        codec: Arc<dyn AlignmentCodec>,
        policy: DuplicatePolicy,
    ) -> Result<Self, StoreError> {
        let store = Self::new(policy);
        if !root.is_dir() {
            debug!(root = %root.display(), "no persisted results");
            return Ok(store);
        }

        let known: HashMap<(String, String), &Arc<TestCase>> = test_cases
            .iter()
            .map(|tc| {
                (
                    (encode_component(tc.track()), encode_component(tc.name())),
                    tc,
                )
            })
            .collect();
        let artifact_name = format!("{ALIGNMENT_STEM}.{}", codec.extension());

        for track_dir in sorted_subdirs(root)? {
            let track = file_name(&track_dir);
            for case_dir in sorted_subdirs(&track_dir)? {
                let case = file_name(&case_dir);
                let Some(test_case) = known.get(&(track.clone(), case.clone())) else {
                    warn!(track = %track, test_case = %case, "skipping results for unknown test case");
                    continue;
                };
                for matcher_dir in sorted_subdirs(&case_dir)? {
                    let artifact = matcher_dir.join(&artifact_name);
                    if !artifact.is_file() {
                        warn!(path = %matcher_dir.display(), "skipping result directory without alignment");
                        continue;
                    }
                    let meta = read_meta(&matcher_dir)?;
                    let (matcher, runtime) = match meta {
                        Some(meta) => (meta.matcher, Duration::from_millis(meta.runtime_ms)),
                        None => {
                            let Some(name) = decode_component(&file_name(&matcher_dir)) else {
                                warn!(path = %matcher_dir.display(), "skipping result without metadata or a decodable matcher name");
                                continue;
                            };
                            warn!(
                                path = %matcher_dir.display(),
                                matcher = %name,
                                "no metadata, matcher name taken from the directory and runtime unknown"
                            );
                            (name, Duration::ZERO)
                        }
                    };
                    store.insert(ExecutionResult::from_artifact(
                        Arc::clone(test_case),
                        matcher,
                        artifact,
                        runtime,
                        Arc::clone(&codec),
                    ))?;
                }
            }
        }

        COUNTERS.add_loaded(store.len() as u64);
        debug!(root = %root.display(), results = store.len(), "result store loaded");
        Ok(store)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ResultKey, Arc<ExecutionResult>>> {
        // Writers only insert whole entries, so a poisoned map is still consistent.
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ResultKey, Arc<ExecutionResult>>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Directory holding the persisted result for `key` under `root`.
pub fn result_dir(root: &Path, key: &ResultKey) -> PathBuf {
    root.join(encode_component(&key.test_case.track))
        .join(encode_component(&key.test_case.name))
        .join(encode_component(&key.matcher))
}

fn read_meta(dir: &Path) -> Result<Option<ResultMeta>, StoreError> {
    let path = dir.join(META_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = fs::read(&path).map_err(io_err(&path))?;
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Meta { path, source })
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
