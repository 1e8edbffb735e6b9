// Tile-consistent label selection.
//
// Each workspace directory named `<prefix>-<version>` gets a `bbox` table
// recording which label owns which area at every zoom level. A tile keeps a
// candidate only when nothing else owns its box, so independently solved
// tiles agree on their seams.

mod store;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::config::ConsistencyConfig;
use crate::solver::{LabelPosition, Problem, Solution};

pub use store::{BboxStore, BboxTxn, InsertOutcome};

static VERSIONED_DIR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*)-(\d+)$").unwrap());

#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("project path {path:?} has no workspace directory")]
    NoWorkspace { path: PathBuf },
    #[error("tile session cache lock poisoned")]
    CachePoisoned,
}

/// Identity of a versioned workspace: the directory path without its
/// trailing `-<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub prefix: String,
    pub version: u32,
}

impl SessionKey {
    /// `None` when the directory carries no numeric version suffix, which
    /// turns tile consistency off for the pass.
    pub fn from_workspace(dir: &Path) -> Option<Self> {
        let text = dir.to_string_lossy();
        let caps = VERSIONED_DIR_RE.captures(&text)?;
        let version = caps.get(2)?.as_str().parse().ok()?;
        Some(Self {
            prefix: caps.get(1)?.as_str().to_string(),
            version,
        })
    }
}

/// Workspace directory of a project file.
pub fn workspace_dir(project_path: &Path) -> Result<PathBuf, ConsistencyError> {
    let absolute = std::path::absolute(project_path).map_err(|source| ConsistencyError::Io {
        path: project_path.to_path_buf(),
        source,
    })?;
    absolute
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| ConsistencyError::NoWorkspace {
            path: project_path.to_path_buf(),
        })
}

#[derive(Debug)]
struct Session {
    store: BboxStore,
    version: u32,
}

/// Open stores, one per workspace prefix. Created by the caller and shared
/// between engines; a session whose version no longer matches is replaced.
#[derive(Debug, Default)]
pub struct SessionCache {
    sessions: HashMap<String, Session>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store for `key`, opening `db_path` when there is no live session
    /// at the same version.
    pub fn session(&mut self, key: &SessionKey, db_path: &Path) -> Result<&mut BboxStore, ConsistencyError> {
        if let Some(existing) = self.sessions.get(&key.prefix)
            && existing.version != key.version
        {
            debug!(
                prefix = %key.prefix,
                old = existing.version,
                new = key.version,
                "workspace version changed, dropping tile session"
            );
            self.sessions.remove(&key.prefix);
        }

        if !self.sessions.contains_key(&key.prefix) {
            let store = BboxStore::open(db_path)?;
            debug!(prefix = %key.prefix, version = key.version, path = ?db_path, "opened tile session");
            self.sessions.insert(
                key.prefix.clone(),
                Session {
                    store,
                    version: key.version,
                },
            );
        }

        match self.sessions.get_mut(&key.prefix) {
            Some(session) => Ok(&mut session.store),
            None => Err(ConsistencyError::NoWorkspace {
                path: db_path.to_path_buf(),
            }),
        }
    }

    pub fn evict(&mut self, prefix: &str) -> bool {
        self.sessions.remove(prefix).is_some()
    }

    pub fn version(&self, prefix: &str) -> Option<u32> {
        self.sessions.get(prefix).map(|s| s.version)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Key collapsing every candidate of one logical label: rounded anchor
/// coordinates plus the label text.
pub fn dedup_key(problem: &Problem, position: &LabelPosition, anchor_scale: f64) -> String {
    let feature = problem.position_feature(position);
    let anchor = feature
        .and_then(|f| f.geometry().anchor())
        .unwrap_or_else(|| position.rect().center());
    let text = feature.map(|f| f.label_text()).unwrap_or_default();
    format!(
        "{:020}-{:020}-{}",
        (anchor.x * anchor_scale).round() as i64,
        (anchor.y * anchor_scale).round() as i64,
        text
    )
}

/// Resolve `problem` against the workspace's recorded boxes at `level`.
///
/// Returns `Ok(None)` when the workspace is not versioned; the caller falls
/// back to plain solving. A query or insert failure rolls the transaction
/// back and yields the labels decided before it.
pub fn solve_tile_consistent(
    problem: &Problem,
    level: u32,
    project_path: &Path,
    want_unplaced: bool,
    cache: &Mutex<SessionCache>,
    config: &ConsistencyConfig,
) -> Result<Option<Solution>, ConsistencyError> {
    let dir = workspace_dir(project_path)?;
    let Some(key) = SessionKey::from_workspace(&dir) else {
        trace!(workspace = ?dir, "workspace has no version suffix, tile consistency skipped");
        return Ok(None);
    };
    let db_path = dir.join(&config.store_file_name);

    let mut cache = cache.lock().map_err(|_| ConsistencyError::CachePoisoned)?;
    let store = cache.session(&key, &db_path)?;

    let mut unique: BTreeMap<String, &LabelPosition> = BTreeMap::new();
    for candidate in problem.candidates() {
        unique
            .entry(dedup_key(problem, candidate, config.anchor_scale))
            .or_insert(candidate);
    }

    let mut solution = Solution::default();
    let txn = store.begin()?;
    let mut failure = None;
    for (dedup, position) in &unique {
        let owners = match txn.intersecting_keys(level, position.rect()) {
            Ok(owners) => owners,
            Err(err) => {
                failure = Some(err);
                break;
            }
        };

        if owners.is_empty() {
            if let Err(err) = txn.insert(dedup, level, position.rect()) {
                failure = Some(err);
                break;
            }
            solution.placed.push((*position).clone());
        } else if owners.iter().any(|owner| owner == dedup) {
            solution.placed.push((*position).clone());
        } else if want_unplaced {
            solution.unplaced.push((*position).clone());
        }
    }

    match failure {
        None => txn.commit()?,
        Some(err) => {
            warn!(
                level,
                placed = solution.placed.len(),
                error = %err,
                "tile consistency update failed, keeping partial result"
            );
            if let Err(rollback) = txn.rollback() {
                warn!(error = %rollback, "tile consistency rollback failed");
            }
        }
    }

    debug!(
        level,
        unique = unique.len(),
        placed = solution.placed.len(),
        unplaced = solution.unplaced.len(),
        "tile consistency resolved"
    );
    Ok(Some(solution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn session_key_splits_version_suffix() {
        let key = SessionKey::from_workspace(Path::new("/srv/maps/city-12")).unwrap();
        assert_eq!(key.prefix, "/srv/maps/city");
        assert_eq!(key.version, 12);

        let key = SessionKey::from_workspace(Path::new("/srv/my-maps/city-3")).unwrap();
        assert_eq!(key.prefix, "/srv/my-maps/city");
    }

    #[test]
    fn session_key_requires_numeric_suffix() {
        assert!(SessionKey::from_workspace(Path::new("/srv/maps/city")).is_none());
        assert!(SessionKey::from_workspace(Path::new("/srv/maps/city-latest")).is_none());
    }

    #[test]
    fn version_change_replaces_session() {
        let dir = TempDir::new().unwrap();
        let mut cache = SessionCache::new();
        let v1 = SessionKey {
            prefix: "p".into(),
            version: 1,
        };
        let v2 = SessionKey {
            prefix: "p".into(),
            version: 2,
        };

        cache.session(&v1, &dir.path().join("one.db")).unwrap();
        assert_eq!(cache.version("p"), Some(1));
        let store = cache.session(&v2, &dir.path().join("two.db")).unwrap();
        assert!(store.path().ends_with("two.db"));
        assert_eq!(cache.version("p"), Some(2));
        assert_eq!(cache.len(), 1);
        assert!(cache.evict("p"));
        assert!(cache.is_empty());
    }
}
