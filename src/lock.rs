//! # Lock Manager
//!
//! A lock document pins every floating refspec of a configuration to the
//! commit it resolved to. It is an ordinary specification document restricted
//! to `header` and `overrides.repos.<name>.refspec`, stored beside the root
//! document as `<stem>.lock.yml`:
//!
//! ```yaml
//! header:
//!   version: 1
//! overrides:
//!   repos:
//!     poky:
//!       refspec: 4c0b5ea2a1a3e0b1f6c0e0c0b5ea2a1a3e0b1f6c
//! ```
//!
//! Because it is applied as the last override layer, a lock always wins over
//! a floating branch declared anywhere in the include graph.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{Header, Overrides, RepoOverride, SCHEMA_VERSION};
use crate::error::{Error, Result};
use crate::repository::Repo;
use crate::resolver::MergedConfig;

/// What to do with the lock document during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// Treat an existing lock document as authoritative and apply it.
    #[default]
    Apply,
    /// Ignore any existing lock; it will be regenerated after the repositories
    /// have been resolved.
    Update,
}

/// The lock layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockDocument {
    pub header: Header,
    #[serde(default)]
    pub overrides: Overrides,
}

impl LockDocument {
    pub fn new(overrides: Overrides) -> Self {
        LockDocument {
            header: Header {
                version: SCHEMA_VERSION,
                includes: Vec::new(),
            },
            overrides,
        }
    }

    /// Pinned commit for `repo`, if any.
    pub fn commit_for(&self, repo: &str) -> Option<&str> {
        self.overrides
            .repos
            .get(repo)
            .and_then(|o| o.refspec.as_deref())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Location of the lock document for `root`: `kas.yml` -> `kas.lock.yml`.
pub fn lock_path(root: &Path) -> PathBuf {
    let stem = root
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = root
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "yml".to_string());
    root.with_file_name(format!("{}.lock.{}", stem, ext))
}

/// Derive a lock document from resolved repositories.
///
/// Every repository with a url whose declared refspec is not a full commit
/// id gets one entry carrying its resolved commit. A repository pinned by an
/// applied lock counts as floating, so regenerating from a locked
/// configuration keeps its pin. Local and commit-pinned repositories are
/// omitted. Fails if a floating repository was never resolved.
pub fn generate(config: &MergedConfig, repos: &[Repo]) -> Result<LockDocument> {
    let mut overrides = Overrides::default();

    for repo in repos {
        if repo.is_local() || !(repo.is_floating() || config.lock_pins.contains(&repo.name)) {
            continue;
        }
        if !config.spec.repos.contains_key(&repo.name) {
            debug!("Repository '{}' is not part of the configuration", repo.name);
            continue;
        }
        let commit = repo.commit.clone().ok_or_else(|| Error::Unresolved {
            repo: repo.name.clone(),
        })?;
        overrides.repos.insert(
            repo.name.clone(),
            RepoOverride {
                refspec: Some(commit),
            },
        );
    }

    Ok(LockDocument::new(overrides))
}

/// Overlay a lock document onto a merged configuration. Pure data; touches no
/// repository.
pub fn apply(config: &MergedConfig, lock: &LockDocument) -> Result<MergedConfig> {
    let mut locked = config.clone();
    locked.spec.apply_overrides(&lock.overrides)?;
    locked.locked = true;
    locked.lock_pins.extend(
        lock.overrides
            .repos
            .iter()
            .filter(|(name, pin)| pin.refspec.is_some() && config.spec.repos.contains_key(*name))
            .map(|(name, _)| name.clone()),
    );
    Ok(locked)
}

/// Read the lock document at `path`, if there is one.
pub fn read(path: &Path) -> Result<Option<LockDocument>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let lock: LockDocument = serde_yaml::from_str(&content).map_err(|e| Error::ConfigParse {
        path: path.to_path_buf(),
        message: e.to_string(),
        hint: Some("a lock file may only contain 'header' and 'overrides'".to_string()),
    })?;
    if lock.header.version == 0 || lock.header.version > SCHEMA_VERSION {
        return Err(Error::Schema {
            path: path.to_path_buf(),
            message: format!("unsupported header.version {}", lock.header.version),
        });
    }
    Ok(Some(lock))
}

/// Write `lock` to `path`. Returns whether the file content changed.
pub fn write(path: &Path, lock: &LockDocument) -> Result<bool> {
    let content = lock.to_yaml()?;
    if fs::read_to_string(path).ok().as_deref() == Some(content.as_str()) {
        debug!("Lock file {} is up to date", path.display());
        return Ok(false);
    }
    fs::write(path, content)?;
    info!("Wrote lock file {}", path.display());
    Ok(true)
}
