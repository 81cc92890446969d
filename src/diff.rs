//! # Configuration Diff
//!
//! Compares two merged configurations. The result has two parts:
//!
//! - `values_changed`: every leaf that differs, keyed by its dotted path
//!   (`repos.poky.refspec`). A side that lacks the key reports `None`.
//! - `commits`: for every repository whose pinning changed, the commits
//!   between the two resolved revisions.
//!
//! Only the explicit pinning fields count as pinning changes, see
//! [`pinning_repo`]. Commit lists are computed from the resolved commits of
//! both sides, so a branch that moved is reported like a changed commit id.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_yaml::Value;

use crate::error::{Error, Result};
use crate::git::CommitInfo;
use crate::repository::{GitOperations, Repo};
use crate::resolver::MergedConfig;

/// Old and new value of one changed leaf.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueChange {
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Differences between two configurations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffReport {
    pub values_changed: BTreeMap<String, ValueChange>,
    /// Repository name -> commits between the two revisions, newest first.
    #[serde(flatten)]
    pub commits: BTreeMap<String, Vec<CommitInfo>>,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.values_changed.is_empty() && self.commits.is_empty()
    }
}

fn key_text(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn join_key(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn compare_into(
    old: &Value,
    new: &Value,
    parent: &str,
    out: &mut BTreeMap<String, ValueChange>,
) {
    match (old, new) {
        (Value::Mapping(a), Value::Mapping(b)) => {
            for (k, v) in a {
                let key = join_key(parent, &key_text(k));
                match b.get(k) {
                    Some(w) => compare_into(v, w, &key, out),
                    None => {
                        out.insert(
                            key,
                            ValueChange {
                                old_value: Some(v.clone()),
                                new_value: None,
                            },
                        );
                    }
                }
            }
            for (k, w) in b {
                if !a.contains_key(k) {
                    out.insert(
                        join_key(parent, &key_text(k)),
                        ValueChange {
                            old_value: None,
                            new_value: Some(w.clone()),
                        },
                    );
                }
            }
        }
        (a, b) if a != b => {
            out.insert(
                parent.to_string(),
                ValueChange {
                    old_value: Some(a.clone()),
                    new_value: Some(b.clone()),
                },
            );
        }
        _ => {}
    }
}

/// Deep-compare two YAML values. Mappings are descended into; any other
/// difference is reported at the deepest common key.
pub fn compare_values(old: &Value, new: &Value) -> BTreeMap<String, ValueChange> {
    let mut out = BTreeMap::new();
    compare_into(old, new, "", &mut out);
    out
}

/// Repository whose pinning a changed key belongs to, if any.
///
/// Recognizes `repos.<name>.refspec` and `overrides.repos.<name>.refspec`.
pub fn pinning_repo(key: &str) -> Option<&str> {
    let rest = key
        .strip_prefix("overrides.repos.")
        .or_else(|| key.strip_prefix("repos."))?;
    let name = rest.strip_suffix(".refspec")?;
    (!name.is_empty() && !name.contains('.')).then_some(name)
}

fn resolved<'a>(repos: &'a [Repo], name: &str) -> Option<(&'a Repo, &'a str)> {
    let repo = repos.iter().find(|r| r.name == name)?;
    if repo.is_local() {
        return None;
    }
    Some((repo, repo.commit.as_deref()?))
}

/// Compare two configurations and their checked-out repositories.
///
/// The repositories must have been resolved. Commits are looked up forward in
/// the new checkout first, and backward in the old one when the new revision
/// is older.
pub fn diff_configs(
    old: &MergedConfig,
    old_repos: &[Repo],
    new: &MergedConfig,
    new_repos: &[Repo],
    git: &dyn GitOperations,
) -> Result<DiffReport> {
    let values_changed = compare_values(&old.spec.to_value()?, &new.spec.to_value()?);

    let mut commits = BTreeMap::new();
    for key in values_changed.keys() {
        let Some(name) = pinning_repo(key) else {
            continue;
        };
        if commits.contains_key(name) {
            continue;
        }
        let (Some((old_repo, from)), Some((new_repo, to))) =
            (resolved(old_repos, name), resolved(new_repos, name))
        else {
            let unresolved = old_repos
                .iter()
                .chain(new_repos)
                .any(|r| r.name == name && !r.is_local() && r.commit.is_none());
            if unresolved {
                return Err(Error::Unresolved {
                    repo: name.to_string(),
                });
            }
            continue;
        };

        let mut log = new_repo.diff(git, from, to)?;
        if log.is_empty() {
            log = old_repo.diff(git, to, from)?;
        }
        if !log.is_empty() {
            commits.insert(name.to_string(), log);
        }
    }

    Ok(DiffReport {
        values_changed,
        commits,
    })
}
