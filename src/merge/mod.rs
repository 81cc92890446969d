//! Merge rules for specification documents
//!
//! Every part of the typed schema implements [`Merge`]. `a.merge_from(b, key)`
//! folds `b` into `a`, with `b` winning wherever both define a value:
//!
//! - scalars (`String`, `u32`) are replaced,
//! - lists are replaced wholesale, never concatenated,
//! - `Option<T>` keeps the existing value when the incoming one is `None`
//!   and merges recursively when both are present,
//! - maps merge key by key,
//! - opaque build-tool sections deep-merge through [`yaml::merge_values`].
//!
//! `key` is the dotted path of the value being merged and only feeds error
//! messages.

pub mod yaml;

use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::config::{
    Defaults, Document, Overrides, PatchDecl, RepoDecl, RepoDefaults, RepoOverride,
};
use crate::error::Result;

/// Fold another value of the same type into `self`; `other` wins.
pub trait Merge: Sized {
    fn merge_from(&mut self, other: Self, key: &str) -> Result<()>;
}

/// Build the dotted key of a child entry.
pub(crate) fn child_key(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}.{}", parent, child)
    }
}

impl Merge for String {
    fn merge_from(&mut self, other: Self, _key: &str) -> Result<()> {
        *self = other;
        Ok(())
    }
}

impl Merge for u32 {
    fn merge_from(&mut self, other: Self, _key: &str) -> Result<()> {
        *self = other;
        Ok(())
    }
}

impl<T> Merge for Vec<T> {
    fn merge_from(&mut self, other: Self, _key: &str) -> Result<()> {
        *self = other;
        Ok(())
    }
}

impl Merge for Value {
    fn merge_from(&mut self, other: Self, key: &str) -> Result<()> {
        yaml::merge_values(self, other, key)
    }
}

impl<T: Merge> Merge for Option<T> {
    fn merge_from(&mut self, other: Self, key: &str) -> Result<()> {
        let Some(incoming) = other else {
            return Ok(());
        };
        match self {
            Some(existing) => existing.merge_from(incoming, key)?,
            None => *self = Some(incoming),
        }
        Ok(())
    }
}

impl<V: Merge> Merge for BTreeMap<String, V> {
    fn merge_from(&mut self, other: Self, key: &str) -> Result<()> {
        for (name, incoming) in other {
            match self.get_mut(&name) {
                Some(existing) => existing.merge_from(incoming, &child_key(key, &name))?,
                None => {
                    self.insert(name, incoming);
                }
            }
        }
        Ok(())
    }
}

/// Merge a map whose `null` entries carry meaning: an incoming `null`
/// replaces the existing entry instead of being ignored.
fn merge_nullable<V: Merge>(
    target: &mut BTreeMap<String, Option<V>>,
    other: BTreeMap<String, Option<V>>,
    key: &str,
) -> Result<()> {
    for (name, incoming) in other {
        match (target.get_mut(&name), incoming) {
            (Some(Some(existing)), Some(incoming)) => {
                existing.merge_from(incoming, &child_key(key, &name))?
            }
            (_, incoming) => {
                target.insert(name, incoming);
            }
        }
    }
    Ok(())
}

impl Merge for PatchDecl {
    fn merge_from(&mut self, other: Self, key: &str) -> Result<()> {
        self.repo.merge_from(other.repo, &child_key(key, "repo"))?;
        self.path = other.path;
        Ok(())
    }
}

impl Merge for RepoDecl {
    fn merge_from(&mut self, other: Self, key: &str) -> Result<()> {
        self.name.merge_from(other.name, &child_key(key, "name"))?;
        self.url.merge_from(other.url, &child_key(key, "url"))?;
        self.path.merge_from(other.path, &child_key(key, "path"))?;
        self.refspec
            .merge_from(other.refspec, &child_key(key, "refspec"))?;
        merge_nullable(&mut self.layers, other.layers, &child_key(key, "layers"))?;
        merge_nullable(&mut self.patches, other.patches, &child_key(key, "patches"))
    }
}

impl Merge for RepoOverride {
    fn merge_from(&mut self, other: Self, key: &str) -> Result<()> {
        self.refspec
            .merge_from(other.refspec, &child_key(key, "refspec"))
    }
}

impl Merge for Overrides {
    fn merge_from(&mut self, other: Self, key: &str) -> Result<()> {
        self.repos.merge_from(other.repos, &child_key(key, "repos"))
    }
}

impl Merge for RepoDefaults {
    fn merge_from(&mut self, other: Self, key: &str) -> Result<()> {
        self.refspec
            .merge_from(other.refspec, &child_key(key, "refspec"))
    }
}

impl Merge for Defaults {
    fn merge_from(&mut self, other: Self, key: &str) -> Result<()> {
        self.repos.merge_from(other.repos, &child_key(key, "repos"))
    }
}

impl Merge for Document {
    /// Merge the base content of `other`. Includes are dropped and the
    /// `overrides` section is merged like any other section; callers that need
    /// the override pass to run last strip it first.
    fn merge_from(&mut self, other: Self, key: &str) -> Result<()> {
        self.header.version = self.header.version.max(other.header.version);
        self.build_system
            .merge_from(other.build_system, &child_key(key, "build_system"))?;
        self.machine
            .merge_from(other.machine, &child_key(key, "machine"))?;
        self.distro.merge_from(other.distro, &child_key(key, "distro"))?;
        self.target.merge_from(other.target, &child_key(key, "target"))?;
        self.task.merge_from(other.task, &child_key(key, "task"))?;
        self.defaults
            .merge_from(other.defaults, &child_key(key, "defaults"))?;
        self.repos.merge_from(other.repos, &child_key(key, "repos"))?;
        self.env.merge_from(other.env, &child_key(key, "env"))?;
        self.overrides
            .merge_from(other.overrides, &child_key(key, "overrides"))?;
        self.sections.merge_from(other.sections, key)
    }
}
