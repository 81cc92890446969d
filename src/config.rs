//! # Specification Document Schema
//!
//! This module defines the typed representation of a specification document
//! (`*.yml`) and the logic for loading and validating one.
//!
//! ## Document shape
//!
//! ```yaml
//! header:
//!   version: 1
//!   includes:
//!     - common.yml                 # relative to this document
//!     - meta-foo:conf/foo.yml      # inside the declared repo `meta-foo`
//!     - repo: meta-bar             # mapping form of the same
//!       file: conf/bar.yml
//! build_system: openembedded
//! machine: qemux86-64
//! repos:
//!   poky:
//!     url: https://git.yoctoproject.org/poky
//!     refspec: scarthgap
//!     layers:
//!       meta:
//!       meta-poky:
//!       meta-skeleton: disabled
//!     patches:
//!       fix-build:
//!         repo: meta-foo
//!         path: patches/poky-fix.patch
//! env:
//!   DL_DIR: /srv/downloads    # default, overridable from the process env
//!   SSTATE_MIRROR:            # required
//! overrides:
//!   repos:
//!     poky:
//!       refspec: 4c0b5ea2a1a3e0b1f6c0e0c0b5ea2a1a3e0b1f6c
//! local_conf_header:
//!   standard: |
//!     CONF_VERSION = "2"
//! ```
//!
//! Unknown top-level keys are rejected. The build-tool sections listed in
//! [`BUILD_TOOL_SECTIONS`] are kept as opaque YAML values and merged
//! structurally without further validation.

use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;

use crate::error::{Error, Result};
use crate::merge::Merge;

/// Highest `header.version` this implementation understands.
pub const SCHEMA_VERSION: u32 = 1;

/// Top-level sections owned by the build-tool backends. Their contents are
/// passed through opaquely.
pub const BUILD_TOOL_SECTIONS: &[&str] = &[
    "local_conf_header",
    "bblayers_conf_header",
    "menu_configuration",
    "artifacts",
];

/// Layer states that exclude a layer from the build.
const DISABLED_LAYER_STATES: &[&str] = &["disabled", "excluded", "off"];

/// Document header: schema version and include list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Header {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<Include>,
}

/// One entry of `header.includes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Include {
    /// A relative path, or `repo:path` pointing into a declared repository.
    Path(String),
    /// Mapping form of a repository include.
    Repo { repo: String, file: String },
}

/// Where an include points, after decoding the string shorthand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeTarget<'a> {
    Local(&'a str),
    Repo { repo: &'a str, file: &'a str },
}

impl Include {
    pub fn target(&self) -> IncludeTarget<'_> {
        match self {
            Include::Repo { repo, file } => IncludeTarget::Repo { repo, file },
            Include::Path(spec) => match spec.split_once(':') {
                Some((repo, file)) if is_repo_name(repo) && !file.starts_with("//") => {
                    IncludeTarget::Repo { repo, file }
                }
                _ => IncludeTarget::Local(spec),
            },
        }
    }
}

fn is_repo_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// A patch applied on top of a repository checkout. The patch id is the key
/// it is declared under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchDecl {
    /// Repository that holds the patch file; defaults to the patched repo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Path of a patch file, or of a directory of `*.patch`/`*.diff` files,
    /// relative to the holding repository.
    pub path: String,
}

/// A repository as declared in a document. Every field is optional so that
/// later documents can refine earlier declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoDecl {
    /// Checkout directory name, when it should differ from the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Remote url. A repository without url is metadata-only: it is never
    /// cloned, fetched or locked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Branch, tag or full commit id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refspec: Option<String>,
    /// Layer directory -> state (`null` means enabled).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub layers: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub patches: BTreeMap<String, Option<PatchDecl>>,
}

impl RepoDecl {
    /// Enabled layer directories, in name order.
    pub fn enabled_layers(&self) -> Vec<String> {
        self.layers
            .iter()
            .filter(|(_, state)| {
                state
                    .as_deref()
                    .is_none_or(|s| !DISABLED_LAYER_STATES.contains(&s))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Pinned fields for one repository inside `overrides`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refspec: Option<String>,
}

/// The `overrides` section. Applied after every base section has been merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repos: BTreeMap<String, RepoOverride>,
}

impl Overrides {
    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refspec: Option<String>,
}

/// The `defaults` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repos: Option<RepoDefaults>,
}

impl Defaults {
    pub fn is_empty(&self) -> bool {
        self.repos.is_none()
    }

    pub fn refspec(&self) -> Option<&str> {
        self.repos.as_ref().and_then(|r| r.refspec.as_deref())
    }
}

/// A specification document. The merged configuration uses the same type,
/// with `header.includes` always empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub header: Header,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distro: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub target: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Defaults::is_empty")]
    pub defaults: Defaults,
    /// Repository key -> declaration. A `null` declaration names a local
    /// repository with no further settings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repos: BTreeMap<String, Option<RepoDecl>>,
    /// Variable -> default value (`null` means required).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "Overrides::is_empty")]
    pub overrides: Overrides,
    /// Build-tool sections, kept opaque.
    #[serde(flatten)]
    pub sections: BTreeMap<String, Value>,
}

fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => None,
        Some(OneOrMany::One(s)) => Some(vec![s]),
        Some(OneOrMany::Many(v)) => Some(v),
    })
}

impl Document {
    /// A document with only a header. Used as the merge accumulator.
    pub fn empty(version: u32) -> Self {
        Document {
            header: Header {
                version,
                includes: Vec::new(),
            },
            ..Default::default()
        }
    }

    /// Check the parts of the schema serde cannot express.
    pub fn validate(&self, path: &Path) -> Result<()> {
        if self.header.version == 0 || self.header.version > SCHEMA_VERSION {
            return Err(Error::Schema {
                path: path.to_path_buf(),
                message: format!(
                    "unsupported header.version {} (supported: 1..={})",
                    self.header.version, SCHEMA_VERSION
                ),
            });
        }

        if let Some(key) = self
            .sections
            .keys()
            .find(|k| !BUILD_TOOL_SECTIONS.contains(&k.as_str()))
        {
            return Err(Error::Schema {
                path: path.to_path_buf(),
                message: format!("unknown top-level key '{}'", key),
            });
        }

        for include in &self.header.includes {
            let empty = match include.target() {
                IncludeTarget::Local(p) => p.trim().is_empty(),
                IncludeTarget::Repo { repo, file } => repo.is_empty() || file.trim().is_empty(),
            };
            if empty {
                return Err(Error::Schema {
                    path: path.to_path_buf(),
                    message: "empty entry in header.includes".to_string(),
                });
            }
        }

        for (name, decl) in &self.repos {
            if name.is_empty() {
                return Err(Error::Schema {
                    path: path.to_path_buf(),
                    message: "repository with empty name".to_string(),
                });
            }
            let Some(decl) = decl else { continue };
            if let Some((id, _)) = decl
                .patches
                .iter()
                .find(|(_, p)| p.as_ref().is_some_and(|p| p.path.trim().is_empty()))
            {
                return Err(Error::Schema {
                    path: path.to_path_buf(),
                    message: format!("patch '{}' of repository '{}' has an empty path", id, name),
                });
            }
        }

        Ok(())
    }

    /// Apply an override layer: every pinned field replaces the declared one.
    ///
    /// Overrides for repositories that are not declared are ignored. The layer
    /// is also folded into `self.overrides` so it stays visible in the output.
    pub fn apply_overrides(&mut self, overrides: &Overrides) -> Result<()> {
        for (name, pin) in &overrides.repos {
            let Some(decl) = self.repos.get_mut(name) else {
                debug!("Ignoring override for undeclared repository '{}'", name);
                continue;
            };
            if let Some(refspec) = &pin.refspec {
                decl.get_or_insert_with(RepoDecl::default).refspec = Some(refspec.clone());
            }
        }
        self.overrides.merge_from(overrides.clone(), "overrides")
    }

    /// Serialize to YAML. Map ordering is fixed, so equal documents produce
    /// byte-identical output.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_yaml::to_value(self)?)
    }
}

/// Parse a document from YAML text. `path` is used for error messages.
pub fn parse(content: &str, path: &Path) -> Result<Document> {
    let document: Document = serde_yaml::from_str(content).map_err(|e| Error::ConfigParse {
        path: path.to_path_buf(),
        message: e.to_string(),
        hint: hint_for(&e.to_string()),
    })?;
    document.validate(path)?;
    Ok(document)
}

fn hint_for(message: &str) -> Option<String> {
    if message.contains("missing field `header`") {
        Some(format!("add 'header: {{ version: {} }}'", SCHEMA_VERSION))
    } else if message.contains("missing field `version`") {
        Some(format!("set header.version to {}", SCHEMA_VERSION))
    } else if message.contains("unknown field") {
        Some("check the key for typos".to_string())
    } else {
        None
    }
}

/// Load and validate a document from disk.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Document> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    parse(&content, path)
}
