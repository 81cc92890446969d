//! Environment capture and `env` section resolution.
//!
//! The process environment is captured once into an [`Environment`] and then
//! passed around explicitly, so resolution is a pure function of the merged
//! document and that snapshot.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Whether `env` entries are resolved against the process environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvMode {
    /// Look each variable up; fall back to its default; fail when required.
    #[default]
    Resolve,
    /// Leave declared defaults and `${NAME}` placeholders untouched. Used for
    /// static inspection of a configuration.
    Passthrough,
}

/// A snapshot of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Capture the current process environment. Variables that are not valid
    /// unicode are skipped.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Resolve every entry of an `env` section.
///
/// The process value wins over the declared default. A variable declared
/// without default (`null`) must be present in `environ`.
pub fn resolve_section(
    section: &BTreeMap<String, Option<String>>,
    environ: &Environment,
) -> Result<BTreeMap<String, Option<String>>> {
    section
        .iter()
        .map(|(name, default)| {
            let value = environ
                .get(name)
                .map(str::to_string)
                .or_else(|| default.clone())
                .ok_or_else(|| Error::MissingEnv { name: name.clone() })?;
            Ok((name.clone(), Some(value)))
        })
        .collect()
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Values of an `env` section without failing on required variables: each
/// entry is the process value, else its default, else `None`.
pub fn lookup_section(
    section: &BTreeMap<String, Option<String>>,
    environ: &Environment,
) -> BTreeMap<String, Option<String>> {
    section
        .iter()
        .map(|(name, default)| {
            let value = environ.get(name).map(str::to_string).or_else(|| default.clone());
            (name.clone(), value)
        })
        .collect()
}

/// Replace `${NAME}` placeholders in `text` with values from a resolved `env`
/// section. `field` names the location being expanded, for error messages.
pub fn expand_placeholders(
    text: &str,
    vars: &BTreeMap<String, Option<String>>,
    field: &str,
) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = vars
            .get(name.as_str())
            .and_then(|v| v.as_deref())
            .ok_or_else(|| Error::UnresolvedPlaceholder {
                name: name.as_str().to_string(),
                field: field.to_string(),
            })?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn section(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_process_value_wins_over_default() {
        let environ = Environment::from_pairs([("FOO", "from-env")]);
        let resolved = resolve_section(&section(&[("FOO", Some("default"))]), &environ).unwrap();
        assert_eq!(resolved["FOO"].as_deref(), Some("from-env"));
    }

    #[test]
    fn test_default_used_when_unset() {
        let resolved =
            resolve_section(&section(&[("FOO", Some("BAR"))]), &Environment::default()).unwrap();
        assert_eq!(resolved["FOO"].as_deref(), Some("BAR"));
    }

    #[test]
    fn test_required_variable_missing() {
        let err = resolve_section(&section(&[("NEEDED", None)]), &Environment::default())
            .unwrap_err();
        assert!(matches!(err, Error::MissingEnv { ref name } if name == "NEEDED"));
    }

    #[test]
    fn test_expand_placeholders() {
        let vars = section(&[("MIRROR", Some("https://mirror.local")), ("X", Some("y"))]);
        let out = expand_placeholders("${MIRROR}/poky.git?${X}", &vars, "repos.poky.url").unwrap();
        assert_eq!(out, "https://mirror.local/poky.git?y");
        assert_eq!(expand_placeholders("plain", &vars, "f").unwrap(), "plain");
    }

    #[test]
    fn test_expand_unknown_placeholder() {
        let err = expand_placeholders("${NOPE}/x", &BTreeMap::new(), "repos.a.url").unwrap_err();
        assert!(err.to_string().contains("${NOPE}"));
        assert!(err.to_string().contains("repos.a.url"));
    }

    #[test]
    fn test_lookup_section_leaves_required_unset() {
        let environ = Environment::from_pairs([("SET", "env")]);
        let declared = section(&[("SET", Some("d")), ("REQ", None), ("DEF", Some("d"))]);
        let vars = lookup_section(&declared, &environ);
        assert_eq!(vars["SET"].as_deref(), Some("env"));
        assert_eq!(vars["DEF"].as_deref(), Some("d"));
        assert_eq!(vars["REQ"], None);
    }

    #[test]
    fn test_expand_repeated_calls_share_pattern() {
        let vars = section(&[("A", Some("1"))]);
        for _ in 0..3 {
            assert_eq!(expand_placeholders("${A}${A}", &vars, "f").unwrap(), "11");
        }
    }

    #[test]
    #[serial]
    fn test_from_process_sees_set_variable() {
        std::env::set_var("LAYERSTACK_ENV_TEST", "1");
        let environ = Environment::from_process();
        std::env::remove_var("LAYERSTACK_ENV_TEST");
        assert_eq!(environ.get("LAYERSTACK_ENV_TEST"), Some("1"));
    }
}
