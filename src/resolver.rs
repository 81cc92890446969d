//! # Configuration Resolver
//!
//! Turns a root specification document into one immutable [`MergedConfig`].
//!
//! ## Merge order
//!
//! Includes are walked depth-first in declaration order, and every document
//! is merged only after everything it includes (a post-order traversal of the
//! include graph). A document reached a second time through another path is
//! not merged again. Reaching a document that is still on the include stack is
//! a cycle and fails.
//!
//! The fold then runs in four passes over that order:
//!
//! 1. base content of every document (everything except `overrides`),
//! 2. the `overrides` of every document, in the same order,
//! 3. overrides given by the caller,
//! 4. the lock document, when the lock policy is [`LockPolicy::Apply`].
//!
//! Environment resolution runs between 3 and 4. Ordering depends only on the
//! declaration order inside the documents, never on directory listings.
//!
//! ## Repository includes
//!
//! An include of the form `repo:path` points into a declared repository. The
//! repository is declared by the documents merged so far or by the including
//! document itself; it is made available through a [`RepoLocator`] before the
//! included file is read.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::{self, Defaults, Document, IncludeTarget, Overrides, RepoDecl, SCHEMA_VERSION};
use crate::env::{self, EnvMode, Environment};
use crate::error::{Error, Result};
use crate::lock::{self, LockPolicy};
use crate::merge::Merge;
use crate::repository::{GitOperations, Repo};

/// The outcome of resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfig {
    /// Merged document; `header.includes` is always empty.
    pub spec: Document,
    /// Root document path.
    pub root: PathBuf,
    /// Documents in merge order.
    pub sources: Vec<PathBuf>,
    /// Whether a lock document was applied.
    pub locked: bool,
    /// Repositories whose refspec was pinned by the applied lock.
    pub lock_pins: BTreeSet<String>,
}

impl MergedConfig {
    pub fn new(spec: Document, root: PathBuf) -> Self {
        MergedConfig {
            spec,
            sources: vec![root.clone()],
            root,
            locked: false,
            lock_pins: BTreeSet::new(),
        }
    }

    /// Directory of the root document. Local repositories live relative to it.
    pub fn root_dir(&self) -> &Path {
        self.root.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn lock_path(&self) -> PathBuf {
        lock::lock_path(&self.root)
    }

    pub fn to_yaml(&self) -> Result<String> {
        self.spec.to_yaml()
    }
}

/// Caller-supplied resolution options.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Further top-level documents, merged after the root as if it included them.
    pub extra_documents: Vec<PathBuf>,
    /// Overrides from the command line, applied after every document's own.
    pub overrides: Overrides,
    pub lock: LockPolicy,
    pub env: EnvMode,
}

/// Makes a repository available on disk so that documents can be included
/// from it.
pub trait RepoLocator {
    fn locate(&self, repo: &mut Repo) -> Result<PathBuf>;
}

/// Checks repositories out as needed.
pub struct CheckoutLocator<'a> {
    pub git: &'a dyn GitOperations,
    pub ref_dir: Option<&'a Path>,
    pub force: bool,
}

impl RepoLocator for CheckoutLocator<'_> {
    fn locate(&self, repo: &mut Repo) -> Result<PathBuf> {
        repo.checkout(self.git, self.ref_dir, self.force)?;
        Ok(repo.path.clone())
    }
}

/// Uses repositories as they are on disk, never touching the network.
pub struct OnDiskLocator;

impl RepoLocator for OnDiskLocator {
    fn locate(&self, repo: &mut Repo) -> Result<PathBuf> {
        Ok(repo.path.clone())
    }
}

/// Resolves specification documents.
pub struct Resolver<'a> {
    work_dir: PathBuf,
    environ: &'a Environment,
    locator: &'a dyn RepoLocator,
}

impl<'a> Resolver<'a> {
    pub fn new(work_dir: PathBuf, environ: &'a Environment, locator: &'a dyn RepoLocator) -> Self {
        Resolver {
            work_dir,
            environ,
            locator,
        }
    }

    /// Resolve `root` into a merged configuration.
    pub fn resolve(&self, root: &Path, options: &ResolveOptions) -> Result<MergedConfig> {
        let root = root.canonicalize().map_err(|_| Error::ConfigNotFound {
            path: root.to_path_buf(),
        })?;
        let root_dir = root.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

        let existing_lock = match options.lock {
            LockPolicy::Apply => lock::read(&lock::lock_path(&root))?,
            LockPolicy::Update => None,
        };

        // Repositories used for includes honour the same pins as the result.
        let mut pins = options.overrides.clone();
        if let Some(lock) = &existing_lock {
            pins.merge_from(lock.overrides.clone(), "overrides")?;
        }

        let mut walk = Walk {
            resolver: self,
            root_dir,
            pins,
            stack: Vec::new(),
            visited: BTreeSet::new(),
            order: Vec::new(),
            repos: Document::empty(SCHEMA_VERSION),
        };
        walk.visit(&root, None)?;
        for extra in &options.extra_documents {
            let extra = canonical(extra, &root)?;
            walk.visit(&extra, Some(&root))?;
        }

        let mut spec = Document::empty(1);
        for (path, document) in &walk.order {
            debug!("Merging {}", path.display());
            let mut base = document.clone();
            base.overrides = Overrides::default();
            base.header.includes.clear();
            spec.merge_from(base, "")?;
        }
        for (_, document) in &walk.order {
            spec.apply_overrides(&document.overrides)?;
        }
        spec.apply_overrides(&options.overrides)?;

        if options.env == EnvMode::Resolve {
            resolve_env(&mut spec, self.environ)?;
        }

        let mut merged = MergedConfig {
            spec,
            sources: walk.order.into_iter().map(|(p, _)| p).collect(),
            root,
            locked: false,
            lock_pins: BTreeSet::new(),
        };

        if let Some(lock) = existing_lock {
            info!("Applying lock file {}", merged.lock_path().display());
            merged = lock::apply(&merged, &lock)?;
        }
        Ok(merged)
    }
}

/// Resolve the `env` section and expand `${NAME}` in repository urls and paths.
fn resolve_env(spec: &mut Document, environ: &Environment) -> Result<()> {
    spec.env = env::resolve_section(&spec.env, environ)?;
    let vars = &spec.env;
    for (name, decl) in spec.repos.iter_mut() {
        if let Some(decl) = decl {
            expand_repo(name, decl, vars)?;
        }
    }
    Ok(())
}

fn expand_repo(name: &str, decl: &mut RepoDecl, vars: &BTreeMap<String, Option<String>>) -> Result<()> {
    if let Some(url) = &decl.url {
        decl.url = Some(env::expand_placeholders(
            url,
            vars,
            &format!("repos.{}.url", name),
        )?);
    }
    if let Some(path) = &decl.path {
        decl.path = Some(env::expand_placeholders(
            path,
            vars,
            &format!("repos.{}.path", name),
        )?);
    }
    Ok(())
}

fn canonical(path: &Path, from: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|_| Error::IncludeNotFound {
        path: path.to_path_buf(),
        from: from.to_path_buf(),
    })
}

/// State of one include-graph traversal.
struct Walk<'r, 'a> {
    resolver: &'r Resolver<'a>,
    root_dir: PathBuf,
    pins: Overrides,
    /// Documents currently being expanded, outermost first.
    stack: Vec<PathBuf>,
    visited: BTreeSet<PathBuf>,
    /// Documents in post-order.
    order: Vec<(PathBuf, Document)>,
    /// Repository declarations and defaults seen so far.
    repos: Document,
}

impl Walk<'_, '_> {
    fn visit(&mut self, path: &Path, from: Option<&Path>) -> Result<()> {
        let path = match from {
            Some(from) => canonical(path, from)?,
            None => path.to_path_buf(),
        };

        if let Some(pos) = self.stack.iter().position(|p| p == &path) {
            let cycle = self.stack[pos..]
                .iter()
                .chain(std::iter::once(&path))
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(Error::IncludeCycle { cycle });
        }
        if self.visited.contains(&path) {
            debug!("{} already merged, skipping", path.display());
            return Ok(());
        }

        let document = config::from_file(&path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

        self.stack.push(path.clone());
        for include in &document.header.includes {
            let target = match include.target() {
                IncludeTarget::Local(file) => dir.join(file),
                IncludeTarget::Repo { repo, file } => self.repo_dir(repo, &document)?.join(file),
            };
            self.visit(&target, Some(&path))?;
        }
        self.stack.pop();

        let mut known = Document::empty(SCHEMA_VERSION);
        known.repos = document.repos.clone();
        known.defaults = document.defaults.clone();
        known.env = document.env.clone();
        self.repos.merge_from(known, "")?;

        self.visited.insert(path.clone());
        self.order.push((path, document));
        Ok(())
    }

    /// Checkout directory of `name`, as declared so far plus by `including`.
    ///
    /// `${NAME}` placeholders in the declaration are expanded from the `env`
    /// sections seen so far, whatever the resolution mode.
    fn repo_dir(&self, name: &str, including: &Document) -> Result<PathBuf> {
        let mut repos = self.repos.repos.clone();
        repos.merge_from(including.repos.clone(), "repos")?;
        let mut defaults: Defaults = self.repos.defaults.clone();
        defaults.merge_from(including.defaults.clone(), "defaults")?;
        let mut env_section = self.repos.env.clone();
        env_section.merge_from(including.env.clone(), "env")?;
        let vars = env::lookup_section(&env_section, self.resolver.environ);

        let mut decl: Option<RepoDecl> = repos.remove(name).ok_or_else(|| Error::UnknownRepo {
            name: name.to_string(),
        })?;
        if let Some(decl) = decl.as_mut() {
            if let Some(refspec) = self.pins.repos.get(name).and_then(|p| p.refspec.clone()) {
                decl.refspec = Some(refspec);
            }
            expand_repo(name, decl, &vars)?;
        }

        let mut repo = Repo::from_decl(
            name,
            decl.as_ref(),
            defaults.refspec(),
            &self.resolver.work_dir,
            &self.root_dir,
        );
        self.resolver.locator.locate(&mut repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::mock::MockGit;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn resolve_with(root: &Path, options: &ResolveOptions, environ: &Environment) -> Result<MergedConfig> {
        let work = root.parent().unwrap().to_path_buf();
        Resolver::new(work, environ, &OnDiskLocator).resolve(root, options)
    }

    fn resolve(root: &Path) -> Result<MergedConfig> {
        resolve_with(root, &ResolveOptions::default(), &Environment::default())
    }

    fn refspec(config: &MergedConfig, repo: &str) -> Option<String> {
        config.spec.repos[repo].as_ref().and_then(|r| r.refspec.clone())
    }

    #[test]
    fn test_post_order_and_later_wins() {
        let temp = TempDir::new().unwrap();
        let d = temp.path();
        write(d, "a.yml", "header: {version: 1}\nrepos:\n  x:\n    url: u\n    refspec: from-a\nmachine: a\n");
        write(d, "b.yml", "header: {version: 1}\nrepos:\n  x:\n    refspec: from-b\n");
        let root = write(
            d,
            "root.yml",
            "header:\n  version: 1\n  includes: [a.yml, b.yml]\nmachine: root\n",
        );

        let merged = resolve(&root).unwrap();
        assert_eq!(refspec(&merged, "x").as_deref(), Some("from-b"));
        assert_eq!(merged.spec.machine.as_deref(), Some("root"));
        assert!(merged.spec.header.includes.is_empty());

        let names: Vec<_> = merged
            .sources
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.yml", "b.yml", "root.yml"]);
    }

    #[test]
    fn test_only_first_declares_refspec() {
        let temp = TempDir::new().unwrap();
        let d = temp.path();
        write(d, "a.yml", "header: {version: 1}\nrepos:\n  x:\n    url: u\n    refspec: from-a\n");
        write(d, "b.yml", "header: {version: 1}\nrepos:\n  x:\n    url: u\n");
        let root = write(d, "root.yml", "header:\n  version: 1\n  includes: [a.yml, b.yml]\n");
        assert_eq!(refspec(&resolve(&root).unwrap(), "x").as_deref(), Some("from-a"));
    }

    #[test]
    fn test_nested_includes_resolve_relative_to_includer() {
        let temp = TempDir::new().unwrap();
        let d = temp.path();
        write(d, "sub/leaf.yml", "header: {version: 1}\ndistro: leaf\n");
        write(d, "sub/mid.yml", "header:\n  version: 1\n  includes: [leaf.yml]\n");
        let root = write(d, "root.yml", "header:\n  version: 1\n  includes: [sub/mid.yml]\n");
        assert_eq!(resolve(&root).unwrap().spec.distro.as_deref(), Some("leaf"));
    }

    #[test]
    fn test_diamond_is_merged_once() {
        let temp = TempDir::new().unwrap();
        let d = temp.path();
        write(d, "common.yml", "header: {version: 1}\nmachine: common\n");
        write(d, "a.yml", "header:\n  version: 1\n  includes: [common.yml]\nmachine: a\n");
        write(d, "b.yml", "header:\n  version: 1\n  includes: [common.yml]\n");
        let root = write(d, "root.yml", "header:\n  version: 1\n  includes: [a.yml, b.yml]\n");

        let merged = resolve(&root).unwrap();
        assert_eq!(merged.sources.len(), 4);
        // common is not merged again after a, so a's value stands
        assert_eq!(merged.spec.machine.as_deref(), Some("a"));
    }

    #[test]
    fn test_cycle_is_error() {
        let temp = TempDir::new().unwrap();
        let d = temp.path();
        write(d, "a.yml", "header:\n  version: 1\n  includes: [b.yml]\n");
        write(d, "b.yml", "header:\n  version: 1\n  includes: [a.yml]\n");
        let root = write(d, "root.yml", "header:\n  version: 1\n  includes: [a.yml]\n");

        let err = resolve(&root).unwrap_err();
        match err {
            Error::IncludeCycle { cycle } => {
                assert!(cycle.contains("a.yml -> "));
                assert!(cycle.ends_with("a.yml"));
                assert!(!cycle.contains("root.yml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_include() {
        let temp = TempDir::new().unwrap();
        let root = write(temp.path(), "root.yml", "header:\n  version: 1\n  includes: [nope.yml]\n");
        assert!(matches!(resolve(&root).unwrap_err(), Error::IncludeNotFound { .. }));
    }

    #[test]
    fn test_overrides_apply_after_all_base_content() {
        let temp = TempDir::new().unwrap();
        let d = temp.path();
        write(
            d,
            "a.yml",
            "header: {version: 1}\nrepos:\n  x:\n    url: u\noverrides:\n  repos:\n    x:\n      refspec: pinned-by-a\n",
        );
        let root = write(
            d,
            "root.yml",
            "header:\n  version: 1\n  includes: [a.yml]\nrepos:\n  x:\n    refspec: floating\n",
        );

        let merged = resolve(&root).unwrap();
        assert_eq!(refspec(&merged, "x").as_deref(), Some("pinned-by-a"));
        assert!(merged.spec.overrides.repos.contains_key("x"));
    }

    #[test]
    fn test_cli_overrides_win() {
        let temp = TempDir::new().unwrap();
        let root = write(
            temp.path(),
            "root.yml",
            "header: {version: 1}\nrepos:\n  x:\n    url: u\n    refspec: main\n",
        );
        let mut options = ResolveOptions::default();
        options.overrides.repos.insert(
            "x".to_string(),
            config::RepoOverride {
                refspec: Some("cli".to_string()),
            },
        );
        let merged = resolve_with(&root, &options, &Environment::default()).unwrap();
        assert_eq!(refspec(&merged, "x").as_deref(), Some("cli"));
    }

    #[test]
    fn test_env_resolution_modes() {
        let temp = TempDir::new().unwrap();
        let root = write(
            temp.path(),
            "root.yml",
            "header: {version: 1}\nenv:\n  MIRROR: https://default\n  TOKEN:\nrepos:\n  x:\n    url: ${MIRROR}/x.git\n",
        );

        let err = resolve(&root).unwrap_err();
        assert!(matches!(err, Error::MissingEnv { ref name } if name == "TOKEN"));

        let environ = Environment::from_pairs([("TOKEN", "t")]);
        let merged = resolve_with(&root, &ResolveOptions::default(), &environ).unwrap();
        assert_eq!(
            merged.spec.repos["x"].as_ref().unwrap().url.as_deref(),
            Some("https://default/x.git")
        );
        assert_eq!(merged.spec.env["TOKEN"].as_deref(), Some("t"));

        let options = ResolveOptions {
            env: EnvMode::Passthrough,
            ..Default::default()
        };
        let merged = resolve_with(&root, &options, &Environment::default()).unwrap();
        assert_eq!(merged.spec.env["TOKEN"], None);
        assert_eq!(
            merged.spec.repos["x"].as_ref().unwrap().url.as_deref(),
            Some("${MIRROR}/x.git")
        );
    }

    #[test]
    fn test_lock_policy() {
        let temp = TempDir::new().unwrap();
        let d = temp.path();
        let root = write(d, "kas.yml", "header: {version: 1}\nrepos:\n  x:\n    url: u\n    refspec: main\n");
        let commit = "3".repeat(40);
        write(
            d,
            "kas.lock.yml",
            &format!("header:\n  version: 1\noverrides:\n  repos:\n    x:\n      refspec: {}\n", commit),
        );

        let applied = resolve(&root).unwrap();
        assert!(applied.locked);
        assert_eq!(refspec(&applied, "x"), Some(commit));

        let options = ResolveOptions {
            lock: LockPolicy::Update,
            ..Default::default()
        };
        let updating = resolve_with(&root, &options, &Environment::default()).unwrap();
        assert!(!updating.locked);
        assert_eq!(refspec(&updating, "x").as_deref(), Some("main"));
    }

    #[test]
    fn test_lock_wins_over_document_overrides() {
        let temp = TempDir::new().unwrap();
        let d = temp.path();
        let root = write(
            d,
            "kas.yml",
            "header: {version: 1}\nrepos:\n  x:\n    url: u\noverrides:\n  repos:\n    x:\n      refspec: next\n",
        );
        let commit = "4".repeat(40);
        write(
            d,
            "kas.lock.yml",
            &format!("header:\n  version: 1\noverrides:\n  repos:\n    x:\n      refspec: {}\n", commit),
        );
        assert_eq!(refspec(&resolve(&root).unwrap(), "x"), Some(commit));
    }

    #[test]
    fn test_repo_include_checks_out_declared_repo() {
        let temp = TempDir::new().unwrap();
        let d = temp.path();
        let work = d.join("work");
        write(&work, "meta-foo/conf/foo.yml", "header: {version: 1}\nmachine: from-repo\n");
        let root = write(
            d,
            "root.yml",
            "header:\n  version: 1\n  includes: [meta-foo:conf/foo.yml]\nrepos:\n  meta-foo:\n    url: https://example.com/meta-foo.git\n    refspec: main\n",
        );
        // a clone already exists, so checkout only fetches and moves HEAD
        fs::create_dir_all(work.join("meta-foo/.git")).unwrap();

        let git = MockGit::new().with_ref("main", &"5".repeat(40));
        let locator = CheckoutLocator {
            git: &git,
            ref_dir: None,
            force: false,
        };
        let environ = Environment::default();
        let merged = Resolver::new(work.clone(), &environ, &locator)
            .resolve(&root, &ResolveOptions::default())
            .unwrap();

        assert_eq!(merged.spec.machine.as_deref(), Some("from-repo"));
        assert_eq!(git.count("fetch"), 1);
        assert_eq!(git.count("checkout"), 1);
    }

    struct RecordingLocator {
        urls: std::sync::Mutex<Vec<Option<String>>>,
    }

    impl RepoLocator for RecordingLocator {
        fn locate(&self, repo: &mut Repo) -> Result<PathBuf> {
            self.urls.lock().unwrap().push(repo.url.clone());
            Ok(repo.path.clone())
        }
    }

    #[test]
    fn test_repo_include_expands_env_placeholders() {
        let temp = TempDir::new().unwrap();
        let d = temp.path();
        let work = d.join("work");
        write(&work, "meta-foo/conf/foo.yml", "header: {version: 1}\nmachine: from-repo\n");
        let root = write(
            d,
            "root.yml",
            "header:\n  version: 1\n  includes: [meta-foo:conf/foo.yml]\nenv:\n  MIRROR: https://default.example\nrepos:\n  meta-foo:\n    url: ${MIRROR}/meta-foo.git\n",
        );

        let locator = RecordingLocator {
            urls: std::sync::Mutex::new(Vec::new()),
        };
        let environ = Environment::from_pairs([("MIRROR", "https://mirror.local")]);
        let merged = Resolver::new(work, &environ, &locator)
            .resolve(&root, &ResolveOptions::default())
            .unwrap();

        assert_eq!(merged.spec.machine.as_deref(), Some("from-repo"));
        assert_eq!(
            *locator.urls.lock().unwrap(),
            vec![Some("https://mirror.local/meta-foo.git".to_string())]
        );
    }

    #[test]
    fn test_missing_root_names_the_document() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("absent.yml");
        match resolve(&missing).unwrap_err() {
            Error::ConfigNotFound { path } => assert_eq!(path, missing),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_repo_include_of_undeclared_repo() {
        let temp = TempDir::new().unwrap();
        let root = write(temp.path(), "root.yml", "header:\n  version: 1\n  includes: [ghost:x.yml]\n");
        assert!(matches!(resolve(&root).unwrap_err(), Error::UnknownRepo { .. }));
    }

    #[test]
    fn test_extra_documents_merge_after_root() {
        let temp = TempDir::new().unwrap();
        let d = temp.path();
        let root = write(d, "root.yml", "header: {version: 1}\nmachine: root\n");
        let extra = write(d, "extra.yml", "header: {version: 1}\nmachine: extra\n");
        let options = ResolveOptions {
            extra_documents: vec![extra],
            ..Default::default()
        };
        let merged = resolve_with(&root, &options, &Environment::default()).unwrap();
        assert_eq!(merged.spec.machine.as_deref(), Some("extra"));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let d = temp.path();
        write(d, "a.yml", "header: {version: 1}\nrepos:\n  z: {url: u}\n  a: {url: v}\nlocal_conf_header:\n  b: x\n  a: y\n");
        let root = write(d, "root.yml", "header:\n  version: 1\n  includes: [a.yml]\nenv:\n  X: y\n");
        let first = resolve(&root).unwrap().to_yaml().unwrap();
        let second = resolve(&root).unwrap().to_yaml().unwrap();
        assert_eq!(first, second);
    }
}
