//! # Repository Model
//!
//! A [`Repo`] is one declared source checkout: where it lives, where it comes
//! from, which refspec was requested and which commit that refspec resolved to.
//! It exposes the version-control operations the pipeline needs: `resolve`,
//! `checkout`, `apply_patches` and `diff`.
//!
//! ## Design
//!
//! All git access goes through the [`GitOperations`] trait. The application
//! uses [`SystemGit`], which shells out to the `git` executable; unit tests
//! swap in a recording mock so that checkout and patch logic can be exercised
//! without a network or a real object store.
//!
//! A repository declared without `url` is a *local* repository: it is used as
//! it is found on disk and is never cloned, fetched, patched or locked.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::{Document, RepoDecl};
pub use crate::git::CommitInfo;
use crate::error::{Error, Result};

/// Trait for git operations - allows mocking in tests
pub trait GitOperations: Send + Sync {
    /// Clone without checkout, optionally borrowing objects from `reference`.
    fn clone_repo(&self, repo: &str, url: &str, dir: &Path, reference: Option<&Path>)
        -> Result<()>;

    /// Create or refresh a bare mirror in the reference cache.
    fn update_mirror(&self, repo: &str, url: &str, mirror: &Path) -> Result<()>;

    fn fetch(&self, repo: &str, dir: &Path) -> Result<()>;

    /// Resolve a revision in a local repository. `None` if it names nothing.
    fn rev_parse(&self, repo: &str, dir: &Path, rev: &str) -> Result<Option<String>>;

    /// Resolve a refspec against a remote without cloning.
    fn ls_remote(&self, repo: &str, url: &str, refspec: &str) -> Result<Option<String>>;

    fn is_dirty(&self, repo: &str, dir: &Path) -> Result<bool>;

    fn checkout(&self, repo: &str, dir: &Path, commit: &str) -> Result<()>;

    fn reset_hard(&self, repo: &str, dir: &Path, commit: &str) -> Result<()>;

    fn apply_patch(&self, repo: &str, dir: &Path, patch: &Path, message: &str) -> Result<()>;

    /// Commits reachable from `to` but not from `from`.
    fn log(&self, repo: &str, dir: &Path, from: &str, to: &str) -> Result<Vec<CommitInfo>>;
}

/// The default implementation of `GitOperations`, which uses the system's
/// `git` command.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemGit;

impl GitOperations for SystemGit {
    fn clone_repo(
        &self,
        repo: &str,
        url: &str,
        dir: &Path,
        reference: Option<&Path>,
    ) -> Result<()> {
        crate::git::clone(repo, url, dir, reference)
    }

    fn update_mirror(&self, repo: &str, url: &str, mirror: &Path) -> Result<()> {
        crate::git::update_mirror(repo, url, mirror)
    }

    fn fetch(&self, repo: &str, dir: &Path) -> Result<()> {
        crate::git::fetch(repo, dir)
    }

    fn rev_parse(&self, repo: &str, dir: &Path, rev: &str) -> Result<Option<String>> {
        crate::git::rev_parse(repo, dir, rev)
    }

    fn ls_remote(&self, repo: &str, url: &str, refspec: &str) -> Result<Option<String>> {
        crate::git::ls_remote(repo, url, refspec)
    }

    fn is_dirty(&self, repo: &str, dir: &Path) -> Result<bool> {
        crate::git::is_dirty(repo, dir)
    }

    fn checkout(&self, repo: &str, dir: &Path, commit: &str) -> Result<()> {
        crate::git::checkout(repo, dir, commit)
    }

    fn reset_hard(&self, repo: &str, dir: &Path, commit: &str) -> Result<()> {
        crate::git::reset_hard(repo, dir, commit)
    }

    fn apply_patch(&self, repo: &str, dir: &Path, patch: &Path, message: &str) -> Result<()> {
        crate::git::apply_patch(repo, dir, patch, message)
    }

    fn log(&self, repo: &str, dir: &Path, from: &str, to: &str) -> Result<Vec<CommitInfo>> {
        crate::git::log(repo, dir, from, to)
    }
}

/// Whether `refspec` is a full commit id (SHA-1 or SHA-256, lowercase hex).
pub fn is_commit_id(refspec: &str) -> bool {
    matches!(refspec.len(), 40 | 64)
        && refspec
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Name of the reference-cache mirror for `url`: host and path segments joined
/// with dots, ending in `.git`.
///
/// `https://github.com/siemens/kas` becomes `github.com.siemens.kas.git`.
pub fn mirror_name(url: &str) -> String {
    let segments: Vec<String> = match url::Url::parse(url) {
        Ok(parsed) if parsed.host_str().is_some() => parsed
            .host_str()
            .into_iter()
            .map(str::to_string)
            .chain(
                parsed
                    .path_segments()
                    .into_iter()
                    .flatten()
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            )
            .collect(),
        // scp-like `user@host:path` or a plain path
        _ => {
            let without_user = url.rsplit_once('@').map_or(url, |(_, rest)| rest);
            without_user
                .split([':', '/'])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }
    };

    let name = segments.join(".");
    if name.ends_with(".git") {
        name
    } else {
        format!("{}.git", name)
    }
}

/// A patch to apply on top of a repository checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub id: String,
    /// Repository holding the patch file.
    pub repo: String,
    /// Path of a patch file or directory, relative to the holding repository.
    pub path: String,
}

/// One repository of a merged configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    /// Key under `repos`.
    pub name: String,
    pub url: Option<String>,
    /// Checkout directory.
    pub path: PathBuf,
    /// Requested refspec, if any.
    pub refspec: Option<String>,
    /// Commit the refspec resolved to. Set by `resolve`.
    pub commit: Option<String>,
    /// Enabled layer directories, relative to `path`.
    pub layers: Vec<String>,
    /// Patches in application order.
    pub patches: Vec<Patch>,
}

impl Repo {
    /// Instantiate a repository from its merged declaration.
    ///
    /// Remote repositories are checked out below `work_dir`. Local ones are
    /// taken relative to `root_dir`, the directory of the root document.
    pub fn from_decl(
        name: &str,
        decl: Option<&RepoDecl>,
        default_refspec: Option<&str>,
        work_dir: &Path,
        root_dir: &Path,
    ) -> Repo {
        let empty = RepoDecl::default();
        let decl = decl.unwrap_or(&empty);
        let url = decl.url.clone();

        let path = match (&url, &decl.path) {
            (Some(_), Some(p)) => work_dir.join(p),
            (Some(_), None) => work_dir.join(decl.name.as_deref().unwrap_or(name)),
            (None, Some(p)) => root_dir.join(p),
            (None, None) => root_dir.to_path_buf(),
        };

        let refspec = decl
            .refspec
            .clone()
            .or_else(|| url.as_ref().and(default_refspec.map(str::to_string)));
        let commit = refspec.clone().filter(|r| is_commit_id(r));

        let mut layers = decl.enabled_layers();
        if layers.is_empty() {
            layers.push(".".to_string());
        }

        let patches = decl
            .patches
            .iter()
            .filter_map(|(id, patch)| {
                let patch = patch.as_ref()?;
                Some(Patch {
                    id: id.clone(),
                    repo: patch.repo.clone().unwrap_or_else(|| name.to_string()),
                    path: patch.path.clone(),
                })
            })
            .collect();

        Repo {
            name: name.to_string(),
            url,
            path,
            refspec,
            commit,
            layers,
            patches,
        }
    }

    /// Whether this repository is used as found on disk.
    pub fn is_local(&self) -> bool {
        self.url.is_none()
    }

    /// Whether the refspec can move, i.e. is not a full commit id.
    pub fn is_floating(&self) -> bool {
        !self.refspec.as_deref().is_some_and(is_commit_id)
    }

    fn has_clone(&self) -> bool {
        self.path.join(".git").exists()
    }

    /// Turn the refspec into the commit it currently names.
    ///
    /// Uses the local clone when there is one, otherwise asks the remote. Never
    /// touches the working tree.
    pub fn resolve(&mut self, git: &dyn GitOperations) -> Result<String> {
        if let Some(refspec) = self.refspec.as_deref().filter(|r| is_commit_id(r)) {
            let commit = refspec.to_string();
            self.commit = Some(commit.clone());
            return Ok(commit);
        }

        let refspec = self.refspec.clone();
        let resolved = match (&self.url, self.has_clone()) {
            (None, _) => {
                let rev = refspec.as_deref().unwrap_or("HEAD");
                git.rev_parse(&self.name, &self.path, &format!("{}^{{commit}}", rev))?
            }
            (Some(_), true) => self.resolve_local(git, refspec.as_deref())?,
            (Some(url), false) => {
                git.ls_remote(&self.name, url, refspec.as_deref().unwrap_or("HEAD"))?
            }
        };

        let commit = resolved.ok_or_else(|| Error::RefNotFound {
            repo: self.name.clone(),
            refspec: refspec.unwrap_or_else(|| "HEAD".to_string()),
        })?;
        debug!("[{}] {:?} resolved to {}", self.name, self.refspec, commit);
        self.commit = Some(commit.clone());
        Ok(commit)
    }

    fn resolve_local(&self, git: &dyn GitOperations, refspec: Option<&str>) -> Result<Option<String>> {
        let candidates = match refspec {
            Some(r) => vec![
                format!("refs/remotes/origin/{}^{{commit}}", r),
                format!("refs/tags/{}^{{commit}}", r),
                format!("{}^{{commit}}", r),
            ],
            None => vec![
                "refs/remotes/origin/HEAD^{commit}".to_string(),
                "HEAD^{commit}".to_string(),
            ],
        };
        for rev in candidates {
            if let Some(id) = git.rev_parse(&self.name, &self.path, &rev)? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Bring the working tree to the requested refspec.
    ///
    /// Clones when needed (through the reference cache if `ref_dir` is set),
    /// fetches unless a pinned commit is already present, then detaches HEAD
    /// at the resolved commit. A tree already at that commit is left alone.
    /// Local modifications abort the checkout unless `force` is set.
    pub fn checkout(
        &mut self,
        git: &dyn GitOperations,
        ref_dir: Option<&Path>,
        force: bool,
    ) -> Result<()> {
        let Some(url) = self.url.clone() else {
            debug!("[{}] local repository, not checking out", self.name);
            return Ok(());
        };

        let fresh = !self.has_clone();
        if fresh {
            let reference = match ref_dir {
                Some(dir) => {
                    let mirror = dir.join(mirror_name(&url));
                    git.update_mirror(&self.name, &url, &mirror)?;
                    Some(mirror)
                }
                None => None,
            };
            info!("[{}] cloning {}", self.name, url);
            git.clone_repo(&self.name, &url, &self.path, reference.as_deref())?;
        } else {
            let pinned_present = match self.refspec.as_deref().filter(|r| is_commit_id(r)) {
                Some(commit) => git
                    .rev_parse(&self.name, &self.path, &format!("{}^{{commit}}", commit))?
                    .is_some(),
                None => false,
            };
            if !pinned_present {
                git.fetch(&self.name, &self.path)?;
            }
        }

        let target = self.resolve(git)?;

        if !fresh {
            let head = git.rev_parse(&self.name, &self.path, "HEAD")?;
            if head.as_deref() == Some(target.as_str()) {
                debug!("[{}] already at {}", self.name, target);
                return Ok(());
            }
            if !force && git.is_dirty(&self.name, &self.path)? {
                return Err(Error::DirtyWorktree {
                    repo: self.name.clone(),
                    path: self.path.clone(),
                    hint: Some(
                        "commit or stash the changes, or pass --force-checkout".to_string(),
                    ),
                });
            }
        }

        info!("[{}] checking out {}", self.name, target);
        git.checkout(&self.name, &self.path, &target)
    }

    /// Expand the patch list into concrete files, in application order.
    ///
    /// A patch path naming a directory contributes every `*.patch` and `*.diff`
    /// file in it, sorted by file name.
    pub fn patch_files(&self, repos: &[Repo]) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        for patch in &self.patches {
            let holder = repos
                .iter()
                .find(|r| r.name == patch.repo)
                .ok_or_else(|| Error::UnknownRepo {
                    name: patch.repo.clone(),
                })?;
            let location = holder.path.join(&patch.path);

            if location.is_dir() {
                let mut found = Vec::new();
                for ext in ["patch", "diff"] {
                    let pattern = location.join(format!("*.{}", ext));
                    let entries = glob::glob(&pattern.to_string_lossy()).map_err(|e| {
                        Error::Schema {
                            path: location.clone(),
                            message: e.to_string(),
                        }
                    })?;
                    found.extend(entries.filter_map(|e| e.ok()));
                }
                found.sort();
                files.extend(found.into_iter().map(|f| (patch.id.clone(), f)));
            } else if location.is_file() {
                files.push((patch.id.clone(), location));
            } else {
                return Err(Error::PatchConflict {
                    repo: self.name.clone(),
                    patch: patch.id.clone(),
                    message: format!("{} does not exist", location.display()),
                });
            }
        }
        Ok(files)
    }

    /// Apply patches in order on top of the current checkout.
    ///
    /// Each patch becomes one commit. If any patch fails, the tree is reset to
    /// the commit it had before the first patch and the failure is returned.
    pub fn apply_patches(&self, git: &dyn GitOperations, patches: &[(String, PathBuf)]) -> Result<()> {
        if self.is_local() {
            if !patches.is_empty() {
                warn!("[{}] patches are not applied to local repositories", self.name);
            }
            return Ok(());
        }
        if patches.is_empty() {
            return Ok(());
        }

        let base = git
            .rev_parse(&self.name, &self.path, "HEAD")?
            .ok_or_else(|| Error::Unresolved {
                repo: self.name.clone(),
            })?;

        for (id, file) in patches {
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let message = format!("layerstack: apply patch '{}' ({})", id, file_name);
            info!("[{}] applying {}", self.name, file_name);

            if let Err(e) = git.apply_patch(&self.name, &self.path, file, &message) {
                if let Err(reset) = git.reset_hard(&self.name, &self.path, &base) {
                    warn!("[{}] could not reset to {}: {}", self.name, base, reset);
                }
                return Err(Error::PatchConflict {
                    repo: self.name.clone(),
                    patch: id.clone(),
                    message: e.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Commits reachable from `to` but not from `from`, newest first.
    pub fn diff(&self, git: &dyn GitOperations, from: &str, to: &str) -> Result<Vec<CommitInfo>> {
        if from == to {
            return Ok(Vec::new());
        }
        git.log(&self.name, &self.path, from, to)
    }
}

/// Instantiate every repository of a merged configuration, in key order.
pub fn repos_from_config(config: &Document, work_dir: &Path, root_dir: &Path) -> Vec<Repo> {
    let default_refspec = config.defaults.refspec();
    config
        .repos
        .iter()
        .map(|(name, decl)| Repo::from_decl(name, decl.as_ref(), default_refspec, work_dir, root_dir))
        .collect()
}

/// Repository name -> checkout directory.
pub fn repo_paths(repos: &[Repo]) -> BTreeMap<String, PathBuf> {
    repos
        .iter()
        .map(|r| (r.name.clone(), r.path.clone()))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::mock::MockGit;
    use super::*;
    use crate::config::PatchDecl;
    use tempfile::TempDir;

    const C1: &str = "1111111111111111111111111111111111111111";
    const C2: &str = "2222222222222222222222222222222222222222";

    fn remote_repo(dir: &Path, refspec: Option<&str>) -> Repo {
        let decl = RepoDecl {
            url: Some("https://example.com/meta-foo.git".to_string()),
            refspec: refspec.map(str::to_string),
            ..Default::default()
        };
        Repo::from_decl("meta-foo", Some(&decl), None, dir, dir)
    }

    #[test]
    fn test_is_commit_id() {
        assert!(is_commit_id(C1));
        assert!(is_commit_id(&"ab".repeat(32)));
        assert!(!is_commit_id("main"));
        assert!(!is_commit_id(&"A".repeat(40)));
        assert!(!is_commit_id("1111"));
    }

    #[test]
    fn test_mirror_name() {
        assert_eq!(
            mirror_name("https://github.com/siemens/kas"),
            "github.com.siemens.kas.git"
        );
        assert_eq!(
            mirror_name("https://github.com/siemens/kas.git"),
            "github.com.siemens.kas.git"
        );
        assert_eq!(
            mirror_name("git@github.com:siemens/kas.git"),
            "github.com.siemens.kas.git"
        );
    }

    #[test]
    fn test_from_decl_paths_and_defaults() {
        let work = Path::new("/work");
        let root = Path::new("/cfg");

        let decl = RepoDecl {
            url: Some("u".to_string()),
            ..Default::default()
        };
        let repo = Repo::from_decl("poky", Some(&decl), Some("scarthgap"), work, root);
        assert_eq!(repo.path, PathBuf::from("/work/poky"));
        assert_eq!(repo.refspec.as_deref(), Some("scarthgap"));
        assert_eq!(repo.layers, vec![".".to_string()]);
        assert!(repo.is_floating());

        let local = Repo::from_decl("this", None, Some("scarthgap"), work, root);
        assert!(local.is_local());
        assert_eq!(local.path, PathBuf::from("/cfg"));
        assert_eq!(local.refspec, None);

        let pinned = RepoDecl {
            url: Some("u".to_string()),
            refspec: Some(C1.to_string()),
            ..Default::default()
        };
        let repo = Repo::from_decl("x", Some(&pinned), None, work, root);
        assert!(!repo.is_floating());
        assert_eq!(repo.commit.as_deref(), Some(C1));
    }

    #[test]
    fn test_from_decl_patches_default_to_own_repo() {
        let mut decl = RepoDecl {
            url: Some("u".to_string()),
            ..Default::default()
        };
        decl.patches.insert(
            "b-second".to_string(),
            Some(PatchDecl {
                repo: Some("other".to_string()),
                path: "p/2.patch".to_string(),
            }),
        );
        decl.patches.insert(
            "a-first".to_string(),
            Some(PatchDecl {
                repo: None,
                path: "p/1.patch".to_string(),
            }),
        );
        decl.patches.insert("dropped".to_string(), None);

        let repo = Repo::from_decl("x", Some(&decl), None, Path::new("/w"), Path::new("/r"));
        let ids: Vec<_> = repo.patches.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a-first", "b-second"]);
        assert_eq!(repo.patches[0].repo, "x");
        assert_eq!(repo.patches[1].repo, "other");
    }

    #[test]
    fn test_resolve_uses_remote_without_clone() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new().with_ref("main", C1);
        let mut repo = remote_repo(temp.path(), Some("main"));

        assert_eq!(repo.resolve(&git).unwrap(), C1);
        assert_eq!(repo.commit.as_deref(), Some(C1));
        assert_eq!(git.calls(), vec!["ls-remote meta-foo main"]);
    }

    #[test]
    fn test_resolve_missing_ref() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new();
        let mut repo = remote_repo(temp.path(), Some("nope"));

        let err = repo.resolve(&git).unwrap_err();
        assert!(matches!(err, Error::RefNotFound { ref refspec, .. } if refspec == "nope"));
    }

    #[test]
    fn test_resolve_commit_needs_no_git() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new();
        let mut repo = remote_repo(temp.path(), Some(C2));
        assert_eq!(repo.resolve(&git).unwrap(), C2);
        assert!(git.calls().is_empty());
    }

    #[test]
    fn test_checkout_fresh_clone_then_idempotent() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new().with_ref("main", C1);
        let mut repo = remote_repo(temp.path(), Some("main"));

        repo.checkout(&git, None, false).unwrap();
        assert_eq!(git.count("clone"), 1);
        assert_eq!(git.count("checkout"), 1);

        repo.checkout(&git, None, false).unwrap();
        assert_eq!(git.count("clone"), 1);
        assert_eq!(git.count("fetch"), 1);
        assert_eq!(git.count("checkout"), 1, "second checkout must be a no-op");
    }

    #[test]
    fn test_checkout_moves_to_new_commit() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new().with_ref("main", C1);
        let mut repo = remote_repo(temp.path(), Some("main"));
        repo.checkout(&git, None, false).unwrap();

        git.set_ref("main", C2);
        repo.checkout(&git, None, false).unwrap();
        assert!(git.calls().contains(&format!("checkout meta-foo {}", C2)));
        assert_eq!(repo.commit.as_deref(), Some(C2));
    }

    #[test]
    fn test_checkout_dirty_tree_is_error_unless_forced() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new().with_ref("main", C1);
        let mut repo = remote_repo(temp.path(), Some("main"));
        repo.checkout(&git, None, false).unwrap();

        git.set_ref("main", C2);
        git.set_dirty(&repo.path);
        let err = repo.checkout(&git, None, false).unwrap_err();
        assert!(matches!(err, Error::DirtyWorktree { .. }));
        assert!(err.to_string().contains("--force-checkout"));

        repo.checkout(&git, None, true).unwrap();
        assert!(git.calls().contains(&format!("checkout meta-foo {}", C2)));
    }

    #[test]
    fn test_checkout_pinned_commit_skips_fetch() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new();
        let mut repo = remote_repo(temp.path(), Some(C1));
        repo.checkout(&git, None, false).unwrap();
        repo.checkout(&git, None, false).unwrap();
        assert_eq!(git.count("fetch"), 0);
    }

    #[test]
    fn test_checkout_uses_reference_mirror() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new().with_ref("main", C1);
        let mut repo = remote_repo(&temp.path().join("work"), Some("main"));
        let ref_dir = temp.path().join("ref");

        repo.checkout(&git, Some(&ref_dir), false).unwrap();
        let calls = git.calls();
        assert!(calls[0].starts_with("mirror meta-foo"));
        assert!(calls[0].ends_with("example.com.meta-foo.git"));
        assert_eq!(calls[1], "clone meta-foo --reference");
    }

    #[test]
    fn test_local_repo_is_not_checked_out() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new();
        let mut repo = Repo::from_decl("local", None, None, temp.path(), temp.path());
        repo.checkout(&git, None, false).unwrap();
        assert!(git.calls().is_empty());
    }

    #[test]
    fn test_patch_files_expands_directories_sorted() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("patches");
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["02-b.patch", "01-a.diff", "notes.txt"] {
            std::fs::write(dir.join(name), "").unwrap();
        }

        let mut decl = RepoDecl {
            url: Some("u".to_string()),
            ..Default::default()
        };
        decl.patches.insert(
            "set".to_string(),
            Some(PatchDecl {
                repo: Some("holder".to_string()),
                path: "patches".to_string(),
            }),
        );
        let target = Repo::from_decl("target", Some(&decl), None, temp.path(), temp.path());
        let holder = Repo::from_decl("holder", None, None, temp.path(), temp.path());
        let all = vec![target.clone(), holder];

        let files = target.patch_files(&all).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|(_, f)| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["01-a.diff", "02-b.patch"]);
    }

    #[test]
    fn test_patch_files_unknown_holder() {
        let mut decl = RepoDecl {
            url: Some("u".to_string()),
            ..Default::default()
        };
        decl.patches.insert(
            "p".to_string(),
            Some(PatchDecl {
                repo: Some("ghost".to_string()),
                path: "x.patch".to_string(),
            }),
        );
        let repo = Repo::from_decl("t", Some(&decl), None, Path::new("/w"), Path::new("/r"));
        let err = repo.patch_files(std::slice::from_ref(&repo)).unwrap_err();
        assert!(matches!(err, Error::UnknownRepo { ref name } if name == "ghost"));
    }

    #[test]
    fn test_apply_patches_conflict_resets_to_base() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new().with_failing_patch("2.patch");
        let repo = remote_repo(temp.path(), Some(C1));
        git.set_head(&repo.path, C1);

        let patches = vec![
            ("one".to_string(), temp.path().join("1.patch")),
            ("two".to_string(), temp.path().join("2.patch")),
            ("three".to_string(), temp.path().join("3.patch")),
        ];
        let err = repo.apply_patches(&git, &patches).unwrap_err();

        assert!(matches!(err, Error::PatchConflict { ref patch, .. } if patch == "two"));
        let calls = git.calls();
        assert!(calls.contains(&format!("reset meta-foo {}", C1)));
        assert!(!calls.iter().any(|c| c.ends_with("3.patch")));
    }

    #[test]
    fn test_diff_same_commit_is_empty() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new();
        let repo = remote_repo(temp.path(), Some(C1));
        assert!(repo.diff(&git, C1, C1).unwrap().is_empty());
        assert!(git.calls().is_empty());
    }

    #[test]
    fn test_diff_returns_log() {
        let temp = TempDir::new().unwrap();
        let entry = CommitInfo {
            commit: C2.to_string(),
            author: "Jane".to_string(),
            date: "2024-01-01".to_string(),
            message: "update".to_string(),
        };
        let git = MockGit::new().with_log(C1, C2, vec![entry.clone()]);
        let repo = remote_repo(temp.path(), Some(C1));
        assert_eq!(repo.diff(&git, C1, C2).unwrap(), vec![entry]);
    }
}
