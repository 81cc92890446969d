//! Wrappers over the system `git` executable.
//!
//! Using the system git means SSH keys, credential helpers and any settings in
//! `~/.gitconfig` are honoured without further work. Every function takes the
//! repository name only to give errors some context.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use log::debug;

use crate::error::{Error, Result};

/// Field separator used in `git log` output.
const FIELD_SEP: char = '\x1f';
/// Record separator used in `git log` output.
const RECORD_SEP: char = '\x1e';

/// One entry of a commit log.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CommitInfo {
    pub commit: String,
    pub author: String,
    pub date: String,
    pub message: String,
}

fn run(repo: &str, dir: Option<&Path>, args: &[&str]) -> Result<Output> {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd.args(args);
    debug!("[{}] git {}", repo, args.join(" "));

    cmd.output().map_err(|e| Error::GitCommand {
        repo: repo.to_string(),
        command: args.join(" "),
        stderr: e.to_string(),
    })
}

/// Run git and return trimmed stdout, failing on a non-zero exit.
fn run_checked(repo: &str, dir: Option<&Path>, args: &[&str]) -> Result<String> {
    let output = run(repo, dir, args)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = if stderr.contains("Authentication failed")
            || stderr.contains("Permission denied")
            || stderr.contains("Could not read from remote repository")
        {
            format!(
                "Authentication failed. Make sure you have access to the repository.\n\
                Error: {}",
                stderr.trim()
            )
        } else {
            stderr.trim().to_string()
        };
        return Err(Error::GitCommand {
            repo: repo.to_string(),
            command: args.join(" "),
            stderr,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Clone `url` into `target_dir` without checking anything out.
///
/// With a `reference` directory the clone borrows objects from it through
/// `--reference-if-able`, which silently falls back to a plain clone when the
/// reference does not exist.
pub fn clone(repo: &str, url: &str, target_dir: &Path, reference: Option<&Path>) -> Result<()> {
    if let Some(parent) = target_dir.parent() {
        fs::create_dir_all(parent)?;
    }

    let target = target_dir.to_string_lossy();
    let reference = reference.map(|r| r.to_string_lossy().into_owned());
    let mut args = vec!["clone", "-q", "--no-checkout"];
    if let Some(reference) = reference.as_deref() {
        args.extend(["--reference-if-able", reference]);
    }
    args.extend([url, &*target]);

    run_checked(repo, None, &args).map(|_| ())
}

/// Create or refresh a bare mirror of `url` at `mirror_dir`.
pub fn update_mirror(repo: &str, url: &str, mirror_dir: &Path) -> Result<()> {
    if mirror_dir.join("HEAD").exists() {
        return run_checked(repo, Some(mirror_dir), &["fetch", "-q", "--prune"]).map(|_| ());
    }
    if let Some(parent) = mirror_dir.parent() {
        fs::create_dir_all(parent)?;
    }
    let target = mirror_dir.to_string_lossy();
    run_checked(repo, None, &["clone", "-q", "--mirror", url, &*target]).map(|_| ())
}

/// Fetch branches and tags from `origin`.
pub fn fetch(repo: &str, dir: &Path) -> Result<()> {
    run_checked(repo, Some(dir), &["fetch", "-q", "--tags", "--force", "origin"]).map(|_| ())
}

/// Resolve `rev` to a full commit id, or `None` when it names nothing.
pub fn rev_parse(repo: &str, dir: &Path, rev: &str) -> Result<Option<String>> {
    let output = run(repo, Some(dir), &["rev-parse", "--verify", "-q", rev])?;
    if !output.status.success() {
        return Ok(None);
    }
    let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok((!id.is_empty()).then_some(id))
}

/// Ask the remote what `refspec` points to, without a local clone.
///
/// Branches win over tags. For annotated tags the peeled commit is returned.
pub fn ls_remote(repo: &str, url: &str, refspec: &str) -> Result<Option<String>> {
    let output = run_checked(repo, None, &["ls-remote", url, refspec, &format!("{}^{{}}", refspec)])?;
    Ok(pick_remote_ref(&output, refspec))
}

fn pick_remote_ref(listing: &str, refspec: &str) -> Option<String> {
    let refs: Vec<(&str, &str)> = listing
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .collect();
    let find = |name: &str| {
        refs.iter()
            .find(|(_, r)| *r == name)
            .map(|(id, _)| id.to_string())
    };

    find(&format!("refs/heads/{}", refspec))
        .or_else(|| find(&format!("refs/tags/{}^{{}}", refspec)))
        .or_else(|| find(&format!("refs/tags/{}", refspec)))
        .or_else(|| find(refspec))
}

/// Whether tracked files in the worktree have uncommitted changes.
pub fn is_dirty(repo: &str, dir: &Path) -> Result<bool> {
    let status = run_checked(
        repo,
        Some(dir),
        &["status", "--porcelain", "--untracked-files=no"],
    )?;
    Ok(!status.is_empty())
}

/// Detach HEAD at `commit`, discarding local changes.
pub fn checkout(repo: &str, dir: &Path, commit: &str) -> Result<()> {
    run_checked(repo, Some(dir), &["checkout", "-q", "-f", "--detach", commit]).map(|_| ())
}

pub fn reset_hard(repo: &str, dir: &Path, commit: &str) -> Result<()> {
    run_checked(repo, Some(dir), &["reset", "-q", "--hard", commit]).map(|_| ())
}

/// Apply a patch file to worktree and index, then commit it.
///
/// The commit uses a fixed identity so that it does not depend on the user's
/// git configuration.
pub fn apply_patch(repo: &str, dir: &Path, patch: &Path, message: &str) -> Result<()> {
    let patch = patch.to_string_lossy();
    run_checked(repo, Some(dir), &["apply", "--index", &*patch])?;
    run_checked(
        repo,
        Some(dir),
        &[
            "-c",
            "user.name=layerstack",
            "-c",
            "user.email=layerstack@localhost",
            "commit",
            "-q",
            "--no-verify",
            "-m",
            message,
        ],
    )
    .map(|_| ())
}

/// Commits reachable from `to` but not from `from`, newest first.
pub fn log(repo: &str, dir: &Path, from: &str, to: &str) -> Result<Vec<CommitInfo>> {
    let format = format!("--format=%H{0}%an{0}%aI{0}%B{1}", FIELD_SEP, RECORD_SEP);
    let range = format!("{}..{}", from, to);
    let output = run_checked(repo, Some(dir), &["log", &format, &range])?;
    Ok(parse_log(&output))
}

fn parse_log(output: &str) -> Vec<CommitInfo> {
    output
        .split(RECORD_SEP)
        .filter_map(|record| {
            let mut fields = record.trim_start_matches('\n').splitn(4, FIELD_SEP);
            let commit = fields.next()?.trim();
            if commit.is_empty() {
                return None;
            }
            Some(CommitInfo {
                commit: commit.to_string(),
                author: fields.next()?.to_string(),
                date: fields.next()?.to_string(),
                message: fields.next().unwrap_or_default().trim_end().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_remote_ref_prefers_branch() {
        let listing = "aaaa\trefs/heads/main\nbbbb\trefs/tags/main\n";
        assert_eq!(pick_remote_ref(listing, "main"), Some("aaaa".to_string()));
    }

    #[test]
    fn test_pick_remote_ref_peels_annotated_tag() {
        let listing = "tagobj\trefs/tags/v1.0\ncommit\trefs/tags/v1.0^{}\n";
        assert_eq!(pick_remote_ref(listing, "v1.0"), Some("commit".to_string()));
    }

    #[test]
    fn test_pick_remote_ref_missing() {
        assert_eq!(pick_remote_ref("", "nope"), None);
        assert_eq!(
            pick_remote_ref("cccc\trefs/heads/other\n", "nope"),
            None
        );
    }

    #[test]
    fn test_pick_remote_ref_full_ref() {
        let listing = "dddd\trefs/heads/release/1\n";
        assert_eq!(
            pick_remote_ref(listing, "refs/heads/release/1"),
            Some("dddd".to_string())
        );
    }

    #[test]
    fn test_parse_log() {
        let output = format!(
            "c2{0}Jane{0}2024-01-02T00:00:00+00:00{0}second\n\nbody{1}\nc1{0}Joe{0}2024-01-01T00:00:00+00:00{0}first\n{1}\n",
            FIELD_SEP, RECORD_SEP
        );
        let entries = parse_log(&output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].commit, "c2");
        assert_eq!(entries[0].author, "Jane");
        assert_eq!(entries[0].message, "second\n\nbody");
        assert_eq!(entries[1].commit, "c1");
        assert_eq!(entries[1].message, "first");
    }

    #[test]
    fn test_parse_log_empty() {
        assert!(parse_log("").is_empty());
    }
}
