//! Scope resolver: maps a working directory to the three on-disk scope roots.

use crate::error::Result;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolved identity and on-disk roots for a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProject {
    pub repo_id: String,
    pub root: PathBuf,
    pub branch: Option<String>,
    pub remote: Option<String>,
    pub has_committed_memory: bool,
}

/// Name of the directory created inside a repository root for the committed scope.
pub const COMMITTED_DIR_NAME: &str = ".llm-memory";

/// Marker file `init_committed_memory` writes unconditionally, independent
/// of whether any item has ever been upserted. `catalog.json` is not a safe
/// signal for "committed scope exists": a freshly initialized scope with no
/// items yet has no journal, and `Store::recover` never creates a catalog
/// for a scope whose journal doesn't exist.
const COMMITTED_INIT_MARKER: &str = ".initialized";

/// Root of the engine's per-user state directory (`~/.llm-memory`).
pub fn engine_home() -> PathBuf {
    let home = std::env::var_os("LLM_MEMORY_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".llm-memory")))
        .unwrap_or_else(|| PathBuf::from(".llm-memory"));
    home
}

/// `~/.llm-memory/global`
pub fn global_dir() -> PathBuf {
    engine_home().join("global")
}

/// `~/.llm-memory/projects/<repoId>`
pub fn local_dir(repo_id: &str) -> PathBuf {
    engine_home().join("projects").join(repo_id)
}

/// `<root>/.llm-memory`
pub fn committed_dir(root: &Path) -> PathBuf {
    root.join(COMMITTED_DIR_NAME)
}

/// Walk upward from `start` looking for `.git` or `.hg` metadata; returns the
/// directory that contains it, or `None` if none is found before the
/// filesystem root.
fn find_vcs_root(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start.to_path_buf());
    while let Some(d) = dir {
        if d.join(".git").exists() || d.join(".hg").exists() {
            return Some(d);
        }
        dir = d.parent().map(|p| p.to_path_buf());
    }
    None
}

/// Current branch name from `.git/HEAD`, if the ref is symbolic.
fn read_git_branch(root: &Path) -> Option<String> {
    let head = std::fs::read_to_string(root.join(".git").join("HEAD")).ok()?;
    let head = head.trim();
    head.strip_prefix("ref: refs/heads/").map(|s| s.to_string())
}

/// The `origin` remote URL from `.git/config`, via a minimal INI-style scan
/// (no shelling out to `git`).
fn read_git_remote(root: &Path) -> Option<String> {
    let config = std::fs::read_to_string(root.join(".git").join("config")).ok()?;
    let mut in_origin = false;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_origin = line.eq_ignore_ascii_case("[remote \"origin\"]");
            continue;
        }
        if in_origin {
            if let Some(rest) = line.strip_prefix("url") {
                let rest = rest.trim_start();
                if let Some(value) = rest.strip_prefix('=') {
                    return Some(value.trim().to_string());
                }
            }
        }
    }
    None
}

/// Normalize a remote URL for stable hashing: strip a trailing `.git`,
/// rewrite `user@host:path` SSH syntax to `https://host/path`, strip a
/// trailing slash, lowercase the result.
pub fn normalize_remote(remote: &str) -> String {
    let mut s = remote.trim().to_string();

    if let Some(at) = s.find('@') {
        if !s.contains("://") {
            if let Some(colon) = s[at..].find(':') {
                let host_start = at + 1;
                let colon_abs = at + colon;
                let host = &s[host_start..colon_abs];
                let path = &s[colon_abs + 1..];
                s = format!("https://{host}/{path}");
            }
        }
    }

    if let Some(stripped) = s.strip_suffix(".git") {
        s = stripped.to_string();
    }
    if let Some(stripped) = s.strip_suffix('/') {
        s = stripped.to_string();
    }
    s.to_lowercase()
}

/// `sha1(normalize(remote) || root)[:16]`
pub fn repo_id(remote: Option<&str>, root: &Path) -> String {
    let mut hasher = Sha1::new();
    match remote {
        Some(r) => hasher.update(normalize_remote(r).as_bytes()),
        None => hasher.update(root.to_string_lossy().as_bytes()),
    }
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

/// Resolve the scope identity and roots for `cwd`.
pub fn resolve(cwd: &Path) -> ResolvedProject {
    let root = find_vcs_root(cwd).unwrap_or_else(|| cwd.to_path_buf());
    let remote = read_git_remote(&root);
    let branch = read_git_branch(&root);
    let id = repo_id(remote.as_deref(), &root);
    let has_committed_memory = committed_dir(&root).join(COMMITTED_INIT_MARKER).exists();

    debug!(repo_id = %id, root = %root.display(), "resolved project scope");

    ResolvedProject {
        repo_id: id,
        root,
        branch,
        remote,
        has_committed_memory,
    }
}

/// Ensure the committed-scope directory exists and carries a minimal ignore
/// file that excludes `tmp/` and `locks/` but keeps the durable files that
/// must be checked into source control.
pub fn init_committed_memory(root: &Path) -> Result<PathBuf> {
    let dir = committed_dir(root);
    std::fs::create_dir_all(&dir)?;
    std::fs::create_dir_all(dir.join("items"))?;
    std::fs::create_dir_all(dir.join("index"))?;

    let ignore_path = dir.join(".gitignore");
    if !ignore_path.exists() {
        std::fs::write(&ignore_path, "tmp/\nlocks/\n")?;
    }
    std::fs::write(dir.join(COMMITTED_INIT_MARKER), "")?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_git_suffix_and_lowercases() {
        assert_eq!(
            normalize_remote("HTTPS://Example.com/Org/Repo.git"),
            "https://example.com/org/repo"
        );
    }

    #[test]
    fn normalize_rewrites_ssh_syntax() {
        assert_eq!(
            normalize_remote("git@github.com:org/repo.git"),
            "https://github.com/org/repo"
        );
    }

    #[test]
    fn normalize_strips_trailing_slash() {
        assert_eq!(
            normalize_remote("https://example.com/org/repo/"),
            "https://example.com/org/repo"
        );
    }

    #[test]
    fn repo_id_is_stable_and_16_hex_chars() {
        let root = PathBuf::from("/tmp/does-not-matter");
        let a = repo_id(Some("git@github.com:org/repo.git"), &root);
        let b = repo_id(Some("https://github.com/org/repo"), &root);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn repo_id_falls_back_to_root_without_remote() {
        let root_a = PathBuf::from("/tmp/project-a");
        let root_b = PathBuf::from("/tmp/project-b");
        assert_ne!(repo_id(None, &root_a), repo_id(None, &root_b));
    }

    #[test]
    fn resolve_falls_back_to_cwd_outside_any_vcs() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve(dir.path());
        assert_eq!(resolved.root, dir.path());
        assert!(resolved.remote.is_none());
        assert!(!resolved.has_committed_memory);
    }

    #[test]
    fn init_committed_memory_writes_ignore_file() {
        let dir = tempfile::tempdir().unwrap();
        let committed = init_committed_memory(dir.path()).unwrap();
        assert!(committed.join(".gitignore").exists());
        let contents = std::fs::read_to_string(committed.join(".gitignore")).unwrap();
        assert!(contents.contains("tmp/"));
        assert!(contents.contains("locks/"));
    }

    #[test]
    fn has_committed_memory_survives_restart_with_zero_items() {
        let dir = tempfile::tempdir().unwrap();
        init_committed_memory(dir.path()).unwrap();

        // No item has ever been upserted, so `Store::recover` never ran and
        // `catalog.json` does not exist — the marker file must still signal
        // that the scope was initialized.
        assert!(!committed_dir(dir.path()).join("catalog.json").exists());
        assert!(resolve(dir.path()).has_committed_memory);
    }
}
