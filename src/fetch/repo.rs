//! Repository fetcher: shallow acquisition via the git subprocess into a
//! per-task scratch workspace, then a text-tree walk with filename
//! headers.
//!
//! Acquisition tries a blobless sparse checkout of the directories that
//! matter for documentation and examples first, falls back to a plain
//! shallow clone, and gives up past the absolute ceiling. The scratch
//! directory is released on every exit path, including failures.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use walkdir::WalkDir;

use crate::error::FetchError;
use crate::models::{DocValidators, FetchedDocument, SourceKind};
use crate::urls;

const SPARSE_TIMEOUT: Duration = Duration::from_secs(60);
const SHALLOW_TIMEOUT: Duration = Duration::from_secs(120);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(180);

/// Maximum size of a single file read into the document.
const MAX_FILE_BYTES: u64 = 1_048_576;

/// Directories included in the sparse checkout; root-level files come
/// along for free in cone mode.
const SPARSE_DIRS: [&str; 13] = [
    "docs",
    "doc",
    "documentation",
    "src",
    "lib",
    "examples",
    "samples",
    "scripts",
    "bin",
    "notebooks",
    "tests",
    "test",
    "tutorials",
];

pub struct RepoFetcher {
    workspace_root: PathBuf,
}

impl RepoFetcher {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let (owner, repo) = urls::repo_slug(url)
            .ok_or_else(|| FetchError::Permanent(format!("not a repository URL: {url}")))?;
        let host = urls::host_of(url)
            .ok_or_else(|| FetchError::Permanent(format!("no host in {url}")))?;
        let clone_url = format!("https://{host}/{owner}/{repo}.git");

        std::fs::create_dir_all(&self.workspace_root)
            .map_err(|e| FetchError::Transient(format!("workspace unavailable: {e}")))?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("repo-{repo}-"))
            .tempdir_in(&self.workspace_root)
            .map_err(|e| FetchError::Transient(format!("workspace unavailable: {e}")))?;

        let started = Instant::now();
        let checkout = workspace.path().join("checkout");

        let acquired = match self.sparse_clone(&clone_url, &checkout, started).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Sparse acquisition of {clone_url} failed ({e}), falling back");
                false
            }
        };
        if !acquired {
            let _ = std::fs::remove_dir_all(&checkout);
            self.shallow_clone(&clone_url, &checkout, started).await?;
        }

        let commit_id = rev_parse_head(&checkout).await?;

        let checkout_for_walk = checkout.clone();
        let files = tokio::task::spawn_blocking(move || walk_text_files(&checkout_for_walk))
            .await
            .map_err(|e| FetchError::Transient(format!("walk task failed: {e}")))?;

        if files.is_empty() {
            return Err(FetchError::Permanent(format!(
                "no readable text files in {owner}/{repo}"
            )));
        }

        let mut parts = Vec::with_capacity(files.len());
        for (path, content) in &files {
            parts.push(format!("# File: {path}\n\n{content}\n"));
        }

        tracing::info!(
            "Acquired {owner}/{repo}: {} files at {}",
            files.len(),
            &commit_id[..commit_id.len().min(8)]
        );

        Ok(FetchedDocument {
            url: url.to_string(),
            kind: SourceKind::Repo,
            title: format!("{owner}/{repo}"),
            language: String::new(),
            domain: host,
            text: parts.join("\n"),
            validators: DocValidators {
                commit_id: Some(commit_id),
                ..Default::default()
            },
            segments: Vec::new(),
            duration_secs: None,
        })
    }

    /// Blobless sparse checkout of the enumerated directory list.
    async fn sparse_clone(
        &self,
        clone_url: &str,
        target: &Path,
        started: Instant,
    ) -> Result<(), FetchError> {
        let budget = remaining_budget(started, SPARSE_TIMEOUT)?;
        let target_str = target.to_string_lossy();
        run_git(
            &[
                "clone",
                "--depth",
                "1",
                "--filter=blob:none",
                "--sparse",
                clone_url,
                target_str.as_ref(),
            ],
            None,
            budget,
        )
        .await?;

        let budget = remaining_budget(started, SPARSE_TIMEOUT)?;
        let mut args = vec!["sparse-checkout", "set"];
        args.extend(SPARSE_DIRS);
        run_git(&args, Some(target), budget).await?;
        Ok(())
    }

    /// Plain shallow clone fallback when the partial mechanism is
    /// unsupported or too slow.
    async fn shallow_clone(
        &self,
        clone_url: &str,
        target: &Path,
        started: Instant,
    ) -> Result<(), FetchError> {
        let budget = remaining_budget(started, SHALLOW_TIMEOUT)?;
        let target_str = target.to_string_lossy();
        run_git(
            &["clone", "--depth", "1", clone_url, target_str.as_ref()],
            None,
            budget,
        )
        .await
    }
}

/// Budget left under both the stage timeout and the absolute ceiling.
fn remaining_budget(started: Instant, stage: Duration) -> Result<Duration, FetchError> {
    let elapsed = started.elapsed();
    if elapsed >= TOTAL_TIMEOUT {
        return Err(FetchError::Transient(
            "repository acquisition exceeded 180s ceiling".to_string(),
        ));
    }
    Ok(stage.min(TOTAL_TIMEOUT - elapsed))
}

async fn run_git(args: &[&str], cwd: Option<&Path>, budget: Duration) -> Result<(), FetchError> {
    let mut command = Command::new("git");
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let child = command
        .spawn()
        .map_err(|e| FetchError::Permanent(format!("git client unavailable: {e}")))?;

    let output = tokio::time::timeout(budget, child.wait_with_output())
        .await
        .map_err(|_| FetchError::Transient(format!("git {} timed out", args[0])))?
        .map_err(|e| FetchError::Transient(format!("git {} failed to run: {e}", args[0])))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(classify_git_failure(&stderr))
}

/// Network-shaped clone failures retry; everything else (missing repo,
/// auth walls) is final.
fn classify_git_failure(stderr: &str) -> FetchError {
    let lower = stderr.to_lowercase();
    let transient_markers = [
        "could not resolve host",
        "unable to access",
        "timed out",
        "early eof",
        "connection reset",
        "rpc failed",
    ];
    if transient_markers.iter().any(|m| lower.contains(m)) {
        FetchError::Transient(first_line(stderr))
    } else {
        FetchError::Permanent(first_line(stderr))
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("git failed")
        .trim()
        .to_string()
}

async fn rev_parse_head(checkout: &Path) -> Result<String, FetchError> {
    let output = tokio::time::timeout(
        Duration::from_secs(10),
        Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(checkout)
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .map_err(|_| FetchError::Transient("git rev-parse timed out".to_string()))?
    .map_err(|e| FetchError::Transient(format!("git rev-parse failed: {e}")))?;

    if !output.status.success() {
        return Err(FetchError::Transient(
            "could not determine repository tip".to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Walk readable text files in the checkout, README first, skipping
/// hidden, vendored and oversized entries.
fn walk_text_files(checkout: &Path) -> Vec<(String, String)> {
    let mut files = Vec::new();

    for entry in WalkDir::new(checkout)
        .into_iter()
        .filter_entry(|e| !is_hidden_or_ignored(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_text_file(path) {
            continue;
        }
        if let Ok(meta) = std::fs::metadata(path) {
            if meta.len() > MAX_FILE_BYTES {
                continue;
            }
        }
        let relative = path
            .strip_prefix(checkout)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        if let Ok(content) = std::fs::read_to_string(path) {
            files.push((relative, content));
        }
    }

    files.sort_by(|a, b| {
        let a_readme = a.0.to_lowercase().starts_with("readme");
        let b_readme = b.0.to_lowercase().starts_with("readme");
        b_readme.cmp(&a_readme).then_with(|| a.0.cmp(&b.0))
    });

    files
}

fn is_hidden_or_ignored(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') && name.len() > 1 {
        return true;
    }
    matches!(
        name.as_ref(),
        "node_modules"
            | "target"
            | "dist"
            | "build"
            | "__pycache__"
            | "vendor"
            | "venv"
            | "env"
            | "coverage"
            | "htmlcov"
    )
}

fn is_text_file(path: &Path) -> bool {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if matches!(
        filename.as_ref(),
        "makefile" | "dockerfile" | "rakefile" | "gemfile" | "license" | "readme"
    ) {
        return true;
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    matches!(
        ext.as_str(),
        "rs" | "py"
            | "js"
            | "ts"
            | "tsx"
            | "jsx"
            | "go"
            | "java"
            | "c"
            | "cpp"
            | "cc"
            | "h"
            | "hpp"
            | "cs"
            | "rb"
            | "php"
            | "swift"
            | "kt"
            | "scala"
            | "lua"
            | "sh"
            | "bash"
            | "sql"
            | "html"
            | "css"
            | "scss"
            | "xml"
            | "json"
            | "yaml"
            | "yml"
            | "toml"
            | "ini"
            | "cfg"
            | "md"
            | "rst"
            | "txt"
            | "proto"
            | "graphql"
            | "vue"
            | "svelte"
            | "ex"
            | "exs"
            | "hs"
            | "clj"
            | "tf"
            | "nix"
            | "zig"
            | "dart"
            | "jl"
            | "ipynb"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    // ── failure classification ───────────────────────────

    #[test]
    fn test_missing_repo_is_permanent() {
        let err = classify_git_failure("fatal: repository 'https://x/y.git' not found");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_network_failure_is_transient() {
        let err = classify_git_failure("fatal: unable to access 'https://x/': Could not resolve host: x");
        assert!(err.is_transient());
    }

    #[test]
    fn test_rpc_failure_is_transient() {
        let err = classify_git_failure("error: RPC failed; curl 56 recv failure");
        assert!(err.is_transient());
    }

    // ── file walking ─────────────────────────────────────

    fn make_checkout() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("checkout");
        fs::create_dir_all(&root).unwrap();
        (dir, root)
    }

    #[test]
    fn test_walk_readme_first() {
        let (_dir, root) = make_checkout();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("README.md"), "# Project").unwrap();

        let files = walk_text_files(&root);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "README.md");
        assert_eq!(files[1].0, "src/main.rs");
    }

    #[test]
    fn test_walk_skips_vendored_and_hidden() {
        let (_dir, root) = make_checkout();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/config"), "x").unwrap();
        fs::create_dir_all(root.join("node_modules/p")).unwrap();
        fs::write(root.join("node_modules/p/i.js"), "x").unwrap();
        fs::write(root.join("app.js"), "code").unwrap();

        let files = walk_text_files(&root);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "app.js");
    }

    #[test]
    fn test_walk_skips_binaries_and_oversized() {
        let (_dir, root) = make_checkout();
        fs::write(root.join("pic.png"), "notatext").unwrap();
        fs::write(root.join("big.md"), "x".repeat((MAX_FILE_BYTES + 1) as usize)).unwrap();
        fs::write(root.join("ok.md"), "fine").unwrap();

        let files = walk_text_files(&root);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "ok.md");
    }

    // ── budget accounting ────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_budget_respects_ceiling() {
        let started = Instant::now();
        tokio::time::advance(Duration::from_secs(170)).await;
        let budget = remaining_budget(started, SHALLOW_TIMEOUT).unwrap();
        assert_eq!(budget, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(remaining_budget(started, SHALLOW_TIMEOUT).is_err());
    }
}
