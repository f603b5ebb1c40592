//! Git / Git-LFS subprocess adapter.
//!
//! Everything here shells out to `git` and parses textual output. The
//! pushlist parser is deliberately tolerant: git-lfs's dry-run format is not
//! a stable interface, so a line that fails to parse is skipped and a file
//! whose OID cannot be completed is dropped with a warning, never aborting
//! the batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use globset::Glob;
use serde::Deserialize;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::store::{ObjectStore, PREFIX_LEN};

/// First line of every Git-LFS pointer file.
pub const POINTER_VERSION: &str = "version https://git-lfs.github.com/spec/v1";

/// Files at or below this size may be pointers rather than content.
pub const POINTER_MAX_BYTES: u64 = 2048;

/// SHA-256 of the empty string; shows up in dry-run output as noise for
/// `.gitattributes`.
const EMPTY_BLOB_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// One LFS-tracked file as captured for a single reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfsFileInfo {
    /// Repository-relative path.
    pub name: String,
    /// Full 64-hex-char sha256 OID.
    pub oid: String,
    pub size: u64,
    /// Whether the blob bytes are present in the working tree.
    pub downloaded: bool,
}

async fn run_git(workdir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(["-C", &workdir.to_string_lossy()])
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Git(stderr.trim().to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Repository root for `path`, via `git rev-parse --show-toplevel`.
pub async fn repo_root(path: &Path) -> Result<PathBuf> {
    run_git(path, &["rev-parse", "--show-toplevel"])
        .await
        .map(|s| PathBuf::from(s.trim()))
        .map_err(|_| {
            Error::Environment(format!(
                "{} is not inside a git repository; run `git drs init` from one",
                path.display()
            ))
        })
}

/// Absolute `.git` directory for `path`.
pub async fn git_dir(path: &Path) -> Result<PathBuf> {
    let out = run_git(path, &["rev-parse", "--absolute-git-dir"]).await?;
    Ok(PathBuf::from(out.trim()))
}

// ── Pointer files ──────────────────────────────────────────────────────────

/// Parses a Git-LFS pointer, returning `(oid, size)`.
pub fn parse_pointer(text: &str) -> Option<(String, u64)> {
    if !text.contains(POINTER_VERSION) {
        return None;
    }
    let mut oid = None;
    let mut size = None;
    for line in text.lines() {
        if let Some(rest) = line.trim().strip_prefix("oid sha256:") {
            oid = crate::did::validate_sha256(rest.trim()).ok();
        } else if let Some(rest) = line.trim().strip_prefix("size ") {
            size = rest.trim().parse().ok();
        }
    }
    Some((oid?, size?))
}

/// Renders the pointer text Git-LFS writes for `(oid, size)`.
pub fn format_pointer(oid: &str, size: u64) -> String {
    format!("{POINTER_VERSION}\noid sha256:{oid}\nsize {size}\n")
}

// ── Pushlist ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct PushLine {
    oid: String,
    path: String,
}

/// Parses one `git lfs push --dry-run` output line:
/// `push <oid> <path>[ (<size>)]`, tolerating an optional `=>` separator.
fn parse_push_line(line: &str) -> Option<PushLine> {
    let rest = line.trim().strip_prefix("push ")?;
    let (oid, rest) = rest.split_once(' ')?;
    if oid.is_empty() || !oid.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mut path = rest.trim();
    if let Some(p) = path.strip_prefix("=>") {
        path = p.trim_start();
    }
    if path.ends_with(')')
        && let Some(idx) = path.rfind(" (")
    {
        path = &path[..idx];
    }
    if path.is_empty() {
        return None;
    }
    Some(PushLine {
        oid: oid.to_ascii_lowercase(),
        path: path.to_string(),
    })
}

/// The set of LFS files a `git push <remote> <refs>` would transfer, keyed
/// by OID. Files whose OID cannot be completed to 64 hex chars are dropped
/// with a warning; the batch itself never fails on one bad line.
pub async fn files_for_push(
    workdir: &Path,
    remote: &str,
    remote_url: Option<&str>,
    refs: &[String],
    store: &ObjectStore,
) -> Result<HashMap<String, LfsFileInfo>> {
    let target = remote_url.unwrap_or(remote);

    let mut candidates = Vec::new();
    for r in refs {
        let out = run_git(workdir, &["lfs", "push", "--dry-run", target, r.as_str()]).await?;
        for line in out.lines() {
            let Some(candidate) = parse_push_line(line) else {
                continue;
            };
            if candidate.oid == EMPTY_BLOB_SHA256 && candidate.path == ".gitattributes" {
                continue;
            }
            candidates.push(candidate);
        }
    }

    // Built lazily: only a truncated dry-run OID needs it.
    let mut prefix_index: Option<HashMap<String, String>> = None;

    let mut files = HashMap::new();
    for candidate in candidates {
        match resolve_candidate(workdir, store, &mut prefix_index, &candidate).await {
            Ok(info) => {
                files.insert(info.oid.clone(), info);
            }
            Err(e) => {
                tracing::warn!(path = %candidate.path, error = %e, "skipping unresolvable LFS file");
            }
        }
    }
    Ok(files)
}

/// Completes one pushlist line into an [`LfsFileInfo`], layering fallbacks:
/// working-tree stat, pointer-in-index (`git show :<path>`), the local-store
/// prefix index, then `git lfs ls-files --debug`.
async fn resolve_candidate(
    workdir: &Path,
    store: &ObjectStore,
    prefix_index: &mut Option<HashMap<String, String>>,
    line: &PushLine,
) -> Result<LfsFileInfo> {
    let mut oid = (line.oid.len() == 64).then(|| line.oid.clone());
    let mut size: Option<u64> = None;
    let mut downloaded = false;

    let abs = workdir.join(&line.path);
    match tokio::fs::metadata(&abs).await {
        Ok(meta) if meta.is_file() => {
            if meta.len() > POINTER_MAX_BYTES {
                size = Some(meta.len());
                downloaded = true;
            } else {
                let text = tokio::fs::read_to_string(&abs).await.unwrap_or_default();
                if let Some((ptr_oid, ptr_size)) = parse_pointer(&text) {
                    // The checkout holds the pointer, not the bytes.
                    oid = Some(ptr_oid);
                    size = Some(ptr_size);
                } else {
                    size = Some(meta.len());
                    downloaded = true;
                }
            }
        }
        _ => {
            if let Ok(text) = run_git(workdir, &["show", &format!(":{}", line.path)]).await
                && let Some((ptr_oid, ptr_size)) = parse_pointer(&text)
            {
                oid = Some(ptr_oid);
                size = Some(ptr_size);
            }
        }
    }

    if oid.is_none() && line.oid.len() >= PREFIX_LEN {
        let index = match prefix_index {
            Some(index) => index,
            None => prefix_index.insert(store.prefix_index()?),
        };
        oid = index.get(&line.oid[..PREFIX_LEN]).cloned();
    }

    if oid.is_none() || size.is_none() {
        let (dbg_oid, dbg_size) = ls_files_debug(workdir, &line.path)
            .await
            .unwrap_or((None, None));
        oid = oid.or(dbg_oid);
        size = size.or(dbg_size);
    }

    let oid = oid.ok_or_else(|| {
        Error::Git(format!(
            "could not resolve a full sha256 oid for '{}'",
            line.path
        ))
    })?;

    Ok(LfsFileInfo {
        name: line.path.clone(),
        oid,
        size: size.unwrap_or(0),
        downloaded,
    })
}

/// Scrapes `oid:` and `size:` lines from `git lfs ls-files --debug`.
async fn ls_files_debug(workdir: &Path, path: &str) -> Result<(Option<String>, Option<u64>)> {
    let out = run_git(workdir, &["lfs", "ls-files", "--debug", "-I", path]).await?;
    let mut oid = None;
    let mut size = None;
    for line in out.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("oid:") {
            let token = rest.trim().rsplit(' ').next().unwrap_or("");
            oid = crate::did::validate_sha256(token).ok().or(oid);
        } else if let Some(rest) = line.strip_prefix("size:") {
            size = rest.trim().parse().ok().or(size);
        }
    }
    Ok((oid, size))
}

// ── Single-file queries ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LsFilesJson {
    #[serde(default)]
    files: Vec<LsFilesEntry>,
}

#[derive(Debug, Deserialize)]
struct LsFilesEntry {
    name: String,
    #[serde(default)]
    oid: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    downloaded: bool,
}

/// Whether `path` is an LFS-tracked file, via `git lfs ls-files -I --json`.
pub async fn check_lfs_file(workdir: &Path, path: &str) -> Result<Option<LfsFileInfo>> {
    let out = run_git(workdir, &["lfs", "ls-files", "-I", path, "--json"]).await?;
    let parsed: LsFilesJson = serde_json::from_str(&out)?;
    Ok(parsed.files.into_iter().next().map(|f| LfsFileInfo {
        name: f.name,
        oid: f.oid,
        size: f.size,
        downloaded: f.downloaded,
    }))
}

/// Whether the working tree actually holds the bytes for `name` (as opposed
/// to a pointer file, or nothing).
pub async fn blob_present(workdir: &Path, name: &str) -> bool {
    let abs = workdir.join(name);
    match tokio::fs::metadata(&abs).await {
        Ok(meta) if meta.is_file() => {
            if meta.len() > POINTER_MAX_BYTES {
                return true;
            }
            let text = tokio::fs::read_to_string(&abs).await.unwrap_or_default();
            parse_pointer(&text).is_none()
        }
        _ => false,
    }
}

// ── LFS tracking guard ─────────────────────────────────────────────────────

/// Requires the repository's `.gitattributes` to route `target` through LFS.
///
/// # Errors
///
/// Returns an environment error with a `git lfs track` directive when no
/// `filter=lfs` pattern matches.
pub async fn require_lfs_tracking(workdir: &Path, target: &str) -> Result<()> {
    let name = target.rsplit('/').next().unwrap_or(target);
    let track_hint = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => format!("*.{ext}"),
        _ => name.to_string(),
    };

    let attrs = tokio::fs::read_to_string(workdir.join(".gitattributes"))
        .await
        .map_err(|_| {
            Error::Environment(format!(
                "no .gitattributes in {}; run `git lfs track \"{track_hint}\"` first",
                workdir.display()
            ))
        })?;

    if attributes_track(&attrs, name, target) {
        return Ok(());
    }
    Err(Error::Environment(format!(
        "'{name}' is not tracked by git lfs; run `git lfs track \"{track_hint}\"` first"
    )))
}

fn attributes_track(attributes: &str, name: &str, path: &str) -> bool {
    for line in attributes.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(pattern) = fields.next() else {
            continue;
        };
        if !fields.any(|f| f == "filter=lfs") {
            continue;
        }
        let Ok(glob) = Glob::new(pattern) else {
            continue;
        };
        let matcher = glob.compile_matcher();
        if matcher.is_match(name) || matcher.is_match(path) {
            return true;
        }
    }
    false
}

// ── Pointer staging ────────────────────────────────────────────────────────

/// Writes a synthetic pointer for `(oid, size)` at `name` and stages it.
pub async fn stage_pointer(workdir: &Path, name: &str, oid: &str, size: u64) -> Result<()> {
    let abs = workdir.join(name);
    if let Some(parent) = abs.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&abs, format_pointer(oid, size)).await?;
    run_git(workdir, &["add", name]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OID: &str = "1111111111111111111111111111111111111111111111111111111111111111";

    #[test]
    fn push_line_plain() {
        let parsed = parse_push_line(&format!("push {OID} data/x.bam")).unwrap();
        assert_eq!(parsed.oid, OID);
        assert_eq!(parsed.path, "data/x.bam");
    }

    #[test]
    fn push_line_arrow_separator() {
        let parsed = parse_push_line(&format!("push {OID} => data/x.bam")).unwrap();
        assert_eq!(parsed.path, "data/x.bam");
    }

    #[test]
    fn push_line_strips_size_suffix() {
        let parsed = parse_push_line(&format!("push {OID} data/x.bam (1.2 MB)")).unwrap();
        assert_eq!(parsed.path, "data/x.bam");
    }

    #[test]
    fn push_line_keeps_parenthesized_names() {
        let parsed = parse_push_line(&format!("push {OID} data/x(1).bam")).unwrap();
        assert_eq!(parsed.path, "data/x(1).bam");
    }

    #[test]
    fn push_line_lowercases_oid() {
        let parsed = parse_push_line(&format!("push {} x", OID.to_uppercase())).unwrap();
        assert_eq!(parsed.oid, OID);
    }

    #[test]
    fn push_line_rejects_noise() {
        assert!(parse_push_line("").is_none());
        assert!(parse_push_line("Uploading LFS objects").is_none());
        assert!(parse_push_line("push nothex path").is_none());
        assert!(parse_push_line(&format!("push {OID}")).is_none());
    }

    #[test]
    fn pointer_roundtrip() {
        let text = format_pointer(OID, 1234);
        assert_eq!(parse_pointer(&text), Some((OID.to_string(), 1234)));
    }

    #[test]
    fn pointer_accepts_uppercase_oid() {
        let text = format!("{POINTER_VERSION}\noid sha256:{}\nsize 9\n", OID.to_uppercase());
        assert_eq!(parse_pointer(&text), Some((OID.to_string(), 9)));
    }

    #[test]
    fn pointer_rejects_plain_content() {
        assert!(parse_pointer("fn main() {}\n").is_none());
        assert!(parse_pointer("").is_none());
        // Version line alone is not a pointer.
        assert!(parse_pointer(POINTER_VERSION).is_none());
    }

    #[test]
    fn attributes_track_matches_extension_glob() {
        let attrs = "*.bam filter=lfs diff=lfs merge=lfs -text\n*.txt text\n";
        assert!(attributes_track(attrs, "x.bam", "data/x.bam"));
        assert!(!attributes_track(attrs, "x.txt", "data/x.txt"));
        assert!(!attributes_track(attrs, "x.vcf", "data/x.vcf"));
    }

    #[test]
    fn attributes_track_ignores_comments_and_blanks() {
        let attrs = "# lfs rules\n\n*.bam filter=lfs -text\n";
        assert!(attributes_track(attrs, "x.bam", "x.bam"));
        assert!(!attributes_track("# *.bam filter=lfs\n", "x.bam", "x.bam"));
    }

    #[test]
    fn attributes_track_requires_lfs_filter() {
        assert!(!attributes_track("*.bam diff=lfs\n", "x.bam", "x.bam"));
    }
}
