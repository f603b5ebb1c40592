//! Deterministic DRS identifiers and the sharded object layout.
//!
//! A DID is a name-based UUID over the canonical string
//! `did:gen3:{normalized_scope}:{lowercase_sha256}` under a namespace that is
//! itself derived from `https://calypr.org`. Identical inputs always yield
//! the same DID, across runs, path-slash styles, and hash case.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Error, Result};

/// Seed for the write-side namespace. Not part of the canonical string.
const AUTHORITY: &str = "https://calypr.org";

/// Namespace UUID: UUIDv3 (MD5) of the authority under the DNS namespace.
pub fn namespace() -> Uuid {
    Uuid::new_v3(&Uuid::NAMESPACE_DNS, AUTHORITY.as_bytes())
}

/// Derives the canonical DID for `(scope, sha256)`.
///
/// `scope` goes through [`normalize_path`], so `gdc-tcga`, `/gdc-tcga` and
/// `gdc-tcga/` all derive the same DID; the hash is case-insensitive.
///
/// # Errors
///
/// Returns an input error if the hash is not 64 hex characters.
pub fn derive(scope: &str, sha256: &str) -> Result<Uuid> {
    let sha = validate_sha256(sha256)?;
    let canonical = format!("did:gen3:{}:{}", normalize_path(scope), sha);
    Ok(Uuid::new_v5(&namespace(), canonical.as_bytes()))
}

/// Derives the historical DID: UUIDv5 of `"<project>:<hash>"` under the URL
/// namespace. Read-side only; every write uses [`derive`].
pub fn derive_legacy(project_id: &str, sha256: &str) -> Result<Uuid> {
    let sha = validate_sha256(sha256)?;
    let seed = format!("{project_id}:{sha}");
    Ok(Uuid::new_v5(&Uuid::NAMESPACE_URL, seed.as_bytes()))
}

/// Normalizes a path for DID derivation:
/// backslashes become slashes, slash runs collapse, the trailing slash is
/// stripped (unless the path is exactly `/`), and a leading slash is ensured.
///
/// Idempotent: `normalize_path(normalize_path(p)) == normalize_path(p)`.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    let mut prev_slash = false;
    for c in path.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    if !out.starts_with('/') {
        out.insert(0, '/');
    }
    out
}

/// Lowercases and validates a sha256 hex digest.
///
/// # Errors
///
/// Returns an input error unless the digest is exactly 64 hex characters.
pub fn validate_sha256(hash: &str) -> Result<String> {
    let h = hash.to_ascii_lowercase();
    if h.len() != 64 || !h.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidInput(format!(
            "sha256 must be 64 hex characters, got '{hash}'"
        )));
    }
    Ok(h)
}

/// On-disk location of the record for `oid` under `base`:
/// `base/H[0:2]/H[2:4]/H`.
///
/// # Errors
///
/// Returns an input error unless `oid` is a 64-character hex digest.
pub fn shard_path(base: &Path, oid: &str) -> Result<PathBuf> {
    let oid = validate_sha256(oid)?;
    Ok(base.join(&oid[0..2]).join(&oid[2..4]).join(oid))
}

/// Maps a project id `<program>-<project>` to its authorization resource
/// `/programs/<program>/projects/<project>`.
///
/// # Errors
///
/// Returns an input error if the id has no `-` separator or an empty half.
pub fn authz_resource(project_id: &str) -> Result<String> {
    let (program, project) = project_id
        .split_once('-')
        .filter(|(p, q)| !p.is_empty() && !q.is_empty())
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "project id must look like <program>-<project>, got '{project_id}'"
            ))
        })?;
    Ok(format!("/programs/{program}/projects/{project}"))
}
