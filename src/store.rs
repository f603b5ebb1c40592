//! Local content-addressed store of DRS records under `.git/drs/objects`.
//!
//! One JSON file per record, sharded as `XX/YY/<64-hex-oid>`. Writes are
//! atomic (same-directory temp file + rename) so a crashed run never leaves
//! a half-written record; whatever did land stays discoverable as a pending
//! object for the next run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::did;
use crate::error::{Error, Result};
use crate::types::IndexdRecord;

pub const OBJECTS_DIR: &str = "drs/objects";

/// Length of the OID prefix used by the truncated-OID resolution index.
pub const PREFIX_LEN: usize = 10;

/// A record present locally but not necessarily acknowledged by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingObject {
    pub oid: String,
    pub path: PathBuf,
}

pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Opens (creating if needed) the store under `<git_dir>/drs/objects`.
    pub fn open(git_dir: &Path) -> Result<Self> {
        let root = git_dir.join(OBJECTS_DIR);
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path where the record for `oid` lives.
    pub fn object_path(&self, oid: &str) -> Result<PathBuf> {
        did::shard_path(&self.root, oid)
    }

    pub fn contains(&self, oid: &str) -> bool {
        self.object_path(oid).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Writes `record` at the sharded path for `oid`, atomically.
    pub fn write(&self, oid: &str, record: &IndexdRecord) -> Result<()> {
        let path = self.object_path(oid)?;
        let dir = path
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let tmp = dir.join(format!(".tmp-{oid}"));
        let payload = serde_json::to_vec_pretty(record)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn read(&self, oid: &str) -> Result<IndexdRecord> {
        let path = self.object_path(oid)?;
        let payload = fs::read(&path)?;
        let mut record: IndexdRecord = serde_json::from_slice(&payload)?;
        record.hashes.normalize();
        Ok(record)
    }

    /// Removes the record for `oid`, if present.
    pub fn remove(&self, oid: &str) -> Result<()> {
        let path = self.object_path(oid)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Walks the store, yielding every well-formed entry. Directory entries
    /// are skipped; malformed paths are logged and skipped, never fatal.
    pub fn pending(&self) -> Result<Vec<PendingObject>> {
        let mut out = Vec::new();
        let Ok(level1) = fs::read_dir(&self.root) else {
            return Ok(out);
        };
        for shard1 in level1.flatten() {
            if !shard1.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let Ok(level2) = fs::read_dir(shard1.path()) else {
                continue;
            };
            for shard2 in level2.flatten() {
                if !shard2.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                let Ok(entries) = fs::read_dir(shard2.path()) else {
                    continue;
                };
                for entry in entries.flatten() {
                    if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                        continue;
                    }
                    let path = entry.path();
                    match oid_from_path(&self.root, &path) {
                        Some(oid) => out.push(PendingObject { oid, path }),
                        None => {
                            tracing::warn!(path = %path.display(), "skipping malformed store entry");
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Builds the truncated-prefix index used to complete short OIDs:
    /// first [`PREFIX_LEN`] hex chars → full OID.
    pub fn prefix_index(&self) -> Result<std::collections::HashMap<String, String>> {
        Ok(self
            .pending()?
            .into_iter()
            .map(|p| (p.oid[..PREFIX_LEN].to_string(), p.oid))
            .collect())
    }
}

/// Re-derives the OID from the three shard levels; `None` when the layout or
/// the digest is off.
fn oid_from_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = rel.iter();
    let shard1 = parts.next()?.to_str()?;
    let shard2 = parts.next()?.to_str()?;
    let name = parts.next()?.to_str()?;
    if parts.next().is_some() {
        return None;
    }
    let oid = did::validate_sha256(name).ok()?;
    (oid[0..2] == *shard1 && oid[2..4] == *shard2).then_some(oid)
}

/// Appends one line to the repository's `.drs/transfer.log`.
pub fn log_transfer(repo_root: &Path, op: &str, oid: &str, did: &str, name: &str) -> Result<()> {
    let dir = repo_root.join(crate::config::CONFIG_DIR);
    fs::create_dir_all(&dir)?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("transfer.log"))?;
    writeln!(
        file,
        "{} {op} {oid} {did} {name}",
        chrono::Utc::now().to_rfc3339()
    )?;
    Ok(())
}
