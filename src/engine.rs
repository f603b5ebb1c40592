//! The reconciliation engine.
//!
//! Maps LFS-tracked files onto DRS records across the local object store
//! and the remote index. All entry points are idempotent: naming is
//! deterministic and remote matching goes by (hash, project), so a crashed
//! or re-run invocation converges on the same state. Per-OID work is
//! serialized; per-file failures in batch passes are logged and counted,
//! and only a non-zero count fails the batch.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::did;
use crate::error::{Error, Result};
use crate::indexd::{DrsClient, find_matching_record};
use crate::lfs::{self, LfsFileInfo};
use crate::s3::{self, EnvCredentials, ProbeOptions};
use crate::store::{self, ObjectStore};

/// Wall-clock budget for one whole add-url orchestration.
pub const ADD_URL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

fn finish_batch(stats: BatchStats, attempted: usize) -> Result<BatchStats> {
    if stats.failed > 0 {
        return Err(Error::Batch {
            failed: stats.failed,
            attempted,
        });
    }
    Ok(stats)
}

// ── Prepare for push ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// A record for this OID already sits in the local store.
    AlreadyPrepared,
    /// The remote already holds a matching record for this project.
    AlreadyRegistered,
    /// A fresh record was written to the local store.
    Prepared,
}

/// Readies one LFS file for push: local fast path, remote fast path, then
/// compose a record and persist it as pending.
pub async fn prepare_for_push(
    client: &DrsClient,
    store: &ObjectStore,
    info: &LfsFileInfo,
) -> Result<PrepareOutcome> {
    let sha = did::validate_sha256(&info.oid)?;
    if store.contains(&sha) {
        return Ok(PrepareOutcome::AlreadyPrepared);
    }
    let records = client.get_records_by_hash("sha256", &sha).await?;
    if find_matching_record(&records, client.project_id(), Some(&info.name)).is_some() {
        return Ok(PrepareOutcome::AlreadyRegistered);
    }
    let record = client.build_record(&info.name, &sha, info.size)?;
    store.write(&sha, &record)?;
    Ok(PrepareOutcome::Prepared)
}

/// Runs [`prepare_for_push`] over a pushlist.
pub async fn prepare_all(
    client: &DrsClient,
    store: &ObjectStore,
    files: &HashMap<String, LfsFileInfo>,
) -> Result<BatchStats> {
    let mut stats = BatchStats::default();
    for info in files.values() {
        match prepare_for_push(client, store, info).await {
            Ok(PrepareOutcome::Prepared) => stats.completed += 1,
            Ok(_) => stats.skipped += 1,
            Err(e) => {
                stats.failed += 1;
                tracing::warn!(path = %info.name, error = %e, "prepare failed");
            }
        }
    }
    finish_batch(stats, files.len())
}

// ── Add-URL ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AddUrlRequest {
    pub s3_url: String,
    pub sha256: String,
    pub options: ProbeOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddUrlOutcome {
    /// The matching record already lists this URL.
    Unchanged,
    /// The URL was appended to the existing record.
    Updated,
    /// A new record was registered carrying this URL.
    Created,
}

/// Attaches an external S3 URL to the record for `sha256`, creating the
/// record if the project has none. Idempotent: a URL already on the record
/// issues no write at all. `overrides` may inject a pre-built S3 client
/// and/or HTTP client for the metadata probe.
pub async fn add_url(
    workdir: &Path,
    client: &DrsClient,
    store: &ObjectStore,
    request: &AddUrlRequest,
    overrides: s3::ProbeOverrides,
) -> Result<AddUrlOutcome> {
    tokio::time::timeout(
        ADD_URL_TIMEOUT,
        add_url_inner(workdir, client, store, request, overrides),
    )
    .await
    .map_err(|_| Error::Timeout(ADD_URL_TIMEOUT.as_secs()))?
}

async fn add_url_inner(
    workdir: &Path,
    client: &DrsClient,
    store: &ObjectStore,
    request: &AddUrlRequest,
    overrides: s3::ProbeOverrides,
) -> Result<AddUrlOutcome> {
    let sha = did::validate_sha256(&request.sha256)?;
    let target = s3::parse_s3_url(&request.s3_url)?;

    // The tracking guard runs before any network I/O.
    lfs::require_lfs_tracking(workdir, &target.key).await?;

    let env = EnvCredentials::capture();
    let registry_info = if overrides.client.is_none() && s3::needs_registry(&request.options, &env)
    {
        match client.bucket_registry().await {
            Ok(registry) => registry.s3_buckets.get(&target.bucket).cloned(),
            Err(e) => {
                tracing::warn!(bucket = %target.bucket, error = %e, "bucket registry lookup failed");
                None
            }
        }
    } else {
        None
    };
    let meta = s3::probe_object(
        &target,
        &request.options,
        &env,
        registry_info.as_ref(),
        overrides,
    )
    .await?;

    let canonical = did::derive(client.project_id(), &sha)?.to_string();
    let legacy = did::derive_legacy(client.project_id(), &sha)?.to_string();

    let records = client.get_records_by_hash("sha256", &sha).await?;
    match find_matching_record(&records, client.project_id(), Some(&target.key)) {
        Some(record) if record.did == canonical || record.did == legacy => {
            if record.urls.iter().any(|u| u == &request.s3_url) {
                return Ok(AddUrlOutcome::Unchanged);
            }
            client
                .update_urls(&record.did, std::slice::from_ref(&request.s3_url))
                .await?;
            log_transfer(workdir, "add-url", &sha, &record.did, &target.key);
            Ok(AddUrlOutcome::Updated)
        }
        _ => {
            let mut record = client.build_record(&target.key, &sha, meta.size)?;
            record.urls = vec![request.s3_url.clone()];
            record.metadata.insert("remote".into(), "true".into());
            client.register_record(&record).await?;
            store.write(&sha, &record)?;
            log_transfer(workdir, "add-url", &sha, &record.did, &target.key);
            Ok(AddUrlOutcome::Created)
        }
    }
}

// ── Pull from remote ───────────────────────────────────────────────────────

/// Mirrors every record of `project_id` into the local store, overwriting.
/// Records without a sha256 checksum are counted as failures.
pub async fn pull_project(
    repo_root: &Path,
    client: &DrsClient,
    store: &ObjectStore,
    project_id: &str,
) -> Result<BatchStats> {
    let records = client.list_records_by_project(project_id).await?;
    let attempted = records.len();
    let mut stats = BatchStats::default();
    for record in records {
        let Some(sha) = record.sha256().map(str::to_string) else {
            stats.failed += 1;
            tracing::warn!(did = %record.did, "remote record has no sha256; cannot place it locally");
            continue;
        };
        match store.write(&sha, &record) {
            Ok(()) => {
                log_transfer(
                    repo_root,
                    "pull",
                    &sha,
                    &record.did,
                    record.file_name.as_deref().unwrap_or(""),
                );
                stats.completed += 1;
            }
            Err(e) => {
                stats.failed += 1;
                tracing::warn!(did = %record.did, error = %e, "failed to mirror record");
            }
        }
    }
    finish_batch(stats, attempted)
}

// ── Push local to remote ───────────────────────────────────────────────────

/// Registers every pending object with the remote. Objects already known
/// remotely are skipped; blobs present in the working tree upload with
/// rollback semantics, absent blobs register metadata only. With `stage`,
/// a pointer file is synthesized and staged for each pushed object.
pub async fn push_pending(
    workdir: &Path,
    client: &DrsClient,
    store: &ObjectStore,
    stage: bool,
) -> Result<BatchStats> {
    let pending = store.pending()?;
    let attempted = pending.len();
    let mut stats = BatchStats::default();
    for object in pending {
        match push_one(workdir, client, store, &object.oid, stage).await {
            Ok(true) => stats.completed += 1,
            Ok(false) => stats.skipped += 1,
            Err(e) => {
                stats.failed += 1;
                tracing::warn!(oid = %object.oid, error = %e, "registration failed");
            }
        }
    }
    finish_batch(stats, attempted)
}

async fn push_one(
    workdir: &Path,
    client: &DrsClient,
    store: &ObjectStore,
    oid: &str,
    stage: bool,
) -> Result<bool> {
    let record = store.read(oid)?;
    let remote = client.get_records_by_hash("sha256", oid).await?;
    if find_matching_record(&remote, client.project_id(), record.file_name.as_deref()).is_some() {
        return Ok(false);
    }

    let name = record.file_name.clone().unwrap_or_default();
    if !name.is_empty() && lfs::blob_present(workdir, &name).await {
        client.register_file(&record, &workdir.join(&name)).await?;
    } else {
        client.register_record(&record).await?;
    }
    if stage && !name.is_empty() {
        lfs::stage_pointer(workdir, &name, oid, record.size).await?;
    }
    log_transfer(workdir, "register", oid, &record.did, &name);
    Ok(true)
}

// ── Purge ──────────────────────────────────────────────────────────────────

/// Drops local records; the remote index is untouched. An empty OID list
/// means every pending record. Returns how many records actually existed.
pub fn purge(store: &ObjectStore, oids: &[String]) -> Result<usize> {
    let targets: Vec<String> = if oids.is_empty() {
        store.pending()?.into_iter().map(|p| p.oid).collect()
    } else {
        oids.to_vec()
    };
    let mut dropped = 0;
    for oid in &targets {
        if store.contains(oid) {
            store.remove(oid)?;
            dropped += 1;
        }
    }
    Ok(dropped)
}

/// Transfer-log writes never fail the operation they describe.
fn log_transfer(repo_root: &Path, op: &str, oid: &str, object_id: &str, name: &str) {
    if let Err(e) = store::log_transfer(repo_root, op, oid, object_id, name) {
        tracing::warn!(op, oid, error = %e, "could not append to transfer log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hashes, IndexdRecord};
    use tempfile::TempDir;

    const OID_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OID_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn record(oid: &str) -> IndexdRecord {
        IndexdRecord {
            did: format!("did-for-{}", &oid[..4]),
            size: 1,
            hashes: Hashes {
                sha256: Some(oid.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn purge_drops_every_pending_record() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        store.write(OID_A, &record(OID_A)).unwrap();
        store.write(OID_B, &record(OID_B)).unwrap();

        assert_eq!(purge(&store, &[]).unwrap(), 2);
        assert!(store.pending().unwrap().is_empty());
    }

    #[test]
    fn purge_drops_only_named_oids() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        store.write(OID_A, &record(OID_A)).unwrap();
        store.write(OID_B, &record(OID_B)).unwrap();

        assert_eq!(purge(&store, &[OID_A.to_string()]).unwrap(), 1);
        assert!(!store.contains(OID_A));
        assert!(store.contains(OID_B));
    }

    #[test]
    fn purge_ignores_absent_oids() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        assert_eq!(purge(&store, &[OID_A.to_string()]).unwrap(), 0);
    }

    #[test]
    fn batch_with_failures_errors() {
        let stats = BatchStats {
            completed: 1,
            skipped: 0,
            failed: 2,
        };
        let err = finish_batch(stats, 3).unwrap_err();
        assert!(matches!(
            err,
            Error::Batch {
                failed: 2,
                attempted: 3
            }
        ));
    }

    #[test]
    fn clean_batch_returns_stats() {
        let stats = BatchStats {
            completed: 2,
            skipped: 1,
            failed: 0,
        };
        assert_eq!(finish_batch(stats, 3).unwrap(), stats);
    }
}
