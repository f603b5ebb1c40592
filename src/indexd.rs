//! Typed HTTP client for the Gen3 Indexd / DRS API.
//!
//! Every outbound request carries the bearer token for the configured auth
//! profile; the client only ever reads the token, never refreshes it.
//! Stale-token responses surface verbatim with a refresh hint.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

use crate::did;
use crate::error::{Error, Result};
use crate::types::{
    AccessUrl, BucketRegistry, DrsObject, DrsObjectPage, Hashes, IndexdRecord, RecordPage,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for every paged listing; a short page under this means done.
pub const PAGE_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct Gen3Client {
    base: String,
    project_id: String,
    bucket: String,
    token: String,
    http: reqwest::Client,
}

impl Gen3Client {
    pub fn new(endpoint: &str, project_id: &str, bucket: &str, token: String) -> Result<Self> {
        let base = endpoint.trim_end_matches('/').to_string();
        if base.is_empty() {
            return Err(Error::Config("empty gen3 endpoint".into()));
        }
        let http = reqwest::Client::builder()
            .user_agent(format!("git-drs/{VERSION}"))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base,
            project_id: project_id.to_string(),
            bucket: bucket.to_string(),
            token,
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    // ── Request plumbing ───────────────────────────────────────────────────

    fn status_error(&self, url: &str, status: reqwest::StatusCode, body: String) -> Error {
        let message: String = body.trim().chars().take(200).collect();
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Error::AuthFailed {
                    endpoint: self.base.clone(),
                    message: format!("{status} from {url}; refresh your gen3 token ({message})"),
                }
            }
            reqwest::StatusCode::CONFLICT => Error::Conflict(format!("{url}: {message}")),
            _ => Error::Remote {
                endpoint: url.to_string(),
                status: status.as_u16(),
                message,
            },
        }
    }

    async fn decode<T: DeserializeOwned>(&self, url: &str, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return resp.json::<T>().await.map_err(Error::from);
        }
        Err(self.status_error(url, status, resp.text().await.unwrap_or_default()))
    }

    async fn expect_ok(&self, url: &str, resp: reqwest::Response) -> Result<()> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        Err(self.status_error(url, status, resp.text().await.unwrap_or_default()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        self.decode(url, resp).await
    }

    // ── DRS reads ──────────────────────────────────────────────────────────

    /// `GET /ga4gh/drs/v1/objects/{did}`
    pub async fn get_object(&self, object_id: &str) -> Result<DrsObject> {
        self.get_json(&format!("{}/ga4gh/drs/v1/objects/{object_id}", self.base))
            .await
    }

    /// `GET /ga4gh/drs/v1/objects/{did}/access/{access_id}` → signed URL.
    pub async fn get_download_url(&self, object_id: &str, access_id: &str) -> Result<String> {
        let access: AccessUrl = self
            .get_json(&format!(
                "{}/ga4gh/drs/v1/objects/{object_id}/access/{access_id}",
                self.base
            ))
            .await?;
        Ok(access.url)
    }

    /// Lazy listing of every DRS object, fetched in [`PAGE_SIZE`] pages.
    ///
    /// A page error is delivered in-band and ends the stream; dropping the
    /// receiver cancels the fetcher at its next send.
    pub fn list_objects(&self) -> mpsc::Receiver<Result<DrsObject>> {
        let (tx, rx) = mpsc::channel(PAGE_SIZE);
        let client = self.clone();
        tokio::spawn(async move {
            let mut page = 0usize;
            loop {
                let url = format!(
                    "{}/ga4gh/drs/v1/objects?limit={PAGE_SIZE}&page={page}",
                    client.base
                );
                let batch: DrsObjectPage = match client.get_json(&url).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                if batch.drs_objects.is_empty() {
                    return;
                }
                for object in batch.drs_objects {
                    if tx.send(Ok(object)).await.is_err() {
                        return;
                    }
                }
                page += 1;
            }
        });
        rx
    }

    // ── Indexd records ─────────────────────────────────────────────────────

    /// `GET /index/index?hash={algorithm}:{digest}`
    pub async fn get_records_by_hash(
        &self,
        algorithm: &str,
        digest: &str,
    ) -> Result<Vec<IndexdRecord>> {
        let url = format!("{}/index/index?hash={algorithm}:{digest}", self.base);
        let page: RecordPage = self.get_json(&url).await?;
        let mut records = page.records;
        for record in &mut records {
            record.hashes.normalize();
        }
        Ok(records)
    }

    /// Every record whose authz covers `project_id`, drained page by page.
    pub async fn list_records_by_project(&self, project_id: &str) -> Result<Vec<IndexdRecord>> {
        let resource = did::authz_resource(project_id)?;
        let mut out = Vec::new();
        let mut page = 0usize;
        loop {
            let url = format!(
                "{}/index/index?authz={resource}&limit={PAGE_SIZE}&page={page}",
                self.base
            );
            let batch: RecordPage = self.get_json(&url).await?;
            if batch.records.is_empty() {
                return Ok(out);
            }
            out.extend(batch.records.into_iter().map(|mut r| {
                r.hashes.normalize();
                r
            }));
            page += 1;
        }
    }

    /// `POST /index/index` with `form=object`.
    pub async fn register_record(&self, record: &IndexdRecord) -> Result<IndexdRecord> {
        #[derive(Serialize)]
        struct Payload<'a> {
            form: &'static str,
            #[serde(flatten)]
            record: &'a IndexdRecord,
        }
        let url = format!("{}/index/index", self.base);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&Payload {
                form: "object",
                record,
            })
            .send()
            .await?;
        self.decode(&url, resp).await
    }

    /// `PUT /index/index/{did}`. The body carries only the URLs being
    /// added; the remote appends them to the record.
    pub async fn update_urls(&self, object_id: &str, urls: &[String]) -> Result<()> {
        #[derive(Serialize)]
        struct Payload<'a> {
            urls: &'a [String],
        }
        let url = format!("{}/index/index/{object_id}", self.base);
        let resp = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .json(&Payload { urls })
            .send()
            .await?;
        self.expect_ok(&url, resp).await
    }

    /// Deletes a record: the current `rev` is fetched first via
    /// `GET /index/{did}`, then `DELETE /index/index/{did}?rev=`.
    pub async fn delete_record(&self, object_id: &str) -> Result<()> {
        let current: IndexdRecord = self
            .get_json(&format!("{}/index/{object_id}", self.base))
            .await?;
        let rev = current.rev.ok_or_else(|| {
            Error::Conflict(format!("record {object_id} has no rev; refusing to delete"))
        })?;
        let url = format!("{}/index/index/{object_id}?rev={rev}", self.base);
        let resp = self.http.delete(&url).bearer_auth(&self.token).send().await?;
        self.expect_ok(&url, resp).await
    }

    pub async fn delete_records_by_project(&self, project_id: &str) -> Result<usize> {
        let records = self.list_records_by_project(project_id).await?;
        for record in &records {
            self.delete_record(&record.did).await?;
        }
        Ok(records.len())
    }

    // ── Composition ────────────────────────────────────────────────────────

    /// Composes the canonical record for an LFS file slated for push: DID
    /// from (project, sha256), the default-bucket URL, project authz.
    pub fn build_record(&self, name: &str, sha256: &str, size: u64) -> Result<IndexdRecord> {
        let sha = did::validate_sha256(sha256)?;
        let object_id = did::derive(&self.project_id, &sha)?.to_string();
        Ok(IndexdRecord {
            did: object_id.clone(),
            file_name: Some(name.to_string()),
            urls: vec![format!("s3://{}/{object_id}/{sha}", self.bucket)],
            size,
            authz: vec![did::authz_resource(&self.project_id)?],
            hashes: Hashes {
                sha256: Some(sha),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    /// Registers `record`, then uploads the blob at `blob` through a fence
    /// presigned URL. A failed upload rolls the registration back with a
    /// single record delete and surfaces the upload error.
    pub async fn register_file(&self, record: &IndexdRecord, blob: &Path) -> Result<()> {
        self.register_record(record).await?;
        if let Err(upload_err) = self.upload_blob(&record.did, blob).await {
            if let Err(rollback_err) = self.delete_record(&record.did).await {
                tracing::warn!(
                    did = %record.did,
                    error = %rollback_err,
                    "rollback delete failed; record may linger on the remote"
                );
            }
            return Err(upload_err);
        }
        Ok(())
    }

    async fn upload_blob(&self, object_id: &str, blob: &Path) -> Result<()> {
        let presigned: AccessUrl = self
            .get_json(&format!("{}/user/data/upload/{object_id}", self.base))
            .await?;
        let file = tokio::fs::File::open(blob).await?;
        let len = file.metadata().await?.len();
        let resp = self
            .http
            .put(&presigned.url)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        self.expect_ok(&presigned.url, resp).await
    }

    /// `GET /user/data/buckets`
    pub async fn bucket_registry(&self) -> Result<BucketRegistry> {
        self.get_json(&format!("{}/user/data/buckets", self.base))
            .await
    }
}

/// Among records sharing a checksum, picks the one owned by `project_id`:
/// its authz must contain the project's resource path. With several
/// candidates, a file name equal to the hint (or ending in `/hint`) wins;
/// otherwise the first project match does.
pub fn find_matching_record<'a>(
    records: &'a [IndexdRecord],
    project_id: &str,
    filename_hint: Option<&str>,
) -> Option<&'a IndexdRecord> {
    let resource = did::authz_resource(project_id).ok()?;
    let mut matches = records
        .iter()
        .filter(|r| r.authz.iter().any(|a| a == &resource));
    let first = matches.next()?;
    if let Some(hint) = filename_hint {
        let suffix = format!("/{hint}");
        for candidate in std::iter::once(first).chain(matches) {
            if let Some(name) = candidate.file_name.as_deref()
                && (name == hint || name.ends_with(&suffix))
            {
                return Some(candidate);
            }
        }
    }
    Some(first)
}

/// Capability-typed handle over whichever backend a remote descriptor
/// produced. Callers dispatch through this enum and never downcast; gen3 is
/// the only variant that currently constructs (§ the anvil factory errors).
#[derive(Debug, Clone)]
pub enum DrsClient {
    Gen3(Gen3Client),
}

impl DrsClient {
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Gen3(c) => c.endpoint(),
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            Self::Gen3(c) => c.project_id(),
        }
    }

    pub fn bucket(&self) -> &str {
        match self {
            Self::Gen3(c) => c.bucket(),
        }
    }

    pub async fn get_object(&self, object_id: &str) -> Result<DrsObject> {
        match self {
            Self::Gen3(c) => c.get_object(object_id).await,
        }
    }

    pub async fn get_download_url(&self, object_id: &str, access_id: &str) -> Result<String> {
        match self {
            Self::Gen3(c) => c.get_download_url(object_id, access_id).await,
        }
    }

    pub fn list_objects(&self) -> mpsc::Receiver<Result<DrsObject>> {
        match self {
            Self::Gen3(c) => c.list_objects(),
        }
    }

    pub async fn get_records_by_hash(
        &self,
        algorithm: &str,
        digest: &str,
    ) -> Result<Vec<IndexdRecord>> {
        match self {
            Self::Gen3(c) => c.get_records_by_hash(algorithm, digest).await,
        }
    }

    pub async fn list_records_by_project(&self, project_id: &str) -> Result<Vec<IndexdRecord>> {
        match self {
            Self::Gen3(c) => c.list_records_by_project(project_id).await,
        }
    }

    pub async fn register_record(&self, record: &IndexdRecord) -> Result<IndexdRecord> {
        match self {
            Self::Gen3(c) => c.register_record(record).await,
        }
    }

    pub async fn update_urls(&self, object_id: &str, urls: &[String]) -> Result<()> {
        match self {
            Self::Gen3(c) => c.update_urls(object_id, urls).await,
        }
    }

    pub async fn delete_record(&self, object_id: &str) -> Result<()> {
        match self {
            Self::Gen3(c) => c.delete_record(object_id).await,
        }
    }

    pub async fn delete_records_by_project(&self, project_id: &str) -> Result<usize> {
        match self {
            Self::Gen3(c) => c.delete_records_by_project(project_id).await,
        }
    }

    pub fn build_record(&self, name: &str, sha256: &str, size: u64) -> Result<IndexdRecord> {
        match self {
            Self::Gen3(c) => c.build_record(name, sha256, size),
        }
    }

    pub async fn register_file(&self, record: &IndexdRecord, blob: &Path) -> Result<()> {
        match self {
            Self::Gen3(c) => c.register_file(record, blob).await,
        }
    }

    pub async fn bucket_registry(&self) -> Result<BucketRegistry> {
        match self {
            Self::Gen3(c) => c.bucket_registry().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(did: &str, authz: &str, name: Option<&str>) -> IndexdRecord {
        IndexdRecord {
            did: did.into(),
            file_name: name.map(String::from),
            authz: vec![authz.into()],
            ..Default::default()
        }
    }

    #[test]
    fn matching_filters_by_project_resource() {
        let records = vec![
            record("a", "/programs/other/projects/proj", Some("x.bam")),
            record("b", "/programs/gdc/projects/tcga", Some("x.bam")),
        ];
        let found = find_matching_record(&records, "gdc-tcga", None).unwrap();
        assert_eq!(found.did, "b");
    }

    #[test]
    fn matching_prefers_hinted_name() {
        let records = vec![
            record("a", "/programs/gdc/projects/tcga", Some("other.bam")),
            record("b", "/programs/gdc/projects/tcga", Some("data/x.bam")),
        ];
        let found = find_matching_record(&records, "gdc-tcga", Some("x.bam")).unwrap();
        assert_eq!(found.did, "b");
    }

    #[test]
    fn matching_accepts_exact_hint() {
        let records = vec![
            record("a", "/programs/gdc/projects/tcga", Some("other.bam")),
            record("b", "/programs/gdc/projects/tcga", Some("x.bam")),
        ];
        let found = find_matching_record(&records, "gdc-tcga", Some("x.bam")).unwrap();
        assert_eq!(found.did, "b");
    }

    #[test]
    fn matching_falls_back_to_first_project_match() {
        let records = vec![
            record("a", "/programs/gdc/projects/tcga", Some("one.bam")),
            record("b", "/programs/gdc/projects/tcga", Some("two.bam")),
        ];
        let found = find_matching_record(&records, "gdc-tcga", Some("absent.bam")).unwrap();
        assert_eq!(found.did, "a");
    }

    #[test]
    fn matching_returns_none_without_project_match() {
        let records = vec![record("a", "/programs/other/projects/p", None)];
        assert!(find_matching_record(&records, "gdc-tcga", None).is_none());
    }

    #[test]
    fn build_record_uses_canonical_layout() {
        let client = Gen3Client::new(
            "https://gen3.example.org/",
            "gdc-tcga",
            "my-bucket",
            "token".into(),
        )
        .unwrap();
        let sha = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let rec = client.build_record("data/x.bam", &sha.to_uppercase(), 42).unwrap();
        assert_eq!(rec.did, crate::did::derive("gdc-tcga", sha).unwrap().to_string());
        assert_eq!(rec.urls, vec![format!("s3://my-bucket/{}/{sha}", rec.did)]);
        assert_eq!(rec.authz, vec!["/programs/gdc/projects/tcga".to_string()]);
        assert_eq!(rec.hashes.sha256.as_deref(), Some(sha));
        assert_eq!(rec.size, 42);
        assert_eq!(rec.file_name.as_deref(), Some("data/x.bam"));
    }

    #[test]
    fn client_normalizes_trailing_slash() {
        let client =
            Gen3Client::new("https://gen3.example.org/", "gdc-tcga", "b", "t".into()).unwrap();
        assert_eq!(client.endpoint(), "https://gen3.example.org");
    }

    #[test]
    fn client_rejects_empty_endpoint() {
        assert!(Gen3Client::new("", "gdc-tcga", "b", "t".into()).is_err());
    }
}
