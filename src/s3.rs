//! S3 metadata probe.
//!
//! Parses `s3://` URLs, resolves per-bucket endpoint/region/credentials
//! (flag > environment > Gen3 bucket registry > derived default), and reads
//! object size and mtime via a presigned path-style HEAD. No object bytes
//! are ever transferred.

use std::time::Duration;

use chrono::DateTime;
use rusty_s3::{Bucket, Credentials, S3Action, UrlStyle};
use url::Url;

use crate::error::{Error, Result};
use crate::types::BucketInfo;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lifetime of presigned HEAD requests.
const SIGN_TTL: Duration = Duration::from_secs(60);

/// A parsed `s3://bucket/key` URL. The key is preserved verbatim — S3 keys
/// may legitimately contain leading or repeated slashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Url {
    pub bucket: String,
    pub key: String,
}

/// Parses `s3://bucket/key`.
///
/// # Errors
///
/// Returns an input error unless the prefix is exactly `s3://` and both
/// bucket and key are non-empty.
pub fn parse_s3_url(raw: &str) -> Result<S3Url> {
    let rest = raw.strip_prefix("s3://").ok_or_else(|| {
        Error::InvalidInput(format!("expected an s3://bucket/key url, got '{raw}'"))
    })?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| Error::InvalidInput(format!("missing object key in '{raw}'")))?;
    if bucket.is_empty() {
        return Err(Error::InvalidInput(format!("empty bucket name in '{raw}'")));
    }
    if key.is_empty() {
        return Err(Error::InvalidInput(format!("empty object key in '{raw}'")));
    }
    Ok(S3Url {
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}

/// Explicit overrides, highest priority in resolution.
#[derive(Debug, Clone, Default)]
pub struct ProbeOptions {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

/// Snapshot of the `AWS_*` environment, injectable for tests.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl EnvCredentials {
    pub fn capture() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            access_key: var("AWS_ACCESS_KEY_ID"),
            secret_key: var("AWS_SECRET_ACCESS_KEY"),
            region: var("AWS_REGION"),
            endpoint: var("AWS_ENDPOINT_URL"),
        }
    }
}

/// `true` when neither flags nor environment settle the bucket location and
/// the Gen3 bucket registry should be consulted.
pub fn needs_registry(opts: &ProbeOptions, env: &EnvCredentials) -> bool {
    (opts.region.is_none() && env.region.is_none())
        || (opts.endpoint.is_none() && env.endpoint.is_none())
}

/// Resolves the bucket endpoint, region, and credentials for `name`.
///
/// # Errors
///
/// Returns an environment error naming every missing field and the sources
/// tried, when region or credentials cannot be resolved.
pub fn resolve_bucket(
    name: &str,
    opts: &ProbeOptions,
    env: &EnvCredentials,
    registry: Option<&BucketInfo>,
) -> Result<(Bucket, Credentials)> {
    let region = opts
        .region
        .clone()
        .or_else(|| env.region.clone())
        .or_else(|| registry.and_then(|i| i.region.clone()));
    let endpoint = opts
        .endpoint
        .clone()
        .or_else(|| env.endpoint.clone())
        .or_else(|| registry.and_then(|i| i.endpoint_url.clone()));
    let access_key = opts.access_key.clone().or_else(|| env.access_key.clone());
    let secret_key = opts.secret_key.clone().or_else(|| env.secret_key.clone());

    let mut missing = Vec::new();
    if region.is_none() {
        missing.push("region");
    }
    if access_key.is_none() {
        missing.push("AWS access key id");
    }
    if secret_key.is_none() {
        missing.push("AWS secret access key");
    }
    let (Some(region), Some(access_key), Some(secret_key)) = (region, access_key, secret_key)
    else {
        return Err(Error::Environment(format!(
            "missing S3 configuration for bucket '{name}': {}; \
             tried flags, AWS_* environment variables, and the Gen3 bucket registry",
            missing.join(", ")
        )));
    };

    let endpoint = endpoint.unwrap_or_else(|| format!("https://s3.{region}.amazonaws.com"));
    let endpoint_url: Url = endpoint
        .parse()
        .map_err(|e| Error::InvalidInput(format!("invalid S3 endpoint '{endpoint}': {e}")))?;
    let bucket = Bucket::new(endpoint_url, UrlStyle::Path, name.to_string(), region)
        .map_err(|e| Error::InvalidInput(format!("invalid bucket '{name}': {e}")))?;
    Ok((bucket, Credentials::new(access_key, secret_key)))
}

/// Pre-built collaborators, injectable by callers and tests. An injected
/// bucket+credentials pair is trusted: configuration resolution and its
/// missing-field validation are bypassed entirely. An injected HTTP client
/// is used as-is.
#[derive(Default)]
pub struct ProbeOverrides {
    pub client: Option<(Bucket, Credentials)>,
    pub http: Option<reqwest::Client>,
}

/// Size and mtime of one object, as HEAD reported them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    /// RFC-3339, or empty when the endpoint sent no Last-Modified.
    pub modified: String,
}

/// Probes one object: resolves bucket configuration (unless `overrides`
/// carries a pre-built client) and HEADs the key.
///
/// # Errors
///
/// Resolution errors only arise without an injected client; HEAD errors as
/// in [`head_object`].
pub async fn probe_object(
    target: &S3Url,
    opts: &ProbeOptions,
    env: &EnvCredentials,
    registry: Option<&BucketInfo>,
    overrides: ProbeOverrides,
) -> Result<ObjectMeta> {
    let (bucket, credentials) = match overrides.client {
        Some((bucket, credentials)) => (bucket, credentials),
        None => resolve_bucket(&target.bucket, opts, env, registry)?,
    };
    let http = match overrides.http {
        Some(http) => http,
        None => http_client()?,
    };
    head_object(&http, &bucket, &credentials, &target.key).await
}

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("git-drs/{VERSION}"))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(Error::from)
}

/// HEADs `key` in `bucket` and converts the response headers.
///
/// # Errors
///
/// 403 maps to an auth error with a credentials/endpoint hint; any other
/// non-200 status is a remote error.
pub async fn head_object(
    http: &reqwest::Client,
    bucket: &Bucket,
    credentials: &Credentials,
    key: &str,
) -> Result<ObjectMeta> {
    let signed = bucket.head_object(Some(credentials), key).sign(SIGN_TTL);
    let resp = http.head(signed).send().await?;
    let status = resp.status();

    if status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::AuthFailed {
            endpoint: bucket.base_url().to_string(),
            message: format!(
                "HEAD {key} returned 403; check your S3 credentials and --endpoint-url"
            ),
        });
    }
    if status != reqwest::StatusCode::OK {
        return Err(Error::Remote {
            endpoint: bucket.base_url().to_string(),
            status: status.as_u16(),
            message: format!("HEAD {key} failed"),
        });
    }

    let size = resp
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let modified = resp
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    Ok(ObjectMeta { size, modified })
}
