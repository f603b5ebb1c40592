//! Wire types shared by the local object store and the Indexd/DRS client.
//!
//! Two JSON shapes exist on the wire: the Indexd record (`/index/index`,
//! also the payload persisted in `.git/drs/objects`) and the GA4GH DRS
//! object (`/ga4gh/drs/v1/objects`). Empty optionals are omitted on
//! serialization so the stored JSON matches what the remote emits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Indexd records ─────────────────────────────────────────────────────────

/// One content-addressed artifact as Indexd stores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexdRecord {
    pub did: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acl: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authz: Vec<String>,
    #[serde(default, skip_serializing_if = "Hashes::is_empty")]
    pub hashes: Hashes,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl IndexdRecord {
    /// The record's sha256 digest, if it carries one.
    pub fn sha256(&self) -> Option<&str> {
        self.hashes.sha256.as_deref()
    }
}

/// Checksums keyed by algorithm tag. Digests are lowercase hex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hashes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl Hashes {
    pub fn is_empty(&self) -> bool {
        self.md5.is_none()
            && self.sha.is_none()
            && self.sha256.is_none()
            && self.sha512.is_none()
            && self.crc.is_none()
            && self.etag.is_none()
    }

    /// Lowercases every digest in place.
    pub fn normalize(&mut self) {
        for digest in [
            &mut self.md5,
            &mut self.sha,
            &mut self.sha256,
            &mut self.sha512,
            &mut self.crc,
            &mut self.etag,
        ]
        .into_iter()
        .flatten()
        {
            digest.make_ascii_lowercase();
        }
    }
}

/// Envelope for `/index/index` queries.
#[derive(Debug, Default, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub records: Vec<IndexdRecord>,
}

// ── GA4GH DRS objects ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct DrsObject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub self_uri: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub updated_time: Option<String>,
    #[serde(default)]
    pub checksums: Vec<Checksum>,
    #[serde(default)]
    pub access_methods: Vec<AccessMethod>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Checksum {
    pub checksum: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessMethod {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub access_id: Option<String>,
    #[serde(default)]
    pub access_url: Option<AccessUrl>,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessUrl {
    pub url: String,
}

/// Envelope for the paged `/ga4gh/drs/v1/objects` listing.
#[derive(Debug, Default, Deserialize)]
pub struct DrsObjectPage {
    #[serde(default)]
    pub drs_objects: Vec<DrsObject>,
}

// ── Bucket registry ────────────────────────────────────────────────────────

/// Response of `GET /user/data/buckets` on a Gen3 endpoint.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BucketRegistry {
    #[serde(rename = "S3_BUCKETS", default)]
    pub s3_buckets: BTreeMap<String, BucketInfo>,
    #[serde(rename = "GS_BUCKETS", default)]
    pub gs_buckets: BTreeMap<String, BucketInfo>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct BucketInfo {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub programs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip_preserves_fields() {
        let record = IndexdRecord {
            did: "abc".into(),
            file_name: Some("/data/x.bam".into()),
            urls: vec!["s3://bucket/key".into()],
            size: 42,
            authz: vec!["/programs/gdc/projects/tcga".into()],
            hashes: Hashes {
                sha256: Some("aa".repeat(32)),
                ..Default::default()
            },
            metadata: BTreeMap::from([("remote".to_string(), "true".to_string())]),
            ..Default::default()
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: IndexdRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn empty_optionals_are_omitted() {
        let record = IndexdRecord {
            did: "abc".into(),
            size: 1,
            ..Default::default()
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("rev"));
        assert!(!json.contains("urls"));
        assert!(!json.contains("hashes"));
        assert!(!json.contains("metadata"));
        assert!(!json.contains("version"));
    }

    #[test]
    fn hashes_normalize_lowercases() {
        let mut hashes = Hashes {
            sha256: Some("ABCDEF".into()),
            md5: Some("A1B2".into()),
            ..Default::default()
        };
        hashes.normalize();
        assert_eq!(hashes.sha256.as_deref(), Some("abcdef"));
        assert_eq!(hashes.md5.as_deref(), Some("a1b2"));
    }

    #[test]
    fn bucket_registry_parses_gen3_shape() {
        let json = r#"{
            "S3_BUCKETS": {
                "proj-bucket": {
                    "region": "us-west-2",
                    "endpoint_url": "https://s3.example.org",
                    "programs": ["gdc"]
                }
            },
            "GS_BUCKETS": {}
        }"#;
        let registry: BucketRegistry = serde_json::from_str(json).unwrap();
        let info = &registry.s3_buckets["proj-bucket"];
        assert_eq!(info.region.as_deref(), Some("us-west-2"));
        assert_eq!(info.endpoint_url.as_deref(), Some("https://s3.example.org"));
        assert_eq!(info.programs, vec!["gdc"]);
    }
}
