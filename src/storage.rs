//! Package object storage over the S3-compatible XML API.
//!
//! Release tarballs are re-hosted in a bucket reachable through any
//! S3-compatible endpoint (Google Cloud Storage interoperability mode by
//! default). Requests are path-style (`https://<endpoint>/<bucket>/<key>`)
//! and signed with AWS Signature Version 4 using HMAC keys.
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for signing.
//!
//! # Environment Variables
//!
//! - `HUB_STORAGE_ACCESS_KEY_ID` (required)
//! - `HUB_STORAGE_SECRET_ACCESS_KEY` (required)

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use log::debug;
use sha2::{Digest, Sha256};

use hub_publish_core::collab::BlobStore;

use crate::config::{Secrets, StorageConfig};

type HmacSha256 = Hmac<Sha256>;

pub struct HttpBlobStore {
    client: reqwest::blocking::Client,
    config: StorageConfig,
    access_key_id: String,
    secret_access_key: String,
}

impl HttpBlobStore {
    pub fn new(config: &StorageConfig, secrets: &Secrets, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build storage HTTP client")?;
        Ok(Self {
            client,
            config: config.clone(),
            access_key_id: secrets.storage_access_key_id.clone(),
            secret_access_key: secrets.storage_secret_access_key.clone(),
        })
    }

    fn host(&self) -> String {
        endpoint_host(&self.config.endpoint)
    }

    fn object_path(&self, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        format!("/{}/{}", uri_encode(&self.config.bucket), encoded_key)
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.config.public_base_url(), key)
    }

    /// Build a signed request for `method` on `key` with the given body hash.
    fn signed(
        &self,
        method: reqwest::Method,
        key: &str,
        payload_hash: &str,
    ) -> reqwest::blocking::RequestBuilder {
        let host = self.host();
        let canonical_uri = self.object_path(key);
        let url = format!(
            "{}{}",
            self.config.endpoint.trim_end_matches('/'),
            canonical_uri
        );
        let authorization = authorization_header(
            &SigningInput {
                method: method.as_str(),
                host: &host,
                canonical_uri: &canonical_uri,
                payload_hash,
                region: &self.config.region,
                access_key_id: &self.access_key_id,
                secret_access_key: &self.secret_access_key,
            },
            Utc::now(),
        );

        self.client
            .request(method, &url)
            .header("Authorization", authorization.header)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", authorization.amz_date)
    }
}

impl BlobStore for HttpBlobStore {
    fn put(&self, key: &str, local_file: &Path) -> Result<String> {
        let body = std::fs::read(local_file)
            .with_context(|| format!("Failed to read package: {}", local_file.display()))?;
        let payload_hash = hex_sha256(&body);
        debug!("PUT {} ({} bytes)", key, body.len());

        let resp = self
            .signed(reqwest::Method::PUT, key, &payload_hash)
            .header("Content-Type", "application/gzip")
            .body(body)
            .send()
            .with_context(|| format!("Failed to upload {}/{}", self.config.bucket, key))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            bail!("PutObject failed (HTTP {}) for key '{}': {}", status, key, text);
        }
        Ok(self.public_url(key))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let payload_hash = hex_sha256(b"");
        debug!("DELETE {}", key);

        let resp = self
            .signed(reqwest::Method::DELETE, key, &payload_hash)
            .send()
            .with_context(|| format!("Failed to delete {}/{}", self.config.bucket, key))?;

        // 404 means there is nothing left to clean up.
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            bail!("DeleteObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }
        Ok(())
    }
}

// ============ AWS SigV4 Helpers ============

struct SigningInput<'a> {
    method: &'a str,
    host: &'a str,
    canonical_uri: &'a str,
    payload_hash: &'a str,
    region: &'a str,
    access_key_id: &'a str,
    secret_access_key: &'a str,
}

struct Authorization {
    header: String,
    amz_date: String,
}

fn authorization_header(input: &SigningInput, now: DateTime<Utc>) -> Authorization {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let headers = [
        ("host", input.host),
        ("x-amz-content-sha256", input.payload_hash),
        ("x-amz-date", amz_date.as_str()),
    ];
    let signed_headers = headers
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        input.method, input.canonical_uri, canonical_headers, signed_headers, input.payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, input.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(input.secret_access_key, &date_stamp, input.region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    Authorization {
        header: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            input.access_key_id, credential_scope, signed_headers, signature
        ),
        amz_date,
    }
}

fn endpoint_host(endpoint: &str) -> String {
    endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of one path segment: everything but `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn signing_key_matches_aws_reference() {
        // From the AWS SigV4 documentation example.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn uri_encode_keeps_unreserved() {
        assert_eq!(uri_encode("v1.0.0"), "v1.0.0");
        assert_eq!(uri_encode("a b+c"), "a%20b%2Bc");
    }

    #[test]
    fn authorization_header_scopes_to_region_and_s3() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let auth = authorization_header(
            &SigningInput {
                method: "PUT",
                host: "storage.googleapis.com",
                canonical_uri: "/bucket/packages/acme/db/v1.0.0/package.tgz",
                payload_hash: &hex_sha256(b"tarball"),
                region: "auto",
                access_key_id: "GOOGKEY",
                secret_access_key: "secret",
            },
            now,
        );
        assert_eq!(auth.amz_date, "20240501T120000Z");
        assert!(auth
            .header
            .starts_with("AWS4-HMAC-SHA256 Credential=GOOGKEY/20240501/auto/s3/aws4_request, "));
        assert!(auth
            .header
            .contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature="));
    }

    #[test]
    fn endpoint_host_strips_scheme() {
        assert_eq!(
            endpoint_host("https://storage.googleapis.com/"),
            "storage.googleapis.com"
        );
        assert_eq!(endpoint_host("http://localhost:9000"), "localhost:9000");
    }
}
