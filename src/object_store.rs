//! S3-compatible object store client.
//!
//! Signed GET and PUT against the S3 REST API, shared by the managed
//! retrieval backend (document/metadata writes) and the object-store state
//! store. Uses AWS Signature V4 with pure-Rust primitives (`hmac`, `sha2`),
//! no vendor SDK, so it works against MinIO and LocalStack through
//! `endpoint_url` as well.
//!
//! Credentials come from the environment:
//! - `AWS_ACCESS_KEY_ID` — required
//! - `AWS_SECRET_ACCESS_KEY` — required
//! - `AWS_SESSION_TOKEN` — optional

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("object store request failed: {0}")]
    Request(String),

    #[error("object store returned HTTP {status} for key '{key}'")]
    Status { status: u16, key: String },
}

impl ObjectStoreError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::MissingCredentials(_) => false,
            Self::Request(_) => true,
            Self::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
        }
    }
}

/// Split an `s3://bucket/key-or-prefix` URI. The part after the bucket may
/// be empty (bucket root).
pub fn parse_s3_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.strip_prefix("s3://")?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() => Some((bucket.to_string(), key.to_string())),
        None if !rest.is_empty() => Some((rest.to_string(), String::new())),
        _ => None,
    }
}

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self, ObjectStoreError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            ObjectStoreError::MissingCredentials("AWS_ACCESS_KEY_ID not set".to_string())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            ObjectStoreError::MissingCredentials("AWS_SECRET_ACCESS_KEY not set".to_string())
        })?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

pub struct ObjectStoreClient {
    client: reqwest::Client,
    creds: AwsCredentials,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
}

impl ObjectStoreClient {
    pub fn new(
        bucket: &str,
        region: &str,
        endpoint_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ObjectStoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ObjectStoreError::Request(e.to_string()))?;
        Ok(Self {
            client,
            creds: AwsCredentials::from_env()?,
            bucket: bucket.to_string(),
            region: region.to_string(),
            endpoint_url: endpoint_url.map(|s| s.to_string()),
        })
    }

    /// Write an object, overwriting any existing content at the key.
    pub async fn put_object(
        &self,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let response = self
            .signed_request("PUT", key, body, Some(content_type))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ObjectStoreError::Status {
                status: status.as_u16(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Read an object's content as text. Returns `None` for a missing key.
    pub async fn get_object(&self, key: &str) -> Result<Option<String>, ObjectStoreError> {
        let response = self.signed_request("GET", key, b"", None).await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ObjectStoreError::Status {
                status: status.as_u16(),
                key: key.to_string(),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ObjectStoreError::Request(e.to_string()))?;
        Ok(Some(String::from_utf8_lossy(&bytes).to_string()))
    }

    async fn signed_request(
        &self,
        method: &str,
        key: &str,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<reqwest::Response, ObjectStoreError> {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        // Virtual-hosted addressing for AWS proper; path-style for custom
        // endpoints (MinIO, LocalStack).
        let (host, canonical_uri) = match self.endpoint_url.as_deref() {
            Some(endpoint) => {
                let stripped = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/');
                (
                    stripped.to_string(),
                    format!("/{}/{}", self.bucket, encoded_key),
                )
            }
            None => (
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                format!("/{}", encoded_key),
            ),
        };
        let scheme = if self
            .endpoint_url
            .as_deref()
            .map(|e| e.starts_with("http://"))
            .unwrap_or(false)
        {
            "http"
        } else {
            "https"
        };
        let url = format!("{}://{}{}", scheme, host, canonical_uri);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let payload_hash = hex_sha256(body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut builder = match method {
            "PUT" => self.client.put(&url).body(body.to_vec()),
            _ => self.client.get(&url),
        };
        builder = builder
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ct) = content_type {
            builder = builder.header("Content-Type", ct);
        }
        if let Some(ref token) = self.creds.session_token {
            builder = builder.header("x-amz-security-token", token);
        }

        builder
            .send()
            .await
            .map_err(|e| ObjectStoreError::Request(e.to_string()))
    }

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

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the SigV4 signing key chain:
/// `HMAC("AWS4"+secret, date) → region → service → "aws4_request"`.
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding for SigV4 canonical requests: everything but
/// `A-Z a-z 0-9 - _ . ~` is percent-encoded.
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
