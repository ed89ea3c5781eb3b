// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object storage integration for archival.
//!
//! On every credentials event the adapter normalizes the parameters, makes
//! sure the bucket exists, and records whether that worked. Provisioning
//! failures are stored as `bucket_provisioned = false` so the validator can
//! report them; they are never returned as errors.
//!
//! Requests are signed with AWS Signature Version 4:
//!
//! ```text
//! canonical request -> string to sign -> HMAC chain (date/region/s3) -> Authorization
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Method, Url};
use sha2::{Digest, Sha256};
use temporal_operator_state::{LeaderToken, ObjectStorage, StateStore, update_state};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AdapterOutcome;
use crate::literals::DEFAULT_S3_ENDPOINT;

type HmacSha256 = Hmac<Sha256>;

const REQUIRED_PARAMETERS: [&str; 3] = ["bucket", "access-key", "secret-key"];
const SIGNING_REGION_FALLBACK: &str = "us-east-1";

/// Errors from bucket provisioning.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProvisionError {
    /// The endpoint cannot be turned into a request URL.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Request signing failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store refused to create the bucket.
    #[error("Bucket creation failed with status {status}: {body}")]
    CreateFailed {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },
}

/// Normalized object storage parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Parameters {
    /// Bucket name, without surrounding slashes.
    pub bucket: String,
    /// Endpoint URL, without trailing slash.
    pub endpoint: String,
    /// Region, possibly empty.
    pub region: String,
    /// Access key id.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
    /// `host` or `path`.
    pub uri_style: String,
}

/// Normalize raw integration parameters.
///
/// Returns the names of missing required parameters on failure.
pub fn retrieve_parameters(
    raw: &BTreeMap<String, String>,
) -> Result<S3Parameters, Vec<&'static str>> {
    let missing: Vec<&'static str> = REQUIRED_PARAMETERS
        .into_iter()
        .filter(|key| !raw.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(missing);
    }

    let get = |key: &str, default: &str| {
        raw.get(key)
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| default.to_string())
    };

    Ok(S3Parameters {
        bucket: get("bucket", "").trim_matches('/').to_string(),
        endpoint: get("endpoint", DEFAULT_S3_ENDPOINT)
            .trim_end_matches('/')
            .to_string(),
        region: get("region", ""),
        access_key: get("access-key", ""),
        secret_key: get("secret-key", ""),
        uri_style: get("s3-uri-style", "host"),
    })
}

/// Endpoint to use for `params`, rewritten to the regional host for AWS.
pub fn construct_endpoint(params: &S3Parameters) -> String {
    let (scheme, rest) = params
        .endpoint
        .split_once("://")
        .unwrap_or(("https", params.endpoint.as_str()));
    let host = rest.split(['/', ':']).next().unwrap_or_default();

    if !host.ends_with("amazonaws.com") {
        return params.endpoint.clone();
    }

    match params.region.as_str() {
        "" | SIGNING_REGION_FALLBACK => format!("{scheme}://s3.amazonaws.com"),
        region => format!("{scheme}://s3.{region}.amazonaws.com"),
    }
}

/// Makes sure a bucket exists.
#[async_trait]
pub trait BucketProvisioner: Send + Sync {
    /// Find or create `params.bucket` at `endpoint`.
    async fn ensure_bucket(&self, params: &S3Parameters, endpoint: &str)
    -> Result<(), ProvisionError>;
}

/// S3 REST client for bucket provisioning.
#[derive(Debug, Clone)]
pub struct S3Client {
    http: reqwest::Client,
}

impl S3Client {
    /// Create a client with a request timeout.
    pub fn new(timeout: Duration) -> Result<Self, ProvisionError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    async fn send(
        &self,
        method: Method,
        url: &Url,
        params: &S3Parameters,
        body: String,
    ) -> Result<reqwest::Response, ProvisionError> {
        let headers = sign_request(method.as_str(), url, body.as_bytes(), params, Utc::now())?;

        let mut request = self.http.request(method, url.clone());
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl BucketProvisioner for S3Client {
    async fn ensure_bucket(
        &self,
        params: &S3Parameters,
        endpoint: &str,
    ) -> Result<(), ProvisionError> {
        let url = bucket_url(endpoint, &params.bucket, &params.uri_style)?;

        let head = self
            .send(Method::HEAD, &url, params, String::new())
            .await?;
        if head.status().is_success() {
            info!(bucket = %params.bucket, "Bucket exists");
            return Ok(());
        }
        warn!(
            bucket = %params.bucket,
            status = head.status().as_u16(),
            "Bucket doesn't exist or you don't have access to it"
        );

        let body = match params.region.as_str() {
            "" | SIGNING_REGION_FALLBACK => String::new(),
            region => format!(
                "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
                 <LocationConstraint>{region}</LocationConstraint>\
                 </CreateBucketConfiguration>"
            ),
        };

        let created = self.send(Method::PUT, &url, params, body).await?;
        let status = created.status();
        if status.is_success() {
            info!(bucket = %params.bucket, region = %params.region, "Created bucket");
            return Ok(());
        }

        let body = created.text().await.unwrap_or_default();
        if body.contains("BucketAlreadyOwnedByYou") {
            debug!(bucket = %params.bucket, "Bucket already owned");
            return Ok(());
        }
        Err(ProvisionError::CreateFailed {
            status: status.as_u16(),
            body,
        })
    }
}

fn bucket_url(endpoint: &str, bucket: &str, uri_style: &str) -> Result<Url, ProvisionError> {
    let endpoint = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    };
    let mut url =
        Url::parse(&endpoint).map_err(|e| ProvisionError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

    if uri_style == "path" {
        url.set_path(&format!("/{bucket}"));
    } else {
        let host = url
            .host_str()
            .ok_or_else(|| ProvisionError::InvalidEndpoint(endpoint.clone()))?
            .to_string();
        url.set_host(Some(&format!("{bucket}.{host}")))
            .map_err(|e| ProvisionError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        url.set_path("/");
    }
    Ok(url)
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>, ProvisionError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| ProvisionError::Signing(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Headers signing a request with AWS Signature Version 4.
fn sign_request(
    method: &str,
    url: &Url,
    payload: &[u8],
    params: &S3Parameters,
    now: DateTime<Utc>,
) -> Result<Vec<(&'static str, String)>, ProvisionError> {
    let region = if params.region.is_empty() {
        SIGNING_REGION_FALLBACK
    } else {
        params.region.as_str()
    };
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload_hash = hex::encode(Sha256::digest(payload));

    let host = url
        .host_str()
        .ok_or_else(|| ProvisionError::InvalidEndpoint(url.to_string()))?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let signed_headers = "host;x-amz-content-sha256;x-amz-date";
    let canonical_request = format!(
        "{method}\n{path}\n{query}\nhost:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\n{signed_headers}\n{payload_hash}",
        path = url.path(),
        query = url.query().unwrap_or_default(),
    );

    let scope = format!("{date}/{region}/s3/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(format!("AWS4{}", params.secret_key).as_bytes(), &date)?;
    let k_region = hmac(&k_date, region)?;
    let k_service = hmac(&k_region, "s3")?;
    let k_signing = hmac(&k_service, "aws4_request")?;
    let signature = hex::encode(hmac(&k_signing, &string_to_sign)?);

    Ok(vec![
        ("x-amz-date", amz_date),
        ("x-amz-content-sha256", payload_hash),
        (
            "authorization",
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                params.access_key
            ),
        ),
    ])
}

/// Record object storage from a credentials event, provisioning the bucket.
pub async fn apply_parameters<S, P>(
    store: &S,
    token: &LeaderToken,
    provisioner: &P,
    raw: &BTreeMap<String, String>,
) -> temporal_operator_state::Result<AdapterOutcome>
where
    S: StateStore + ?Sized,
    P: BucketProvisioner + ?Sized,
{
    let params = match retrieve_parameters(raw) {
        Ok(params) => params,
        Err(missing) => {
            warn!(?missing, "Missing required S3 parameters");
            return Ok(AdapterOutcome::Incomplete(format!(
                "s3: missing {}",
                missing.join(", ")
            )));
        }
    };

    let endpoint = construct_endpoint(&params);
    let bucket_provisioned = match provisioner.ensure_bucket(&params, &endpoint).await {
        Ok(()) => true,
        Err(e) => {
            warn!(bucket = %params.bucket, error = %e, "Couldn't provision bucket");
            false
        }
    };

    let storage = ObjectStorage {
        bucket: params.bucket,
        endpoint,
        region: params.region,
        access_key: params.access_key,
        secret_key: params.secret_key,
        uri_style: params.uri_style,
        bucket_provisioned,
    };
    update_state(store, token, |state| state.object_storage = Some(storage)).await?;
    Ok(AdapterOutcome::Applied)
}

/// Clear the object storage fragment.
pub async fn remove<S: StateStore + ?Sized>(
    store: &S,
    token: &LeaderToken,
) -> temporal_operator_state::Result<AdapterOutcome> {
    update_state(store, token, |state| state.object_storage = None).await?;
    info!("Object storage removed");
    Ok(AdapterOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use temporal_operator_state::MemoryStateStore;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn params(endpoint: &str, region: &str) -> S3Parameters {
        S3Parameters {
            bucket: "temporal-archive".to_string(),
            endpoint: endpoint.to_string(),
            region: region.to_string(),
            access_key: "access".to_string(),
            secret_key: "secret".to_string(),
            uri_style: "path".to_string(),
        }
    }

    #[test]
    fn test_missing_required_parameters() {
        let missing = retrieve_parameters(&raw(&[("bucket", "b")])).unwrap_err();
        assert_eq!(missing, vec!["access-key", "secret-key"]);
    }

    #[test]
    fn test_defaults_and_cleanup() {
        let params = retrieve_parameters(&raw(&[
            ("bucket", " /temporal-archive/ "),
            ("access-key", " access "),
            ("secret-key", "secret"),
            ("endpoint", "https://ceph.local:7480//"),
        ]))
        .unwrap();
        assert_eq!(params.bucket, "temporal-archive");
        assert_eq!(params.access_key, "access");
        assert_eq!(params.endpoint, "https://ceph.local:7480");
        assert_eq!(params.region, "");
        assert_eq!(params.uri_style, "host");

        let params =
            retrieve_parameters(&raw(&[("bucket", "b"), ("access-key", "a"), ("secret-key", "s")]))
                .unwrap();
        assert_eq!(params.endpoint, "https://s3.amazonaws.com");
    }

    #[test]
    fn test_construct_endpoint() {
        assert_eq!(
            construct_endpoint(&params("https://s3.amazonaws.com", "eu-west-1")),
            "https://s3.eu-west-1.amazonaws.com"
        );
        assert_eq!(
            construct_endpoint(&params("https://s3.amazonaws.com", "")),
            "https://s3.amazonaws.com"
        );
        assert_eq!(
            construct_endpoint(&params("http://ceph.local:7480", "eu-west-1")),
            "http://ceph.local:7480"
        );
    }

    #[test]
    fn test_bucket_url_styles() {
        let url = bucket_url("https://s3.amazonaws.com", "archive", "host").unwrap();
        assert_eq!(url.as_str(), "https://archive.s3.amazonaws.com/");

        let url = bucket_url("ceph.local:7480", "archive", "path").unwrap();
        assert_eq!(url.as_str(), "https://ceph.local:7480/archive");
    }

    #[test]
    fn test_signature_is_deterministic() {
        let url = Url::parse("http://127.0.0.1:9000/temporal-archive").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let params = params("http://127.0.0.1:9000", "");

        let first = sign_request("HEAD", &url, b"", &params, now).unwrap();
        let second = sign_request("HEAD", &url, b"", &params, now).unwrap();
        assert_eq!(first, second);

        let headers: BTreeMap<_, _> = first.into_iter().collect();
        assert_eq!(headers["x-amz-date"], "20240501T120000Z");
        assert_eq!(
            headers["x-amz-content-sha256"],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(headers["authorization"].starts_with(
            "AWS4-HMAC-SHA256 Credential=access/20240501/us-east-1/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature="
        ));

        let other = sign_request("PUT", &url, b"", &params, now).unwrap();
        assert_ne!(other[2].1, headers["authorization"]);
    }

    #[tokio::test]
    async fn test_existing_bucket_is_not_created() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/temporal-archive"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = S3Client::new(Duration::from_secs(5)).unwrap();
        client
            .ensure_bucket(&params(&server.uri(), ""), &server.uri())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_bucket_is_created_in_region() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/temporal-archive"))
            .and(body_string_contains(
                "<LocationConstraint>eu-west-1</LocationConstraint>",
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = S3Client::new(Duration::from_secs(5)).unwrap();
        client
            .ensure_bucket(&params(&server.uri(), "eu-west-1"), &server.uri())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_failure() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_string("BucketAlreadyExists"))
            .mount(&server)
            .await;

        let client = S3Client::new(Duration::from_secs(5)).unwrap();
        let err = client
            .ensure_bucket(&params(&server.uri(), ""), &server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::CreateFailed { status: 409, .. }));
    }

    struct Failing;

    #[async_trait]
    impl BucketProvisioner for Failing {
        async fn ensure_bucket(&self, _: &S3Parameters, _: &str) -> Result<(), ProvisionError> {
            Err(ProvisionError::Signing("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn test_provision_failure_is_recorded_not_raised() {
        let store = MemoryStateStore::new();
        let token = LeaderToken::elected();

        let outcome = apply_parameters(
            &store,
            &token,
            &Failing,
            &raw(&[
                ("bucket", "archive"),
                ("access-key", "a"),
                ("secret-key", "s"),
                ("region", "eu-west-1"),
            ]),
        )
        .await
        .unwrap();

        assert!(outcome.is_applied());
        let storage = store
            .load()
            .await
            .unwrap()
            .unwrap()
            .state
            .object_storage
            .unwrap();
        assert!(!storage.bucket_provisioned);
        assert_eq!(storage.endpoint, "https://s3.eu-west-1.amazonaws.com");

        remove(&store, &token).await.unwrap();
        assert!(store.load().await.unwrap().unwrap().state.object_storage.is_none());
    }

    #[tokio::test]
    async fn test_incomplete_parameters_write_nothing() {
        let store = MemoryStateStore::new();
        let token = LeaderToken::elected();

        let outcome = apply_parameters(&store, &token, &Failing, &raw(&[("bucket", "b")]))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            AdapterOutcome::Incomplete("s3: missing access-key, secret-key".to_string())
        );
        assert!(store.load().await.unwrap().is_none());
    }
}
