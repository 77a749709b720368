mod builder;

use std::{sync::Arc, time::Duration};

use http::{HeaderMap, Method};
use time::OffsetDateTime;
use url::Url;

use crate::{
    api,
    auth::{AddressingStyle, Auth, Region, SignatureVersion},
    error::{Error, Result},
    reader::ObjectReader,
    signing::{PayloadHash, RequestDescriptor, Signer},
    transport::{
        Idempotency,
        async_transport::{AsyncBody, AsyncTransport},
    },
    util,
};

pub use builder::ClientBuilder;

/// Async S3 client.
///
/// Cheap to clone; clones share the connection pool, credentials and the
/// signing-key cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: Url,
    auth: Auth,
    addressing: AddressingStyle,
    signer: Signer,
    transport: AsyncTransport,
    uploads: UploadDefaults,
}

/// Multipart settings used when an upload does not override them.
#[derive(Clone, Copy, Debug)]
pub(crate) struct UploadDefaults {
    pub(crate) part_size: u64,
    pub(crate) concurrency: usize,
}

impl Client {
    pub fn builder(endpoint: impl AsRef<str>) -> Result<ClientBuilder> {
        ClientBuilder::new(endpoint.as_ref())
    }

    pub fn objects(&self) -> api::ObjectsService {
        api::ObjectsService::new(self.clone())
    }

    pub fn buckets(&self) -> api::BucketsService {
        api::BucketsService::new(self.clone())
    }

    /// Lazily opened reader over `bucket/key`; no request is made until the
    /// first read, seek from the end, or stat.
    pub fn open(&self, bucket: impl Into<String>, key: impl Into<String>) -> ObjectReader {
        ObjectReader::new(self.clone(), bucket.into(), key.into(), None)
    }

    pub fn region(&self) -> &Region {
        self.inner.signer.region()
    }

    pub fn signature_version(&self) -> SignatureVersion {
        self.inner.signer.version()
    }

    pub(crate) fn upload_defaults(&self) -> UploadDefaults {
        self.inner.uploads
    }

    pub(crate) async fn execute(
        &self,
        method: Method,
        bucket: Option<&str>,
        key: Option<&str>,
        query_params: Vec<(String, String)>,
        headers: HeaderMap,
        body: AsyncBody,
    ) -> Result<reqwest::Response> {
        let idempotency = Idempotency::for_method(&method);
        self.dispatch(
            method,
            bucket,
            key,
            query_params,
            headers,
            body,
            idempotency,
        )
        .await
    }

    /// Like [`Client::execute`] for a POST whose final state the caller
    /// verifies itself, so an ambiguous failure may be sent again.
    pub(crate) async fn execute_reissuable(
        &self,
        method: Method,
        bucket: Option<&str>,
        key: Option<&str>,
        query_params: Vec<(String, String)>,
        headers: HeaderMap,
        body: AsyncBody,
    ) -> Result<reqwest::Response> {
        self.dispatch(
            method,
            bucket,
            key,
            query_params,
            headers,
            body,
            Idempotency::Reissuable,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        method: Method,
        bucket: Option<&str>,
        key: Option<&str>,
        query_params: Vec<(String, String)>,
        headers: HeaderMap,
        body: AsyncBody,
        idempotency: Idempotency,
    ) -> Result<reqwest::Response> {
        #[cfg(feature = "tracing")]
        {
            use tracing::Instrument as _;

            let span = tracing::info_span!(
                "s3.request",
                method = %method,
                bucket = bucket.unwrap_or(""),
                key = key.unwrap_or(""),
                host = self.inner.endpoint.host_str().unwrap_or(""),
            );
            self.sign_and_send(method, bucket, key, query_params, headers, body, idempotency)
                .instrument(span)
                .await
        }
        #[cfg(not(feature = "tracing"))]
        self.sign_and_send(method, bucket, key, query_params, headers, body, idempotency)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn sign_and_send(
        &self,
        method: Method,
        bucket: Option<&str>,
        key: Option<&str>,
        query_params: Vec<(String, String)>,
        mut headers: HeaderMap,
        body: AsyncBody,
        idempotency: Idempotency,
    ) -> Result<reqwest::Response> {
        let resolved = util::url::resolve_url(
            &self.inner.endpoint,
            bucket,
            key,
            &query_params,
            self.inner.addressing,
        )?;

        if let Some(creds) = self.inner.auth.credentials() {
            let payload = match &body {
                AsyncBody::Empty => PayloadHash::Empty,
                AsyncBody::Bytes(b) => precomputed_payload_hash(&headers)
                    .unwrap_or_else(|| PayloadHash::of(b)),
                AsyncBody::Stream(_) => PayloadHash::Unsigned,
            };
            let request = RequestDescriptor {
                method: &method,
                resolved: &resolved,
                payload: &payload,
                now: OffsetDateTime::now_utc(),
            };
            self.inner.signer.sign(creds, &request, &mut headers)?;
        }

        self.inner
            .transport
            .send(method, resolved.url, headers, body, idempotency)
            .await
    }

    pub(crate) fn presign(
        &self,
        method: Method,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        query_params: Vec<(String, String)>,
        headers: HeaderMap,
    ) -> Result<crate::types::PresignedRequest> {
        let creds = self
            .inner
            .auth
            .credentials()
            .ok_or_else(|| Error::invalid_config("presign requires credentials"))?;

        let resolved = util::url::resolve_url(
            &self.inner.endpoint,
            Some(bucket),
            Some(key),
            &query_params,
            self.inner.addressing,
        )?;

        self.inner.signer.presign(
            creds,
            method,
            resolved,
            expires_in,
            &headers,
            OffsetDateTime::now_utc(),
        )
    }
}

/// Callers that already hashed the body (part uploads) pass the digest in
/// `x-amz-content-sha256` so it is not computed twice.
fn precomputed_payload_hash(headers: &HeaderMap) -> Option<PayloadHash> {
    let value = headers.get("x-amz-content-sha256")?.to_str().ok()?;
    if value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Some(PayloadHash::Sha256(value.to_ascii_lowercase()));
    }
    None
}
