use std::{io, time::Duration};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt as _;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::{
    api::response_text,
    client::Client,
    error::{Error, Result},
    reader::ObjectReader,
    transport::async_transport::{AsyncBody, response_error},
    types::{
        DeleteObjectOutput, GetObjectOutput, HeadObjectOutput, ListObjectsV2Output, ObjectInfo,
        PresignedRequest, PutObjectOutput,
    },
    util::{self, headers::header_string},
};

const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(900);

#[derive(Clone)]
pub struct ObjectsService {
    pub(super) client: Client,
}

impl ObjectsService {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn get(&self, bucket: impl Into<String>, key: impl Into<String>) -> GetObjectRequest {
        GetObjectRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            key: key.into(),
            range: None,
            if_match: None,
            if_none_match: None,
        }
    }

    pub fn head(&self, bucket: impl Into<String>, key: impl Into<String>) -> HeadObjectRequest {
        HeadObjectRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn put(&self, bucket: impl Into<String>, key: impl Into<String>) -> PutObjectRequest {
        PutObjectRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            key: key.into(),
            content_type: None,
            metadata: Vec::new(),
            body: AsyncBody::Empty,
        }
    }

    pub fn delete(&self, bucket: impl Into<String>, key: impl Into<String>) -> DeleteObjectRequest {
        DeleteObjectRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn list_v2(&self, bucket: impl Into<String>) -> ListObjectsV2Request {
        ListObjectsV2Request {
            client: self.client.clone(),
            bucket: bucket.into(),
            prefix: None,
            delimiter: None,
            continuation_token: None,
            max_keys: None,
            cancellation: None,
        }
    }

    /// Seekable reader over an object. Nothing is fetched until first use.
    pub fn open(&self, bucket: impl Into<String>, key: impl Into<String>) -> ObjectReader {
        ObjectReader::new(self.client.clone(), bucket.into(), key.into(), None)
    }

    /// Reader seeded with metadata the caller already has, saving the HEAD.
    pub fn open_with_info(&self, bucket: impl Into<String>, info: ObjectInfo) -> ObjectReader {
        let key = info.key.clone();
        ObjectReader::new(self.client.clone(), bucket.into(), key, Some(info))
    }

    pub fn presign(
        &self,
        method: Method,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> PresignObjectRequest {
        PresignObjectRequest {
            client: self.client.clone(),
            method,
            bucket: bucket.into(),
            key: key.into(),
            expires_in: DEFAULT_PRESIGN_EXPIRY,
            query_params: Vec::new(),
            headers: HeaderMap::new(),
            metadata: Vec::new(),
        }
    }

    pub fn presign_get(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> PresignObjectRequest {
        self.presign(Method::GET, bucket, key)
    }

    pub fn presign_put(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> PresignObjectRequest {
        self.presign(Method::PUT, bucket, key)
    }
}

/// Result of a GET that may ask for a range past the end of the object.
pub(crate) enum RangedGet {
    Body(GetObjectOutput),
    /// 416: nothing at or after the requested offset.
    Unsatisfiable { total_size: Option<u64> },
}

pub struct GetObjectRequest {
    client: Client,
    bucket: String,
    key: String,
    range: Option<String>,
    if_match: Option<String>,
    if_none_match: Option<String>,
}

impl GetObjectRequest {
    pub fn range_bytes(mut self, start: u64, end_inclusive: u64) -> Self {
        self.range = Some(util::headers::range_header_value(start, end_inclusive));
        self
    }

    /// Everything from `start` to the end of the object.
    pub fn range_from(mut self, start: u64) -> Self {
        self.range = Some(format!("bytes={start}-"));
        self
    }

    pub fn if_match(mut self, value: impl Into<String>) -> Self {
        self.if_match = Some(value.into());
        self
    }

    pub fn if_none_match(mut self, value: impl Into<String>) -> Self {
        self.if_none_match = Some(value.into());
        self
    }

    pub async fn send(self) -> Result<GetObjectOutput> {
        let resp = self.request().await?;
        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }
        Ok(get_output(resp))
    }

    pub(crate) async fn send_ranged(self) -> Result<RangedGet> {
        let resp = self.request().await?;
        if resp.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            let total_size = util::headers::content_range(resp.headers()).and_then(|r| r.total);
            return Ok(RangedGet::Unsatisfiable { total_size });
        }
        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }
        Ok(RangedGet::Body(get_output(resp)))
    }

    async fn request(self) -> Result<reqwest::Response> {
        let mut headers = HeaderMap::new();
        if let Some(range) = self.range {
            let value = HeaderValue::from_str(&range)
                .map_err(|_| Error::invalid_config("invalid Range header"))?;
            headers.insert(http::header::RANGE, value);
        }
        if let Some(value) = self.if_match {
            let value = HeaderValue::from_str(&value)
                .map_err(|_| Error::invalid_config("invalid If-Match header"))?;
            headers.insert(http::header::IF_MATCH, value);
        }
        if let Some(value) = self.if_none_match {
            let value = HeaderValue::from_str(&value)
                .map_err(|_| Error::invalid_config("invalid If-None-Match header"))?;
            headers.insert(http::header::IF_NONE_MATCH, value);
        }

        self.client
            .execute(
                Method::GET,
                Some(&self.bucket),
                Some(&self.key),
                Vec::new(),
                headers,
                AsyncBody::Empty,
            )
            .await
    }
}

fn get_output(resp: reqwest::Response) -> GetObjectOutput {
    let headers = resp.headers();
    let etag = header_string(headers, http::header::ETAG);
    let content_length = util::headers::header_u64(headers, http::header::CONTENT_LENGTH);
    let content_type = header_string(headers, http::header::CONTENT_TYPE);
    let last_modified = header_string(headers, http::header::LAST_MODIFIED);
    let (range, total_size) = if resp.status() == StatusCode::PARTIAL_CONTENT {
        match util::headers::content_range(headers) {
            Some(cr) => (cr.range, cr.total),
            None => (None, None),
        }
    } else {
        (None, content_length)
    };

    let stream = resp.bytes_stream().map(|item| match item {
        Ok(b) => Ok(b),
        Err(e) => Err(Error::transport("body stream error", Some(Box::new(e)))),
    });

    GetObjectOutput {
        body: Box::pin(stream),
        etag,
        content_length,
        content_type,
        range,
        total_size,
        last_modified,
    }
}

pub struct HeadObjectRequest {
    client: Client,
    bucket: String,
    key: String,
}

impl HeadObjectRequest {
    pub async fn send(self) -> Result<HeadObjectOutput> {
        let resp = self
            .client
            .execute(
                Method::HEAD,
                Some(&self.bucket),
                Some(&self.key),
                Vec::new(),
                HeaderMap::new(),
                AsyncBody::Empty,
            )
            .await?;

        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }

        let headers = resp.headers();
        Ok(HeadObjectOutput {
            etag: header_string(headers, http::header::ETAG),
            content_length: util::headers::header_u64(headers, http::header::CONTENT_LENGTH),
            content_type: header_string(headers, http::header::CONTENT_TYPE),
            last_modified: header_string(headers, http::header::LAST_MODIFIED),
        })
    }
}

pub struct PutObjectRequest {
    client: Client,
    bucket: String,
    key: String,
    content_type: Option<String>,
    metadata: Vec<(String, String)>,
    body: AsyncBody,
}

impl PutObjectRequest {
    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = AsyncBody::Bytes(body.into());
        self
    }

    /// Streams the body; the request is sent once and signed with an
    /// unsigned payload.
    pub fn body_stream<S>(mut self, stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, io::Error>> + Send + 'static,
    {
        self.body = AsyncBody::Stream(Box::pin(stream));
        self
    }

    pub async fn send(self) -> Result<PutObjectOutput> {
        let mut headers = HeaderMap::new();
        if let Some(ct) = self.content_type {
            let value = HeaderValue::from_str(&ct)
                .map_err(|_| Error::invalid_config("invalid Content-Type header"))?;
            headers.insert(http::header::CONTENT_TYPE, value);
        }

        for (name, value) in self.metadata {
            let header_name = util::headers::metadata_header_name(&name)?;
            let value = HeaderValue::from_str(&value)
                .map_err(|_| Error::invalid_config("invalid metadata header value"))?;
            headers.insert(header_name, value);
        }

        if let AsyncBody::Bytes(body) = &self.body {
            headers.insert(
                http::header::HeaderName::from_static("content-md5"),
                util::md5::content_md5_header_value(body)?,
            );
        }

        let resp = self
            .client
            .execute(
                Method::PUT,
                Some(&self.bucket),
                Some(&self.key),
                Vec::new(),
                headers,
                self.body,
            )
            .await?;

        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }

        Ok(PutObjectOutput {
            etag: header_string(resp.headers(), http::header::ETAG),
        })
    }
}

pub struct DeleteObjectRequest {
    client: Client,
    bucket: String,
    key: String,
}

impl DeleteObjectRequest {
    pub async fn send(self) -> Result<DeleteObjectOutput> {
        let resp = self
            .client
            .execute(
                Method::DELETE,
                Some(&self.bucket),
                Some(&self.key),
                Vec::new(),
                HeaderMap::new(),
                AsyncBody::Empty,
            )
            .await?;

        if resp.status() == StatusCode::NO_CONTENT || resp.status().is_success() {
            return Ok(DeleteObjectOutput);
        }

        Err(response_error(resp).await)
    }
}

pub struct ListObjectsV2Request {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    delimiter: Option<String>,
    continuation_token: Option<String>,
    max_keys: Option<u32>,
    cancellation: Option<CancellationToken>,
}

impl ListObjectsV2Request {
    pub fn prefix(mut self, value: impl Into<String>) -> Self {
        self.prefix = Some(value.into());
        self
    }

    pub fn delimiter(mut self, value: impl Into<String>) -> Self {
        self.delimiter = Some(value.into());
        self
    }

    pub fn continuation_token(mut self, value: impl Into<String>) -> Self {
        self.continuation_token = Some(value.into());
        self
    }

    pub fn max_keys(mut self, value: u32) -> Self {
        self.max_keys = Some(value);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Walks every page. Each call to `pager` starts a fresh listing.
    pub fn pager(self) -> ListObjectsV2Pager {
        ListObjectsV2Pager {
            request: self,
            done: false,
        }
    }

    pub async fn send(self) -> Result<ListObjectsV2Output> {
        self.fetch().await
    }

    async fn fetch(&self) -> Result<ListObjectsV2Output> {
        let mut query = vec![("list-type".to_string(), "2".to_string())];
        if let Some(v) = &self.prefix {
            query.push(("prefix".to_string(), v.clone()));
        }
        if let Some(v) = &self.delimiter {
            query.push(("delimiter".to_string(), v.clone()));
        }
        if let Some(v) = &self.continuation_token {
            query.push(("continuation-token".to_string(), v.clone()));
        }
        if let Some(v) = self.max_keys {
            query.push(("max-keys".to_string(), v.to_string()));
        }

        util::cancel::run(self.cancellation.as_ref(), async {
            let resp = self
                .client
                .execute(
                    Method::GET,
                    Some(&self.bucket),
                    None,
                    query,
                    HeaderMap::new(),
                    AsyncBody::Empty,
                )
                .await?;

            if !resp.status().is_success() {
                return Err(response_error(resp).await);
            }

            let xml = response_text(resp).await?;
            util::xml::parse_list_objects_v2(&xml)
        })
        .await
    }
}

pub struct ListObjectsV2Pager {
    request: ListObjectsV2Request,
    done: bool,
}

impl ListObjectsV2Pager {
    /// Next page, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<ListObjectsV2Output>> {
        if self.done {
            return Ok(None);
        }

        let page = self.request.fetch().await?;
        match page.next_continuation_token.clone() {
            Some(token) if page.is_truncated => self.request.continuation_token = Some(token),
            _ => self.done = true,
        }

        Ok(Some(page))
    }
}

/// Presigned URL for one object request. No network traffic.
pub struct PresignObjectRequest {
    client: Client,
    method: Method,
    bucket: String,
    key: String,
    expires_in: Duration,
    query_params: Vec<(String, String)>,
    headers: HeaderMap,
    metadata: Vec<(String, String)>,
}

impl PresignObjectRequest {
    /// Validity window, between 1 second and 7 days. Out-of-range values are
    /// rejected by `build`.
    pub fn expires_in(mut self, duration: Duration) -> Self {
        self.expires_in = duration;
        self
    }

    /// Adds a signed query parameter such as `response-content-disposition`.
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: http::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<PresignedRequest> {
        let mut headers = self.headers;
        for (name, value) in self.metadata {
            let header_name = util::headers::metadata_header_name(&name)?;
            let value = HeaderValue::from_str(&value)
                .map_err(|_| Error::invalid_config("invalid metadata header value"))?;
            headers.insert(header_name, value);
        }

        self.client.presign(
            self.method,
            &self.bucket,
            &self.key,
            self.expires_in,
            self.query_params,
            headers,
        )
    }
}
