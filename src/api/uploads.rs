use std::path::Path;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt as _};
use tokio_util::sync::CancellationToken;

use super::objects::ObjectsService;
use crate::{
    api::response_text,
    client::Client,
    error::{Error, Result},
    multipart::{UploadCoordinator, UploadOptions},
    transport::async_transport::{AsyncBody, response_error},
    types::{
        AbortMultipartUploadOutput, CompleteMultipartUploadOutput, CompletedPart,
        CreateMultipartUploadOutput, ListMultipartUploadsOutput, ListPartsOutput,
        MultipartUpload, UploadOutput, UploadPartOutput,
    },
    util::{self, headers::header_string},
};

impl ObjectsService {
    pub fn create_multipart_upload(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> CreateMultipartUploadRequest {
        CreateMultipartUploadRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            key: key.into(),
            content_type: None,
            metadata: Vec::new(),
        }
    }

    pub fn upload_part(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        upload_id: impl Into<String>,
        part_number: u32,
    ) -> UploadPartRequest {
        UploadPartRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            key: key.into(),
            upload_id: upload_id.into(),
            part_number,
            body: Bytes::new(),
            digests: None,
        }
    }

    pub fn complete_multipart_upload(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> CompleteMultipartUploadRequest {
        CompleteMultipartUploadRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            key: key.into(),
            upload_id: upload_id.into(),
            parts: Vec::new(),
        }
    }

    pub fn abort_multipart_upload(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> AbortMultipartUploadRequest {
        AbortMultipartUploadRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            key: key.into(),
            upload_id: upload_id.into(),
        }
    }

    pub fn list_parts(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> ListPartsRequest {
        ListPartsRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            key: key.into(),
            upload_id: upload_id.into(),
            max_parts: None,
            part_number_marker: None,
        }
    }

    /// Uploads that were started but neither completed nor aborted.
    pub fn list_uploads(&self, bucket: impl Into<String>) -> ListMultipartUploadsRequest {
        ListMultipartUploadsRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            prefix: None,
            key_marker: None,
            upload_id_marker: None,
            max_uploads: None,
            cancellation: None,
        }
    }

    /// Aborts every incomplete upload of exactly `key`.
    pub fn remove_incomplete_upload(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> RemoveIncompleteUploadRequest {
        RemoveIncompleteUploadRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            key: key.into(),
            cancellation: None,
        }
    }

    /// Uploads an object, switching to multipart for large or unsized input.
    pub fn upload(&self, bucket: impl Into<String>, key: impl Into<String>) -> UploadObjectRequest {
        let defaults = self.client.upload_defaults();
        UploadObjectRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            key: key.into(),
            options: UploadOptions {
                content_type: None,
                part_size: Some(defaults.part_size),
                concurrency: Some(defaults.concurrency),
                cancellation: None,
            },
            resume_incomplete: false,
        }
    }
}

pub struct CreateMultipartUploadRequest {
    client: Client,
    bucket: String,
    key: String,
    content_type: Option<String>,
    metadata: Vec<(String, String)>,
}

impl CreateMultipartUploadRequest {
    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    pub async fn send(self) -> Result<CreateMultipartUploadOutput> {
        let mut headers = HeaderMap::new();
        if let Some(value) = self.content_type {
            let value = HeaderValue::from_str(&value)
                .map_err(|_| Error::invalid_config("invalid Content-Type header"))?;
            headers.insert(http::header::CONTENT_TYPE, value);
        }

        for (name, value) in self.metadata {
            let header_name = util::headers::metadata_header_name(&name)?;
            let value = HeaderValue::from_str(&value)
                .map_err(|_| Error::invalid_config("invalid metadata header value"))?;
            headers.insert(header_name, value);
        }

        let resp = self
            .client
            .execute(
                Method::POST,
                Some(&self.bucket),
                Some(&self.key),
                vec![("uploads".to_string(), String::new())],
                headers,
                AsyncBody::Empty,
            )
            .await?;

        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }

        let xml = response_text(resp).await?;
        util::xml::parse_create_multipart_upload(&xml)
    }
}

pub struct UploadPartRequest {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    part_number: u32,
    body: Bytes,
    digests: Option<([u8; 16], String)>,
}

impl UploadPartRequest {
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Digests the caller already computed: binary MD5 and hex SHA-256.
    pub(crate) fn digests(mut self, md5: [u8; 16], sha256: String) -> Self {
        self.digests = Some((md5, sha256));
        self
    }

    pub async fn send(self) -> Result<UploadPartOutput> {
        if self.part_number == 0 || self.part_number > crate::multipart::planner::MAX_PARTS {
            return Err(Error::invalid_config("part number must be between 1 and 10000"));
        }

        let (md5, sha256) = match self.digests {
            Some(d) => d,
            None => (
                util::md5::md5_digest(&self.body),
                crate::signing::sha256_hex(&self.body),
            ),
        };
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::HeaderName::from_static("content-md5"),
            util::md5::base64_md5_header(&md5)?,
        );
        headers.insert(
            "x-amz-content-sha256",
            HeaderValue::from_str(&sha256)
                .map_err(|_| Error::invalid_config("invalid payload hash"))?,
        );

        let query = vec![
            ("partNumber".to_string(), self.part_number.to_string()),
            ("uploadId".to_string(), self.upload_id),
        ];

        let resp = self
            .client
            .execute(
                Method::PUT,
                Some(&self.bucket),
                Some(&self.key),
                query,
                headers,
                AsyncBody::Bytes(self.body),
            )
            .await?;

        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }

        Ok(UploadPartOutput {
            etag: header_string(resp.headers(), http::header::ETAG),
        })
    }
}

pub struct CompleteMultipartUploadRequest {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
}

impl CompleteMultipartUploadRequest {
    pub fn part(mut self, part_number: u32, etag: impl Into<String>) -> Self {
        self.parts.push(CompletedPart {
            part_number,
            etag: etag.into(),
        });
        self
    }

    pub fn parts<I>(mut self, iter: I) -> Self
    where
        I: IntoIterator<Item = CompletedPart>,
    {
        self.parts.extend(iter);
        self
    }

    /// Sends the part list, sorted by part number.
    ///
    /// The request may be repeated after an ambiguous failure; a repeat can
    /// then answer `NoSuchUpload` even though the object was assembled.
    pub async fn send(mut self) -> Result<CompleteMultipartUploadOutput> {
        self.parts.sort_by_key(|p| p.part_number);
        let body = util::xml::encode_complete_multipart_upload(&self.parts)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml"),
        );

        let resp = self
            .client
            .execute_reissuable(
                Method::POST,
                Some(&self.bucket),
                Some(&self.key),
                vec![("uploadId".to_string(), self.upload_id)],
                headers,
                AsyncBody::Bytes(body),
            )
            .await?;

        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }

        let status = resp.status();
        let xml = response_text(resp).await?;
        util::xml::parse_complete_multipart_upload(&xml, status)
    }
}

pub struct AbortMultipartUploadRequest {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
}

impl AbortMultipartUploadRequest {
    pub async fn send(self) -> Result<AbortMultipartUploadOutput> {
        let resp = self
            .client
            .execute(
                Method::DELETE,
                Some(&self.bucket),
                Some(&self.key),
                vec![("uploadId".to_string(), self.upload_id)],
                HeaderMap::new(),
                AsyncBody::Empty,
            )
            .await?;

        if resp.status() == StatusCode::NO_CONTENT || resp.status().is_success() {
            return Ok(AbortMultipartUploadOutput);
        }

        Err(response_error(resp).await)
    }
}

pub struct ListPartsRequest {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    max_parts: Option<u32>,
    part_number_marker: Option<u32>,
}

impl ListPartsRequest {
    pub fn max_parts(mut self, value: u32) -> Self {
        self.max_parts = Some(value);
        self
    }

    pub fn part_number_marker(mut self, value: u32) -> Self {
        self.part_number_marker = Some(value);
        self
    }

    pub async fn send(self) -> Result<ListPartsOutput> {
        let mut query = vec![("uploadId".to_string(), self.upload_id)];
        if let Some(v) = self.max_parts {
            query.push(("max-parts".to_string(), v.to_string()));
        }
        if let Some(v) = self.part_number_marker {
            query.push(("part-number-marker".to_string(), v.to_string()));
        }

        let resp = self
            .client
            .execute(
                Method::GET,
                Some(&self.bucket),
                Some(&self.key),
                query,
                HeaderMap::new(),
                AsyncBody::Empty,
            )
            .await?;

        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }

        let xml = response_text(resp).await?;
        util::xml::parse_list_parts(&xml)
    }
}

pub struct ListMultipartUploadsRequest {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    key_marker: Option<String>,
    upload_id_marker: Option<String>,
    max_uploads: Option<u32>,
    cancellation: Option<CancellationToken>,
}

impl ListMultipartUploadsRequest {
    pub fn prefix(mut self, value: impl Into<String>) -> Self {
        self.prefix = Some(value.into());
        self
    }

    pub fn key_marker(mut self, value: impl Into<String>) -> Self {
        self.key_marker = Some(value.into());
        self
    }

    pub fn upload_id_marker(mut self, value: impl Into<String>) -> Self {
        self.upload_id_marker = Some(value.into());
        self
    }

    pub fn max_uploads(mut self, value: u32) -> Self {
        self.max_uploads = Some(value);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn pager(self) -> ListMultipartUploadsPager {
        ListMultipartUploadsPager {
            request: self,
            done: false,
        }
    }

    pub async fn send(self) -> Result<ListMultipartUploadsOutput> {
        self.fetch().await
    }

    async fn fetch(&self) -> Result<ListMultipartUploadsOutput> {
        let mut query = vec![("uploads".to_string(), String::new())];
        if let Some(v) = &self.prefix {
            query.push(("prefix".to_string(), v.clone()));
        }
        if let Some(v) = &self.key_marker {
            query.push(("key-marker".to_string(), v.clone()));
        }
        if let Some(v) = &self.upload_id_marker {
            query.push(("upload-id-marker".to_string(), v.clone()));
        }
        if let Some(v) = self.max_uploads {
            query.push(("max-uploads".to_string(), v.to_string()));
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
            util::xml::parse_list_multipart_uploads(&xml)
        })
        .await
    }
}

pub struct ListMultipartUploadsPager {
    request: ListMultipartUploadsRequest,
    done: bool,
}

impl ListMultipartUploadsPager {
    pub async fn next_page(&mut self) -> Result<Option<ListMultipartUploadsOutput>> {
        if self.done {
            return Ok(None);
        }

        let page = self.request.fetch().await?;
        let next_key = page.next_key_marker.clone().filter(|m| !m.is_empty());
        if page.is_truncated && next_key.is_some() {
            self.request.key_marker = next_key;
            self.request.upload_id_marker =
                page.next_upload_id_marker.clone().filter(|m| !m.is_empty());
        } else {
            self.done = true;
        }

        Ok(Some(page))
    }

    /// Remaining uploads on all pages whose key equals `key`.
    pub(crate) async fn collect_for_key(mut self, key: &str) -> Result<Vec<MultipartUpload>> {
        let mut out = Vec::new();
        while let Some(page) = self.next_page().await? {
            out.extend(page.uploads.into_iter().filter(|u| u.key == key));
        }
        Ok(out)
    }
}

pub struct RemoveIncompleteUploadRequest {
    client: Client,
    bucket: String,
    key: String,
    cancellation: Option<CancellationToken>,
}

impl RemoveIncompleteUploadRequest {
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns the ids of the uploads that were aborted.
    pub async fn send(self) -> Result<Vec<String>> {
        let objects = self.client.objects();
        let mut listing = objects.list_uploads(&self.bucket).prefix(&self.key);
        if let Some(token) = &self.cancellation {
            listing = listing.cancellation(token.clone());
        }
        let uploads = listing.pager().collect_for_key(&self.key).await?;

        let mut removed = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let abort = objects
                .abort_multipart_upload(&self.bucket, &self.key, &upload.upload_id)
                .send();
            util::cancel::run(self.cancellation.as_ref(), abort)
                .await
                .map_err(|e| e.within_upload(&upload.upload_id))?;
            #[cfg(feature = "tracing")]
            tracing::debug!(upload_id = %upload.upload_id, key = %self.key, "aborted incomplete upload");
            removed.push(upload.upload_id);
        }
        Ok(removed)
    }
}

/// High-level object upload.
///
/// Input smaller than the part size goes out as one PUT; anything else (or
/// input of unknown size) uses a multipart upload with a bounded number of
/// parts in flight.
pub struct UploadObjectRequest {
    client: Client,
    bucket: String,
    key: String,
    options: UploadOptions,
    resume_incomplete: bool,
}

impl UploadObjectRequest {
    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.options.content_type = Some(value.into());
        self
    }

    pub fn part_size(mut self, bytes: u64) -> Self {
        self.options.part_size = Some(bytes);
        self
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.options.concurrency = Some(limit);
        self
    }

    /// Continues the most recent incomplete upload of this key, if any,
    /// skipping parts that are already stored and verified.
    pub fn resume_incomplete(mut self, enabled: bool) -> Self {
        self.resume_incomplete = enabled;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.options.cancellation = Some(token);
        self
    }

    pub async fn send_bytes(self, body: impl Into<Bytes>) -> Result<UploadOutput> {
        let body: Bytes = body.into();
        let size = body.len() as u64;
        self.send_reader(&body[..], Some(size)).await
    }

    /// Uploads a local file, sized from its metadata.
    pub async fn send_file(self, path: impl AsRef<Path>) -> Result<UploadOutput> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            Error::upload_with_source(format!("failed to open {}", path.display()), Box::new(e))
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| {
                Error::upload_with_source(format!("failed to stat {}", path.display()), Box::new(e))
            })?
            .len();
        self.send_reader(file, Some(size)).await
    }

    /// Reads `reader` to the end. `size`, when given, must match the input
    /// length exactly.
    pub async fn send_reader<R>(self, mut reader: R, size: Option<u64>) -> Result<UploadOutput>
    where
        R: AsyncRead + Unpin,
    {
        let part_size = self
            .options
            .part_size
            .unwrap_or(self.client.upload_defaults().part_size);

        if let Some(size) = size
            && size < part_size
        {
            return self.put_single(&mut reader, size).await;
        }

        let mut coordinator = match self.incomplete_upload_id().await? {
            Some(upload_id) => {
                UploadCoordinator::resume(
                    &self.client,
                    &self.bucket,
                    &self.key,
                    upload_id,
                    self.options.clone(),
                )
                .await?
            }
            None => {
                UploadCoordinator::start(&self.client, &self.bucket, &self.key, self.options.clone())
                    .await?
            }
        };

        coordinator.upload_from(&mut reader, size).await?;
        let completed = coordinator.complete().await?;
        let session = coordinator.session();
        Ok(UploadOutput {
            etag: completed.etag,
            upload_id: Some(session.upload_id().to_string()),
            parts: coordinator.planned_parts().unwrap_or(0),
            size: coordinator.bytes_read(),
        })
    }

    async fn put_single<R>(&self, reader: &mut R, size: u64) -> Result<UploadOutput>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::with_capacity(size as usize);
        let read = util::cancel::run(self.options.cancellation.as_ref(), async {
            (&mut *reader)
                .take(size + 1)
                .read_to_end(&mut buf)
                .await
                .map_err(|e| Error::upload_with_source("failed to read upload input", Box::new(e)))
        })
        .await?;
        if read as u64 != size {
            return Err(Error::upload(
                None,
                format!("input is {read} bytes but {size} were declared"),
            ));
        }

        let mut put = self
            .client
            .objects()
            .put(&self.bucket, &self.key)
            .body_bytes(buf);
        if let Some(ct) = &self.options.content_type {
            put = put.content_type(ct);
        }
        let out = util::cancel::run(self.options.cancellation.as_ref(), put.send()).await?;
        Ok(UploadOutput {
            etag: out.etag,
            upload_id: None,
            parts: 1,
            size,
        })
    }

    async fn incomplete_upload_id(&self) -> Result<Option<String>> {
        if !self.resume_incomplete {
            return Ok(None);
        }
        let mut listing = self
            .client
            .objects()
            .list_uploads(&self.bucket)
            .prefix(&self.key);
        if let Some(token) = &self.options.cancellation {
            listing = listing.cancellation(token.clone());
        }
        let uploads = listing.pager().collect_for_key(&self.key).await?;
        Ok(latest_upload(uploads).map(|u| u.upload_id))
    }
}

/// Most recently initiated upload; RFC 3339 timestamps order as strings.
/// Without timestamps the last one listed wins.
fn latest_upload(uploads: Vec<MultipartUpload>) -> Option<MultipartUpload> {
    uploads
        .into_iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| {
            a.initiated
                .cmp(&b.initiated)
                .then_with(|| ia.cmp(ib))
        })
        .map(|(_, u)| u)
}
