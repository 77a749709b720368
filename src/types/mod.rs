//! Request and response values shared by the façades, the reader and the
//! upload coordinator.

use bytes::Bytes;
use http::{HeaderMap, Method};
use url::Url;

use crate::error::Result;

/// Streaming response body.
pub type ByteStream =
    std::pin::Pin<Box<dyn futures_core::Stream<Item = Result<Bytes>> + Send + 'static>>;

/// A signed request that anyone holding it can send until it expires.
///
/// `headers` lists the headers that took part in the signature; the caller
/// must send them unchanged.
#[derive(Clone, Debug)]
pub struct PresignedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

/// What the service reported about an object at one point in time.
///
/// Readers pin to this snapshot: `size` bounds seeks and `etag` detects a
/// replaced object between ranged reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// Unquoted.
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

pub struct GetObjectOutput {
    pub body: ByteStream,
    pub etag: Option<String>,
    /// Length of this body, which is the range length on a 206.
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    /// Inclusive `(first, last)` byte offsets of a partial body.
    pub range: Option<(u64, u64)>,
    /// Size of the whole object, from `Content-Range` when partial.
    pub total_size: Option<u64>,
    pub last_modified: Option<String>,
}

impl std::fmt::Debug for GetObjectOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetObjectOutput")
            .field("etag", &self.etag)
            .field("range", &self.range)
            .field("total_size", &self.total_size)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl GetObjectOutput {
    /// Drains the body into one buffer.
    pub async fn bytes(self) -> Result<Bytes> {
        use futures_util::TryStreamExt as _;

        let mut buf = Vec::with_capacity(
            self.content_length
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or_default(),
        );
        let mut body = self.body;
        while let Some(chunk) = body.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.into())
    }
}

#[derive(Debug)]
pub struct HeadObjectOutput {
    pub etag: Option<String>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug)]
pub struct PutObjectOutput {
    pub etag: Option<String>,
}

#[derive(Debug)]
pub struct DeleteObjectOutput;

#[derive(Debug)]
pub struct CreateMultipartUploadOutput {
    pub bucket: Option<String>,
    pub key: Option<String>,
    /// Names the upload in every later part, list, complete and abort call.
    pub upload_id: String,
}

#[derive(Debug)]
pub struct UploadPartOutput {
    pub etag: Option<String>,
}

/// A stored part as it goes into the completion body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    /// As returned by the part upload, quotes included.
    pub etag: String,
}

#[derive(Debug)]
pub struct CompleteMultipartUploadOutput {
    pub location: Option<String>,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub etag: Option<String>,
}

/// Result of a high-level upload, single PUT or multipart.
#[derive(Debug)]
pub struct UploadOutput {
    pub etag: Option<String>,
    /// `None` when the object went up in a single PUT.
    pub upload_id: Option<String>,
    /// 1 for a single PUT.
    pub parts: u32,
    /// Bytes consumed from the input.
    pub size: u64,
}

#[derive(Debug)]
pub struct AbortMultipartUploadOutput;

/// One page of ListParts.
#[derive(Debug)]
pub struct ListPartsOutput {
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub upload_id: Option<String>,
    pub is_truncated: bool,
    pub part_number_marker: Option<u32>,
    /// Pass back as the marker to fetch the following page.
    pub next_part_number_marker: Option<u32>,
    pub max_parts: Option<u32>,
    pub parts: Vec<Part>,
}

/// A part the service already holds for an upload.
#[derive(Clone, Debug)]
pub struct Part {
    pub part_number: u32,
    pub etag: Option<String>,
    pub size: u64,
    pub last_modified: Option<String>,
}

/// One page of ListMultipartUploads.
#[derive(Debug)]
pub struct ListMultipartUploadsOutput {
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
    pub uploads: Vec<MultipartUpload>,
}

/// An upload that was initiated but neither completed nor aborted.
#[derive(Clone, Debug)]
pub struct MultipartUpload {
    pub key: String,
    pub upload_id: String,
    /// ISO-8601 timestamp; these sort chronologically as strings.
    pub initiated: Option<String>,
}

/// One page of ListObjectsV2.
#[derive(Debug)]
pub struct ListObjectsV2Output {
    pub name: String,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub is_truncated: bool,
    pub key_count: Option<u32>,
    pub next_continuation_token: Option<String>,
    pub contents: Vec<Object>,
    /// Keys rolled up at the delimiter, each ending with it.
    pub common_prefixes: Vec<String>,
}

#[derive(Debug)]
pub struct Object {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub storage_class: Option<String>,
}

#[derive(Debug)]
pub struct ListBucketsOutput {
    pub owner: Option<BucketOwner>,
    pub buckets: Vec<Bucket>,
}

#[derive(Debug)]
pub struct BucketOwner {
    pub id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug)]
pub struct Bucket {
    pub name: String,
    pub creation_date: Option<String>,
}

#[derive(Debug)]
pub struct HeadBucketOutput {
    /// From `x-amz-bucket-region`.
    pub region: Option<String>,
}

#[derive(Debug)]
pub struct CreateBucketOutput;

#[derive(Debug)]
pub struct DeleteBucketOutput;
