//! S3 XML documents: the response shapes we read and the two request bodies
//! we write.

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    error::Error,
    types::{
        Bucket, BucketOwner, CompleteMultipartUploadOutput, CompletedPart,
        CreateMultipartUploadOutput, ListBucketsOutput, ListMultipartUploadsOutput,
        ListObjectsV2Output, ListPartsOutput, MultipartUpload, Object, Part,
    },
};

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Body of an error response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ErrorDocument {
    pub(crate) code: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) request_id: Option<String>,
    pub(crate) host_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    name: String,
    prefix: Option<String>,
    delimiter: Option<String>,
    is_truncated: Option<bool>,
    key_count: Option<u32>,
    next_continuation_token: Option<String>,
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    common_prefixes: Vec<CommonPrefix>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
    size: u64,
    #[serde(rename = "ETag")]
    etag: Option<String>,
    last_modified: Option<String>,
    storage_class: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CommonPrefix {
    prefix: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListAllMyBucketsResult {
    owner: Option<Owner>,
    buckets: Option<BucketList>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Owner {
    #[serde(rename = "ID")]
    id: Option<String>,
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct BucketList {
    #[serde(rename = "Bucket", default)]
    entries: Vec<BucketEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BucketEntry {
    name: String,
    creation_date: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateMultipartUploadResult {
    bucket: Option<String>,
    key: Option<String>,
    upload_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CompleteMultipartUploadResult {
    location: Option<String>,
    bucket: Option<String>,
    key: Option<String>,
    #[serde(rename = "ETag")]
    etag: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPartsResult {
    bucket: Option<String>,
    key: Option<String>,
    upload_id: Option<String>,
    is_truncated: Option<bool>,
    part_number_marker: Option<u32>,
    next_part_number_marker: Option<u32>,
    max_parts: Option<u32>,
    #[serde(rename = "Part", default)]
    parts: Vec<ListedPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedPart {
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: Option<String>,
    size: u64,
    last_modified: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListMultipartUploadsResult {
    bucket: Option<String>,
    prefix: Option<String>,
    is_truncated: Option<bool>,
    next_key_marker: Option<String>,
    next_upload_id_marker: Option<String>,
    #[serde(rename = "Upload", default)]
    uploads: Vec<ListedUpload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedUpload {
    key: String,
    upload_id: String,
    initiated: Option<String>,
}

fn decode<T: DeserializeOwned>(body: &str, operation: &str) -> Result<T, Error> {
    quick_xml::de::from_str(body).map_err(|e| {
        Error::decode(
            format!("failed to parse {operation} XML response"),
            Some(Box::new(e)),
        )
    })
}

fn encode<T: Serialize>(doc: &T, operation: &str) -> Result<Bytes, Error> {
    quick_xml::se::to_string(doc)
        .map(Bytes::from)
        .map_err(|e| Error::decode(format!("failed to encode {operation} XML"), Some(Box::new(e))))
}

/// Empty markers are how some servers say "none".
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

pub(crate) fn parse_error_xml(body: &str) -> Option<ErrorDocument> {
    if body.trim().is_empty() {
        return None;
    }
    quick_xml::de::from_str(body).ok()
}

pub(crate) fn parse_list_objects_v2(body: &str) -> Result<ListObjectsV2Output, Error> {
    let doc: ListBucketResult = decode(body, "ListObjectsV2")?;
    Ok(ListObjectsV2Output {
        name: doc.name,
        prefix: doc.prefix,
        delimiter: doc.delimiter,
        is_truncated: doc.is_truncated.unwrap_or_default(),
        key_count: doc.key_count,
        next_continuation_token: non_empty(doc.next_continuation_token),
        contents: doc
            .contents
            .into_iter()
            .map(|o| Object {
                key: o.key,
                size: o.size,
                etag: o.etag,
                last_modified: o.last_modified,
                storage_class: o.storage_class,
            })
            .collect(),
        common_prefixes: doc.common_prefixes.into_iter().map(|p| p.prefix).collect(),
    })
}

pub(crate) fn parse_list_buckets(body: &str) -> Result<ListBucketsOutput, Error> {
    let doc: ListAllMyBucketsResult = decode(body, "ListBuckets")?;
    Ok(ListBucketsOutput {
        owner: doc.owner.map(|o| BucketOwner {
            id: o.id,
            display_name: o.display_name,
        }),
        buckets: doc
            .buckets
            .map(|list| list.entries)
            .unwrap_or_default()
            .into_iter()
            .map(|b| Bucket {
                name: b.name,
                creation_date: b.creation_date,
            })
            .collect(),
    })
}

pub(crate) fn parse_create_multipart_upload(
    body: &str,
) -> Result<CreateMultipartUploadOutput, Error> {
    let doc: InitiateMultipartUploadResult = decode(body, "CreateMultipartUpload")?;
    if doc.upload_id.trim().is_empty() {
        return Err(Error::decode(
            "CreateMultipartUpload response has an empty UploadId",
            None,
        ));
    }
    Ok(CreateMultipartUploadOutput {
        bucket: doc.bucket,
        key: doc.key,
        upload_id: doc.upload_id,
    })
}

/// Parses a CompleteMultipartUpload response.
///
/// A 200 reply can still carry an `<Error>` document; that is returned as an
/// API error with the given status.
pub(crate) fn parse_complete_multipart_upload(
    body: &str,
    status: http::StatusCode,
) -> Result<CompleteMultipartUploadOutput, Error> {
    if body.contains("<Error>")
        && let Some(err) = parse_error_xml(body)
    {
        return Err(Error::Api {
            status,
            code: err.code,
            message: err.message,
            request_id: err.request_id,
            host_id: err.host_id,
            body_snippet: Some(crate::util::text::truncate_snippet(body, 4096)),
        });
    }

    let doc: CompleteMultipartUploadResult = decode(body, "CompleteMultipartUpload")?;
    Ok(CompleteMultipartUploadOutput {
        location: doc.location,
        bucket: doc.bucket,
        key: doc.key,
        etag: doc.etag,
    })
}

pub(crate) fn parse_list_parts(body: &str) -> Result<ListPartsOutput, Error> {
    let doc: ListPartsResult = decode(body, "ListParts")?;
    Ok(ListPartsOutput {
        bucket: doc.bucket,
        key: doc.key,
        upload_id: doc.upload_id,
        is_truncated: doc.is_truncated.unwrap_or_default(),
        part_number_marker: doc.part_number_marker,
        next_part_number_marker: doc.next_part_number_marker,
        max_parts: doc.max_parts,
        parts: doc
            .parts
            .into_iter()
            .map(|p| Part {
                part_number: p.part_number,
                etag: p.etag,
                size: p.size,
                last_modified: p.last_modified,
            })
            .collect(),
    })
}

pub(crate) fn parse_list_multipart_uploads(
    body: &str,
) -> Result<ListMultipartUploadsOutput, Error> {
    let doc: ListMultipartUploadsResult = decode(body, "ListMultipartUploads")?;
    Ok(ListMultipartUploadsOutput {
        bucket: doc.bucket,
        prefix: non_empty(doc.prefix),
        is_truncated: doc.is_truncated.unwrap_or_default(),
        next_key_marker: non_empty(doc.next_key_marker),
        next_upload_id_marker: non_empty(doc.next_upload_id_marker),
        uploads: doc
            .uploads
            .into_iter()
            .map(|u| MultipartUpload {
                key: u.key,
                upload_id: u.upload_id,
                initiated: u.initiated,
            })
            .collect(),
    })
}

pub(crate) fn encode_create_bucket_configuration(region: &str) -> Result<Bytes, Error> {
    #[derive(Serialize)]
    #[serde(rename = "CreateBucketConfiguration")]
    struct Doc<'a> {
        #[serde(rename = "@xmlns")]
        xmlns: &'static str,
        #[serde(rename = "LocationConstraint")]
        location_constraint: &'a str,
    }

    if region.trim().is_empty() {
        return Err(Error::invalid_config(
            "create bucket location constraint must not be empty",
        ));
    }
    encode(
        &Doc {
            xmlns: S3_XMLNS,
            location_constraint: region,
        },
        "CreateBucketConfiguration",
    )
}

/// Encodes the part list. Parts must be non-empty and strictly ascending.
pub(crate) fn encode_complete_multipart_upload(parts: &[CompletedPart]) -> Result<Bytes, Error> {
    #[derive(Serialize)]
    #[serde(rename = "CompleteMultipartUpload")]
    struct Doc<'a> {
        #[serde(rename = "@xmlns")]
        xmlns: &'static str,
        #[serde(rename = "Part")]
        parts: Vec<DocPart<'a>>,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct DocPart<'a> {
        part_number: u32,
        #[serde(rename = "ETag")]
        etag: &'a str,
    }

    if parts.is_empty() {
        return Err(Error::invalid_config(
            "complete multipart upload requires at least one part",
        ));
    }
    if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
        return Err(Error::invalid_config(
            "complete multipart upload parts must be in ascending order",
        ));
    }

    let parts = parts
        .iter()
        .map(|p| DocPart {
            part_number: p.part_number,
            etag: &p.etag,
        })
        .collect();
    encode(
        &Doc {
            xmlns: S3_XMLNS,
            parts,
        },
        "CompleteMultipartUpload",
    )
}
