mod buckets;
mod objects;
mod uploads;

pub use buckets::{
    BucketsService, CreateBucketRequest, DeleteBucketRequest, HeadBucketRequest,
    ListBucketsRequest,
};
pub use objects::{
    DeleteObjectRequest, GetObjectRequest, HeadObjectRequest, ListObjectsV2Pager,
    ListObjectsV2Request, ObjectsService, PresignObjectRequest, PutObjectRequest,
};
pub use uploads::{
    AbortMultipartUploadRequest, CompleteMultipartUploadRequest, CreateMultipartUploadRequest,
    ListMultipartUploadsPager, ListMultipartUploadsRequest, ListPartsRequest,
    RemoveIncompleteUploadRequest, UploadObjectRequest, UploadPartRequest,
};

pub(crate) use objects::RangedGet;

use crate::error::{Error, Result};

pub(crate) async fn response_text(resp: reqwest::Response) -> Result<String> {
    resp.text()
        .await
        .map_err(|e| Error::transport("failed to read response body", Some(Box::new(e))))
}
