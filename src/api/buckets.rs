//! Bucket lifecycle calls. Each is a single request checked for a 2xx status.

use http::{HeaderMap, HeaderValue, Method};

use crate::{
    api::response_text,
    client::Client,
    error::{Error, Result},
    transport::async_transport::{AsyncBody, response_error},
    types::{CreateBucketOutput, DeleteBucketOutput, HeadBucketOutput, ListBucketsOutput},
    util::{headers::header_string, xml},
};

#[derive(Clone)]
pub struct BucketsService {
    client: Client,
}

impl BucketsService {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn list(&self) -> ListBucketsRequest {
        ListBucketsRequest {
            client: self.client.clone(),
        }
    }

    pub fn head(&self, bucket: impl Into<String>) -> HeadBucketRequest {
        HeadBucketRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
        }
    }

    /// Creating a bucket that already exists fails with
    /// `BucketAlreadyOwnedByYou` or `BucketAlreadyExists`.
    pub fn create(&self, bucket: impl Into<String>) -> CreateBucketRequest {
        CreateBucketRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
            location_constraint: None,
        }
    }

    pub fn delete(&self, bucket: impl Into<String>) -> DeleteBucketRequest {
        DeleteBucketRequest {
            client: self.client.clone(),
            bucket: bucket.into(),
        }
    }
}

/// Sends to the service root or a bucket root; any non-2xx reply becomes
/// the service error it carries.
async fn send_checked(
    client: &Client,
    method: Method,
    bucket: Option<&str>,
    headers: HeaderMap,
    body: AsyncBody,
) -> Result<reqwest::Response> {
    if bucket.is_some_and(|b| b.trim().is_empty()) {
        return Err(Error::invalid_config("bucket name must not be empty"));
    }
    let resp = client
        .execute(method, bucket, None, Vec::new(), headers, body)
        .await?;
    if !resp.status().is_success() {
        return Err(response_error(resp).await);
    }
    Ok(resp)
}

pub struct ListBucketsRequest {
    client: Client,
}

impl ListBucketsRequest {
    pub async fn send(self) -> Result<ListBucketsOutput> {
        let resp = send_checked(
            &self.client,
            Method::GET,
            None,
            HeaderMap::new(),
            AsyncBody::Empty,
        )
        .await?;
        xml::parse_list_buckets(&response_text(resp).await?)
    }
}

pub struct HeadBucketRequest {
    client: Client,
    bucket: String,
}

impl HeadBucketRequest {
    /// Also answers which region holds the bucket, when the service says.
    pub async fn send(self) -> Result<HeadBucketOutput> {
        let resp = send_checked(
            &self.client,
            Method::HEAD,
            Some(&self.bucket),
            HeaderMap::new(),
            AsyncBody::Empty,
        )
        .await?;
        Ok(HeadBucketOutput {
            region: header_string(resp.headers(), "x-amz-bucket-region"),
        })
    }
}

pub struct CreateBucketRequest {
    client: Client,
    bucket: String,
    location_constraint: Option<String>,
}

impl CreateBucketRequest {
    /// Region to create the bucket in; sent as a `CreateBucketConfiguration` body.
    pub fn location_constraint(mut self, region: impl Into<String>) -> Self {
        self.location_constraint = Some(region.into());
        self
    }

    pub async fn send(self) -> Result<CreateBucketOutput> {
        let mut headers = HeaderMap::new();
        let body = match &self.location_constraint {
            Some(region) => {
                headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/xml"),
                );
                AsyncBody::Bytes(xml::encode_create_bucket_configuration(region)?)
            }
            None => AsyncBody::Empty,
        };
        send_checked(&self.client, Method::PUT, Some(&self.bucket), headers, body).await?;
        Ok(CreateBucketOutput)
    }
}

pub struct DeleteBucketRequest {
    client: Client,
    bucket: String,
}

impl DeleteBucketRequest {
    /// Only empty buckets can be deleted; otherwise `BucketNotEmpty`.
    pub async fn send(self) -> Result<DeleteBucketOutput> {
        send_checked(
            &self.client,
            Method::DELETE,
            Some(&self.bucket),
            HeaderMap::new(),
            AsyncBody::Empty,
        )
        .await?;
        Ok(DeleteBucketOutput)
    }
}
