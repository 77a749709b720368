#![allow(dead_code)]

pub(crate) mod fake;

use std::{
    env,
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use s3io::{AddressingStyle, Auth, Client, Error, Region};

static BUCKET_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub(crate) struct TestConfig {
    pub(crate) endpoint: String,
    pub(crate) region: Region,
    pub(crate) auth: Auth,
}

/// Live endpoint settings; `None` skips the calling test.
pub(crate) fn load_config() -> Result<Option<TestConfig>, Error> {
    let (Ok(endpoint), Ok(auth)) = (env::var("S3_TEST_ENDPOINT"), Auth::from_env()) else {
        return Ok(None);
    };
    let region = env::var("S3_TEST_REGION").unwrap_or_else(|_| "us-east-1".into());

    Ok(Some(TestConfig {
        endpoint,
        region: Region::new(region)?,
        auth,
    }))
}

/// `<prefix><millis>-<seq>`; unique within a run and across runs.
pub(crate) fn unique_bucket(prefix: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = BUCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}{millis}-{seq}")
}

pub(crate) fn build_client(cfg: &TestConfig, style: AddressingStyle) -> Result<Client, Error> {
    let builder = Client::builder(&cfg.endpoint)?;
    builder
        .region(cfg.region.as_str())
        .auth(cfg.auth.clone())
        .addressing_style(style)
        .build()
}

/// Deterministic, non-repeating-looking test content.
pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

/// Runs `f` against a fresh bucket, then drops the bucket with everything
/// left in it. A panic in `f` is resumed after cleanup.
pub(crate) async fn with_bucket<F, Fut>(client: &Client, prefix: &str, f: F) -> Result<(), Error>
where
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = Result<(), Error>>,
{
    use futures_util::FutureExt as _;

    let bucket = unique_bucket(prefix);
    client.buckets().create(&bucket).send().await?;

    let outcome = std::panic::AssertUnwindSafe(f(bucket.clone()))
        .catch_unwind()
        .await;
    let cleanup = drop_bucket(client, &bucket).await;

    match outcome {
        Err(panic) => std::panic::resume_unwind(panic),
        Ok(Err(err)) => Err(err),
        Ok(Ok(())) => cleanup,
    }
}

async fn drop_bucket(client: &Client, bucket: &str) -> Result<(), Error> {
    let objects = client.objects();

    let mut uploads = objects.list_uploads(bucket).pager();
    while let Some(page) = uploads.next_page().await? {
        for upload in page.uploads {
            // Another cleanup may have raced us to it.
            let _ = objects
                .abort_multipart_upload(bucket, &upload.key, &upload.upload_id)
                .send()
                .await;
        }
    }

    let mut listing = objects.list_v2(bucket).pager();
    while let Some(page) = listing.next_page().await? {
        for object in page.contents {
            objects.delete(bucket, &object.key).send().await?;
        }
    }

    match client.buckets().delete(bucket).send().await {
        Err(err) if err.code() != Some("NoSuchBucket") => Err(err),
        _ => Ok(()),
    }
}
