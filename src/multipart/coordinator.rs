use bytes::Bytes;
use http::StatusCode;
use tokio::{
    io::{AsyncRead, AsyncReadExt as _},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "tracing")]
use tracing::Instrument as _;

use super::{
    planner::{PartPlan, PartSizing},
    session::{PartDigest, Reconciled, UploadSession, UploadState},
};
use crate::{
    client::Client,
    error::{Error, Result},
    types::{CompleteMultipartUploadOutput, CompletedPart},
    util::{self, headers::trim_etag},
};

/// Per-upload settings; unset fields fall back to the client defaults.
#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub part_size: Option<u64>,
    pub concurrency: Option<usize>,
    pub cancellation: Option<CancellationToken>,
}

/// Drives one multipart upload from initiation to completion or abort.
///
/// Input is read sequentially and buffered one part at a time; at most
/// `concurrency` parts are in flight. Failures leave the session `Failed`
/// and return an error carrying the upload id so the caller can resume or
/// abort later. Nothing is aborted automatically.
pub struct UploadCoordinator {
    client: Client,
    session: UploadSession,
    sizing: PartSizing,
    concurrency: usize,
    token: Option<CancellationToken>,
    planned_parts: Option<u32>,
    bytes_read: u64,
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("session", &self.session)
            .field("sizing", &self.sizing)
            .field("concurrency", &self.concurrency)
            .field("planned_parts", &self.planned_parts)
            .finish()
    }
}

impl UploadCoordinator {
    /// Initiates a new upload.
    pub async fn start(
        client: &Client,
        bucket: &str,
        key: &str,
        options: UploadOptions,
    ) -> Result<Self> {
        let (sizing, concurrency) = resolve(client, &options)?;

        let mut create = client.objects().create_multipart_upload(bucket, key);
        if let Some(ct) = &options.content_type {
            create = create.content_type(ct);
        }
        let created = util::cancel::run(options.cancellation.as_ref(), create.send()).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(bucket, key, upload_id = %created.upload_id, "initiated multipart upload");

        Ok(Self {
            client: client.clone(),
            session: UploadSession::new(created.upload_id, bucket.to_string(), key.to_string()),
            sizing,
            concurrency,
            token: options.cancellation,
            planned_parts: None,
            bytes_read: 0,
        })
    }

    /// Attaches to an upload initiated earlier; its stored parts are listed
    /// and later verified against the input instead of being sent again.
    pub async fn resume(
        client: &Client,
        bucket: &str,
        key: &str,
        upload_id: impl Into<String>,
        options: UploadOptions,
    ) -> Result<Self> {
        let upload_id = upload_id.into();
        let (sizing, concurrency) = resolve(client, &options)?;

        let listed = util::cancel::run(
            options.cancellation.as_ref(),
            list_all_parts(client, bucket, key, &upload_id),
        )
        .await
        .map_err(|e| e.within_upload(&upload_id))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(bucket, key, upload_id = %upload_id, parts = listed.len(), "resuming multipart upload");

        Ok(Self {
            client: client.clone(),
            session: UploadSession::resumed(upload_id, bucket.to_string(), key.to_string(), listed),
            sizing,
            concurrency,
            token: options.cancellation,
            planned_parts: None,
            bytes_read: 0,
        })
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn upload_id(&self) -> &str {
        self.session.upload_id()
    }

    pub fn state(&self) -> UploadState {
        self.session.state()
    }

    /// Number of parts the input was split into, once fully read.
    pub fn planned_parts(&self) -> Option<u32> {
        self.planned_parts
    }

    /// Bytes consumed from the input by `upload_from`.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Sends a single part and records its entity tag.
    pub async fn upload_part(&mut self, part_number: u32, body: Bytes) -> Result<CompletedPart> {
        if part_number == 0 || part_number > self.sizing.max_parts {
            return Err(Error::invalid_config(format!(
                "part number must be between 1 and {}",
                self.sizing.max_parts
            )));
        }
        let digest = PartDigest::of(None, &body);
        self.session.begin_part(part_number, &digest)?;

        let job = self.job(part_number, body, &digest);
        let (_, res) = job.run().await;
        match res {
            Ok(etag) => {
                self.session.mark_uploaded(part_number, &etag);
                Ok(CompletedPart {
                    part_number,
                    etag: format!("\"{}\"", trim_etag(&etag)),
                })
            }
            Err(err) => {
                self.session.mark_part_failed(part_number);
                Err(err.within_upload(self.session.upload_id()))
            }
        }
    }

    /// Reads `reader` to the end, uploading each part as soon as it is
    /// buffered. With `size` set the input must be exactly that long.
    pub async fn upload_from<R>(&mut self, reader: &mut R, size: Option<u64>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let result = self.feed(reader, size).await;
        if let Err(err) = result {
            self.session.fail();
            #[cfg(feature = "tracing")]
            tracing::debug!(upload_id = %self.session.upload_id(), error = %err, "multipart upload failed");
            return Err(err.within_upload(self.session.upload_id()));
        }
        Ok(())
    }

    async fn feed<R>(&mut self, reader: &mut R, size: Option<u64>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        self.session.ensure_accepts_parts()?;
        let plan = PartPlan::new(size, self.sizing)?;
        let count = plan.part_count();
        let mut in_flight: JoinSet<(u32, Result<String>)> = JoinSet::new();
        let mut offset = 0u64;
        let mut part_number = 0u32;

        let outcome: Result<()> = async {
            loop {
                util::cancel::check(self.token.as_ref())?;
                let next = part_number + 1;
                if count.is_some_and(|c| next > c) {
                    break;
                }
                let want = match plan.part(next) {
                    Ok(range) => range.length,
                    Err(_) => {
                        // Unknown size at the part limit; only the end of input may follow.
                        if self.read_part(reader, 1).await?.is_empty() {
                            break;
                        }
                        return Err(Error::upload(
                            None,
                            format!("input needs more than {} parts", self.sizing.max_parts),
                        ));
                    }
                };
                let data = self.read_part(reader, want).await?;
                let len = data.len() as u64;
                if count.is_some() && len < want {
                    return Err(Error::upload(
                        None,
                        format!(
                            "input ended after {} bytes but {} were declared",
                            offset + len,
                            plan.total().unwrap_or_default()
                        ),
                    ));
                }
                if len == 0 && part_number > 0 {
                    // Unknown size that ended on a part boundary.
                    break;
                }
                part_number = next;

                let digest = PartDigest::of(Some(offset), &data);
                offset += len;
                self.bytes_read = offset;

                match self.session.reconcile(part_number, &digest)? {
                    Reconciled::Verified => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(part_number, size = len, "part already uploaded; skipping");
                    }
                    Reconciled::Missing => {
                        while in_flight.len() >= self.concurrency {
                            self.settle_one(&mut in_flight).await?;
                        }
                        self.session.begin_part(part_number, &digest)?;
                        #[cfg(feature = "tracing")]
                        tracing::debug!(part_number, size = len, "dispatching part");
                        in_flight.spawn(self.job(part_number, data, &digest).run());
                    }
                }

                if len < want {
                    break;
                }
            }

            if plan.total().is_some() && !self.read_part(reader, 1).await?.is_empty() {
                return Err(Error::upload(
                    None,
                    format!("input is longer than the declared {} bytes", offset),
                ));
            }

            while !in_flight.is_empty() {
                self.settle_one(&mut in_flight).await?;
            }
            Ok(())
        }
        .await;

        if let Err(err) = &outcome {
            // Parts already on the wire still land; only cancellation cuts them off.
            if matches!(err, Error::Cancelled { .. }) {
                in_flight.abort_all();
            }
            while let Some(joined) = in_flight.join_next().await {
                match joined {
                    Ok((number, Ok(etag))) => self.session.mark_uploaded(number, &etag),
                    Ok((number, Err(_))) => self.session.mark_part_failed(number),
                    Err(_) => {}
                }
            }
            return outcome;
        }

        self.planned_parts = Some(part_number);
        Ok(())
    }

    async fn read_part<R>(&self, reader: &mut R, len: u64) -> Result<Bytes>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::with_capacity(len as usize);
        util::cancel::run(self.token.as_ref(), async {
            (&mut *reader)
                .take(len)
                .read_to_end(&mut buf)
                .await
                .map_err(|e| Error::upload_with_source("failed to read upload input", Box::new(e)))
        })
        .await?;
        Ok(Bytes::from(buf))
    }

    async fn settle_one(&mut self, in_flight: &mut JoinSet<(u32, Result<String>)>) -> Result<()> {
        let joined = util::cancel::run(self.token.as_ref(), async {
            in_flight
                .join_next()
                .await
                .ok_or_else(|| Error::upload(None, "no part upload in flight"))
        })
        .await?;

        let (number, res) = joined.map_err(|e| {
            Error::upload_with_source("part upload task did not finish", Box::new(e))
        })?;
        match res {
            Ok(etag) => {
                self.session.mark_uploaded(number, &etag);
                Ok(())
            }
            Err(err) => {
                self.session.mark_part_failed(number);
                Err(err)
            }
        }
    }

    fn job(&self, part_number: u32, body: Bytes, digest: &PartDigest) -> PartJob {
        PartJob {
            client: self.client.clone(),
            bucket: self.session.bucket().to_string(),
            key: self.session.key().to_string(),
            upload_id: self.session.upload_id().to_string(),
            part_number,
            body,
            md5: digest.md5,
            sha256: digest.sha256.clone(),
            token: self.token.clone(),
        }
    }

    /// Lists every uploaded part in ascending order and assembles the object.
    ///
    /// When a repeated completion request answers `NoSuchUpload`, the object
    /// is checked with HEAD: an entity tag equal to the locally computed
    /// multipart tag means the first attempt already succeeded.
    pub async fn complete(&mut self) -> Result<CompleteMultipartUploadOutput> {
        let parts = self.session.completion_parts(self.planned_parts)?;
        let upload_id = self.session.upload_id().to_string();
        let bucket = self.session.bucket().to_string();
        let key = self.session.key().to_string();

        let complete = self
            .client
            .objects()
            .complete_multipart_upload(&bucket, &key, &upload_id)
            .parts(parts.clone())
            .send();
        let res = util::cancel::run(self.token.as_ref(), complete).await;

        let res = match res {
            Err(err) if err.code() == Some("NoSuchUpload") => {
                self.confirm_completed(&bucket, &key, &parts).await.unwrap_or(Err(err))
            }
            other => other,
        };

        match res {
            Ok(out) => {
                self.session.mark_completed();
                #[cfg(feature = "tracing")]
                tracing::debug!(upload_id = %upload_id, parts = parts.len(), "completed multipart upload");
                Ok(out)
            }
            Err(err) => {
                self.session.fail();
                Err(err.within_upload(&upload_id))
            }
        }
    }

    /// `None` when the stored object cannot be shown to be this upload.
    async fn confirm_completed(
        &self,
        bucket: &str,
        key: &str,
        parts: &[CompletedPart],
    ) -> Option<Result<CompleteMultipartUploadOutput>> {
        let expected = self.session.expected_etag(parts)?;
        let head = self.client.objects().head(bucket, key).send();
        let head = util::cancel::run(self.token.as_ref(), head).await;
        let head = match head {
            Ok(head) => head,
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND) => return None,
            Err(err) => return Some(Err(err)),
        };
        let etag = head.etag?;
        if trim_etag(&etag) != expected {
            return None;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(bucket, key, "completion confirmed by entity tag");
        Some(Ok(CompleteMultipartUploadOutput {
            location: None,
            bucket: Some(bucket.to_string()),
            key: Some(key.to_string()),
            etag: Some(etag),
        }))
    }

    /// Discards the upload and its stored parts.
    pub async fn abort(&mut self) -> Result<()> {
        self.session.ensure_abortable()?;
        let upload_id = self.session.upload_id().to_string();
        let abort = self
            .client
            .objects()
            .abort_multipart_upload(self.session.bucket(), self.session.key(), &upload_id)
            .send();
        util::cancel::run(self.token.as_ref(), abort)
            .await
            .map_err(|e| e.within_upload(&upload_id))?;
        self.session.mark_aborted();
        #[cfg(feature = "tracing")]
        tracing::debug!(upload_id = %upload_id, "aborted multipart upload");
        Ok(())
    }
}

fn resolve(client: &Client, options: &UploadOptions) -> Result<(PartSizing, usize)> {
    let defaults = client.upload_defaults();
    let sizing = PartSizing::with_min_part_size(options.part_size.unwrap_or(defaults.part_size))?;
    let concurrency = options.concurrency.unwrap_or(defaults.concurrency);
    if concurrency == 0 {
        return Err(Error::invalid_config("upload concurrency must be at least 1"));
    }
    Ok((sizing, concurrency))
}

async fn list_all_parts(
    client: &Client,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<Vec<crate::types::Part>> {
    let mut parts = Vec::new();
    let mut marker = None;
    loop {
        let mut req = client.objects().list_parts(bucket, key, upload_id);
        if let Some(m) = marker {
            req = req.part_number_marker(m);
        }
        let page = req.send().await?;
        parts.extend(page.parts);
        match page.next_part_number_marker {
            Some(next) if page.is_truncated && Some(next) != marker => marker = Some(next),
            _ => break,
        }
    }
    Ok(parts)
}

/// One part upload, owned so it can run on the pool.
struct PartJob {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    part_number: u32,
    body: Bytes,
    md5: [u8; 16],
    sha256: String,
    token: Option<CancellationToken>,
}

impl PartJob {
    async fn run(self) -> (u32, Result<String>) {
        let number = self.part_number;
        let send = self
            .client
            .objects()
            .upload_part(&self.bucket, &self.key, &self.upload_id, number)
            .body_bytes(self.body)
            .digests(self.md5, self.sha256)
            .send();

        #[cfg(feature = "tracing")]
        let send = send.instrument(tracing::debug_span!("s3.part", part_number = number));

        let res = util::cancel::run(self.token.as_ref(), send)
            .await
            .and_then(|out| {
                out.etag.ok_or_else(|| {
                    Error::upload(None, format!("part {number} response carried no ETag"))
                })
            });
        (number, res)
    }
}
