use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    types::{CompletedPart, Part},
    util::{self, headers::trim_etag},
};

/// Lifecycle of a multipart upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    Initiated,
    InProgress,
    Completed,
    Aborted,
    Failed,
}

impl UploadState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartStatus {
    Pending,
    Uploaded,
    Failed,
}

/// What is known about one part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartRecord {
    pub part_number: u32,
    /// Offset in the source input; unknown for parts listed on resume until
    /// they are matched against local data.
    pub offset: Option<u64>,
    pub size: u64,
    /// Binary MD5 of the part, from local data or a plain-MD5 entity tag.
    pub md5: Option<[u8; 16]>,
    /// Hex SHA-256 of the part, when hashed locally.
    pub sha256: Option<String>,
    /// Entity tag without quotes.
    pub etag: Option<String>,
    pub status: PartStatus,
}

/// Local checksums of a part about to be sent or verified.
#[derive(Clone, Debug)]
pub(crate) struct PartDigest {
    pub(crate) offset: Option<u64>,
    pub(crate) size: u64,
    pub(crate) md5: [u8; 16],
    pub(crate) sha256: String,
}

impl PartDigest {
    pub(crate) fn of(offset: Option<u64>, data: &[u8]) -> Self {
        Self {
            offset,
            size: data.len() as u64,
            md5: util::md5::md5_digest(data),
            sha256: crate::signing::sha256_hex(data),
        }
    }
}

/// Outcome of checking local data against a part that is already remote.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Reconciled {
    /// No remote copy; the part must be sent.
    Missing,
    /// The remote copy matches; skip it.
    Verified,
}

/// State of one multipart upload: id, target and per-part records.
#[derive(Clone, Debug)]
pub struct UploadSession {
    upload_id: String,
    bucket: String,
    key: String,
    state: UploadState,
    parts: BTreeMap<u32, PartRecord>,
}

impl UploadSession {
    pub(crate) fn new(upload_id: String, bucket: String, key: String) -> Self {
        Self {
            upload_id,
            bucket,
            key,
            state: UploadState::Initiated,
            parts: BTreeMap::new(),
        }
    }

    /// Rebuilds a session from a part listing; listed parts count as uploaded.
    pub(crate) fn resumed(
        upload_id: String,
        bucket: String,
        key: String,
        listed: impl IntoIterator<Item = Part>,
    ) -> Self {
        let mut session = Self::new(upload_id, bucket, key);
        for part in listed {
            let etag = part.etag.as_deref().map(|e| trim_etag(e).to_string());
            let md5 = etag.as_deref().and_then(md5_from_etag);
            session.parts.insert(
                part.part_number,
                PartRecord {
                    part_number: part.part_number,
                    offset: None,
                    size: part.size,
                    md5,
                    sha256: None,
                    etag,
                    status: PartStatus::Uploaded,
                },
            );
        }
        if !session.parts.is_empty() {
            session.state = UploadState::InProgress;
        }
        session
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Records in ascending part-number order.
    pub fn parts(&self) -> impl Iterator<Item = &PartRecord> {
        self.parts.values()
    }

    pub fn part(&self, part_number: u32) -> Option<&PartRecord> {
        self.parts.get(&part_number)
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.parts
            .values()
            .filter(|p| p.status == PartStatus::Uploaded)
            .map(|p| p.size)
            .sum()
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::upload(Some(&self.upload_id), message)
    }

    pub(crate) fn ensure_accepts_parts(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(self.error(format!(
                "upload is {}; no further parts accepted",
                self.state.as_str()
            )));
        }
        Ok(())
    }

    /// Compares local data with an already uploaded part of the same number.
    ///
    /// Sizes must match, and so must MD5 digests when the remote entity tag is
    /// a plain MD5. A mismatch is an error: the remote part holds different
    /// bytes and completing would corrupt the object.
    pub(crate) fn reconcile(&mut self, part_number: u32, local: &PartDigest) -> Result<Reconciled> {
        let Some(record) = self.parts.get_mut(&part_number) else {
            return Ok(Reconciled::Missing);
        };
        if record.status != PartStatus::Uploaded {
            return Ok(Reconciled::Missing);
        }

        let mismatch = if record.size != local.size {
            Some(format!(
                "part {part_number} is {} bytes remotely but {} bytes locally",
                record.size, local.size
            ))
        } else {
            match record.md5 {
                Some(remote) if remote != local.md5 => Some(format!(
                    "part {part_number} checksum differs from the uploaded part"
                )),
                _ => None,
            }
        };
        if let Some(message) = mismatch {
            self.state = UploadState::Failed;
            return Err(self.error(message));
        }

        record.offset = local.offset.or(record.offset);
        record.md5 = Some(local.md5);
        record.sha256 = Some(local.sha256.clone());
        Ok(Reconciled::Verified)
    }

    pub(crate) fn begin_part(&mut self, part_number: u32, digest: &PartDigest) -> Result<()> {
        self.ensure_accepts_parts()?;
        self.parts.insert(
            part_number,
            PartRecord {
                part_number,
                offset: digest.offset,
                size: digest.size,
                md5: Some(digest.md5),
                sha256: Some(digest.sha256.clone()),
                etag: None,
                status: PartStatus::Pending,
            },
        );
        self.state = UploadState::InProgress;
        Ok(())
    }

    pub(crate) fn mark_uploaded(&mut self, part_number: u32, etag: &str) {
        if let Some(record) = self.parts.get_mut(&part_number) {
            record.etag = Some(trim_etag(etag).to_string());
            record.status = PartStatus::Uploaded;
        }
    }

    pub(crate) fn mark_part_failed(&mut self, part_number: u32) {
        if let Some(record) = self.parts.get_mut(&part_number) {
            record.status = PartStatus::Failed;
        }
    }

    /// Leaves the session failed unless it already reached a terminal state.
    pub(crate) fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = UploadState::Failed;
        }
    }

    /// Parts to list on completion, ascending.
    ///
    /// With `planned` set, exactly parts `1..=planned` must be uploaded and
    /// extra remote parts are left out. Otherwise every record must be
    /// uploaded and numbered contiguously from 1.
    pub(crate) fn completion_parts(&mut self, planned: Option<u32>) -> Result<Vec<CompletedPart>> {
        if self.state.is_terminal() {
            return Err(self.error(format!("upload is already {}", self.state.as_str())));
        }

        let count = planned.unwrap_or_else(|| self.parts.keys().next_back().copied().unwrap_or(0));
        if count == 0 {
            self.state = UploadState::Failed;
            return Err(self.error("cannot complete an upload without parts"));
        }

        let mut out = Vec::with_capacity(count as usize);
        for number in 1..=count {
            let etag = self
                .parts
                .get(&number)
                .filter(|p| p.status == PartStatus::Uploaded)
                .and_then(|p| p.etag.clone());
            match etag {
                Some(etag) => out.push(CompletedPart {
                    part_number: number,
                    etag: format!("\"{etag}\""),
                }),
                None => {
                    self.state = UploadState::Failed;
                    return Err(self.error(format!("part {number} has not been uploaded")));
                }
            }
        }
        Ok(out)
    }

    /// Entity tag the service assigns once `parts` are combined, when every
    /// part's MD5 is known.
    pub(crate) fn expected_etag(&self, parts: &[CompletedPart]) -> Option<String> {
        let digests = parts
            .iter()
            .map(|p| self.parts.get(&p.part_number).and_then(|r| r.md5))
            .collect::<Option<Vec<[u8; 16]>>>()?;
        Some(util::md5::multipart_etag(digests.iter().map(|d| d.as_slice())))
    }

    pub(crate) fn mark_completed(&mut self) {
        self.state = UploadState::Completed;
    }

    pub(crate) fn ensure_abortable(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(self.error(format!("upload is already {}", self.state.as_str())));
        }
        Ok(())
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = UploadState::Aborted;
    }
}

fn md5_from_etag(etag: &str) -> Option<[u8; 16]> {
    if !util::md5::is_md5_etag(etag) {
        return None;
    }
    let mut out = [0u8; 16];
    hex::decode_to_slice(etag, &mut out).ok()?;
    Some(out)
}
