//! Seekable reads over a stored object.

use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use bytes::{Buf as _, Bytes};
use futures_util::StreamExt as _;
use tokio::{fs, io::AsyncWriteExt as _, sync::OnceCell};
use tokio_util::sync::CancellationToken;

use crate::{
    api::RangedGet,
    client::Client,
    error::{Error, Result},
    types::{ByteStream, GetObjectOutput, ObjectInfo},
    util::{self, headers::trim_etag},
};

/// Forward seeks up to this distance drain the live stream instead of
/// issuing a new ranged GET.
const SKIP_WINDOW: u64 = 256 * 1024;

/// Cursor-based reader over one object.
///
/// Holds at most one open response body. `read` and `seek` move the cursor;
/// `read_at` issues its own ranged request and can run concurrently with
/// other `read_at` calls. Object metadata is fetched once and cached.
pub struct ObjectReader {
    client: Client,
    bucket: String,
    key: String,
    info: OnceCell<ObjectInfo>,
    offset: u64,
    // Only reached through `&mut self`; the mutex keeps the reader `Sync`.
    live: Mutex<Option<LiveStream>>,
    closed: bool,
    token: Option<CancellationToken>,
}

impl std::fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("info", &self.info.get())
            .field("offset", &self.offset)
            .field("closed", &self.closed)
            .finish()
    }
}

struct LiveStream {
    body: ByteStream,
    position: u64,
    /// Exclusive end of the bytes this body should deliver, when known.
    end: Option<u64>,
    pending: Bytes,
}

impl LiveStream {
    async fn next_chunk(&mut self) -> Result<bool> {
        while self.pending.is_empty() {
            match self.body.next().await {
                Some(chunk) => self.pending = chunk?,
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.next_chunk().await? {
            if let Some(end) = self.end
                && self.position < end
            {
                return Err(Error::stream(format!(
                    "object body ended at byte {} of {end}",
                    self.position
                )));
            }
            return Ok(0);
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        self.position += n as u64;
        Ok(n)
    }

    async fn skip(&mut self, mut count: u64) -> Result<()> {
        while count > 0 {
            if !self.next_chunk().await? {
                return Err(Error::stream(format!(
                    "object body ended at byte {} while skipping ahead",
                    self.position
                )));
            }
            let n = (self.pending.len() as u64).min(count) as usize;
            self.pending.advance(n);
            self.position += n as u64;
            count -= n as u64;
        }
        Ok(())
    }
}

impl ObjectReader {
    pub(crate) fn new(
        client: Client,
        bucket: String,
        key: String,
        info: Option<ObjectInfo>,
    ) -> Self {
        Self {
            client,
            bucket,
            key,
            info: info.map(OnceCell::from).unwrap_or_default(),
            offset: 0,
            live: Mutex::new(None),
            closed: false,
            token: None,
        }
    }

    /// Binds every request made by this reader to `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Object size, if metadata has been fetched.
    pub fn size(&self) -> Option<u64> {
        self.info.get().map(|i| i.size)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::stream("object reader is closed"));
        }
        Ok(())
    }

    fn live_mut(&mut self) -> &mut Option<LiveStream> {
        self.live.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads into `buf` at the cursor. Returns `Ok(0)` at the end of the
    /// object.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let token = self.token.clone();
        match util::cancel::run(token.as_ref(), self.read_inner(buf)).await {
            Ok(n) => {
                self.offset += n as u64;
                Ok(n)
            }
            Err(err) => {
                *self.live_mut() = None;
                Err(err)
            }
        }
    }

    /// Reads from the cursor to the end of the object.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut chunk = vec![0u8; 64 * 1024];
        let mut total = 0;
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&chunk[..n]);
            total += n;
        }
    }

    /// Copies the object from the cursor to the end into the file at `path`
    /// and returns the number of bytes written.
    ///
    /// Data goes to `<path>.part` and is renamed over `path` only once the
    /// whole object has arrived, so a failed download leaves `path` as it was.
    pub async fn download_to(&mut self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let mut partial = path.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let written = match self.copy_into(&partial).await {
            Ok(n) => n,
            Err(err) => {
                let _ = fs::remove_file(&partial).await;
                return Err(err);
            }
        };
        fs::rename(&partial, path)
            .await
            .map_err(|e| local_file_error("rename", &partial, &e))?;
        Ok(written)
    }

    async fn copy_into(&mut self, path: &Path) -> Result<u64> {
        let mut file = fs::File::create(path)
            .await
            .map_err(|e| local_file_error("create", path, &e))?;
        let mut chunk = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            file.write_all(&chunk[..n])
                .await
                .map_err(|e| local_file_error("write", path, &e))?;
            total += n as u64;
        }
        file.sync_all()
            .await
            .map_err(|e| local_file_error("sync", path, &e))?;
        Ok(total)
    }

    async fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        let offset = self.offset;
        if let Some(size) = self.size()
            && offset >= size
        {
            *self.live_mut() = None;
            return Ok(0);
        }

        let reuse = match self.live_mut().as_mut() {
            Some(live) if live.position == offset => true,
            Some(live)
                if offset > live.position
                    && offset - live.position <= SKIP_WINDOW
                    && live.end.is_none_or(|end| offset < end) =>
            {
                live.skip(offset - live.position).await?;
                true
            }
            _ => false,
        };

        if !reuse {
            #[cfg(feature = "tracing")]
            tracing::debug!(bucket = %self.bucket, key = %self.key, offset, "opening object stream");
            let live = self.open_at(offset).await?;
            *self.live_mut() = live;
        }

        let Some(live) = self.live_mut().as_mut() else {
            return Ok(0);
        };
        let n = live.fill(buf).await?;
        if n == 0 {
            *self.live_mut() = None;
        }
        Ok(n)
    }

    /// Opens a body from `offset` to the end; `None` when the offset is past
    /// the end of the object.
    async fn open_at(&self, offset: u64) -> Result<Option<LiveStream>> {
        let mut get = self.client.objects().get(&self.bucket, &self.key);
        if offset > 0 {
            get = get.range_from(offset);
        }
        let out = match get.send_ranged().await? {
            RangedGet::Body(out) => out,
            RangedGet::Unsatisfiable { .. } => return Ok(None),
        };
        self.remember(&out);

        let start = out.range.map(|(first, _)| first).unwrap_or(0);
        let end = out.range.map(|(_, last)| last + 1).or(out.total_size);
        if start > offset {
            return Err(Error::stream(format!(
                "requested byte {offset} but the response starts at {start}"
            )));
        }
        let mut live = LiveStream {
            body: out.body,
            position: start,
            end,
            pending: Bytes::new(),
        };
        // The service ignored the range and sent the whole object.
        live.skip(offset - start).await?;
        Ok(Some(live))
    }

    fn remember(&self, out: &GetObjectOutput) {
        if self.info.initialized() {
            return;
        }
        let Some(size) = out.total_size else {
            return;
        };
        let _ = self.info.set(ObjectInfo {
            key: self.key.clone(),
            size,
            etag: out.etag.as_deref().map(|e| trim_etag(e).to_string()),
            last_modified: out.last_modified.clone(),
            content_type: out.content_type.clone(),
        });
    }

    /// Moves the cursor. Seeking past the end is allowed; the next read then
    /// returns `Ok(0)`.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                if delta > 0 {
                    return Err(Error::stream("cannot seek beyond the end of the object"));
                }
                self.stat().await?.size.checked_add_signed(delta)
            }
        };
        let Some(target) = target else {
            return Err(Error::stream("seek to a negative or overflowing position"));
        };

        let keep = self.live_mut().as_ref().is_some_and(|live| {
            target >= live.position && target - live.position <= SKIP_WINDOW
        });
        if !keep {
            *self.live_mut() = None;
        }
        self.offset = target;
        Ok(target)
    }

    /// Reads `buf.len()` bytes at `offset` without moving the cursor.
    ///
    /// Fewer bytes are returned only when the range runs past the end of the
    /// object.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let size = self.stat().await?.size;
        if offset >= size {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(size - offset);
        let buf = &mut buf[..want as usize];

        let get = self
            .client
            .objects()
            .get(&self.bucket, &self.key)
            .range_bytes(offset, offset + want - 1);
        util::cancel::run(self.token.as_ref(), async {
            let out = match get.send_ranged().await? {
                RangedGet::Body(out) => out,
                RangedGet::Unsatisfiable { .. } => {
                    return Err(Error::stream(format!(
                        "object shrank below byte {offset} while reading"
                    )));
                }
            };
            let start = out.range.map(|(first, _)| first).unwrap_or(0);
            if start > offset {
                return Err(Error::stream(format!(
                    "requested byte {offset} but the response starts at {start}"
                )));
            }
            let mut live = LiveStream {
                body: out.body,
                position: start,
                end: Some(offset + want),
                pending: Bytes::new(),
            };
            live.skip(offset - start).await?;

            let mut filled = 0;
            while filled < buf.len() {
                let n = live.fill(&mut buf[filled..]).await?;
                if n == 0 {
                    return Err(Error::stream(format!(
                        "short read at byte {}: got {filled} of {want} bytes",
                        offset + filled as u64
                    )));
                }
                filled += n;
            }
            Ok(filled)
        })
        .await
    }

    /// Releases the live stream. Closing twice is an error.
    pub fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;
        *self.live_mut() = None;
        Ok(())
    }

    /// Cached object metadata, fetched with HEAD on first use.
    pub async fn stat(&self) -> Result<&ObjectInfo> {
        self.ensure_open()?;
        util::cancel::run(
            self.token.as_ref(),
            self.info.get_or_try_init(|| self.fetch_info()),
        )
        .await
    }

    /// Drops cached metadata and fetches it again.
    pub async fn restat(&mut self) -> Result<&ObjectInfo> {
        self.ensure_open()?;
        self.info = OnceCell::new();
        self.stat().await
    }

    async fn fetch_info(&self) -> Result<ObjectInfo> {
        let head = self.client.objects().head(&self.bucket, &self.key).send().await?;
        let size = head.content_length.ok_or_else(|| {
            Error::decode("HEAD object response has no Content-Length", None)
        })?;
        Ok(ObjectInfo {
            key: self.key.clone(),
            size,
            etag: head.etag.as_deref().map(|e| trim_etag(e).to_string()),
            last_modified: head.last_modified,
            content_type: head.content_type,
        })
    }
}

fn local_file_error(action: &str, path: &Path, err: &std::io::Error) -> Error {
    Error::stream(format!("failed to {action} {}: {err}", path.display()))
}
