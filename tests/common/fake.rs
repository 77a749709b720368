//! Minimal in-process S3 endpoint served by hyper over HTTP/1.1.
//!
//! Every response closes its connection, so requests never share a socket.
//! Behavior is limited to what the client exercises: buckets, objects with
//! byte ranges, multipart uploads and simple listings.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use base64::Engine as _;
use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use md5::{Digest as _, Md5};
use tokio::net::TcpListener;

pub(crate) const REGION: &str = "us-east-1";
pub(crate) const ACCESS_KEY: &str = "AKIDFAKEEXAMPLE";
pub(crate) const SECRET_KEY: &str = "fake/secret/key";

/// A request as the server saw it.
#[derive(Clone, Debug)]
pub(crate) struct Logged {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, String)>,
}

impl Logged {
    pub(crate) fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Part number of an UploadPart request.
    pub(crate) fn uploaded_part(&self) -> Option<u32> {
        if self.method != "PUT" || self.param("uploadId").is_none() {
            return None;
        }
        self.param("partNumber")?.parse().ok()
    }
}

#[derive(Clone, Copy, Debug)]
enum FaultKind {
    /// Answer with an error instead of handling the request.
    Reject { status: u16, code: &'static str },
    /// Handle the request, then answer with an error as if the reply was lost.
    Lose { status: u16 },
    /// Never answer.
    Stall,
    /// Handle the request, then hold the reply back.
    Delay(Duration),
}

/// Which requests a fault applies to. Empty fields match anything.
#[derive(Clone, Debug, Default)]
pub(crate) struct Matcher {
    method: &'static str,
    path: Option<String>,
    param: Option<(&'static str, Option<String>)>,
}

impl Matcher {
    pub(crate) fn method(method: &'static str) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub(crate) fn object(mut self, bucket: &str, key: &str) -> Self {
        self.path = Some(format!("/{bucket}/{key}"));
        self
    }

    pub(crate) fn param(mut self, name: &'static str) -> Self {
        self.param = Some((name, None));
        self
    }

    pub(crate) fn param_eq(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.param = Some((name, Some(value.into())));
        self
    }

    fn matches(&self, req: &Request) -> bool {
        req.method == self.method
            && self.path.as_deref().is_none_or(|p| p == req.path)
            && self.param.as_ref().is_none_or(|(name, value)| {
                req.query.iter().any(|(k, v)| {
                    k == name && value.as_deref().is_none_or(|want| want == v)
                })
            })
    }
}

struct Fault {
    matcher: Matcher,
    kind: FaultKind,
    remaining: usize,
}

struct StoredObject {
    data: Vec<u8>,
    etag: String,
    content_type: Option<String>,
}

struct PendingUpload {
    bucket: String,
    key: String,
    initiated: String,
    parts: BTreeMap<u32, (Vec<u8>, [u8; 16])>,
}

#[derive(Default)]
struct State {
    buckets: HashSet<String>,
    objects: HashMap<(String, String), StoredObject>,
    uploads: BTreeMap<String, PendingUpload>,
    log: Vec<Logged>,
    faults: Vec<Fault>,
    next_id: u64,
}

struct Request {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn has_param(&self, name: &str) -> bool {
        self.query.iter().any(|(k, _)| k == name)
    }
}

struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    /// Declared length for HEAD replies, which carry no body.
    head_length: Option<usize>,
}

impl Reply {
    fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            head_length: None,
        }
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn xml(mut self, body: String) -> Self {
        self.headers
            .push(("Content-Type".to_string(), "application/xml".to_string()));
        self.body = body.into_bytes();
        self
    }

    fn error(status: u16, code: &str) -> Self {
        Self::new(status).xml(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Error><Code>{code}</Code><Message>{code}</Message>\
             <RequestId>fake-request</RequestId><HostId>fake-host</HostId></Error>"
        ))
    }
}

enum Outcome {
    Reply(Reply),
    Later(Reply, Duration),
    Stall,
}

/// Handle to a running fake endpoint; clones share state.
#[derive(Clone)]
pub(crate) struct FakeS3 {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl FakeS3 {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake endpoint");
        let addr = listener.local_addr().expect("fake endpoint address");
        let state = Arc::new(Mutex::new(State::default()));

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = shared.clone();
                let service = service_fn(move |req| serve(req, state.clone()));
                tokio::spawn(async move {
                    let _ = http1::Builder::new()
                        .keep_alive(false)
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, state }
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client builder pointed at this endpoint, with fast retries.
    pub(crate) fn client_builder(&self) -> s3io::ClientBuilder {
        let creds = s3io::Credentials::new(ACCESS_KEY, SECRET_KEY).expect("credentials");
        s3io::Client::builder(self.endpoint())
            .expect("endpoint")
            .region(REGION)
            .auth(s3io::Auth::Static(creds))
            .addressing_style(s3io::AddressingStyle::Path)
            .base_retry_delay(Duration::from_millis(1))
            .max_retry_delay(Duration::from_millis(5))
    }

    pub(crate) fn client(&self) -> s3io::Client {
        self.client_builder().build().expect("client")
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().expect("fake state");
        f(&mut state)
    }

    pub(crate) fn create_bucket(&self, bucket: &str) {
        self.with(|s| s.buckets.insert(bucket.to_string()));
    }

    pub(crate) fn put_object(&self, bucket: &str, key: &str, data: &[u8]) {
        self.with(|s| {
            s.buckets.insert(bucket.to_string());
            s.objects.insert(
                (bucket.to_string(), key.to_string()),
                StoredObject {
                    data: data.to_vec(),
                    etag: hex::encode(Md5::digest(data)),
                    content_type: Some("application/octet-stream".to_string()),
                },
            );
        });
    }

    pub(crate) fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.with(|s| {
            s.objects
                .get(&(bucket.to_string(), key.to_string()))
                .map(|o| o.data.clone())
        })
    }

    pub(crate) fn object_etag(&self, bucket: &str, key: &str) -> Option<String> {
        self.with(|s| {
            s.objects
                .get(&(bucket.to_string(), key.to_string()))
                .map(|o| o.etag.clone())
        })
    }

    /// Upload ids still open for `key`.
    pub(crate) fn open_uploads(&self, key: &str) -> Vec<String> {
        self.with(|s| {
            s.uploads
                .iter()
                .filter(|(_, u)| u.key == key)
                .map(|(id, _)| id.clone())
                .collect()
        })
    }

    /// Part numbers stored for an open upload.
    pub(crate) fn stored_parts(&self, upload_id: &str) -> Vec<u32> {
        self.with(|s| {
            s.uploads
                .get(upload_id)
                .map(|u| u.parts.keys().copied().collect())
                .unwrap_or_default()
        })
    }

    pub(crate) fn requests(&self) -> Vec<Logged> {
        self.with(|s| s.log.clone())
    }

    pub(crate) fn clear_requests(&self) {
        self.with(|s| s.log.clear());
    }

    /// Part numbers of all UploadPart requests received, in arrival order.
    pub(crate) fn uploaded_parts(&self) -> Vec<u32> {
        self.requests()
            .iter()
            .filter_map(Logged::uploaded_part)
            .collect()
    }

    /// Rejects the next `times` matching requests with an error reply.
    pub(crate) fn reject(&self, matcher: Matcher, status: u16, code: &'static str, times: usize) {
        self.add_fault(matcher, FaultKind::Reject { status, code }, times);
    }

    /// Processes the next matching request but answers with `status`.
    pub(crate) fn lose_reply(&self, matcher: Matcher, status: u16) {
        self.add_fault(matcher, FaultKind::Lose { status }, 1);
    }

    /// Handles the next matching request normally but answers after `delay`.
    pub(crate) fn delay(&self, matcher: Matcher, delay: Duration) {
        self.add_fault(matcher, FaultKind::Delay(delay), 1);
    }

    /// Never answers matching requests.
    pub(crate) fn stall(&self, matcher: Matcher) {
        self.add_fault(matcher, FaultKind::Stall, usize::MAX);
    }

    fn add_fault(&self, matcher: Matcher, kind: FaultKind, times: usize) {
        self.with(|s| {
            s.faults.push(Fault {
                matcher,
                kind,
                remaining: times,
            })
        });
    }
}

async fn serve(
    req: hyper::Request<Incoming>,
    state: Arc<Mutex<State>>,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes().to_vec(),
        Err(_) => return Ok(respond(Reply::error(400, "IncompleteBody"), false)),
    };
    let headers = parts
        .headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect();
    let req = Request {
        method: parts.method.as_str().to_string(),
        path: percent_decode(parts.uri.path()),
        query: url::form_urlencoded::parse(parts.uri.query().unwrap_or_default().as_bytes())
            .into_owned()
            .collect(),
        headers,
        body,
    };

    let outcome = {
        let mut state = state.lock().expect("fake state");
        handle(&mut state, &req)
    };
    let reply = match outcome {
        Outcome::Reply(reply) => reply,
        Outcome::Later(reply, delay) => {
            tokio::time::sleep(delay).await;
            reply
        }
        Outcome::Stall => {
            tokio::time::sleep(Duration::from_secs(300)).await;
            Reply::error(503, "SlowDown")
        }
    };
    Ok(respond(reply, req.method == "HEAD"))
}

fn respond(reply: Reply, head: bool) -> hyper::Response<Full<Bytes>> {
    let mut builder = hyper::Response::builder().status(reply.status);
    for (name, value) in &reply.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if reply.status != 204 {
        let len = reply.head_length.unwrap_or(reply.body.len());
        builder = builder.header(http::header::CONTENT_LENGTH, len);
    }
    let body = if head { Bytes::new() } else { Bytes::from(reply.body) };
    builder.body(Full::new(body)).expect("fake response")
}

fn handle(state: &mut State, req: &Request) -> Outcome {
    state.log.push(Logged {
        method: req.method.clone(),
        path: req.path.clone(),
        query: req.query.clone(),
        headers: req.headers.clone(),
    });

    let mut lose = None;
    let mut delay = None;
    if let Some(fault) = state
        .faults
        .iter_mut()
        .find(|f| f.remaining > 0 && f.matcher.matches(req))
    {
        fault.remaining -= 1;
        match fault.kind {
            FaultKind::Reject { status, code } => {
                return Outcome::Reply(Reply::error(status, code));
            }
            FaultKind::Stall => return Outcome::Stall,
            FaultKind::Lose { status } => lose = Some(status),
            FaultKind::Delay(d) => delay = Some(d),
        }
    }

    let reply = route(state, req);
    match (lose, delay) {
        (Some(status), _) => Outcome::Reply(Reply::error(status, "InternalError")),
        (None, Some(d)) => Outcome::Later(reply, d),
        (None, None) => Outcome::Reply(reply),
    }
}

fn route(state: &mut State, req: &Request) -> Reply {
    let presigned = req.param("X-Amz-Signature").is_some() || req.param("Signature").is_some();
    if req.header("authorization").is_none() && !presigned {
        return Reply::error(403, "AccessDenied");
    }
    if presigned && presign_expired(req) {
        return Reply::error(403, "AccessDenied");
    }

    let trimmed = req.path.trim_start_matches('/');
    let (bucket, key) = match trimmed.split_once('/') {
        Some((bucket, key)) if !key.is_empty() => (bucket.to_string(), Some(key.to_string())),
        Some((bucket, _)) => (bucket.to_string(), None),
        None => (trimmed.to_string(), None),
    };

    if bucket.is_empty() {
        return list_buckets(state);
    }

    let Some(key) = key else {
        return match req.method.as_str() {
            "PUT" => create_bucket(state, &bucket, req),
            "HEAD" => head_bucket(state, &bucket),
            "DELETE" => delete_bucket(state, &bucket),
            "GET" if req.has_param("uploads") => list_uploads(state, &bucket, req),
            "GET" => list_objects(state, &bucket, req),
            _ => Reply::error(405, "MethodNotAllowed"),
        };
    };

    if !state.buckets.contains(&bucket) {
        return Reply::error(404, "NoSuchBucket");
    }

    match req.method.as_str() {
        "POST" if req.has_param("uploads") => initiate(state, &bucket, &key),
        "POST" if req.has_param("uploadId") => complete(state, &bucket, &key, req),
        "PUT" if req.has_param("uploadId") => upload_part(state, req),
        "DELETE" if req.has_param("uploadId") => abort(state, req),
        "GET" if req.has_param("uploadId") => list_parts(state, req),
        "PUT" => put_object(state, &bucket, &key, req),
        "GET" => get_object(state, &bucket, &key, req, false),
        "HEAD" => get_object(state, &bucket, &key, req, true),
        "DELETE" => {
            state.objects.remove(&(bucket, key));
            Reply::new(204)
        }
        _ => Reply::error(405, "MethodNotAllowed"),
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

/// Seconds since the epoch for a compact `YYYYMMDDTHHMMSSZ` stamp.
fn parse_amz_date(stamp: &str) -> Option<i64> {
    let digits = |range: std::ops::Range<usize>| -> Option<i64> { stamp.get(range)?.parse().ok() };
    let (y, m, d) = (digits(0..4)?, digits(4..6)?, digits(6..8)?);
    let (hh, mm, ss) = (digits(9..11)?, digits(11..13)?, digits(13..15)?);

    // Days from civil date.
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;
    Some(days * 86_400 + hh * 3600 + mm * 60 + ss)
}

fn presign_expired(req: &Request) -> bool {
    let deadline = if let Some(expires) = req.param("Expires") {
        expires.parse::<i64>().ok()
    } else {
        let signed = req.param("X-Amz-Date").and_then(parse_amz_date);
        let ttl = req.param("X-Amz-Expires").and_then(|v| v.parse::<i64>().ok());
        signed.zip(ttl).map(|(at, ttl)| at + ttl)
    };
    deadline.is_none_or(|deadline| now_secs() > deadline)
}

fn list_buckets(state: &State) -> Reply {
    let mut names: Vec<&String> = state.buckets.iter().collect();
    names.sort();
    let buckets: String = names
        .iter()
        .map(|n| {
            format!("<Bucket><Name>{n}</Name><CreationDate>2024-01-01T00:00:00.000Z</CreationDate></Bucket>")
        })
        .collect();
    Reply::new(200).xml(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><ListAllMyBucketsResult>\
         <Owner><ID>fake</ID><DisplayName>fake</DisplayName></Owner>\
         <Buckets>{buckets}</Buckets></ListAllMyBucketsResult>"
    ))
}

fn create_bucket(state: &mut State, bucket: &str, req: &Request) -> Reply {
    let body = String::from_utf8_lossy(&req.body);
    let location = body
        .split_once("<LocationConstraint>")
        .and_then(|(_, rest)| rest.split_once("</LocationConstraint>"))
        .map(|(region, _)| region);
    if location.is_some_and(|region| region != REGION) {
        return Reply::error(400, "IllegalLocationConstraintException");
    }
    if !state.buckets.insert(bucket.to_string()) {
        return Reply::error(409, "BucketAlreadyOwnedByYou");
    }
    Reply::new(200).header("Location", format!("/{bucket}"))
}

fn head_bucket(state: &State, bucket: &str) -> Reply {
    if state.buckets.contains(bucket) {
        Reply::new(200).header("x-amz-bucket-region", REGION)
    } else {
        Reply::new(404)
    }
}

fn delete_bucket(state: &mut State, bucket: &str) -> Reply {
    if !state.buckets.contains(bucket) {
        return Reply::error(404, "NoSuchBucket");
    }
    if state.objects.keys().any(|(b, _)| b == bucket) {
        return Reply::error(409, "BucketNotEmpty");
    }
    state.buckets.remove(bucket);
    Reply::new(204)
}

fn list_objects(state: &State, bucket: &str, req: &Request) -> Reply {
    if !state.buckets.contains(bucket) {
        return Reply::error(404, "NoSuchBucket");
    }
    let prefix = req.param("prefix").unwrap_or_default();
    // The continuation token is simply the last key of the previous page.
    let after = req
        .param("continuation-token")
        .or_else(|| req.param("start-after"))
        .unwrap_or_default();
    let max_keys: usize = req
        .param("max-keys")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000);

    let mut keys: Vec<(&String, &StoredObject)> = state
        .objects
        .iter()
        .filter(|((b, k), _)| b == bucket && k.starts_with(prefix) && k.as_str() > after)
        .map(|((_, k), o)| (k, o))
        .collect();
    keys.sort_by(|a, b| a.0.cmp(b.0));
    let truncated = keys.len() > max_keys;
    keys.truncate(max_keys);

    let contents: String = keys
        .iter()
        .map(|(k, o)| {
            format!(
                "<Contents><Key>{k}</Key><LastModified>2024-01-01T00:00:00.000Z</LastModified>\
                 <ETag>\"{}\"</ETag><Size>{}</Size><StorageClass>STANDARD</StorageClass></Contents>",
                o.etag,
                o.data.len()
            )
        })
        .collect();
    let next = match keys.last() {
        Some((k, _)) if truncated => format!("<NextContinuationToken>{k}</NextContinuationToken>"),
        _ => String::new(),
    };
    Reply::new(200).xml(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><ListBucketResult><Name>{bucket}</Name>\
         <Prefix>{prefix}</Prefix><KeyCount>{}</KeyCount><MaxKeys>{max_keys}</MaxKeys>\
         <IsTruncated>{truncated}</IsTruncated>{next}{contents}</ListBucketResult>",
        keys.len()
    ))
}

fn list_uploads(state: &State, bucket: &str, req: &Request) -> Reply {
    if !state.buckets.contains(bucket) {
        return Reply::error(404, "NoSuchBucket");
    }
    let prefix = req.param("prefix").unwrap_or_default();
    let mut open: Vec<(&String, &PendingUpload)> = state
        .uploads
        .iter()
        .filter(|(_, u)| u.bucket == bucket && u.key.starts_with(prefix))
        .collect();
    open.sort_by(|a, b| a.1.key.cmp(&b.1.key).then_with(|| a.0.cmp(b.0)));
    let uploads: String = open
        .iter()
        .map(|(id, u)| {
            format!(
                "<Upload><Key>{}</Key><UploadId>{id}</UploadId><Initiated>{}</Initiated></Upload>",
                u.key, u.initiated
            )
        })
        .collect();
    Reply::new(200).xml(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><ListMultipartUploadsResult>\
         <Bucket>{bucket}</Bucket><IsTruncated>false</IsTruncated>{uploads}\
         </ListMultipartUploadsResult>"
    ))
}

fn put_object(state: &mut State, bucket: &str, key: &str, req: &Request) -> Reply {
    let digest = Md5::digest(&req.body);
    if let Some(sent) = req.header("content-md5")
        && sent != base64::engine::general_purpose::STANDARD.encode(digest)
    {
        return Reply::error(400, "BadDigest");
    }
    let etag = hex::encode(digest);
    state.objects.insert(
        (bucket.to_string(), key.to_string()),
        StoredObject {
            data: req.body.clone(),
            etag: etag.clone(),
            content_type: req.header("content-type").map(str::to_string),
        },
    );
    Reply::new(200).header("ETag", format!("\"{etag}\""))
}

fn get_object(state: &State, bucket: &str, key: &str, req: &Request, head: bool) -> Reply {
    let Some(obj) = state.objects.get(&(bucket.to_string(), key.to_string())) else {
        return if head {
            Reply::new(404)
        } else {
            Reply::error(404, "NoSuchKey")
        };
    };

    let len = obj.data.len() as u64;
    let mut reply = Reply::new(200)
        .header("ETag", format!("\"{}\"", obj.etag))
        .header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT")
        .header("Accept-Ranges", "bytes");
    if let Some(ct) = &obj.content_type {
        reply = reply.header("Content-Type", ct.clone());
    }
    if let Some(disposition) = req.param("response-content-disposition") {
        reply = reply.header("Content-Disposition", disposition);
    }
    if head {
        reply.head_length = Some(obj.data.len());
        return reply;
    }

    let Some((start, end)) = req.header("range").and_then(parse_range) else {
        reply.body = obj.data.clone();
        return reply;
    };
    if start >= len {
        return Reply::error(416, "InvalidRange").header("Content-Range", format!("bytes */{len}"));
    }
    let last = end.map_or(len - 1, |e| e.min(len - 1));
    reply.status = 206;
    reply.body = obj.data[start as usize..=last as usize].to_vec();
    reply.header("Content-Range", format!("bytes {start}-{last}/{len}"))
}

fn initiate(state: &mut State, bucket: &str, key: &str) -> Reply {
    state.next_id += 1;
    let n = state.next_id;
    let id = format!("upload-{n:04}");
    state.uploads.insert(
        id.clone(),
        PendingUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            initiated: format!("2024-01-01T{:02}:{:02}:{:02}.000Z", n / 3600, n / 60 % 60, n % 60),
            parts: BTreeMap::new(),
        },
    );
    Reply::new(200).xml(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><InitiateMultipartUploadResult>\
         <Bucket>{bucket}</Bucket><Key>{key}</Key><UploadId>{id}</UploadId>\
         </InitiateMultipartUploadResult>"
    ))
}

fn upload_part(state: &mut State, req: &Request) -> Reply {
    let upload_id = req.param("uploadId").unwrap_or_default();
    let Some(number) = req.param("partNumber").and_then(|n| n.parse::<u32>().ok()) else {
        return Reply::error(400, "InvalidArgument");
    };
    let Some(upload) = state.uploads.get_mut(upload_id) else {
        return Reply::error(404, "NoSuchUpload");
    };
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&Md5::digest(&req.body));
    if let Some(sent) = req.header("content-md5")
        && sent != base64::engine::general_purpose::STANDARD.encode(digest)
    {
        return Reply::error(400, "BadDigest");
    }
    upload.parts.insert(number, (req.body.clone(), digest));
    Reply::new(200).header("ETag", format!("\"{}\"", hex::encode(digest)))
}

fn list_parts(state: &State, req: &Request) -> Reply {
    let upload_id = req.param("uploadId").unwrap_or_default();
    let Some(upload) = state.uploads.get(upload_id) else {
        return Reply::error(404, "NoSuchUpload");
    };
    let marker = req
        .param("part-number-marker")
        .and_then(|m| m.parse::<u32>().ok())
        .unwrap_or(0);
    let max = req
        .param("max-parts")
        .and_then(|m| m.parse::<usize>().ok())
        .unwrap_or(1000);

    let remaining: Vec<(&u32, &(Vec<u8>, [u8; 16]))> =
        upload.parts.range(marker + 1..).collect();
    let page = &remaining[..remaining.len().min(max)];
    let truncated = remaining.len() > page.len();
    let next = page
        .last()
        .map(|(n, _)| format!("<NextPartNumberMarker>{n}</NextPartNumberMarker>"))
        .unwrap_or_default();
    let parts: String = page
        .iter()
        .map(|(n, (data, digest))| {
            format!(
                "<Part><PartNumber>{n}</PartNumber>\
                 <LastModified>2024-01-01T00:00:00.000Z</LastModified>\
                 <ETag>\"{}\"</ETag><Size>{}</Size></Part>",
                hex::encode(digest),
                data.len()
            )
        })
        .collect();
    Reply::new(200).xml(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><ListPartsResult>\
         <Bucket>{}</Bucket><Key>{}</Key><UploadId>{upload_id}</UploadId>\
         <PartNumberMarker>{marker}</PartNumberMarker>{next}<MaxParts>{max}</MaxParts>\
         <IsTruncated>{truncated}</IsTruncated>{parts}</ListPartsResult>",
        upload.bucket, upload.key
    ))
}

fn complete(state: &mut State, bucket: &str, key: &str, req: &Request) -> Reply {
    let upload_id = req.param("uploadId").unwrap_or_default().to_string();
    let Some(upload) = state.uploads.get(&upload_id) else {
        return Reply::error(404, "NoSuchUpload");
    };

    let body = String::from_utf8_lossy(&req.body).replace("&quot;", "\"");
    let numbers = tag_values(&body, "PartNumber");
    let etags = tag_values(&body, "ETag");
    if numbers.is_empty() || numbers.len() != etags.len() {
        return Reply::error(400, "MalformedXML");
    }

    let mut data = Vec::new();
    let mut hasher = Md5::new();
    let mut previous = 0u32;
    for (number, etag) in numbers.iter().zip(&etags) {
        let Ok(number) = number.parse::<u32>() else {
            return Reply::error(400, "MalformedXML");
        };
        if number <= previous {
            return Reply::error(400, "InvalidPartOrder");
        }
        previous = number;
        let Some((bytes, digest)) = upload.parts.get(&number) else {
            return Reply::error(400, "InvalidPart");
        };
        if etag.trim_matches('"') != hex::encode(digest) {
            return Reply::error(400, "InvalidPart");
        }
        data.extend_from_slice(bytes);
        hasher.update(digest);
    }
    let etag = format!("{}-{}", hex::encode(hasher.finalize()), numbers.len());

    state.uploads.remove(&upload_id);
    state.objects.insert(
        (bucket.to_string(), key.to_string()),
        StoredObject {
            data,
            etag: etag.clone(),
            content_type: Some("application/octet-stream".to_string()),
        },
    );
    Reply::new(200).xml(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><CompleteMultipartUploadResult>\
         <Location>/{bucket}/{key}</Location><Bucket>{bucket}</Bucket><Key>{key}</Key>\
         <ETag>\"{etag}\"</ETag></CompleteMultipartUploadResult>"
    ))
}

fn abort(state: &mut State, req: &Request) -> Reply {
    let upload_id = req.param("uploadId").unwrap_or_default();
    match state.uploads.remove(upload_id) {
        Some(_) => Reply::new(204),
        None => Reply::error(404, "NoSuchUpload"),
    }
}

fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start, end))
}

fn tag_values(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else {
            break;
        };
        out.push(after[..end].to_string());
        rest = &after[end + close.len()..];
    }
    out
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Some(v) = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
        {
            out.push(v);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
