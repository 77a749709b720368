use std::{io, pin::Pin, time::Duration};

#[cfg(feature = "metrics")]
use std::time::Instant;

use bytes::Bytes;
use futures_core::Stream;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::{
    error::{Error, Result},
    transport::{Idempotency, RetryConfig, backoff_delay, should_retry_status},
};

pub(crate) enum AsyncBody {
    Empty,
    Bytes(Bytes),
    Stream(Pin<Box<dyn Stream<Item = std::result::Result<Bytes, io::Error>> + Send + 'static>>),
}

impl AsyncBody {
    fn clone_for_retry(&self) -> Option<Self> {
        match self {
            Self::Empty => Some(Self::Empty),
            Self::Bytes(b) => Some(Self::Bytes(b.clone())),
            Self::Stream(_) => None,
        }
    }
}

pub(crate) struct AsyncTransport {
    client: reqwest::Client,
    retry: RetryConfig,
    trace: bool,
}

enum Outcome {
    Done(reqwest::Response),
    Retry(Duration),
}

impl AsyncTransport {
    pub(crate) fn new(
        retry: RetryConfig,
        user_agent: String,
        timeout: Option<Duration>,
        trace: bool,
    ) -> Result<Self> {
        #[cfg(feature = "rustls")]
        crate::transport::ensure_rustls_crypto_provider();

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        builder = builder.user_agent(user_agent);
        let client = builder
            .build()
            .map_err(|e| Error::transport("failed to build HTTP client", Some(Box::new(e))))?;

        Ok(Self {
            client,
            retry,
            trace,
        })
    }

    /// Sends one logical request, retrying transient failures.
    ///
    /// Streaming bodies are sent once. A final retryable status is returned as
    /// a response so the caller can classify it.
    pub(crate) async fn send(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: AsyncBody,
        idempotency: Idempotency,
    ) -> Result<reqwest::Response> {
        if matches!(body, AsyncBody::Stream(_)) {
            return match self
                .attempt(&method, url, headers, body, 1, 1, idempotency)
                .await?
            {
                Outcome::Done(resp) => Ok(resp),
                Outcome::Retry(_) => Err(Error::transport("request failed", None)),
            };
        }

        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let current_body = body
                .clone_for_retry()
                .ok_or_else(|| Error::transport("request body is not replayable", None))?;
            match self
                .attempt(
                    &method,
                    url.clone(),
                    headers.clone(),
                    current_body,
                    attempt,
                    max_attempts,
                    idempotency,
                )
                .await?
            {
                Outcome::Done(resp) => return Ok(resp),
                Outcome::Retry(delay) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        method = %method,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "s3_http_errors_total",
            "method" => method_label(&method),
            "kind" => "exhausted"
        )
        .increment(1);
        Err(Error::transport("request failed after retries", None))
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        method: &Method,
        url: Url,
        headers: HeaderMap,
        body: AsyncBody,
        attempt: u32,
        max_attempts: u32,
        idempotency: Idempotency,
    ) -> Result<Outcome> {
        #[cfg(feature = "tracing")]
        {
            use tracing::Instrument as _;

            let span = tracing::debug_span!(
                "s3.http",
                method = %method,
                host = url.host_str().unwrap_or(""),
                path = url.path(),
                attempt,
            );
            self.attempt_inner(
                method,
                url,
                headers,
                body,
                attempt,
                max_attempts,
                idempotency,
            )
            .instrument(span)
            .await
        }
        #[cfg(not(feature = "tracing"))]
        self.attempt_inner(
            method,
            url,
            headers,
            body,
            attempt,
            max_attempts,
            idempotency,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_inner(
        &self,
        method: &Method,
        url: Url,
        headers: HeaderMap,
        body: AsyncBody,
        attempt: u32,
        max_attempts: u32,
        idempotency: Idempotency,
    ) -> Result<Outcome> {
        #[cfg(feature = "metrics")]
        metrics::counter!("s3_http_attempts_total", "method" => method_label(method)).increment(1);
        #[cfg(feature = "tracing")]
        if self.trace {
            tracing::debug!(
                url = %url,
                headers = %crate::util::redact::redacted_headers(&headers),
                "sending request"
            );
        }
        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let can_retry = attempt < max_attempts;
        let req = self.build_request(method, url, headers, body);
        match req.send().await {
            Ok(resp) => {
                #[cfg(feature = "metrics")]
                {
                    metrics::counter!(
                        "s3_http_responses_total",
                        "method" => method_label(method),
                        "class" => status_class(resp.status()),
                    )
                    .increment(1);
                    metrics::histogram!(
                        "s3_http_request_duration_seconds",
                        "method" => method_label(method),
                    )
                    .record(start.elapsed().as_secs_f64());
                }
                #[cfg(feature = "tracing")]
                if self.trace {
                    tracing::debug!(
                        status = resp.status().as_u16(),
                        headers = %crate::util::redact::redacted_headers(resp.headers()),
                        "received response"
                    );
                }

                // A status reply means the server saw the request, so only
                // requests that tolerate a second delivery go again.
                if can_retry
                    && idempotency.retries_ambiguous_failures()
                    && should_retry_status(resp.status())
                {
                    #[cfg(feature = "metrics")]
                    metrics::counter!(
                        "s3_http_retries_total",
                        "method" => method_label(method),
                        "reason" => "status"
                    )
                    .increment(1);
                    return Ok(Outcome::Retry(retry_delay_from_response(
                        self.retry, attempt, &resp,
                    )));
                }
                Ok(Outcome::Done(resp))
            }
            Err(err) => {
                if can_retry && should_retry_error(&err, idempotency) {
                    #[cfg(feature = "metrics")]
                    metrics::counter!(
                        "s3_http_retries_total",
                        "method" => method_label(method),
                        "reason" => "transport"
                    )
                    .increment(1);
                    return Ok(Outcome::Retry(backoff_delay(self.retry, attempt)));
                }
                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "s3_http_errors_total",
                    "method" => method_label(method),
                    "kind" => "transport"
                )
                .increment(1);
                Err(Error::transport("request failed", Some(Box::new(err))))
            }
        }
    }

    fn build_request(
        &self,
        method: &Method,
        url: Url,
        headers: HeaderMap,
        body: AsyncBody,
    ) -> reqwest::RequestBuilder {
        let req = self.client.request(method.clone(), url).headers(headers);
        match body {
            AsyncBody::Empty => req,
            AsyncBody::Bytes(b) => req.body(b),
            AsyncBody::Stream(s) => req.body(reqwest::Body::wrap_stream(s)),
        }
    }
}

/// Turns a non-success response into a classified error.
pub(crate) async fn response_error(resp: reqwest::Response) -> Error {
    let status = resp.status();
    let headers = resp.headers().clone();
    let body_bytes = match resp.bytes().await {
        Ok(b) => b,
        Err(_) => Bytes::new(),
    };
    error_from_parts(status, &headers, &String::from_utf8_lossy(&body_bytes))
}

pub(crate) fn error_from_parts(status: StatusCode, headers: &HeaderMap, body: &str) -> Error {
    let request_id = headers
        .get("x-amz-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Error::RateLimited {
            retry_after: retry_after(headers),
            request_id,
        };
    }

    let snippet = crate::util::text::truncate_snippet(body, 4096);

    if let Some(parsed) = crate::util::xml::parse_error_xml(body) {
        return Error::Api {
            status,
            code: parsed.code,
            message: parsed.message,
            request_id: parsed.request_id.or(request_id),
            host_id: parsed.host_id,
            body_snippet: Some(snippet),
        };
    }

    // HEAD responses carry no body; name the common cases anyway.
    let code = match status {
        StatusCode::NOT_FOUND => Some("NotFound".to_string()),
        StatusCode::FORBIDDEN => Some("AccessDenied".to_string()),
        _ => None,
    };
    Error::Api {
        status,
        code,
        message: None,
        request_id,
        host_id: None,
        body_snippet: (!snippet.is_empty()).then_some(snippet),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(http::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn retry_delay_from_response(
    config: RetryConfig,
    attempt: u32,
    resp: &reqwest::Response,
) -> Duration {
    if resp.status() == StatusCode::TOO_MANY_REQUESTS
        && let Some(retry_after) = retry_after(resp.headers())
    {
        return retry_after;
    }
    backoff_delay(config, attempt)
}

fn should_retry_error(err: &reqwest::Error, idempotency: Idempotency) -> bool {
    if err.is_connect() {
        return true;
    }
    idempotency.retries_ambiguous_failures()
        && (err.is_timeout() || err.is_request() || err.is_body())
}

#[cfg(feature = "metrics")]
fn status_class(status: StatusCode) -> &'static str {
    if status.is_informational() {
        "1xx"
    } else if status.is_success() {
        "2xx"
    } else if status.is_redirection() {
        "3xx"
    } else if status.is_client_error() {
        "4xx"
    } else if status.is_server_error() {
        "5xx"
    } else {
        "other"
    }
}

#[cfg(feature = "metrics")]
fn method_label(method: &Method) -> &'static str {
    match method.as_str() {
        "GET" => "GET",
        "PUT" => "PUT",
        "HEAD" => "HEAD",
        "DELETE" => "DELETE",
        "POST" => "POST",
        _ => "OTHER",
    }
}

pub(crate) fn default_user_agent() -> String {
    format!("s3io/{}", env!("CARGO_PKG_VERSION"))
}
