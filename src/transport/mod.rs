use std::time::Duration;

use http::{Method, StatusCode};

pub(crate) mod async_transport;

#[derive(Clone, Copy, Debug)]
pub(crate) struct RetryConfig {
    pub(crate) max_attempts: u32,
    pub(crate) base_delay: Duration,
    pub(crate) max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Whether a request may be sent again after an ambiguous failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Idempotency {
    /// Repeating the request has the same effect (GET, HEAD, PUT, DELETE).
    Idempotent,
    /// Not idempotent on the wire, but the caller reconciles the final state
    /// itself (multipart completion).
    Reissuable,
    /// Only retried when the request provably never left the client.
    NonIdempotent,
}

impl Idempotency {
    pub(crate) fn for_method(method: &Method) -> Self {
        match *method {
            Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS => {
                Self::Idempotent
            }
            _ => Self::NonIdempotent,
        }
    }

    fn retries_ambiguous_failures(self) -> bool {
        !matches!(self, Self::NonIdempotent)
    }
}

/// Statuses worth another attempt: request timeout, throttling and transient
/// server failures. Everything else is terminal.
pub(crate) fn should_retry_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Exponential delay before retry `attempt` (1-based), capped at
/// `max_delay`, with jitter over its upper half.
pub(crate) fn backoff_delay(config: RetryConfig, attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16);
    let ceiling = config
        .base_delay
        .saturating_mul(1 << doublings)
        .min(config.max_delay);

    let floor = ceiling / 2;
    let spread = (ceiling - floor).as_nanos() as u64;
    if spread == 0 {
        return ceiling;
    }
    floor + Duration::from_nanos(clock_noise() % spread)
}

fn clock_noise() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or_default()
}

#[cfg(feature = "rustls")]
pub(crate) fn ensure_rustls_crypto_provider() {
    use std::sync::OnceLock;

    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        if rustls::crypto::CryptoProvider::get_default().is_none() {
            let _ = rustls::crypto::ring::default_provider().install_default();
        }
    });
}
