use std::{error::Error as StdError, fmt, time::Duration};

use http::StatusCode;

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error type for request building, signing, transport, streaming and uploads.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Invalid configuration or parameters (presign expiry, part sizing, endpoint).
    InvalidConfig { message: String },

    /// Request signing failed because an input was missing or malformed.
    Signing { message: String },

    /// Request was throttled by the service.
    RateLimited {
        retry_after: Option<Duration>,
        request_id: Option<String>,
    },

    /// Service returned an error response.
    Api {
        status: StatusCode,
        code: Option<String>,
        message: Option<String>,
        request_id: Option<String>,
        host_id: Option<String>,
        body_snippet: Option<String>,
    },

    /// Transport-level failure (HTTP client, IO, TLS).
    Transport {
        message: String,
        source: Option<BoxError>,
    },

    /// Response decode or parse failure.
    Decode {
        message: String,
        source: Option<BoxError>,
    },

    /// Object reader misuse or an incomplete transfer.
    Stream { message: String },

    /// Multipart upload could not reach a consistent state.
    ///
    /// The upload id is kept so the caller can resume or abort out of band.
    Upload {
        upload_id: Option<String>,
        message: String,
        source: Option<BoxError>,
    },

    /// Operation was cancelled by its caller.
    Cancelled { upload_id: Option<String> },
}

impl Error {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a signing error.
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Creates a transport error with optional source.
    pub fn transport(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::Transport {
            message: message.into(),
            source,
        }
    }

    /// Creates a decode error with optional source.
    pub fn decode(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::Decode {
            message: message.into(),
            source,
        }
    }

    /// Creates a stream-state error.
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Creates an upload-consistency error bound to an upload id.
    pub fn upload(upload_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::Upload {
            upload_id: upload_id.map(str::to_string),
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn upload_with_source(message: impl Into<String>, source: BoxError) -> Self {
        Self::Upload {
            upload_id: None,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Wraps a failure that happened while an upload session was active.
    ///
    /// Errors that already carry an upload id are returned unchanged.
    pub(crate) fn within_upload(self, upload_id: &str) -> Self {
        match self {
            Self::Cancelled { upload_id: None } => Self::Cancelled {
                upload_id: Some(upload_id.to_string()),
            },
            Self::Upload {
                upload_id: None,
                message,
                source,
            } => Self::Upload {
                upload_id: Some(upload_id.to_string()),
                message,
                source,
            },
            err @ (Self::Upload { .. } | Self::Cancelled { .. }) => err,
            other => Self::Upload {
                upload_id: Some(upload_id.to_string()),
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled() -> Self {
        Self::Cancelled { upload_id: None }
    }

    /// Returns an HTTP status when available.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Self::Upload {
                source: Some(source),
                ..
            } => source.downcast_ref::<Error>().and_then(Error::status),
            _ => None,
        }
    }

    /// Returns the service error code (for example `NoSuchUpload`).
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            Self::Upload {
                source: Some(source),
                ..
            } => source.downcast_ref::<Error>().and_then(Error::code),
            _ => None,
        }
    }

    /// Returns the request id if reported by the service.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Api { request_id, .. } | Self::RateLimited { request_id, .. } => {
                request_id.as_deref()
            }
            _ => None,
        }
    }

    /// Returns the multipart upload id the failure belongs to.
    pub fn upload_id(&self) -> Option<&str> {
        match self {
            Self::Upload { upload_id, .. } | Self::Cancelled { upload_id } => upload_id.as_deref(),
            _ => None,
        }
    }

    /// Returns true if the error is safe to retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => {
                status.is_server_error() || *status == StatusCode::REQUEST_TIMEOUT
            }
            Self::Transport { .. } => true,
            Self::InvalidConfig { .. }
            | Self::Signing { .. }
            | Self::Decode { .. }
            | Self::Stream { .. }
            | Self::Upload { .. }
            | Self::Cancelled { .. } => false,
        }
    }
}

/// Renders ` label=value`, or nothing when the value is missing or empty.
struct Field<'a>(&'static str, &'a Option<String>);

impl fmt::Display for Field<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1.as_deref() {
            Some(v) if !v.is_empty() => write!(f, " {}={v}", self.0),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { message } => write!(f, "invalid config: {message}"),
            Self::Signing { message } => write!(f, "signing error: {message}"),
            Self::RateLimited { retry_after, .. } => {
                f.write_str("rate limited")?;
                if let Some(after) = retry_after {
                    write!(f, " (retry after {}s)", after.as_secs())?;
                }
                Ok(())
            }
            Self::Api {
                status,
                code,
                message,
                request_id,
                ..
            } => {
                write!(
                    f,
                    "api error: {status}{}{}",
                    Field("code", code),
                    Field("request_id", request_id)
                )?;
                match message.as_deref() {
                    Some(m) if !m.is_empty() => write!(f, " ({m})"),
                    _ => Ok(()),
                }
            }
            Self::Transport { message, .. } => write!(f, "transport error: {message}"),
            Self::Decode { message, .. } => write!(f, "decode error: {message}"),
            Self::Stream { message } => write!(f, "stream error: {message}"),
            Self::Upload {
                upload_id, message, ..
            } => write!(f, "upload error:{} {message}", Field("upload_id", upload_id)),
            Self::Cancelled { upload_id } => {
                write!(f, "operation cancelled{}", Field("upload_id", upload_id))
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Transport { source, .. }
            | Self::Decode { source, .. }
            | Self::Upload { source, .. } => {
                source.as_deref().map(|e| e as &(dyn StdError + 'static))
            }
            Self::InvalidConfig { .. }
            | Self::Signing { .. }
            | Self::RateLimited { .. }
            | Self::Api { .. }
            | Self::Stream { .. }
            | Self::Cancelled { .. } => None,
        }
    }
}
