use std::{sync::Arc, time::Duration};

use url::Url;

use super::{Client, Inner, UploadDefaults};
use crate::{
    auth::{AddressingStyle, Auth, Region, SignatureVersion},
    error::{Error, Result},
    multipart::planner::{MAX_PART_SIZE, MIN_PART_SIZE},
    signing::Signer,
    transport::{
        RetryConfig,
        async_transport::{AsyncTransport, default_user_agent},
    },
};

const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;
const MAX_UPLOAD_CONCURRENCY: usize = 64;

pub struct ClientBuilder {
    endpoint: Url,
    region: Option<String>,
    auth: Auth,
    addressing: AddressingStyle,
    signature_version: SignatureVersion,
    retry: RetryConfig,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    app_info: Option<(String, String)>,
    trace_requests: bool,
    part_size: u64,
    upload_concurrency: usize,
}

impl ClientBuilder {
    pub(super) fn new(endpoint: &str) -> Result<Self> {
        let endpoint = parse_endpoint(endpoint)?;
        Ok(Self {
            endpoint,
            region: None,
            auth: Auth::Anonymous,
            addressing: AddressingStyle::Auto,
            signature_version: SignatureVersion::default(),
            retry: RetryConfig::default(),
            timeout: None,
            user_agent: None,
            app_info: None,
            trace_requests: false,
            part_size: MIN_PART_SIZE,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        })
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn addressing_style(mut self, style: AddressingStyle) -> Self {
        self.addressing = style;
        self
    }

    /// Authentication scheme for every request and presigned URL.
    pub fn signature_version(mut self, version: SignatureVersion) -> Self {
        self.signature_version = version;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts.max(1);
        self
    }

    pub fn base_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.max_delay = delay;
        self
    }

    /// Replaces the default `s3io/<version>` user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Appends `name/version` to the user agent.
    pub fn app_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.app_info = Some((name.into(), version.into()));
        self
    }

    /// Logs redacted request and response headers at debug level for this
    /// client only.
    pub fn trace_requests(mut self, enabled: bool) -> Self {
        self.trace_requests = enabled;
        self
    }

    /// Preferred multipart part size; raised automatically when an object
    /// would otherwise need more than 10 000 parts.
    pub fn part_size(mut self, bytes: u64) -> Self {
        self.part_size = bytes;
        self
    }

    /// Maximum number of parts in flight per upload.
    pub fn upload_concurrency(mut self, limit: usize) -> Self {
        self.upload_concurrency = limit;
        self
    }

    pub fn build(self) -> Result<Client> {
        let region = self
            .region
            .ok_or_else(|| Error::invalid_config("region is required"))
            .and_then(Region::new)?;

        if !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&self.part_size) {
            return Err(Error::invalid_config(
                "part_size must be between 5 MiB and 5 GiB",
            ));
        }
        if self.upload_concurrency == 0 || self.upload_concurrency > MAX_UPLOAD_CONCURRENCY {
            return Err(Error::invalid_config(
                "upload_concurrency must be between 1 and 64",
            ));
        }

        let user_agent = user_agent_string(self.user_agent, self.app_info)?;
        let transport =
            AsyncTransport::new(self.retry, user_agent, self.timeout, self.trace_requests)?;

        Ok(Client {
            inner: Arc::new(Inner {
                endpoint: self.endpoint,
                auth: self.auth,
                addressing: self.addressing,
                signer: Signer::new(self.signature_version, region),
                transport,
                uploads: UploadDefaults {
                    part_size: self.part_size,
                    concurrency: self.upload_concurrency,
                },
            }),
        })
    }
}

/// An origin only: http(s), a host, no path, query or fragment.
fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|_| Error::invalid_config("endpoint must be a valid absolute URL"))?;
    let problem = if !matches!(url.scheme(), "http" | "https") {
        "endpoint scheme must be http or https"
    } else if url.host_str().is_none() {
        "endpoint must include host"
    } else if url.query().is_some() || url.fragment().is_some() {
        "endpoint must not include query or fragment"
    } else if !matches!(url.path(), "" | "/") {
        "endpoint must not include a path"
    } else {
        return Ok(url);
    };
    Err(Error::invalid_config(problem))
}

fn user_agent_string(
    user_agent: Option<String>,
    app_info: Option<(String, String)>,
) -> Result<String> {
    let mut out = user_agent.unwrap_or_else(default_user_agent);
    if let Some((name, version)) = app_info {
        let name = name.trim();
        let version = version.trim();
        if name.is_empty() || version.is_empty() {
            return Err(Error::invalid_config(
                "app_info name and version must not be empty",
            ));
        }
        out.push(' ');
        out.push_str(name);
        out.push('/');
        out.push_str(version);
    }
    if http::HeaderValue::from_str(&out).is_err() {
        return Err(Error::invalid_config("user agent is not a valid header value"));
    }
    Ok(out)
}
