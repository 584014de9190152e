use std::time::Duration;

use clap::Args;
use cookie::Cookie;
use derive_getters::Getters;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder, Proxy, redirect::Policy};
use secrecy::SecretString;
use tracing::{debug, warn};

use crate::shared::errors::FetchError;
use crate::shared::network::headers::parse_header_line;

#[derive(Debug, Args, Getters, Clone, Copy)]
pub struct RetryArgs {
    /// Maximum number of retries for the validation probe requests
    /// when a transient network issue occurs.
    #[arg(short = 'r', long, default_value_t = 3)]
    pub max_no_retries: usize,
    /// Upper bound in seconds of the exponential delay between probe retries.
    #[arg(short = 'd', long, default_value_t = 4)]
    pub retry_delay_secs: usize,
}

impl RetryArgs {
    pub fn new(max_no_retries: usize, retry_delay_secs: usize) -> Self {
        Self { max_no_retries, retry_delay_secs }
    }
}

impl Default for RetryArgs {
    fn default() -> Self {
        Self { max_no_retries: 3, retry_delay_secs: 4 }
    }
}

#[derive(Args, Debug, Clone)]
pub struct HttpArgs {
    #[command(flatten)]
    pub retry_args: RetryArgs,
    /// Http basic authentication username.
    #[arg(short = 'U', long, env = "MEDIAFETCH_HTTP_USERNAME")]
    pub username: Option<String>,
    /// Http basic authentication password.
    #[arg(short = 'P', long, env = "MEDIAFETCH_HTTP_PASSWORD")]
    pub password: Option<SecretString>,
    /// Maximum http redirects followed per request.
    #[arg(long)]
    pub max_redirects: Option<usize>,
    /// Connect and read timeout in seconds. A stalled range is retried by its worker.
    #[arg(short = 'T', long, default_value_t = 10)]
    pub timeout: usize,
    /// Route every request through this proxy.
    #[arg(short = 'p', long)]
    pub proxy_url: Option<String>,
    /// Comma separated `key:value` pairs e.g key1:value1,key2:value2 added to every request.
    #[arg(long)]
    pub request_headers: Option<String>,
    /// Cookies from a previous http session e.g `a=1; b=2`.
    #[arg(long)]
    pub http_cookies: Option<String>,
    /// Set http version, supports up to http version 1.1.
    #[arg(long)]
    pub http_version: Option<String>,
}

impl Default for HttpArgs {
    fn default() -> Self {
        Self {
            retry_args: RetryArgs::default(),
            username: None,
            password: None,
            max_redirects: None,
            timeout: 10,
            proxy_url: None,
            request_headers: None,
            http_cookies: None,
            http_version: None,
        }
    }
}

impl HttpArgs {
    /// Headers contributed by `--request-headers` and `--http-cookies`.
    pub fn job_headers(&self) -> Result<HeaderMap, FetchError> {
        let mut headers = HeaderMap::new();
        // name:value pairs, e.g. referer:https://site,x-token:abc
        if let Some(request_headers) = &self.request_headers {
            debug!("Parsing --request-headers");
            for header in request_headers.split(',').map(str::trim).filter(|h| !h.is_empty()) {
                if !header.contains(':') {
                    warn!("Ignoring malformed request header `{header}`");
                    continue;
                }
                let (name, value) = parse_header_line(header)?;
                headers.insert(name, value);
            }
        }

        if let Some(cookies_str) = &self.http_cookies {
            debug!("Parsing --http-cookies");
            let mut pairs = Vec::new();
            for raw in cookies_str.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                match Cookie::parse(raw) {
                    Ok(cookie) => pairs.push(format!("{}={}", cookie.name(), cookie.value())),
                    Err(err) => warn!(error = %err, "Can't sanitize cookie `{raw}`"),
                }
            }
            if !pairs.is_empty() {
                let value = HeaderValue::from_str(&pairs.join("; "))
                    .map_err(|err| FetchError::ParseError(err.to_string()))?;
                headers.insert(COOKIE, value);
            }
        }
        Ok(headers)
    }
}

impl TryFrom<&HttpArgs> for Client {
    type Error = FetchError;

    /// Tries to convert `HttpArgs` into a `reqwest::Client`.
    fn try_from(http_args: &HttpArgs) -> Result<Self, Self::Error> {
        build_client(http_args)
    }
}

fn build_client(http_args: &HttpArgs) -> Result<Client, FetchError> {
    let mut client_config = ClientBuilder::new();
    debug!("Building http client");

    let policy: Policy = if let Some(max_redirects) = http_args.max_redirects {
        debug!(max_redirects, "Limiting redirects");
        Policy::limited(max_redirects)
    } else {
        debug!("Using default redirect policy");
        Policy::default()
    };

    // No whole-request timeout, a range body may legitimately take minutes.
    let timeout = {
        debug!(timeout = http_args.timeout, "Setting connect and read timeout");
        Duration::from_secs(http_args.timeout as u64)
    };

    client_config = client_config
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .redirect(policy);

    if let Some(proxy_url) = &http_args.proxy_url {
        debug!(proxy = %proxy_url, "Routing requests through proxy");
        client_config = client_config.proxy(Proxy::all(proxy_url.as_str())?);
    } else {
        debug!("Connecting without proxy");
        client_config = client_config.no_proxy();
    }

    if let Some(http_version) = &http_args.http_version {
        client_config = if http_version.as_str() == "1.1" {
            debug!("Pinning HTTP/1.1");
            client_config.http1_only()
        } else {
            warn!(http_version = %http_version, "Unsupported http version, pinning HTTP/1.1");
            client_config.http1_only()
        }
    }

    let client = client_config.build()?;
    debug!("Http client ready");
    Ok(client)
}
