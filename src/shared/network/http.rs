use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, RANGE};
use reqwest::{Client, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use reqwest_tracing::TracingMiddleware;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, instrument, warn};
use url::Url;

pub mod config;

use self::config::HttpArgs;
use super::{RangeTransport, RemoteBody};
use crate::download::partition::ByteRange;
use crate::shared::errors::FetchError;
use crate::utils::create_byte_stream;

/// Chunks buffered between the socket reader task and the consumer.
const STREAM_BUFFER: usize = 64;

/// http client wrapper for reqwest library.
pub struct HttpAdapter {
    /// Used for validation probes, retries transient failures.
    probe_client: ClientWithMiddleware,
    /// Used by workers, which run their own retry loop.
    client: ClientWithMiddleware,
    credentials: Option<(String, SecretString)>,
}

impl HttpAdapter {
    #[instrument(name = "new_http_adapter", skip_all, fields(timeout = http_args.timeout))]
    pub fn new(http_args: &HttpArgs) -> Result<Self, FetchError> {
        let retry_args = http_args.retry_args;
        let max_retry_bound = (*retry_args.retry_delay_secs()).max(2);
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(
                Duration::from_secs(1),
                Duration::from_secs(max_retry_bound as u64),
            )
            .build_with_max_retries(*retry_args.max_no_retries() as u32);
        let retry_middleware = RetryTransientMiddleware::new_with_policy(retry_policy);

        let base = Client::try_from(http_args)?;
        let probe_client = ClientBuilder::new(base.clone())
            .with(TracingMiddleware::default())
            .with(retry_middleware)
            .build();
        let client = ClientBuilder::new(base)
            .with(TracingMiddleware::default())
            .build();

        let credentials = http_args.username.clone().map(|user| {
            let password = http_args
                .password
                .clone()
                .unwrap_or_else(|| SecretString::from(String::new()));
            (user, password)
        });

        Ok(Self { probe_client, client, credentials })
    }

    fn request(
        &self,
        client: &ClientWithMiddleware,
        source: &Url,
        headers: &HeaderMap,
        range: Option<ByteRange>,
    ) -> RequestBuilder {
        let mut request = client.get(source.clone()).headers(headers.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password.expose_secret()));
        }
        request
    }

    async fn open(&self, request: RequestBuilder) -> Result<RemoteBody, FetchError> {
        let resp = request.send().await?.error_for_status()?;
        let content_length = Self::content_length(&resp);
        debug!(status = %resp.status(), content_length, "Got response, streaming body.");
        let (stream, _handle) = create_byte_stream(STREAM_BUFFER, move |tx| async move {
            Self::process_chunk(resp, tx).await;
        });
        Ok(RemoteBody { content_length, stream })
    }

    /// Content-Length as announced by the server, not the size of the body
    /// after decoding.
    fn content_length(resp: &Response) -> Option<u64> {
        let header = resp.headers().get(CONTENT_LENGTH)?;
        match header.to_str().ok().and_then(|s| s.trim().parse::<u64>().ok()) {
            Some(size) => Some(size),
            None => {
                warn!("Can't convert Content-Length header {:?} to a size", header);
                None
            }
        }
    }

    //This function get http response body as chunks,log event especially error and send the chunk to a reciever
    async fn process_chunk(mut resp: Response, tx: Sender<Result<Bytes, FetchError>>) {
        loop {
            match resp.chunk().await {
                Ok(Some(bytes)) => {
                    if tx.send(Ok(bytes)).await.is_err() {
                        debug!("Body consumer went away, dropping response.");
                        break;
                    }
                }
                Ok(None) => {
                    break;
                }
                Err(err) => {
                    //Propagate error to receiver to handle it.
                    if let Err(err) = tx.send(Err(err.into())).await {
                        error!(error = %err, "Error sending error to channel");
                    }
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl RangeTransport for HttpAdapter {
    #[instrument(name = "http_probe", skip(self, headers), fields(url = %source))]
    async fn probe(
        &self,
        source: &Url,
        headers: &HeaderMap,
        range: Option<ByteRange>,
    ) -> Result<RemoteBody, FetchError> {
        self.open(self.request(&self.probe_client, source, headers, range))
            .await
    }

    async fn fetch(
        &self,
        source: &Url,
        headers: &HeaderMap,
        range: Option<ByteRange>,
    ) -> Result<RemoteBody, FetchError> {
        self.open(self.request(&self.client, source, headers, range))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::network::headers::default_headers;
    use crate::testing::{RangeServer, collect_body, sample_bytes};

    #[tokio::test]
    async fn test_fetch_range_from_server() {
        let body = sample_bytes(4096);
        let server = RangeServer::start(body.clone(), true).await;
        let adapter = HttpAdapter::new(&HttpArgs::default()).unwrap();

        let remote = adapter
            .fetch(&server.url(), &default_headers(), Some(ByteRange::new(100, 199)))
            .await
            .unwrap();
        assert_eq!(remote.content_length, Some(100));
        assert_eq!(collect_body(remote.stream).await.unwrap(), body[100..200]);
    }

    #[tokio::test]
    async fn test_fetch_whole_resource() {
        let body = sample_bytes(10_000);
        let server = RangeServer::start(body.clone(), true).await;
        let adapter = HttpAdapter::new(&HttpArgs::default()).unwrap();

        let remote = adapter
            .probe(&server.url(), &default_headers(), None)
            .await
            .unwrap();
        assert_eq!(remote.content_length, Some(10_000));
        assert_eq!(collect_body(remote.stream).await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_server_ignoring_range_returns_full_length() {
        let body = sample_bytes(2048);
        let server = RangeServer::start(body, false).await;
        let adapter = HttpAdapter::new(&HttpArgs::default()).unwrap();

        let remote = adapter
            .probe(&server.url(), &default_headers(), Some(ByteRange::new(10, 20)))
            .await
            .unwrap();
        assert_eq!(remote.content_length, Some(2048));
    }
}
