use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use tokio_stream::Stream;
use url::Url;

use crate::download::partition::ByteRange;
use crate::shared::errors::FetchError;

pub mod headers;
pub mod http;

pub type BoxedStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send + 'static>>;

/// A streamed response body together with the length the server announced.
pub struct RemoteBody {
    /// Value of the Content-Length header, if the server sent one.
    pub content_length: Option<u64>,
    pub stream: BoxedStream,
}

/// Transport able to fetch a whole resource or one inclusive byte range of it.
///
/// Every request carries the job's resolved header bag. Implementations must
/// report non-success responses as errors.
#[async_trait]
pub trait RangeTransport: Send + Sync {
    /// Probe request used during validation. May be retried by the transport.
    async fn probe(
        &self,
        source: &Url,
        headers: &HeaderMap,
        range: Option<ByteRange>,
    ) -> Result<RemoteBody, FetchError>;

    /// Data request issued by workers. Never retried by the transport.
    async fn fetch(
        &self,
        source: &Url,
        headers: &HeaderMap,
        range: Option<ByteRange>,
    ) -> Result<RemoteBody, FetchError>;
}
