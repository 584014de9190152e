//! utility module
use std::future::Future;

use futures::StreamExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;

use crate::shared::errors::FetchError;
use crate::shared::network::BoxedStream;

/// Run `stream_producer` on its own task and expose what it sends as a stream.
///
/// The producer stops as soon as its sender fails, i.e. when the returned
/// stream is dropped.
pub fn create_byte_stream<F, Fut>(buffer_size: usize, stream_producer: F) -> (BoxedStream, JoinHandle<()>)
where
    F: FnOnce(mpsc::Sender<Result<bytes::Bytes, FetchError>>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<bytes::Bytes, FetchError>>(buffer_size);

    let handle = tokio::spawn(async move {
        stream_producer(tx).await;
    });
    (ReceiverStream::new(rx).boxed(), handle)
}
