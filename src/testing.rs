//! Test doubles: an in-memory transport and a tiny HTTP range server.

use std::io;
use std::net::SocketAddr;
use std::ops::Range;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use reqwest::header::HeaderMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use url::Url;

use crate::download::partition::ByteRange;
use crate::shared::errors::FetchError;
use crate::shared::network::{BoxedStream, RangeTransport, RemoteBody};

/// Deterministic, non repeating-looking payload.
pub(crate) fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i % 251) as u8) ^ ((i / 251) as u8)).collect()
}

pub(crate) async fn collect_body(mut stream: BoxedStream) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk?);
    }
    Ok(body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Probe,
    Fetch,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub kind: RequestKind,
    pub range: Option<ByteRange>,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultKind {
    /// Body breaks off with a connection error.
    Reset,
    /// Body ends cleanly but early.
    Truncate,
}

#[derive(Debug)]
struct Fault {
    kind: FaultKind,
    /// Requests whose first byte falls in here are affected.
    starts: Range<u64>,
    remaining: usize,
    keep: usize,
}

/// In-memory [`RangeTransport`] serving one resource.
pub(crate) struct MockTransport {
    body: Bytes,
    ranges: bool,
    length: bool,
    full_length: bool,
    chunk_size: usize,
    faults: Mutex<Vec<Fault>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Bytes::from(body),
            ranges: true,
            length: true,
            full_length: true,
            chunk_size: 16 * 1024,
            faults: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Ignore `Range` headers and always send the whole resource.
    pub fn without_ranges(mut self) -> Self {
        self.ranges = false;
        self
    }

    /// Never announce a Content-Length.
    pub fn without_length(mut self) -> Self {
        self.length = false;
        self
    }

    /// Announce Content-Length on ranged responses only.
    pub fn without_full_length(mut self) -> Self {
        self.full_length = false;
        self
    }

    /// The next `times` fetches starting inside `starts` fail after `cut_after` bytes.
    pub fn flaky(self, starts: Range<u64>, times: usize, cut_after: usize) -> Self {
        self.fault(Fault { kind: FaultKind::Reset, starts, remaining: times, keep: cut_after })
    }

    /// The next `times` fetches end cleanly after `keep` bytes.
    pub fn truncated(self, times: usize, keep: usize) -> Self {
        self.fault(Fault { kind: FaultKind::Truncate, starts: 0..u64::MAX, remaining: times, keep })
    }

    fn fault(self, fault: Fault) -> Self {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).push(fault);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Ranges requested through `fetch`, in request order.
    pub fn fetched_ranges(&self) -> Vec<ByteRange> {
        self.requests()
            .into_iter()
            .filter(|request| request.kind == RequestKind::Fetch)
            .filter_map(|request| request.range)
            .collect()
    }

    fn take_fault(&self, start: u64) -> Option<(FaultKind, usize)> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let fault = faults
            .iter_mut()
            .find(|fault| fault.remaining > 0 && fault.starts.contains(&start))?;
        fault.remaining -= 1;
        Some((fault.kind, fault.keep))
    }

    fn serve(
        &self,
        kind: RequestKind,
        headers: &HeaderMap,
        range: Option<ByteRange>,
    ) -> Result<RemoteBody, FetchError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest { kind, range, headers: headers.clone() });

        let len = self.body.len() as u64;
        let (slice, partial) = match range {
            Some(range) if self.ranges => {
                if range.start >= len {
                    return Err(FetchError::Io(io::Error::other("416 Range Not Satisfiable")));
                }
                let end = range.end.min(len - 1);
                (self.body.slice(range.start as usize..=end as usize), true)
            }
            _ => (self.body.clone(), false),
        };
        let content_length = (self.length && (partial || self.full_length)).then_some(slice.len() as u64);

        let fault = match kind {
            RequestKind::Fetch => self.take_fault(range.map_or(0, |range| range.start)),
            RequestKind::Probe => None,
        };
        let sent = match fault {
            Some((_, keep)) => slice.slice(..keep.min(slice.len())),
            None => slice,
        };
        let mut items: Vec<Result<Bytes, FetchError>> = sent
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if let Some((FaultKind::Reset, _)) = fault {
            items.push(Err(FetchError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))));
        }

        Ok(RemoteBody { content_length, stream: stream::iter(items).boxed() })
    }
}

#[async_trait]
impl RangeTransport for MockTransport {
    async fn probe(
        &self,
        _source: &Url,
        headers: &HeaderMap,
        range: Option<ByteRange>,
    ) -> Result<RemoteBody, FetchError> {
        self.serve(RequestKind::Probe, headers, range)
    }

    async fn fetch(
        &self,
        _source: &Url,
        headers: &HeaderMap,
        range: Option<ByteRange>,
    ) -> Result<RemoteBody, FetchError> {
        self.serve(RequestKind::Fetch, headers, range)
    }
}

/// HTTP/1.1 server on a loopback port answering every GET with one resource.
pub(crate) struct RangeServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RangeServer {
    pub async fn start(body: Vec<u8>, ranges: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = Bytes::from(body);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let body = body.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(socket, body, ranges).await;
                });
            }
        });
        Self { addr, task }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/media.bin", self.addr)).unwrap()
    }
}

impl Drop for RangeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(mut socket: TcpStream, body: Bytes, ranges: bool) -> io::Result<()> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|window| window == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        head.extend_from_slice(&buf[..n]);
    }
    let head = String::from_utf8_lossy(&head);
    let requested = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim().eq_ignore_ascii_case("range").then(|| value.trim().to_owned())
        })
        .and_then(|value| parse_range(&value, body.len()));

    let (status, slice, content_range) = match requested {
        Some((start, end)) if ranges => (
            "206 Partial Content",
            body.slice(start..=end),
            format!("Content-Range: bytes {start}-{end}/{}\r\n", body.len()),
        ),
        _ => ("200 OK", body.clone(), String::new()),
    };
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\n{content_range}Connection: close\r\n\r\n",
        slice.len()
    );
    socket.write_all(header.as_bytes()).await?;
    socket.write_all(&slice).await?;
    socket.shutdown().await
}

fn parse_range(value: &str, len: usize) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.trim().parse().ok()?;
    let end: usize = match end.trim() {
        "" => len.checked_sub(1)?,
        end => end.parse().ok()?,
    };
    (start < len && start <= end).then(|| (start, end.min(len - 1)))
}
