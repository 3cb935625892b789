//! Test doubles for the HTTP layer

use std::{
    io,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures_util::stream;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_util::io::StreamReader;
use url::Url;

use super::{ByteStream, HttpClient};
use crate::error::{Error, Result};

/// In-memory [`HttpClient`] serving a single body
pub(crate) struct MockClient {
    headers: HeaderMap,
    exists: Option<bool>,
    stream: Mutex<Option<ByteStream>>,
    pub header_calls: AtomicUsize,
}

impl MockClient {
    pub fn new(stream: ByteStream, content_length: Option<u64>) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(length) = content_length {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }

        Self {
            headers,
            exists: Some(true),
            stream: Mutex::new(Some(stream)),
            header_calls: AtomicUsize::new(0),
        }
    }

    /// Serve `body` and advertise its length
    pub fn with_body(body: &[u8]) -> Self {
        Self::new(
            Box::pin(io::Cursor::new(body.to_vec())),
            Some(body.len() as u64),
        )
    }

    /// Serve `body` without a `Content-Length` header
    pub fn without_length(body: &[u8]) -> Self {
        Self::new(Box::pin(io::Cursor::new(body.to_vec())), None)
    }

    /// Serve `body`, then fail the read that follows it
    pub fn failing_after(body: &'static [u8], content_length: u64) -> Self {
        let chunks: Vec<io::Result<&'static [u8]>> =
            vec![Ok(body), Err(io::Error::other("connection reset"))];
        Self::new(
            Box::pin(StreamReader::new(stream::iter(chunks))),
            Some(content_length),
        )
    }

    /// Make `exists` fail with a transport error
    pub fn unreachable(mut self) -> Self {
        self.exists = None;
        self
    }
}

impl HttpClient for MockClient {
    async fn exists(&self, _url: &Url) -> Result<bool> {
        self.exists
            .ok_or_else(|| Error::Io(io::Error::other("connection refused")))
    }

    async fn headers(&self, _url: &Url) -> Result<HeaderMap> {
        self.header_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.headers.clone())
    }

    async fn open_stream(&self, _url: &Url) -> Result<ByteStream> {
        self.stream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Io(io::Error::other("stream already opened")))
    }
}

/// Serve the given raw HTTP responses, one per connection, on a local port
pub(crate) async fn serve(responses: Vec<String>) -> Url {
    serve_recording(responses).await.0
}

/// Like [`serve`], also handing back every request received, body included
pub(crate) async fn serve_recording(
    responses: Vec<String>,
) -> (Url, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };

            let request = read_request(&mut socket).await;
            let _ = tx.send(request);

            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (Url::parse(&format!("http://{addr}/")).unwrap(), rx)
}

/// Read the request head, then as many body bytes as `Content-Length` announces
async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = [0u8; 1024];
    let mut request = Vec::new();
    let mut expected = None;

    loop {
        if expected.is_none() {
            if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                expected = Some(end + 4 + length);
            }
        }
        if expected.is_some_and(|total| request.len() >= total) {
            break;
        }

        let n = socket.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
    }

    request
}
