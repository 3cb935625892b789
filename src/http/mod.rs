//! HTTP plumbing used by downloads
//!
//! The download controller never talks to reqwest directly. It goes through the
//! [`HttpClient`] trait, which only knows how to check that a resource exists,
//! fetch its headers and open its body as a byte stream. [`HttpConnector`] is the
//! reqwest-backed implementation and also carries the plain request helpers.

mod connector;
#[cfg(test)]
pub(crate) mod testing;

use std::{future::Future, pin::Pin};

use reqwest::header::{self, HeaderMap};
use tokio::io::AsyncRead;
use url::Url;

use crate::error::Result;

pub use connector::HttpConnector;

/// Response body of a download, read chunk by chunk
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// The operations a download needs from an HTTP client
pub trait HttpClient: Send + Sync + 'static {
    /// Whether the resource answers a HEAD request with `200 OK`
    fn exists(&self, url: &Url) -> impl Future<Output = Result<bool>> + Send;

    /// Response headers of the resource
    fn headers(&self, url: &Url) -> impl Future<Output = Result<HeaderMap>> + Send;

    /// Open the response body of a GET request
    fn open_stream(&self, url: &Url) -> impl Future<Output = Result<ByteStream>> + Send;
}

/// Typed `Content-Length` lookup
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|cl| cl.to_str().ok())
        .and_then(|cl| cl.trim().parse::<u64>().ok())
}
