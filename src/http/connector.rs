//! reqwest-backed [`HttpClient`] and request helpers
//!
//! Redirects are followed by hand so the limit comes from [`DownloadConfig`] and
//! every hop is logged.

use std::{io, path::Path};

use futures_util::TryStreamExt;
use reqwest::{
    Client, IntoUrl, Method, RequestBuilder, Response, StatusCode,
    header::{self, HeaderMap, HeaderValue},
    multipart::{Form, Part},
};
use tokio_util::io::StreamReader;
use tracing::{debug, instrument, trace};
use url::Url;

use super::{ByteStream, HttpClient};
use crate::{
    config::DownloadConfig,
    error::{Error, Result},
};

#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
    max_redirects: usize,
}

impl HttpConnector {
    pub fn new() -> Result<Self> {
        Self::with_config(&DownloadConfig::default())
    }

    pub fn with_config(config: &DownloadConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        let mut builder = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .default_headers(headers)
            .user_agent(config.user_agent.as_str());

        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            max_redirects: config.max_redirects,
        })
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// The underlying reqwest client
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.get(url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.post(url)
    }

    pub fn put<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.put(url)
    }

    pub fn delete<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.delete(url)
    }

    pub fn head<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.head(url)
    }

    /// POST a `multipart/form-data` body made of text fields and files read from disk
    pub async fn send_multipart<U: IntoUrl>(
        &self,
        url: U,
        fields: &[(&str, &str)],
        files: &[(&str, &Path)],
    ) -> Result<Response> {
        let mut form = Form::new();

        for (name, value) in fields {
            form = form.text(name.to_string(), value.to_string());
        }

        for (name, path) in files {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.to_string());
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            let part = Part::bytes(tokio::fs::read(path).await?)
                .file_name(file_name)
                .mime_str(mime.as_ref())?;
            form = form.part(name.to_string(), part);
        }

        Ok(self.client.post(url).multipart(form).send().await?)
    }

    /// Send a request, following up to `max_redirects` redirects
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn send_following(&self, method: Method, url: &Url) -> Result<Response> {
        let mut current_url = url.clone();
        let mut redirect_count = 0;

        loop {
            let response = self
                .client
                .request(method.clone(), current_url.clone())
                .send()
                .await?;

            if !response.status().is_redirection() {
                trace!(status = %response.status(), "Got response");
                return Ok(response);
            }

            if redirect_count >= self.max_redirects {
                return Err(Error::Redirect(format!(
                    "more than {} redirects",
                    self.max_redirects
                )));
            }

            let location = response
                .headers()
                .get(header::LOCATION)
                .ok_or_else(|| Error::Redirect("redirect without Location header".into()))?
                .to_str()
                .map_err(|e| Error::Redirect(e.to_string()))?;

            // Relative locations resolve against the current hop
            let next = current_url
                .join(location)
                .map_err(|e| Error::Redirect(e.to_string()))?;

            debug!(from = %current_url, to = %next, "Following redirect");
            current_url = next;
            redirect_count += 1;
        }
    }
}

fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(Error::Status(response.status()))
    }
}

impl HttpClient for HttpConnector {
    async fn exists(&self, url: &Url) -> Result<bool> {
        let response = self.send_following(Method::HEAD, url).await?;
        Ok(response.status() == StatusCode::OK)
    }

    async fn headers(&self, url: &Url) -> Result<HeaderMap> {
        let response = check_status(self.send_following(Method::HEAD, url).await?)?;
        Ok(response.headers().clone())
    }

    async fn open_stream(&self, url: &Url) -> Result<ByteStream> {
        let response = check_status(self.send_following(Method::GET, url).await?)?;
        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }
}
