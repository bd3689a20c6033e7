use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest::header::{CONTENT_DISPOSITION, SET_COOKIE};
use reqwest::{Client, Response};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;
use url::Url;

use crate::errors::{EdgeSuiteError, Result};
use crate::traits::MirrorTransport;

const CONFIRMATION_HOSTS: &[&str] = &[
    "drive.google.com",
    "docs.google.com",
    "drive.usercontent.google.com",
];

/// Hosts that put a "large file" warning page in front of the actual download.
pub fn requires_confirmation(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| CONFIRMATION_HOSTS.contains(&host.as_str()))
}

fn confirm_in_body() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?:confirm=|name="confirm"\s+value=")([0-9A-Za-z_\-]+)"#)
            .expect("confirm token pattern")
    })
}

fn uuid_in_body() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"name="uuid"\s+value="([0-9A-Za-z_\-]+)""#).expect("uuid pattern")
    })
}

/// Token handed out by a warning page, needed for the second request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationToken {
    pub confirm: String,
    pub uuid: Option<String>,
}

/// Pull the confirmation token from `download_warning*` cookies or the page body.
pub fn extract_confirmation<'a>(
    set_cookies: impl IntoIterator<Item = &'a str>,
    body: &str,
) -> Option<ConfirmationToken> {
    let from_cookie = set_cookies.into_iter().find_map(|cookie| {
        let (name, rest) = cookie.split_once('=')?;
        if !name.trim().starts_with("download_warning") {
            return None;
        }
        let value = rest.split(';').next()?.trim();
        (!value.is_empty()).then(|| value.to_string())
    });

    let confirm = from_cookie.or_else(|| {
        confirm_in_body()
            .captures(body)
            .map(|c| c[1].to_string())
    })?;

    let uuid = uuid_in_body().captures(body).map(|c| c[1].to_string());
    Some(ConfirmationToken { confirm, uuid })
}

/// The download URL with the confirmation parameters appended.
pub fn confirmed_url(url: &str, token: &ConfirmationToken) -> Result<Url> {
    let mut parsed = Url::parse(url).map_err(|e| EdgeSuiteError::mirror(url, e))?;
    {
        let mut query = parsed.query_pairs_mut();
        query.append_pair("confirm", &token.confirm);
        if let Some(uuid) = &token.uuid {
            query.append_pair("uuid", uuid);
        }
    }
    Ok(parsed)
}

fn is_attachment(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("attachment"))
}

/// Plain HTTP(S) GET, streamed to disk.
pub struct HttpTransport {
    client: Client,
    read_timeout: Duration,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EdgeSuiteError::Configuration {
                message: format!("HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            read_timeout,
        })
    }

    async fn get(&self, url: &str) -> Result<Response> {
        let request = self.client.get(url).send();
        let response = tokio::time::timeout(self.read_timeout, request)
            .await
            .map_err(|_| EdgeSuiteError::mirror(url, "timed out waiting for response"))?
            .map_err(|e| EdgeSuiteError::mirror(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EdgeSuiteError::mirror(url, format!("HTTP {}", status)));
        }
        Ok(response)
    }

    async fn confirmed_response(&self, url: &str) -> Result<Response> {
        let first = self.get(url).await?;
        if is_attachment(&first) {
            return Ok(first);
        }

        let cookies: Vec<String> = first
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        let body = tokio::time::timeout(self.read_timeout, first.text())
            .await
            .map_err(|_| EdgeSuiteError::mirror(url, "timed out reading warning page"))?
            .map_err(|e| EdgeSuiteError::mirror(url, e))?;

        let token = extract_confirmation(cookies.iter().map(String::as_str), &body)
            .ok_or_else(|| EdgeSuiteError::mirror(url, "no confirmation token on warning page"))?;
        let second = confirmed_url(url, &token)?;
        debug!("confirming download via {}", second);
        self.get(second.as_str()).await
    }

    async fn stream_to_file(&self, url: &str, response: Response, destination: &Path) -> Result<u64> {
        let file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| EdgeSuiteError::file_system(destination, "download file creation", e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        loop {
            let next = tokio::time::timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| EdgeSuiteError::mirror(url, "transfer stalled"))?;
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| EdgeSuiteError::mirror(url, e))?;

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| EdgeSuiteError::file_system(destination, "download write", e))?;
            written += chunk.len() as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| EdgeSuiteError::file_system(destination, "download flush", e))?;
        Ok(written)
    }
}

#[async_trait]
impl MirrorTransport for HttpTransport {
    async fn download(&self, url: &str, destination: &Path) -> Result<u64> {
        let response = if requires_confirmation(url) {
            self.confirmed_response(url).await?
        } else {
            self.get(url).await?
        };
        self.stream_to_file(url, response, destination).await
    }
}
