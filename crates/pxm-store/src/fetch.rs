//! Verified streaming download into a [`FileEntry`].

use std::io::{ErrorKind, Read};

use anyhow::Context;
use pxm_keyfs::{KeyFsError, Transaction};
use reqwest::{
    blocking::Client,
    header::{HeaderMap, HeaderName, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED},
};
use tracing::{debug, info, warn};

use crate::{config::NetworkConfig, entry::FileEntry, hash::HashSpec};

const USER_AGENT: &str = concat!("pxm-store/", env!("CARGO_PKG_VERSION"));
const READ_BUFFER: usize = 64 * 1024;

/// Errors surfaced while populating an entry from upstream.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("[PXM200] fetching {url} failed with HTTP status {status}")]
    Status { url: String, status: u16 },
    #[error("[PXM201] request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("[PXM201] reading response from {url} failed: {source}")]
    Stream {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("[PXM202] {url}: content-length {expected} does not match {received} bytes received")]
    SizeMismatch {
        url: String,
        expected: u64,
        received: u64,
    },
    #[error("[PXM203] {relpath}: {algo} digest mismatch (expected {expected}, got {actual})")]
    DigestMismatch {
        relpath: String,
        algo: String,
        expected: String,
        actual: String,
    },
    #[error("[PXM204] refusing to fetch {url} while offline")]
    Offline { url: String },
    #[error("[PXM205] {relpath} has no upstream url")]
    MissingUrl { relpath: String },
    #[error(transparent)]
    KeyFs(#[from] KeyFsError),
}

/// Subset of upstream response headers this store records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub content_length: Option<String>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

pub struct RemoteResponse {
    pub status: u16,
    pub headers: ResponseHeaders,
    pub body: Box<dyn Read + Send>,
}

/// Blocking HTTP GET used to populate entries.
pub trait HttpGet: Send + Sync {
    fn get(&self, url: &str) -> Result<RemoteResponse, FetchError>;
}

/// [`HttpGet`] backed by a reqwest blocking client with a bounded timeout.
pub struct HttpClient {
    client: Client,
    offline: bool,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(network: NetworkConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(network.fetch_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            offline: network.offline,
        })
    }
}

impl HttpGet for HttpClient {
    fn get(&self, url: &str) -> Result<RemoteResponse, FetchError> {
        if self.offline {
            return Err(FetchError::Offline {
                url: url.to_string(),
            });
        }
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        let headers = capture_headers(response.headers());
        Ok(RemoteResponse {
            status: response.status().as_u16(),
            headers,
            body: Box::new(response),
        })
    }
}

fn capture_headers(headers: &HeaderMap) -> ResponseHeaders {
    let value = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned)
    };
    ResponseHeaders {
        content_length: value(CONTENT_LENGTH),
        last_modified: value(LAST_MODIFIED),
        content_type: value(CONTENT_TYPE),
    }
}

struct Download {
    content: Vec<u8>,
    digest: String,
    headers: ResponseHeaders,
}

impl FileEntry {
    /// Download the blob from the entry's recorded url.
    ///
    /// # Errors
    ///
    /// See [`FileEntry::cache_remote_file_from`].
    pub fn cache_remote_file(
        &mut self,
        tx: &mut Transaction,
        http: &dyn HttpGet,
    ) -> Result<(), FetchError> {
        let url = self
            .url()
            .map(ToOwned::to_owned)
            .ok_or_else(|| FetchError::MissingUrl {
                relpath: self.relpath().to_string(),
            })?;
        self.cache_remote_file_from(tx, http, &url)
    }

    /// Download the blob from `url` and verify it against the declared
    /// content-length and hash spec. The fragment of `url`, if any, is not
    /// sent upstream. On success `url` becomes the entry's recorded url.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Status`] for non-2xx responses,
    /// [`FetchError::SizeMismatch`] / [`FetchError::DigestMismatch`] when
    /// verification fails. A size or digest failure leaves the entry's blob
    /// absent; other failures leave the entry untouched.
    pub fn cache_remote_file_from(
        &mut self,
        tx: &mut Transaction,
        http: &dyn HttpGet,
        url: &str,
    ) -> Result<(), FetchError> {
        if !tx.is_write() {
            return Err(KeyFsError::ReadOnly.into());
        }
        let url = strip_fragment(url);
        info!(relpath = %self.relpath(), %url, "fetching remote file");
        let download = match self.download(http, url) {
            Ok(download) => download,
            Err(err) => {
                warn!(relpath = %self.relpath(), %url, error = %err, "remote fetch failed");
                if matches!(
                    err,
                    FetchError::SizeMismatch { .. } | FetchError::DigestMismatch { .. }
                ) {
                    self.file_delete(tx)?;
                }
                return Err(err);
            }
        };

        let headers = download.headers;
        if headers.content_type.is_some() {
            self.record.content_type = headers.content_type;
        }
        if headers.content_length.is_some() {
            self.record.content_length = headers.content_length;
        }
        if self.hash_spec().is_none() && self.eggfragment().is_none() {
            self.record.hash_spec = Some(format!("{}={}", self.hash_algo(), download.digest));
        }
        self.record.url = Some(url.to_string());
        let last_modified = headers
            .last_modified
            .or_else(|| self.record.last_modified.clone());
        let size = download.content.len();
        self.set_content(tx, download.content, last_modified)?;
        debug!(relpath = %self.relpath(), size, "cached remote file");
        Ok(())
    }

    fn download(&self, http: &dyn HttpGet, url: &str) -> Result<Download, FetchError> {
        let mut response = http.get(url)?;
        if !(200..300).contains(&response.status) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        let expected = response
            .headers
            .content_length
            .as_deref()
            .and_then(|value| value.trim().parse::<u64>().ok());
        let declared: Option<HashSpec> = self.hash();
        let mut hasher = self.hash_algo().hasher();
        let mut content = Vec::new();
        let mut buffer = vec![0u8; READ_BUFFER];
        loop {
            let read = match response.body.read(&mut buffer) {
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    let received = content.len() as u64;
                    return Err(match expected {
                        // truncated before the declared length
                        Some(expected) if received < expected => FetchError::SizeMismatch {
                            url: url.to_string(),
                            expected,
                            received,
                        },
                        _ => FetchError::Stream {
                            url: url.to_string(),
                            source,
                        },
                    });
                }
            };
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            content.extend_from_slice(&buffer[..read]);
        }

        let received = content.len() as u64;
        if let Some(expected) = expected {
            if expected != received {
                return Err(FetchError::SizeMismatch {
                    url: url.to_string(),
                    expected,
                    received,
                });
            }
        }
        let digest = hasher.finalize_hex();
        if let Some(spec) = declared {
            if digest != spec.value() {
                return Err(FetchError::DigestMismatch {
                    relpath: self.relpath().to_string(),
                    algo: spec.algo().to_string(),
                    expected: spec.value().to_string(),
                    actual: digest,
                });
            }
        }
        Ok(Download {
            content,
            digest,
            headers: response.headers,
        })
    }
}

fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use httptest::{matchers::*, responders::*, Expectation, Server};

    #[test]
    fn strips_fragment_before_fetching() {
        assert_eq!(
            strip_fragment("http://vcs.example/master#egg=pkg"),
            "http://vcs.example/master"
        );
        assert_eq!(strip_fragment("http://pkg.example/a.zip"), "http://pkg.example/a.zip");
    }

    #[test]
    fn http_client_captures_headers_and_body() -> Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/pkg-1.0.zip")).respond_with(
                status_code(200)
                    .insert_header("last-modified", "Thu, 25 Nov 2010 20:00:27 GMT")
                    .insert_header("content-type", "application/zip")
                    .body("123"),
            ),
        );
        let client = HttpClient::new(NetworkConfig::default())?;
        let mut response = client.get(&server.url_str("/pkg-1.0.zip"))?;
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.content_length.as_deref(), Some("3"));
        assert_eq!(
            response.headers.last_modified.as_deref(),
            Some("Thu, 25 Nov 2010 20:00:27 GMT")
        );
        assert_eq!(response.headers.content_type.as_deref(), Some("application/zip"));
        let mut body = Vec::new();
        response.body.read_to_end(&mut body)?;
        assert_eq!(body, b"123");
        Ok(())
    }

    #[test]
    fn http_client_reports_status_to_caller() -> Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/missing.zip"))
                .respond_with(status_code(404)),
        );
        let client = HttpClient::new(NetworkConfig::default())?;
        let response = client.get(&server.url_str("/missing.zip"))?;
        assert_eq!(response.status, 404);
        Ok(())
    }

    #[test]
    fn offline_client_refuses_requests() -> Result<()> {
        let client = HttpClient::new(NetworkConfig {
            offline: true,
            ..NetworkConfig::default()
        })?;
        let err = client
            .get("http://pkg.example/a.zip")
            .err()
            .expect("offline fetch must fail");
        assert!(matches!(err, FetchError::Offline { .. }));
        Ok(())
    }
}
