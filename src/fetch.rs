//! Remote fetching of item bodies
//!
//! [`RemoteFetcher`] hands back a body as an incremental byte stream, so the
//! packer can compress while bytes are still arriving. There are no retries
//! at this layer; a failure is returned to the caller as a [`FetchError`].

use crate::config::FetchConfig;
use crate::error::{Error, FetchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use std::path::Path;
use std::pin::Pin;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Incremental body of one remote resource
pub type ByteStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, FetchError>> + Send + 'static>>;

/// A successfully opened remote resource
pub struct FetchedBody {
    /// Payload size announced by the origin, when known
    pub content_length: Option<u64>,
    /// Body bytes in order
    pub stream: ByteStream,
    spooled: bool,
}

impl FetchedBody {
    /// Wrap an arbitrary stream
    pub fn new(
        content_length: Option<u64>,
        stream: impl Stream<Item = std::result::Result<Bytes, FetchError>> + Send + 'static,
    ) -> Self {
        Self {
            content_length,
            stream: Box::pin(stream),
            spooled: false,
        }
    }

    /// Whether the body is already on local disk with an exact length
    pub fn is_spooled(&self) -> bool {
        self.spooled
    }
}

impl std::fmt::Debug for FetchedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedBody")
            .field("content_length", &self.content_length)
            .field("spooled", &self.spooled)
            .finish_non_exhaustive()
    }
}

/// Opens streaming reads of remote URLs
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Start fetching `url`
    ///
    /// Resolves once the origin has accepted the request; body bytes are
    /// pulled from the returned stream. Errors raised while streaming are
    /// yielded by the stream itself.
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedBody, FetchError>;
}

/// [`RemoteFetcher`] backed by a shared `reqwest` client
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client from the fetch settings
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone());
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| Error::Config {
            message: format!("failed to build HTTP client: {}", e),
            key: Some("fetch".to_string()),
        })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedBody, FetchError> {
        let parsed = validate_url(url)?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_length = response.content_length();
        debug!(url, ?content_length, "remote body opened");

        let owned_url = url.to_string();
        let stream = response
            .bytes_stream()
            .map_err(move |e| FetchError::from_reqwest(&owned_url, e));

        Ok(FetchedBody::new(content_length, stream))
    }
}

/// Accept only absolute http(s) URLs
pub fn validate_url(url: &str) -> std::result::Result<url::Url, FetchError> {
    let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// Drain a body into an anonymous temporary file in `dir`
///
/// The returned body streams from that file and carries its exact length.
/// The file has no name on disk and disappears once the stream is dropped.
/// With a `limit`, a body producing more bytes fails with
/// [`FetchError::TooLong`] as soon as it passes the limit.
pub async fn spool(
    url: &str,
    body: FetchedBody,
    dir: &Path,
    limit: Option<u64>,
) -> std::result::Result<FetchedBody, FetchError> {
    let spool_error = |e: std::io::Error| FetchError::Spool {
        url: url.to_string(),
        reason: e.to_string(),
    };

    let dir = dir.to_path_buf();
    let std_file = tokio::task::spawn_blocking(move || tempfile::tempfile_in(dir))
        .await
        .map_err(|e| spool_error(std::io::Error::other(e)))?
        .map_err(spool_error)?;
    let mut file = tokio::fs::File::from_std(std_file);

    let mut stream = body.stream;
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        if let Some(declared) = limit.filter(|declared| written > *declared) {
            return Err(FetchError::TooLong {
                url: url.to_string(),
                declared,
            });
        }
        file.write_all(&chunk).await.map_err(spool_error)?;
    }
    file.flush().await.map_err(spool_error)?;
    file.rewind().await.map_err(spool_error)?;

    debug!(url, bytes = written, "body spooled to disk");

    let owned_url = url.to_string();
    let stream = ReaderStream::new(file).map_err(move |e| FetchError::Spool {
        url: owned_url.clone(),
        reason: e.to_string(),
    });

    let mut spooled = FetchedBody::new(Some(written), stream);
    spooled.spooled = true;
    Ok(spooled)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetchConfig {
            connect_timeout: Duration::from_secs(2),
            request_timeout: Some(Duration::from_millis(500)),
            ..FetchConfig::default()
        })
        .unwrap()
    }

    async fn collect(body: FetchedBody) -> std::result::Result<Vec<u8>, FetchError> {
        let mut out = Vec::new();
        let mut stream = body.stream;
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn successful_fetch_streams_body_with_length() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/a.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 4096]))
            .mount(&server)
            .await;

        let url = format!("{}/media/a.mp4", server.uri());
        let body = fetcher().fetch(&url).await.unwrap();

        assert_eq!(body.content_length, Some(4096));
        assert_eq!(collect(body).await.unwrap(), vec![1u8; 4096]);
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/missing.mp4", server.uri());
        let err = fetcher().fetch(&url).await.unwrap_err();

        match err {
            FetchError::Status { url: u, status } => {
                assert_eq!(u, url);
                assert_eq!(status, 404);
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_origin_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let url = format!("{}/slow.mp4", server.uri());
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn unreachable_origin_is_a_transport_error() {
        // Port 9 (discard) on localhost is not expected to accept connections
        let err = fetcher()
            .fetch("http://127.0.0.1:9/clip.mp4")
            .await
            .unwrap_err();
        assert!(
            matches!(err, FetchError::Transport { .. } | FetchError::Timeout { .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn non_http_urls_are_rejected_without_a_request() {
        for url in ["ftp://example.com/a.mp4", "not a url", "file:///etc/passwd"] {
            let err = fetcher().fetch(url).await.unwrap_err();
            assert!(matches!(err, FetchError::InvalidUrl { .. }), "{url}: {err:?}");
        }
    }

    #[tokio::test]
    async fn spool_learns_exact_length_of_unsized_body() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"spooled ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let body = FetchedBody::new(None, futures::stream::iter(chunks));

        let spooled = spool("http://origin/x", body, dir.path(), None).await.unwrap();
        assert_eq!(spooled.content_length, Some(19));
        assert!(spooled.is_spooled());
        assert_eq!(collect(spooled).await.unwrap(), b"hello spooled world");

        // Anonymous spool files never show up in the directory
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn spool_propagates_body_errors() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(FetchError::Transport {
                url: "http://origin/x".into(),
                reason: "connection reset".into(),
            }),
        ];
        let body = FetchedBody::new(None, futures::stream::iter(chunks));

        let err = spool("http://origin/x", body, dir.path(), None).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }

    #[tokio::test]
    async fn spool_stops_once_body_passes_its_limit() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![
            Ok(Bytes::from(vec![1u8; 60])),
            Ok(Bytes::from(vec![2u8; 60])),
        ];
        let body = FetchedBody::new(Some(100), futures::stream::iter(chunks));

        let err = spool("http://origin/x", body, dir.path(), Some(100))
            .await
            .unwrap_err();
        assert!(
            matches!(err, FetchError::TooLong { declared: 100, .. }),
            "got {err:?}"
        );
    }
}
