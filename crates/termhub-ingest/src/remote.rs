// Remote access (HTTP and FTP)

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;
use std::io;
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::pipeline::Stream;

/// Remote content length lookup, the cheap change proxy of the StatLog
#[async_trait]
pub trait SizeProbe: Send + Sync {
    /// `Ok(None)` when the remote does not report a size
    async fn probe_size(&self, url: &str) -> Result<Option<u64>>;
}

/// A consumed download plus the size the remote announced for it
#[derive(Debug)]
pub struct Fetched<T> {
    pub value: T,
    pub size: Option<u64>,
}

/// URL without its query string; safe to log and persist
pub fn address_key(url: &str) -> &str {
    url.split_once('?').map_or(url, |(address, _)| address)
}

/// HTTP/FTP client for dump downloads
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: Client,
    max_retries: u32,
    retry_base: Duration,
}

impl RemoteClient {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| IngestError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            max_retries: config.max_retries,
            retry_base: Duration::from_secs(1),
        })
    }

    /// Shorten the probe backoff (tests)
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Download `url` and hand the body to `consume` on a blocking thread
    pub async fn fetch<T, F>(&self, url: &str, consume: F) -> Result<Fetched<T>>
    where
        T: Send + 'static,
        F: FnOnce(Stream<'_>) -> Result<T> + Send + 'static,
    {
        info!(address = %address_key(url), "Downloading");
        if url.starts_with("ftp://") {
            self.fetch_ftp(url, consume).await
        } else {
            self.fetch_http(url, consume).await
        }
    }

    async fn fetch_http<T, F>(&self, url: &str, consume: F) -> Result<Fetched<T>>
    where
        T: Send + 'static,
        F: FnOnce(Stream<'_>) -> Result<T> + Send + 'static,
    {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::DownloadFailed {
                address: address_key(url).to_string(),
                message: format!("HTTP error: {}", status),
            });
        }

        let size = response.content_length();
        let body = StreamReader::new(Box::pin(
            response
                .bytes_stream()
                .map_err(|e| io::Error::other(e.without_url())),
        ));
        let bridge = SyncIoBridge::new(body);

        let value = tokio::task::spawn_blocking(move || consume(Box::new(bridge)))
            .await
            .map_err(|e| IngestError::Pipeline(format!("download task failed: {}", e)))??;
        Ok(Fetched { value, size })
    }

    async fn fetch_ftp<T, F>(&self, url: &str, consume: F) -> Result<Fetched<T>>
    where
        T: Send + 'static,
        F: FnOnce(Stream<'_>) -> Result<T> + Send + 'static,
    {
        let (host, path) = split_ftp_url(url)?;
        let address = address_key(url).to_string();

        tokio::task::spawn_blocking(move || {
            let mut ftp = ftp_connect(&host, &address)?;
            let size = ftp.size(&path).ok().map(|s| s as u64);

            let mut data = ftp.retr_as_stream(&path).map_err(|e| ftp_error(&address, e))?;
            let value = consume(Box::new(&mut data))?;
            ftp.finalize_retr_stream(data)
                .map_err(|e| ftp_error(&address, e))?;
            if let Err(e) = ftp.quit() {
                debug!(error = %e, "FTP quit failed");
            }
            Ok(Fetched { value, size })
        })
        .await
        .map_err(|e| IngestError::Pipeline(format!("download task failed: {}", e)))?
    }

    async fn probe_once(&self, url: &str) -> Result<Option<u64>> {
        if url.starts_with("ftp://") {
            let (host, path) = split_ftp_url(url)?;
            let address = address_key(url).to_string();
            return tokio::task::spawn_blocking(move || {
                let mut ftp = ftp_connect(&host, &address)?;
                let size = ftp.size(&path).map_err(|e| ftp_error(&address, e))?;
                if let Err(e) = ftp.quit() {
                    debug!(error = %e, "FTP quit failed");
                }
                Ok(Some(size as u64))
            })
            .await
            .map_err(|e| IngestError::Pipeline(format!("probe task failed: {}", e)))?;
        }

        let response = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|e| classify(url, e))?;
        if !response.status().is_success() {
            return Err(IngestError::RemoteChangeCheckFailed {
                resource: address_key(url).to_string(),
                message: format!("HTTP error: {}", response.status()),
            });
        }

        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok()))
    }
}

#[async_trait]
impl SizeProbe for RemoteClient {
    async fn probe_size(&self, url: &str) -> Result<Option<u64>> {
        let mut attempt = 1;
        loop {
            match self.probe_once(url).await {
                Ok(size) => {
                    debug!(address = %address_key(url), ?size, "Probed remote size");
                    return Ok(size);
                },
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    warn!(
                        address = %address_key(url),
                        attempt,
                        max = self.max_retries,
                        error = %e,
                        "Size probe failed, retrying"
                    );
                    // Exponential backoff: base * 2^attempt
                    tokio::time::sleep(self.retry_base * 2u32.pow(attempt)).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

fn classify(url: &str, err: reqwest::Error) -> IngestError {
    let address = address_key(url).to_string();
    let transient = err.is_timeout() || err.is_connect();
    let message = err.without_url().to_string();
    if transient {
        IngestError::TransientNetwork { address, message }
    } else {
        IngestError::DownloadFailed { address, message }
    }
}

fn ftp_connect(host: &str, address: &str) -> Result<FtpStream> {
    let mut ftp = FtpStream::connect(format!("{}:21", host)).map_err(|e| ftp_error(address, e))?;
    ftp.login("anonymous", "anonymous@")
        .map_err(|e| ftp_error(address, e))?;
    // Passive mode for firewall/NAT compatibility
    ftp.set_mode(Mode::Passive);
    ftp.transfer_type(FileType::Binary)
        .map_err(|e| ftp_error(address, e))?;
    Ok(ftp)
}

fn ftp_error(address: &str, err: FtpError) -> IngestError {
    match err {
        FtpError::ConnectionError(e) => IngestError::TransientNetwork {
            address: address.to_string(),
            message: e.to_string(),
        },
        other => IngestError::DownloadFailed {
            address: address.to_string(),
            message: other.to_string(),
        },
    }
}

/// `ftp://host/path/file` → (`host`, `/path/file`)
fn split_ftp_url(url: &str) -> Result<(String, String)> {
    let rest = url.strip_prefix("ftp://").ok_or_else(|| IngestError::DownloadFailed {
        address: address_key(url).to_string(),
        message: "not an FTP URL".to_string(),
    })?;
    match rest.split_once('/') {
        Some((host, path)) if !host.is_empty() && !path.is_empty() => {
            Ok((host.to_string(), format!("/{}", path)))
        },
        _ => Err(IngestError::DownloadFailed {
            address: address_key(url).to_string(),
            message: "FTP URL without a file path".to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Read;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> RemoteClient {
        RemoteClient::new(&IngestConfig::default())
            .unwrap()
            .with_retry_base(Duration::from_millis(1))
    }

    #[test]
    fn test_address_key_strips_credentials() {
        assert_eq!(
            address_key("https://uts.example/download?url=x&apiKey=secret"),
            "https://uts.example/download"
        );
        assert_eq!(address_key("http://a/b.obo"), "http://a/b.obo");
    }

    #[test]
    fn test_split_ftp_url() {
        assert_eq!(
            split_ftp_url("ftp://ftp.ncbi.nlm.nih.gov/gene/DATA/gene_info.gz").unwrap(),
            ("ftp.ncbi.nlm.nih.gov".to_string(), "/gene/DATA/gene_info.gz".to_string())
        );
        assert!(split_ftp_url("ftp://host-only").is_err());
        assert!(split_ftp_url("http://a/b").is_err());
    }

    #[tokio::test]
    async fn test_probe_reads_content_length() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/go.obo"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "1234"))
            .mount(&server)
            .await;

        let size = client().probe_size(&format!("{}/go.obo", server.uri())).await.unwrap();
        assert_eq!(size, Some(1234));
    }

    #[tokio::test]
    async fn test_probe_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client().probe_size(&format!("{}/go.obo", server.uri())).await.unwrap_err();
        assert!(matches!(err, IngestError::RemoteChangeCheckFailed { .. }));
    }

    #[tokio::test]
    async fn test_fetch_streams_body_to_consumer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/so.obo"))
            .respond_with(ResponseTemplate::new(200).set_body_string("format-version: 1.2\n"))
            .mount(&server)
            .await;

        let fetched = client()
            .fetch(&format!("{}/so.obo", server.uri()), |mut stream| {
                let mut body = String::new();
                stream.read_to_string(&mut body)?;
                Ok(body)
            })
            .await
            .unwrap();
        assert_eq!(fetched.value, "format-version: 1.2\n");
        assert_eq!(fetched.size, Some(20));
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_download_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client()
            .fetch(&format!("{}/missing?apiKey=secret", server.uri()), |_| Ok(()))
            .await
            .unwrap_err();
        match err {
            IngestError::DownloadFailed { address, .. } => assert!(!address.contains("secret")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
