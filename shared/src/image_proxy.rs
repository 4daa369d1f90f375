use crate::config::ProxyConfig;
use async_trait::async_trait;
use lambda_http::{http::StatusCode, Body, Error, Response};
use std::future::Future;
use std::time::Duration;
use url::Url;

/// Some object-store edges reject requests without a browser user agent
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";
const CACHE_CONTROL: &str = "public, max-age=86400"; // 24 hours
const MAX_REDIRECTS: usize = 5;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Upstream response as seen by the proxy.
///
/// `body` is only populated for successful responses; error bodies are
/// never read or forwarded.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedImage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("could not connect to upstream: {0}")]
    Connect(String),
    #[error("upstream timed out: {0}")]
    Timeout(String),
    #[error("upstream request failed: {0}")]
    Request(String),
    #[error("failed to read upstream body: {0}")]
    Body(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Connect(_) | FetchError::Timeout(_))
    }

    fn from_send(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_connect() {
            FetchError::Connect(err.to_string())
        } else {
            FetchError::Request(err.to_string())
        }
    }

    fn from_body(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else {
            FetchError::Body(err.to_string())
        }
    }
}

/// Every way a proxy request can end other than a 200.
///
/// The `Display` text is the exact plain-text body sent to the caller, so
/// internal details never leak into the response.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Missing image URL")]
    MissingUrl,
    #[error("Invalid image URL")]
    InvalidUrl,
    #[error("Failed to fetch image")]
    Upstream(u16),
    #[error("Internal Server Error")]
    Internal(#[from] FetchError),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingUrl | ProxyError::InvalidUrl => StatusCode::BAD_REQUEST,
            // A redirect that was not followed has no Location to hand back
            ProxyError::Upstream(status) if (300..400).contains(status) => StatusCode::BAD_GATEWAY,
            ProxyError::Upstream(status) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Outbound side of the proxy
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedImage, FetchError>;
}

/// `reqwest` backed fetcher shared by every request in the process
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    max_attempts: u32,
}

impl HttpImageFetcher {
    pub fn new(config: &ProxyConfig) -> Result<Self, reqwest::Error> {
        let upstream_host = config.upstream_host.clone();

        // Redirects must not leave the allowed host
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            let allowed = attempt.previous().len() < MAX_REDIRECTS
                && attempt
                    .url()
                    .host_str()
                    .is_some_and(|host| host.eq_ignore_ascii_case(&upstream_host));
            if allowed {
                attempt.follow()
            } else {
                attempt.stop()
            }
        });

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(redirect)
            .build()?;

        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
        })
    }

    async fn fetch_once(&self, url: &Url) -> Result<FetchedImage, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await
            .map_err(FetchError::from_send)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            // Dropping the response releases the connection without reading the body
            return Ok(FetchedImage {
                status,
                content_type: None,
                body: Vec::new(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.bytes().await.map_err(FetchError::from_body)?;

        Ok(FetchedImage {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedImage, FetchError> {
        fetch_with_retries(self.max_attempts, || self.fetch_once(url)).await
    }
}

fn is_transient_status(status: u16) -> bool {
    matches!(status, 502 | 503 | 504)
}

/// Run `op` up to `max_attempts` times, retrying only connect errors,
/// timeouts and gateway statuses.
async fn fetch_with_retries<Op, Fut>(max_attempts: u32, mut op: Op) -> Result<FetchedImage, FetchError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<FetchedImage, FetchError>>,
{
    let mut attempt = 1;
    loop {
        let result = op().await;
        let retry = attempt < max_attempts
            && match &result {
                Ok(image) => is_transient_status(image.status),
                Err(e) => e.is_transient(),
            };
        if !retry {
            return result;
        }

        match &result {
            Ok(image) => tracing::warn!(
                "Upstream returned {} on attempt {}/{}, retrying",
                image.status,
                attempt,
                max_attempts
            ),
            Err(e) => tracing::warn!(
                "Upstream fetch failed on attempt {}/{}: {}, retrying",
                attempt,
                max_attempts,
                e
            ),
        }

        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
        attempt += 1;
    }
}

/// Check the `url` query parameter before anything is fetched.
///
/// The target must parse as an absolute http(s) URL whose host is exactly
/// `upstream_host`. A URL that merely mentions the host somewhere else
/// (path, query, userinfo) is rejected.
pub fn validate_target(target: Option<&str>, upstream_host: &str) -> Result<Url, ProxyError> {
    let target = target
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ProxyError::MissingUrl)?;

    let url = Url::parse(target).map_err(|_| ProxyError::InvalidUrl)?;

    let allowed = matches!(url.scheme(), "http" | "https")
        && url
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(upstream_host));
    if !allowed {
        return Err(ProxyError::InvalidUrl);
    }

    Ok(url)
}

async fn fetch_image<F: ImageFetcher>(
    fetcher: &F,
    upstream_host: &str,
    target: Option<&str>,
) -> Result<FetchedImage, ProxyError> {
    let url = validate_target(target, upstream_host)?;

    tracing::debug!("Fetching image from {}", url);
    let image = fetcher.fetch(&url).await?;

    if !image.is_success() {
        return Err(ProxyError::Upstream(image.status));
    }

    Ok(image)
}

/// Handle `GET /api/proxy-image?url=...`
///
/// The whole upstream body is buffered before the response is built, so a
/// failure at any point still produces a clean error response.
pub async fn proxy_image<F: ImageFetcher>(
    fetcher: &F,
    upstream_host: &str,
    target: Option<&str>,
) -> Result<Response<Body>, Error> {
    match fetch_image(fetcher, upstream_host, target).await {
        Ok(image) => {
            let content_type = image
                .content_type
                .filter(|ct| !ct.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

            tracing::info!(
                "Proxied image ({} bytes, {})",
                image.body.len(),
                content_type
            );

            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", content_type)
                .header("Cache-Control", CACHE_CONTROL)
                .header("Access-Control-Allow-Origin", "*")
                .header("Access-Control-Allow-Methods", "GET")
                .header("Access-Control-Allow-Headers", "Content-Type")
                .body(Body::Binary(image.body))
                .map_err(Box::new)?)
        }
        Err(err) => {
            match &err {
                ProxyError::MissingUrl | ProxyError::InvalidUrl => {
                    tracing::warn!("Rejected proxy request: {} ({:?})", err, target)
                }
                ProxyError::Upstream(status) => {
                    tracing::warn!("Upstream responded with status {}", status)
                }
                ProxyError::Internal(source) => {
                    tracing::error!("Error proxying image: {}", source)
                }
            }

            Ok(Response::builder()
                .status(err.status_code())
                .header("Content-Type", "text/plain; charset=utf-8")
                .header("Access-Control-Allow-Origin", "*")
                .body(Body::Text(err.to_string()))
                .map_err(Box::new)?)
        }
    }
}
