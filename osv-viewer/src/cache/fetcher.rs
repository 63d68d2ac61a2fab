//! Network retrieval seam for the asset cache
//!
//! The cache only sees [`AssetFetcher`]; [`HttpFetcher`] is the production
//! implementation over reqwest, with an optional origin-wide rate limit.

use crate::error::AssetError;
use async_trait::async_trait;
use std::num::NonZeroU32;
use std::time::Duration;

const USER_AGENT: &str = concat!("osv-viewer/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Raw response of one fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    /// `Content-Type` header, if any
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// One network retrieval
///
/// Implementations perform a single attempt; retries, timeouts and
/// deduplication belong to the cache.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, AssetError>;
}

/// Reject payloads that are not images
///
/// Trusts an `image/*` content type; falls back to sniffing the payload when
/// the header is missing or generic.
pub fn ensure_image(url: &str, asset: &FetchedAsset) -> Result<(), AssetError> {
    let declared = asset
        .content_type
        .as_deref()
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase());

    let is_image = match declared.as_deref() {
        Some(ct) if ct.starts_with("image/") => true,
        None | Some("application/octet-stream") | Some("binary/octet-stream") | Some("") => {
            infer::is_image(&asset.bytes)
        }
        Some(_) => false,
    };

    if is_image {
        Ok(())
    } else {
        Err(AssetError::InvalidContentType {
            url: url.to_string(),
            content_type: asset.content_type.clone(),
        })
    }
}

type DirectLimiter = governor::RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
    rate_limiter: Option<DirectLimiter>,
}

impl HttpFetcher {
    pub fn new(requests_per_second: Option<u32>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;

        let rate_limiter = requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| governor::RateLimiter::direct(governor::Quota::per_second(rps)));

        Ok(Self { client, rate_limiter })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, AssetError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        tracing::debug!(url = %url, "Fetching asset");

        let transport = |e: reqwest::Error| AssetError::Http {
            url: url.to_string(),
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::Http {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: status.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await.map_err(transport)?;

        Ok(FetchedAsset {
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}
