//! Accès réseau du cache
//!
//! Le cache ne parle qu'au trait [`AssetFetcher`] : [`HttpFetcher`] en production,
//! un fetcher scripté dans les tests.

use crate::error::{CacheError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// User-Agent envoyé quand le flux n'en précise pas
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Réponse ouverte, prête à être lue par morceaux
pub struct FetchResponse {
    /// Le serveur a honoré la requête `Range` : les octets reçus prolongent le partiel
    pub resumed: bool,
    /// Taille du corps restant, si annoncée
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("resumed", &self.resumed)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait AssetFetcher: Send + Sync + std::fmt::Debug {
    /// Ouvre `url` à partir de l'octet `offset` (0 : depuis le début)
    async fn open(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        offset: u64,
    ) -> Result<FetchResponse>;
}

/// En-têtes ajoutés selon l'hôte, pour les CDN qui filtrent le Referer
pub fn default_headers_for(url: &str) -> Vec<(&'static str, &'static str)> {
    let host = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default();

    let mut headers = vec![("User-Agent", DEFAULT_USER_AGENT)];
    if host.contains("qq.com") || host.contains("qqmusic") {
        headers.push(("Referer", "https://y.qq.com/"));
    } else if host.contains("migu") {
        headers.push(("Referer", "https://m.music.migu.cn/"));
    } else if host.contains("bilibili") || host.contains("bilivideo") || host.contains("hdslb") {
        headers.push(("Referer", "https://www.bilibili.com/"));
        headers.push(("Origin", "https://www.bilibili.com"));
    }
    headers
}

/// Fusionne les en-têtes du flux avec les valeurs par défaut de l'hôte
///
/// Les en-têtes fournis par le flux l'emportent, sans tenir compte de la casse.
pub fn merge_headers(url: &str, headers: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = default_headers_for(url)
        .into_iter()
        .filter(|(name, _)| !headers.keys().any(|k| k.eq_ignore_ascii_case(name)))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    merged.extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Fetcher HTTP basé sur reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn open(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        offset: u64,
    ) -> Result<FetchResponse> {
        let mut map = HeaderMap::new();
        for (name, value) in merge_headers(url, headers) {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => warn!(header = %name, "Skipping invalid request header"),
            }
        }
        if offset > 0 {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes={offset}-")) {
                map.insert(RANGE, value);
            }
        }

        debug!("GET {} (offset {})", url, offset);
        let response = self.client.get(url).headers(map).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Download(format!("HTTP error: {status}")));
        }

        let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(CacheError::from))
            .boxed();

        Ok(FetchResponse {
            resumed,
            content_length,
            body,
        })
    }
}
