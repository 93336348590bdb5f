//! Adaptateur NetEase Cloud Music
//!
//! L'API web officielle est essayée en premier ; les proxys compatibles
//! `NeteaseCloudMusicApi` servent de repli pour la recherche, le flux et les paroles.

use crate::http::{PlatformHttp, not_found};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use wfbsource::{
    PlatformId, ResolvedStream, Result, SourceAdapter, SourceError, StreamResolver, TrackMetadata,
};

const PAGE_SIZE: u32 = 30;

/// URLs des services NetEase
#[derive(Debug, Clone)]
pub struct NeteaseEndpoints {
    /// API web officielle
    pub official: String,
    /// Proxys `NeteaseCloudMusicApi`, dans l'ordre d'essai
    pub proxies: Vec<String>,
}

impl Default for NeteaseEndpoints {
    fn default() -> Self {
        Self {
            official: "https://music.163.com/api".into(),
            proxies: vec!["https://netease-cloud-music-api-ptr.vercel.app".into()],
        }
    }
}

impl NeteaseEndpoints {
    /// Remplace la liste des proxys par une base unique (`NETEASE_API_BASE`)
    pub fn with_proxy_override(mut self, base: Option<String>) -> Self {
        if let Some(base) = base.filter(|b| !b.trim().is_empty()) {
            self.proxies = vec![base.trim_end_matches('/').to_string()];
        }
        self
    }
}

// ============= Modèles de réponse =============

#[derive(Debug, Deserialize)]
struct WebSearchResponse {
    result: Option<WebSearchResult>,
}

#[derive(Debug, Deserialize)]
struct WebSearchResult {
    #[serde(default)]
    songs: Vec<Song>,
}

/// Chanson, telle que renvoyée par l'API web ou par les proxys
#[derive(Debug, Deserialize)]
struct Song {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    artists: Vec<Artist>,
    #[serde(default)]
    ar: Vec<Artist>,
    #[serde(default)]
    album: Option<Album>,
    #[serde(default)]
    al: Option<Album>,
    #[serde(default)]
    duration: Option<u64>,
    #[serde(default)]
    dt: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Album {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "picUrl")]
    pic_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    #[serde(default)]
    songs: Vec<Song>,
}

#[derive(Debug, Deserialize)]
struct UrlResponse {
    #[serde(default)]
    data: Vec<UrlItem>,
}

#[derive(Debug, Deserialize)]
struct UrlItem {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LyricResponse {
    lrc: Option<Lyric>,
}

#[derive(Debug, Deserialize)]
struct Lyric {
    lyric: Option<String>,
}

impl Song {
    fn album(&self) -> Option<&Album> {
        self.al.as_ref().or(self.album.as_ref())
    }

    fn into_metadata(self, cover_override: Option<String>) -> TrackMetadata {
        let artists = if self.ar.is_empty() { &self.artists } else { &self.ar };
        let artist = artists
            .iter()
            .map(|a| a.name.as_deref().unwrap_or("Unknown"))
            .collect::<Vec<_>>()
            .join("/");
        let mut meta = TrackMetadata::new(
            PlatformId::Netease,
            self.id.to_string(),
            self.name.clone().unwrap_or_default(),
            if artist.is_empty() { "Unknown".to_string() } else { artist },
        );
        meta.album = self.album().and_then(|a| a.name.clone());
        meta.duration_ms = self.dt.or(self.duration);
        meta.cover_url = cover_override.or_else(|| self.album().and_then(|a| a.pic_url.clone()));
        meta
    }
}

// ============= Accès API =============

#[derive(Debug)]
struct NeteaseApi {
    http: PlatformHttp,
    endpoints: NeteaseEndpoints,
}

impl NeteaseApi {
    async fn search_official(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        let offset = ((page.max(1) - 1) * PAGE_SIZE).to_string();
        let limit = PAGE_SIZE.to_string();
        let url = format!("{}/search/get/web", self.endpoints.official);
        let response: WebSearchResponse = self
            .http
            .get_json(
                &url,
                &[("s", query), ("type", "1"), ("offset", offset.as_str()), ("limit", limit.as_str())],
                &[],
            )
            .await?;
        let songs = response.result.map(|r| r.songs).unwrap_or_default();
        if songs.is_empty() {
            return Ok(Vec::new());
        }

        // La recherche web ne donne pas les pochettes : détail en lot, au mieux
        let covers = self
            .covers(songs.iter().map(|s| s.id))
            .await
            .unwrap_or_else(|e| {
                debug!(error = %e, "Netease detail lookup failed");
                HashMap::new()
            });

        Ok(songs
            .into_iter()
            .map(|s| {
                let cover = covers.get(&s.id).cloned();
                s.into_metadata(cover)
            })
            .collect())
    }

    async fn covers(&self, ids: impl Iterator<Item = u64>) -> Result<HashMap<u64, String>> {
        let ids = format!(
            "[{}]",
            ids.map(|id| id.to_string()).collect::<Vec<_>>().join(",")
        );
        let url = format!("{}/song/detail", self.endpoints.official);
        let detail: DetailResponse = self.http.get_json(&url, &[("ids", ids.as_str())], &[]).await?;
        Ok(detail
            .songs
            .into_iter()
            .filter_map(|s| {
                let cover = s.album().and_then(|a| a.pic_url.clone())?;
                Some((s.id, cover))
            })
            .collect())
    }

    async fn search_proxy(&self, base: &str, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        let offset = ((page.max(1) - 1) * PAGE_SIZE).to_string();
        let limit = PAGE_SIZE.to_string();
        let response: WebSearchResponse = self
            .http
            .get_json(
                &format!("{base}/search"),
                &[("keywords", query), ("limit", limit.as_str()), ("offset", offset.as_str())],
                &[],
            )
            .await?;
        Ok(response
            .result
            .map(|r| r.songs)
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.into_metadata(None))
            .collect())
    }

    async fn official_url(&self, id: &str) -> Result<ResolvedStream> {
        let ids = format!("[{id}]");
        let url = format!("{}/song/enhance/player/url", self.endpoints.official);
        let response: UrlResponse = self
            .http
            .get_json(&url, &[("id", id), ("ids", ids.as_str()), ("br", "320000")], &[])
            .await?;
        first_url(response)
            .map(|u| ResolvedStream::new(u).with_quality("320k"))
            .ok_or_else(|| not_found("official stream URL"))
    }

    async fn proxy_url(&self, base: &str, id: &str) -> Result<ResolvedStream> {
        let response: UrlResponse = self
            .http
            .get_json(
                &format!("{base}/song/url/v1"),
                &[("id", id), ("level", "standard")],
                &[],
            )
            .await?;
        first_url(response)
            .map(|u| ResolvedStream::new(u).with_quality("standard"))
            .ok_or_else(|| not_found("proxy stream URL"))
    }

    async fn lyric_at(&self, url: &str, query: &[(&str, &str)]) -> Result<Option<String>> {
        let response: LyricResponse = self.http.get_json(url, query, &[]).await?;
        Ok(response
            .lrc
            .and_then(|l| l.lyric)
            .filter(|l| !l.trim().is_empty()))
    }
}

fn first_url(response: UrlResponse) -> Option<String> {
    response
        .data
        .into_iter()
        .find_map(|item| item.url.filter(|u| !u.trim().is_empty()))
}

/// Adaptateur NetEase
#[derive(Debug)]
pub struct NeteaseAdapter {
    api: Arc<NeteaseApi>,
    resolver: StreamResolver,
}

impl NeteaseAdapter {
    pub fn new(http: PlatformHttp, endpoints: NeteaseEndpoints, strategy_timeout: Duration) -> Self {
        let api = Arc::new(NeteaseApi { http, endpoints });

        let official = api.clone();
        let mut resolver = StreamResolver::new(PlatformId::Netease)
            .with_timeout(strategy_timeout)
            .strategy("enhance/player/url", move |id| {
                let api = official.clone();
                async move { api.official_url(&id).await }
            });

        for base in api.endpoints.proxies.clone() {
            let proxy = api.clone();
            resolver = resolver.strategy(format!("proxy {base}"), move |id| {
                let api = proxy.clone();
                let base = base.clone();
                async move { api.proxy_url(&base, &id).await }
            });
        }

        Self { api, resolver }
    }
}

#[async_trait]
impl SourceAdapter for NeteaseAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Netease
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        let mut last_error: Option<SourceError> = None;

        match self.api.search_official(query, page).await {
            Ok(items) if !items.is_empty() => return Ok(items),
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Netease official search failed, trying proxies");
                last_error = Some(e);
            }
        }

        for base in &self.api.endpoints.proxies {
            match self.api.search_proxy(base, query, page).await {
                Ok(items) if !items.is_empty() => return Ok(items),
                Ok(_) => last_error = None,
                Err(e) => {
                    warn!(proxy = %base, error = %e, "Netease proxy search failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    async fn stream_url(&self, track_id: &str) -> Result<ResolvedStream> {
        self.resolver.resolve(track_id).await
    }

    async fn lyrics(&self, track_id: &str) -> Result<Option<String>> {
        let official = format!("{}/song/lyric", self.api.endpoints.official);
        let query = [("id", track_id), ("lv", "-1"), ("kv", "-1"), ("tv", "-1")];
        match self.api.lyric_at(&official, &query).await {
            Ok(Some(lrc)) => return Ok(Some(lrc)),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Netease official lyric failed"),
        }

        for base in &self.api.endpoints.proxies {
            if let Ok(Some(lrc)) = self
                .api
                .lyric_at(&format!("{base}/lyric"), &[("id", track_id)])
                .await
            {
                return Ok(Some(lrc));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_override() {
        let endpoints = NeteaseEndpoints::default().with_proxy_override(Some("http://local/".into()));
        assert_eq!(endpoints.proxies, vec!["http://local".to_string()]);

        let endpoints = NeteaseEndpoints::default().with_proxy_override(Some("  ".into()));
        assert_eq!(endpoints.proxies.len(), 1);
        assert!(endpoints.proxies[0].contains("vercel"));
    }

    #[test]
    fn test_song_prefers_proxy_fields() {
        let song: Song = serde_json::from_str(
            r#"{"id": 7, "name": "n", "ar": [{"name": "A"}, {"name": "B"}],
                "al": {"name": "Al", "picUrl": "https://p/1.jpg"}, "dt": 1000}"#,
        )
        .unwrap();
        let meta = song.into_metadata(None);
        assert_eq!(meta.artist, "A/B");
        assert_eq!(meta.album.as_deref(), Some("Al"));
        assert_eq!(meta.cover_url.as_deref(), Some("https://p/1.jpg"));
        assert_eq!(meta.duration_ms, Some(1000));
    }
}
