//! Adaptateur Kugou
//!
//! Les pistes sont identifiées par leur `FileHash`. Le serveur `trackercdn`
//! exige une clé `md5(hash + "kgcloudv2")`.

use crate::http::{DESKTOP_UA, PlatformHttp, first_text, not_found, text_at};
use crate::proxy;
use async_trait::async_trait;
use md5::{Digest, Md5};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use wfbsource::{PlatformId, ResolvedStream, Result, SourceAdapter, StreamResolver, TrackMetadata};

const PAGE_SIZE: u32 = 30;
const REFERER: &str = "https://www.kugou.com/";

#[derive(Debug, Clone)]
pub struct KugouEndpoints {
    pub search_base: String,
    pub tracker_base: String,
    pub web_base: String,
    pub mobile_base: String,
    pub proxies: Vec<String>,
}

impl Default for KugouEndpoints {
    fn default() -> Self {
        Self {
            search_base: "http://songsearch.kugou.com".into(),
            tracker_base: "http://trackercdn.kugou.com".into(),
            web_base: "https://www.kugou.com".into(),
            mobile_base: "https://m.kugou.com".into(),
            proxies: proxy::DEFAULT_PROXIES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Clé d'accès `trackercdn` pour un hash
pub fn tracker_key(hash: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(hash.to_lowercase().as_bytes());
    hasher.update(b"kgcloudv2");
    format!("{:x}", hasher.finalize())
}

fn search_item_metadata(item: &Value) -> Option<TrackMetadata> {
    let id = text_at(item, "/FileHash")?;
    let mut meta = TrackMetadata::new(
        PlatformId::Kugou,
        id,
        text_at(item, "/SongName").unwrap_or_default(),
        text_at(item, "/SingerName").unwrap_or_default(),
    );
    meta.album = text_at(item, "/AlbumName");
    meta.duration_ms = text_at(item, "/Duration")
        .and_then(|d| d.parse::<u64>().ok())
        .map(|s| s * 1000);
    meta.cover_url = text_at(item, "/Image").map(|img| img.replace("{size}", "400"));
    Some(meta)
}

#[derive(Debug)]
struct KugouApi {
    http: PlatformHttp,
    endpoints: KugouEndpoints,
}

impl KugouApi {
    const HEADERS: [(&'static str, &'static str); 2] = [("Referer", REFERER), ("User-Agent", DESKTOP_UA)];

    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        let url = format!("{}/song_search_v2", self.endpoints.search_base);
        let page = page.max(1).to_string();
        let size = PAGE_SIZE.to_string();
        let response: Value = self
            .http
            .get_json(
                &url,
                &[
                    ("keyword", query),
                    ("page", page.as_str()),
                    ("pagesize", size.as_str()),
                    ("format", "json"),
                ],
                &[("User-Agent", DESKTOP_UA)],
            )
            .await?;
        Ok(response
            .pointer("/data/lists")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(search_item_metadata).collect())
            .unwrap_or_default())
    }

    async fn tracker(&self, id: &str) -> Result<ResolvedStream> {
        let hash = id.to_lowercase();
        let key = tracker_key(&hash);
        let url = format!("{}/i/v2/", self.endpoints.tracker_base);
        let response: Value = self
            .http
            .get_json(
                &url,
                &[
                    ("cmd", "25"),
                    ("hash", hash.as_str()),
                    ("key", key.as_str()),
                    ("pid", "1"),
                    ("behavior", "play"),
                    ("br", "128"),
                    ("index", "0"),
                    ("vip", "0"),
                ],
                &Self::HEADERS,
            )
            .await?;
        first_text(&response, &["/url/0", "/url"])
            .map(|u| ResolvedStream::new(u).with_quality("128k"))
            .ok_or_else(|| not_found("trackercdn url"))
    }

    async fn play_data(&self, id: &str) -> Result<Value> {
        let url = format!("{}/yy/index.php", self.endpoints.web_base);
        self.http
            .get_json(&url, &[("r", "play/getdata"), ("hash", id)], &Self::HEADERS)
            .await
    }

    async fn song_info(&self, id: &str) -> Result<ResolvedStream> {
        let url = format!("{}/app/i/getSongInfo.php", self.endpoints.mobile_base);
        let response: Value = self
            .http
            .get_json(&url, &[("cmd", "playInfo"), ("hash", id)], &Self::HEADERS)
            .await?;
        text_at(&response, "/url")
            .map(ResolvedStream::new)
            .ok_or_else(|| not_found("getSongInfo url"))
    }
}

/// Adaptateur Kugou
#[derive(Debug)]
pub struct KugouAdapter {
    api: Arc<KugouApi>,
    resolver: StreamResolver,
}

impl KugouAdapter {
    pub fn new(http: PlatformHttp, endpoints: KugouEndpoints, strategy_timeout: Duration) -> Self {
        let api = Arc::new(KugouApi { http, endpoints });

        let (tracker, getdata, info) = (api.clone(), api.clone(), api.clone());
        let mut resolver = StreamResolver::new(PlatformId::Kugou)
            .with_timeout(strategy_timeout)
            .strategy("trackercdn", move |id| {
                let api = tracker.clone();
                async move { api.tracker(&id).await }
            })
            .strategy("play/getdata", move |id| {
                let api = getdata.clone();
                async move {
                    let data = api.play_data(&id).await?;
                    text_at(&data, "/data/play_url")
                        .map(ResolvedStream::new)
                        .ok_or_else(|| not_found("play_url"))
                }
            })
            .strategy("getSongInfo", move |id| {
                let api = info.clone();
                async move { api.song_info(&id).await }
            });

        for base in api.endpoints.proxies.clone() {
            let api = api.clone();
            resolver = resolver.strategy(format!("proxy {base}"), move |id| {
                let api = api.clone();
                let base = base.clone();
                async move {
                    let url = proxy::stream_url(&api.http, &base, "kugou", &id).await?;
                    Ok(ResolvedStream::new(url))
                }
            });
        }

        Self { api, resolver }
    }
}

#[async_trait]
impl SourceAdapter for KugouAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Kugou
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        self.api.search(query, page).await
    }

    async fn stream_url(&self, track_id: &str) -> Result<ResolvedStream> {
        self.resolver.resolve(track_id).await
    }

    async fn cover(&self, track_id: &str) -> Result<Option<String>> {
        let data = self.api.play_data(track_id).await?;
        Ok(text_at(&data, "/data/img"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tracker_key_is_md5_of_lowercase_hash() {
        // md5("kgcloudv2") quand le hash est vide
        assert_eq!(tracker_key(""), format!("{:x}", Md5::digest(b"kgcloudv2")));
        assert_eq!(tracker_key("ABCDEF"), tracker_key("abcdef"));
        assert_eq!(tracker_key("abcdef").len(), 32);
    }

    #[test]
    fn test_search_item_mapping() {
        let item = json!({
            "FileHash": "A1B2", "SongName": "Song", "SingerName": "Singer",
            "AlbumName": "Album", "Duration": 215,
            "Image": "http://imge.kugou.com/stdmusic/{size}/x.jpg"
        });
        let meta = search_item_metadata(&item).unwrap();
        assert_eq!(meta.id, "A1B2");
        assert_eq!(meta.duration_ms, Some(215_000));
        assert_eq!(meta.cover_url.as_deref(), Some("http://imge.kugou.com/stdmusic/400/x.jpg"));
        assert!(search_item_metadata(&json!({"SongName": "no hash"})).is_none());
    }
}
