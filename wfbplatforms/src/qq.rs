//! Adaptateur QQ Music
//!
//! La résolution du flux balaie une matrice (plateforme cliente, User-Agent,
//! préfixe de fichier) sur l'endpoint `musicu.fcg`, puis les proxys publics.
//! Les URL d'essai (`trial=1`) sont rejetées par le résolveur.

use crate::http::{ANDROID_UA, DESKTOP_UA, IPHONE_UA, PlatformHttp, first_text, not_found, text_at};
use crate::proxy;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use wfbsource::{
    PlatformId, ResolvedStream, Result, SourceAdapter, SourceError, StreamResolver, TrackMetadata,
};

const PAGE_SIZE: u32 = 30;
const GUID: &str = "533186940";
const REFERER: &str = "https://y.qq.com/";

/// Combinaisons (plateforme, User-Agent, préfixe) essayées dans l'ordre
///
/// `M500` donne du MP3, `C400` du M4A.
const VKEY_MATRIX: &[(&str, &str, &str)] = &[
    ("h5", IPHONE_UA, "M500"),
    ("11", ANDROID_UA, "M500"),
    ("20", DESKTOP_UA, "M500"),
    ("h5", IPHONE_UA, "C400"),
    ("11", ANDROID_UA, "C400"),
    ("iphone", IPHONE_UA, "C400"),
    ("android", ANDROID_UA, "C400"),
];

#[derive(Debug, Clone)]
pub struct QQEndpoints {
    /// Recherche et paroles (`c.y.qq.com`)
    pub search_base: String,
    /// Serveur de vkey (`u.y.qq.com`)
    pub vkey_base: String,
    pub proxies: Vec<String>,
}

impl Default for QQEndpoints {
    fn default() -> Self {
        Self {
            search_base: "https://c.y.qq.com".into(),
            vkey_base: "https://u.y.qq.com".into(),
            proxies: proxy::DEFAULT_PROXIES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl QQEndpoints {
    /// Remplace la liste des proxys par une base unique (`QQ_API_BASE`)
    pub fn with_proxy_override(mut self, base: Option<String>) -> Self {
        if let Some(base) = base.filter(|b| !b.trim().is_empty()) {
            self.proxies = vec![base.trim().to_string()];
        }
        self
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    song: Option<SongList>,
}

#[derive(Debug, Deserialize)]
struct SongList {
    #[serde(default)]
    list: Vec<SearchSong>,
}

#[derive(Debug, Deserialize)]
struct SearchSong {
    songmid: Option<String>,
    songname: Option<String>,
    #[serde(default)]
    singer: Vec<Singer>,
    albumname: Option<String>,
    interval: Option<u64>,
    albummid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Singer {
    name: Option<String>,
}

impl SearchSong {
    fn into_metadata(self) -> Option<TrackMetadata> {
        let id = self.songmid.filter(|m| !m.is_empty())?;
        let artist = self
            .singer
            .iter()
            .map(|s| s.name.as_deref().unwrap_or("Unknown"))
            .collect::<Vec<_>>()
            .join("/");
        let mut meta = TrackMetadata::new(
            PlatformId::QQ,
            id,
            self.songname.unwrap_or_default(),
            if artist.is_empty() { "Unknown".to_string() } else { artist },
        );
        meta.album = self.albumname.filter(|a| !a.is_empty());
        meta.duration_ms = self.interval.map(|s| s * 1000);
        meta.cover_url = self
            .albummid
            .filter(|m| !m.is_empty())
            .map(|m| album_cover_url(&m));
        Some(meta)
    }
}

/// Pochette 300x300 d'un album QQ
pub fn album_cover_url(album_mid: &str) -> String {
    format!("https://y.gtimg.cn/music/photo_new/T002R300x300M000{album_mid}.jpg")
}

/// Corps de requête `CgiGetVkey` pour un fichier donné
fn vkey_request(song_mid: &str, platform: &str, filename: &str) -> String {
    json!({
        "req_0": {
            "module": "vkey.GetVkeyServer",
            "method": "CgiGetVkey",
            "param": {
                "guid": GUID,
                "songmid": [song_mid],
                "songtype": [0],
                "uin": "0",
                "loginflag": 0,
                "platform": platform,
                "filename": [filename],
            }
        }
    })
    .to_string()
}

/// Construit l'URL finale depuis `sip` + `purl`
///
/// Retourne `None` si le `purl` est vide, d'essai ou d'un format inattendu.
fn vkey_stream_url(response: &Value) -> Option<String> {
    let data = response.pointer("/req_0/data")?;
    let purl = text_at(data, "/midurlinfo/0/purl")?;
    if purl.contains("trial=1") || !(purl.starts_with("C400") || purl.starts_with("M500")) {
        return None;
    }
    let sip = text_at(data, "/sip/0").unwrap_or_else(|| "https://u.y.qq.com/".to_string());
    let sip = match sip.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => sip,
    };
    Some(format!("{sip}{purl}"))
}

#[derive(Debug)]
struct QQApi {
    http: PlatformHttp,
    endpoints: QQEndpoints,
}

impl QQApi {
    async fn search_official(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        let url = format!("{}/soso/fcgi-bin/client_search_cp", self.endpoints.search_base);
        let n = PAGE_SIZE.to_string();
        let p = page.max(1).to_string();
        let response: SearchResponse = self
            .http
            .get_json(
                &url,
                &[
                    ("w", query),
                    ("n", n.as_str()),
                    ("p", p.as_str()),
                    ("format", "json"),
                    ("cr", "1"),
                    ("g_tk", "5381"),
                ],
                &[("Referer", REFERER)],
            )
            .await?;
        Ok(response
            .data
            .and_then(|d| d.song)
            .map(|s| s.list)
            .unwrap_or_default()
            .into_iter()
            .filter_map(SearchSong::into_metadata)
            .collect())
    }

    async fn search_proxy(&self, base: &str, query: &str) -> Result<Vec<TrackMetadata>> {
        let items = proxy::search(&self.http, base, "qq", query).await?;
        Ok(items.iter().filter_map(proxy_item_metadata).collect())
    }

    async fn vkey_url(&self, id: &str, platform: &str, ua: &str, prefix: &str) -> Result<ResolvedStream> {
        let ext = if prefix.starts_with('C') { "m4a" } else { "mp3" };
        let filename = format!("{prefix}{id}.{ext}");
        let data = vkey_request(id, platform, &filename);
        let url = format!("{}/cgi-bin/musicu.fcg", self.endpoints.vkey_base);
        let response: Value = self
            .http
            .get_json(
                &url,
                &[("format", "json"), ("data", data.as_str())],
                &[("Referer", REFERER), ("User-Agent", ua)],
            )
            .await?;
        let stream = vkey_stream_url(&response).ok_or_else(|| not_found("purl"))?;
        let quality = if prefix == "M500" { "128k mp3" } else { "m4a" };
        Ok(ResolvedStream::new(stream)
            .with_quality(quality)
            .with_header("Referer", REFERER))
    }

    async fn official_lyrics(&self, id: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/lyric/fcgi-bin/fcg_query_lyric_new.fcg",
            self.endpoints.search_base
        );
        let response: Value = self
            .http
            .get_json(
                &url,
                &[("songmid", id), ("format", "json"), ("nobase64", "1")],
                &[("Referer", REFERER)],
            )
            .await?;
        Ok(text_at(&response, "/lyric"))
    }
}

fn proxy_item_metadata(item: &Value) -> Option<TrackMetadata> {
    let id = first_text(item, &["/id", "/songid", "/mid"])?;
    let mut meta = TrackMetadata::new(
        PlatformId::QQ,
        id,
        first_text(item, &["/title", "/name", "/songname"]).unwrap_or_default(),
        first_text(item, &["/artist", "/singer"]).unwrap_or_else(|| "Unknown".into()),
    );
    meta.album = first_text(item, &["/album", "/albumname"]);
    meta.duration_ms = first_text(item, &["/duration", "/interval"])
        .and_then(|d| d.parse::<u64>().ok())
        .map(|s| s * 1000);
    meta.cover_url = first_text(item, &["/pic", "/cover", "/img"]);
    Some(meta)
}

/// Adaptateur QQ Music
#[derive(Debug)]
pub struct QQAdapter {
    api: Arc<QQApi>,
    resolver: StreamResolver,
}

impl QQAdapter {
    pub fn new(http: PlatformHttp, endpoints: QQEndpoints, strategy_timeout: Duration) -> Self {
        let api = Arc::new(QQApi { http, endpoints });
        let mut resolver = StreamResolver::new(PlatformId::QQ).with_timeout(strategy_timeout);

        for &(platform, ua, prefix) in VKEY_MATRIX {
            let api = api.clone();
            resolver = resolver.strategy(format!("vkey {platform} {prefix}"), move |id| {
                let api = api.clone();
                async move { api.vkey_url(&id, platform, ua, prefix).await }
            });
        }

        for base in api.endpoints.proxies.clone() {
            let api = api.clone();
            resolver = resolver.strategy(format!("proxy {base}"), move |id| {
                let api = api.clone();
                let base = base.clone();
                async move {
                    let url = proxy::stream_url(&api.http, &base, "qq", &id).await?;
                    Ok(ResolvedStream::new(url))
                }
            });
        }

        Self { api, resolver }
    }
}

#[async_trait]
impl SourceAdapter for QQAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::QQ
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        let mut last_error: Option<SourceError> = None;
        match self.api.search_official(query, page).await {
            Ok(items) if !items.is_empty() => return Ok(items),
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "QQ official search failed, trying proxies");
                last_error = Some(e);
            }
        }

        // Les proxys ne paginent pas : seule la première page a un sens
        if page > 1 {
            return last_error.map_or(Ok(Vec::new()), Err);
        }

        for base in &self.api.endpoints.proxies {
            match self.api.search_proxy(base, query).await {
                Ok(items) if !items.is_empty() => return Ok(items),
                Ok(_) => last_error = None,
                Err(e) => {
                    warn!(proxy = %base, error = %e, "QQ proxy search failed");
                    last_error = Some(e);
                }
            }
        }
        last_error.map_or(Ok(Vec::new()), Err)
    }

    async fn stream_url(&self, track_id: &str) -> Result<ResolvedStream> {
        self.resolver.resolve(track_id).await
    }

    async fn lyrics(&self, track_id: &str) -> Result<Option<String>> {
        for base in &self.api.endpoints.proxies {
            if let Ok(Some(lrc)) = proxy::lyrics(&self.api.http, base, "qq", track_id).await {
                return Ok(Some(lrc));
            }
        }
        self.api.official_lyrics(track_id).await
    }
}
