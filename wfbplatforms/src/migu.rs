//! Adaptateur Migu
//!
//! Un identifiant Migu combine `copyrightId|contentId` ; l'endpoint mobile
//! `listenSong.do` n'est utilisable que si le `contentId` est connu.

use crate::http::{DESKTOP_UA, IPHONE_UA, PlatformHttp, not_found, parse_clock_ms, text_at, with_scheme};
use crate::proxy;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use wfbsource::{PlatformId, ResolvedStream, Result, SourceAdapter, StreamResolver, TrackMetadata};

const PAGE_SIZE: u32 = 30;
const REFERER: &str = "https://m.music.migu.cn/";

#[derive(Debug, Clone)]
pub struct MiguEndpoints {
    /// `c.musicapp.migu.cn` (recherche, listenSong)
    pub app_base: String,
    /// `music.migu.cn` (lecteur web v3)
    pub web_base: String,
    /// `app.c.nf.migu.cn` (resourceinfo)
    pub resource_base: String,
    pub proxies: Vec<String>,
}

impl Default for MiguEndpoints {
    fn default() -> Self {
        Self {
            app_base: "https://c.musicapp.migu.cn".into(),
            web_base: "https://music.migu.cn".into(),
            resource_base: "https://app.c.nf.migu.cn".into(),
            proxies: proxy::DEFAULT_PROXIES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Sépare un identifiant en `(copyrightId, contentId)`
pub fn split_id(id: &str) -> (&str, Option<&str>) {
    match id.split_once('|') {
        Some((copyright, content)) if !content.is_empty() => (copyright, Some(content)),
        Some((copyright, _)) => (copyright, None),
        None => (id, None),
    }
}

fn search_item_metadata(item: &Value) -> Option<TrackMetadata> {
    let copyright = text_at(item, "/copyrightId")?;
    let id = match text_at(item, "/contentId") {
        Some(content) => format!("{copyright}|{content}"),
        None => copyright,
    };
    let mut meta = TrackMetadata::new(
        PlatformId::Migu,
        id,
        text_at(item, "/name").unwrap_or_default(),
        text_at(item, "/singers/0/name").unwrap_or_else(|| "Unknown".into()),
    );
    meta.album = text_at(item, "/albums/0/name");
    meta.duration_ms = text_at(item, "/duration")
        .or_else(|| text_at(item, "/length"))
        .and_then(|d| d.parse::<u64>().ok())
        .or_else(|| text_at(item, "/time").and_then(|t| parse_clock_ms(&t)));
    meta.cover_url = text_at(item, "/imgItems/0/img").map(|u| with_scheme(&u));
    Some(meta)
}

/// URL « PQ » ou « LQ » des formats d'une ressource, ramenée en HTTPS
fn resource_rate_url(response: &Value) -> Option<String> {
    let formats = response.pointer("/resource/0/rateFormats")?.as_array()?;
    let url = formats
        .iter()
        .filter(|f| matches!(f.get("formatType").and_then(Value::as_str), Some("PQ" | "LQ")))
        .find_map(|f| text_at(f, "/url"))?;
    Some(
        url.replace("ftp://218.200.160.122:21", "https://freetyst.nf.migu.cn")
            .replace("http://", "https://"),
    )
}

#[derive(Debug)]
struct MiguApi {
    http: PlatformHttp,
    endpoints: MiguEndpoints,
}

impl MiguApi {
    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        let url = format!("{}/MIGUM2.0/v1.0/content/search_all.do", self.endpoints.app_base);
        let size = PAGE_SIZE.to_string();
        let page = page.max(1).to_string();
        let response: Value = self
            .http
            .get_json(
                &url,
                &[
                    ("text", query),
                    ("searchSwitch", "{song:1}"),
                    ("pageSize", size.as_str()),
                    ("pageNo", page.as_str()),
                ],
                &[("Referer", REFERER), ("User-Agent", DESKTOP_UA)],
            )
            .await?;
        Ok(response
            .pointer("/songResultData/result")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(search_item_metadata).collect())
            .unwrap_or_default())
    }

    async fn listen_song(&self, id: &str) -> Result<ResolvedStream> {
        let (_, content) = split_id(id);
        let content = content.ok_or_else(|| not_found("contentId"))?;
        let url = format!("{}/MIGUM2.0/v1.0/content/listenSong.do", self.endpoints.app_base);
        let response: Value = self
            .http
            .get_json(
                &url,
                &[("netType", "01"), ("resourceType", "E"), ("songId", content), ("rateType", "1")],
                &[("User-Agent", IPHONE_UA)],
            )
            .await?;
        text_at(&response, "/url")
            .map(|u| ResolvedStream::new(with_scheme(&u)).with_quality("standard"))
            .ok_or_else(|| not_found("listenSong url"))
    }

    async fn play_info(&self, id: &str) -> Result<ResolvedStream> {
        let (copyright, _) = split_id(id);
        let url = format!("{}/v3/api/music/audioPlayer/getPlayInfo", self.endpoints.web_base);
        let response: Value = self
            .http
            .get_json(
                &url,
                &[("dataType", "2"), ("copyrightId", copyright)],
                &[
                    ("Referer", "https://music.migu.cn/v3/music/player/audio?from=migu"),
                    ("User-Agent", DESKTOP_UA),
                ],
            )
            .await?;
        text_at(&response, "/data/playUrl")
            .map(|u| ResolvedStream::new(with_scheme(&u)).with_quality("standard"))
            .ok_or_else(|| not_found("playUrl"))
    }

    async fn resource_info(&self, id: &str) -> Result<ResolvedStream> {
        let (copyright, _) = split_id(id);
        let url = format!("{}/MIGUM2.0/v1.0/content/resourceinfo.do", self.endpoints.resource_base);
        let response: Value = self
            .http
            .get_json(
                &url,
                &[("copyrightId", copyright), ("resourceType", "2")],
                &[("Referer", REFERER), ("User-Agent", IPHONE_UA)],
            )
            .await?;
        resource_rate_url(&response)
            .map(|u| ResolvedStream::new(u).with_quality("standard"))
            .ok_or_else(|| not_found("rateFormats url"))
    }
}

/// Adaptateur Migu
#[derive(Debug)]
pub struct MiguAdapter {
    api: Arc<MiguApi>,
    resolver: StreamResolver,
}

impl MiguAdapter {
    pub fn new(http: PlatformHttp, endpoints: MiguEndpoints, strategy_timeout: Duration) -> Self {
        let api = Arc::new(MiguApi { http, endpoints });
        let (listen, v3, resource) = (api.clone(), api.clone(), api.clone());
        let mut resolver = StreamResolver::new(PlatformId::Migu)
            .with_timeout(strategy_timeout)
            .strategy("listenSong", move |id| {
                let api = listen.clone();
                async move { api.listen_song(&id).await }
            })
            .strategy("v3 getPlayInfo", move |id| {
                let api = v3.clone();
                async move { api.play_info(&id).await }
            })
            .strategy("resourceinfo", move |id| {
                let api = resource.clone();
                async move { api.resource_info(&id).await }
            });

        for base in api.endpoints.proxies.clone() {
            let api = api.clone();
            resolver = resolver.strategy(format!("proxy {base}"), move |id| {
                let api = api.clone();
                let base = base.clone();
                async move {
                    let (copyright, _) = split_id(&id);
                    let url = proxy::stream_url(&api.http, &base, "migu", copyright).await?;
                    Ok(ResolvedStream::new(url))
                }
            });
        }

        Self { api, resolver }
    }
}

#[async_trait]
impl SourceAdapter for MiguAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Migu
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        self.api.search(query, page).await
    }

    async fn stream_url(&self, track_id: &str) -> Result<ResolvedStream> {
        self.resolver.resolve(track_id).await
    }
}
