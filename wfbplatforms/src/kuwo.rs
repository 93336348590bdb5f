//! Adaptateur Kuwo
//!
//! L'API de recherche renvoie un pseudo-JSON délimité par des quotes simples.

use crate::http::{PlatformHttp, parse_clock_ms, text_at};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use wfbsource::{
    PlatformId, ResolvedStream, Result, SourceAdapter, SourceError, StreamResolver, TrackMetadata,
    is_playable_url,
};

const PAGE_SIZE: u32 = 30;

#[derive(Debug, Clone)]
pub struct KuwoEndpoints {
    pub search_base: String,
    pub anti_base: String,
    pub player_base: String,
}

impl Default for KuwoEndpoints {
    fn default() -> Self {
        Self {
            search_base: "http://search.kuwo.cn".into(),
            anti_base: "http://antiserver.kuwo.cn".into(),
            player_base: "http://player.kuwo.cn".into(),
        }
    }
}

/// Convertit la réponse de recherche en JSON valide
pub fn normalize_quotes(raw: &str) -> String {
    raw.replace('\'', "\"")
}

fn search_item_metadata(item: &Value) -> Option<TrackMetadata> {
    let rid = text_at(item, "/MUSICRID")?;
    let id = rid.strip_prefix("MUSIC_").unwrap_or(&rid).to_string();
    let mut meta = TrackMetadata::new(
        PlatformId::Kuwo,
        id,
        text_at(item, "/SONGNAME").unwrap_or_default(),
        text_at(item, "/ARTIST").unwrap_or_else(|| "Unknown".into()),
    );
    meta.album = text_at(item, "/ALBUM");
    meta.duration_ms = text_at(item, "/DURATION").and_then(|d| parse_clock_ms(&d));
    Some(meta)
}

/// Les endpoints de flux Kuwo répondent en texte brut
fn plain_url(body: &str) -> Result<ResolvedStream> {
    let url = body.trim();
    if url.starts_with("http") && is_playable_url(url) {
        Ok(ResolvedStream::new(url))
    } else {
        Err(SourceError::Other(format!(
            "unexpected response: {}",
            url.chars().take(80).collect::<String>()
        )))
    }
}

#[derive(Debug)]
struct KuwoApi {
    http: PlatformHttp,
    endpoints: KuwoEndpoints,
}

impl KuwoApi {
    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        let url = format!("{}/r.s", self.endpoints.search_base);
        let pn = (page.max(1) - 1).to_string();
        let rn = PAGE_SIZE.to_string();
        let raw = self
            .http
            .get_text(
                &url,
                &[
                    ("client", "kt"),
                    ("all", query),
                    ("pn", pn.as_str()),
                    ("rn", rn.as_str()),
                    ("uid", "794"),
                    ("ver", "kwplayer_ar_9.2.2.1"),
                    ("vipver", "1"),
                    ("show_fallback", "0"),
                    ("ft", "music"),
                    ("cluster", "0"),
                    ("strategy", "2012"),
                    ("encoding", "utf8"),
                    ("rformat", "json"),
                    ("verid", "2"),
                ],
                &[],
            )
            .await?;
        let response: Value = serde_json::from_str(&normalize_quotes(&raw))?;
        Ok(response
            .get("abslist")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(search_item_metadata).collect())
            .unwrap_or_default())
    }

    async fn antiserver(&self, id: &str) -> Result<ResolvedStream> {
        let rid = format!("MUSIC_{id}");
        let body = self
            .http
            .get_text(
                &format!("{}/anti.s", self.endpoints.anti_base),
                &[
                    ("format", "mp3"),
                    ("rid", rid.as_str()),
                    ("type", "convert_url"),
                    ("response", "url"),
                ],
                &[],
            )
            .await?;
        plain_url(&body).map(|s| s.with_quality("mp3"))
    }

    async fn player(&self, id: &str) -> Result<ResolvedStream> {
        let rid = format!("MUSIC_{id}");
        let body = self
            .http
            .get_text(
                &format!("{}/webmusic/st/getMuiseByRid", self.endpoints.player_base),
                &[("rid", rid.as_str())],
                &[],
            )
            .await?;
        plain_url(&body)
    }
}

/// Adaptateur Kuwo
#[derive(Debug)]
pub struct KuwoAdapter {
    api: Arc<KuwoApi>,
    resolver: StreamResolver,
}

impl KuwoAdapter {
    pub fn new(http: PlatformHttp, endpoints: KuwoEndpoints, strategy_timeout: Duration) -> Self {
        let api = Arc::new(KuwoApi { http, endpoints });
        let (anti, player) = (api.clone(), api.clone());
        let resolver = StreamResolver::new(PlatformId::Kuwo)
            .with_timeout(strategy_timeout)
            .strategy("antiserver", move |id| {
                let api = anti.clone();
                async move { api.antiserver(&id).await }
            })
            .strategy("player", move |id| {
                let api = player.clone();
                async move { api.player(&id).await }
            });
        Self { api, resolver }
    }
}

#[async_trait]
impl SourceAdapter for KuwoAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Kuwo
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        self.api.search(query, page).await
    }

    async fn stream_url(&self, track_id: &str) -> Result<ResolvedStream> {
        self.resolver.resolve(track_id).await
    }
}
