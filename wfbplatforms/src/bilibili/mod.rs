//! Adaptateur Bilibili (vidéos musicales)
//!
//! La recherche passe par l'endpoint signé WBI ; les clés sont conservées dans un
//! cache à durée de vie d'une heure propre à l'instance. Le flux combine
//! `view` (cid, dimensions) et `playurl` :
//!
//! - audio : meilleure piste DASH (segmentée) ou, à défaut, premier `durl`
//! - vidéo : uniquement un `durl` MP4 progressif, jamais des segments DASH

pub mod models;
pub mod wbi;

use crate::http::{DESKTOP_UA, PlatformHttp, parse_clock_ms, with_scheme};
use async_trait::async_trait;
use models::{Dimension, Envelope, NavData, PlayData, RankingData, SearchData, SpiData, ViewData};
use moka::future::Cache;
use rand::Rng;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use wbi::WbiKeys;
use wfbsource::{
    PlatformId, ResolvedStream, Result, SourceAdapter, SourceError, StreamResolver, TrackMetadata,
};

const PAGE_SIZE: u32 = 20;
const KEY_TTL: Duration = Duration::from_secs(3600);
/// Zone « danse » du classement
const RANKING_RID: &str = "129";
/// fnval = 1 (durl MP4) | 16 (DASH) | 128 (4K)
const FNVAL: &str = "145";
const DEFAULT_VIDEO_SIZE: (u32, u32) = (1920, 1080);

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));

#[derive(Debug, Clone)]
pub struct BilibiliEndpoints {
    pub api_base: String,
}

impl Default for BilibiliEndpoints {
    fn default() -> Self {
        Self {
            api_base: "https://api.bilibili.com".into(),
        }
    }
}

/// Cookies d'identification de l'appareil
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buvid {
    pub buvid3: String,
    pub buvid4: Option<String>,
}

impl Buvid {
    pub fn cookie(&self) -> String {
        match &self.buvid4 {
            Some(b4) => format!("buvid3={}; buvid4={}", self.buvid3, b4),
            None => format!("buvid3={}", self.buvid3),
        }
    }
}

/// buvid3 de secours au format `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXXinfoc`
pub fn generate_buvid() -> String {
    let mut rng = rand::rng();
    let mut group = || format!("{:04X}", rng.random_range(0..0x10000u32));
    let (a, b, c, d, e, f, g, h) = (
        group(),
        group(),
        group(),
        group(),
        group(),
        group(),
        group(),
        group(),
    );
    format!("{a}{b}-{c}-{d}-{e}-{f}{g}{h}infoc")
}

/// Libellé de qualité des pistes audio DASH
pub fn audio_quality_label(id: u32) -> String {
    match id {
        30216 => "64k".into(),
        30232 => "128k".into(),
        30280 => "320k".into(),
        30250 => "Dolby Atmos".into(),
        30251 => "Hi-Res".into(),
        other => format!("Unknown({other})"),
    }
}

/// Retire le balisage de surlignage et les entités les plus courantes
pub fn clean_title(title: &str) -> String {
    TAG_RE
        .replace_all(title, "")
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
}

/// Dimensions d'affichage, en tenant compte de la rotation
fn display_size(dimension: Option<Dimension>) -> (u32, u32) {
    match dimension {
        Some(d) if d.width > 0 && d.height > 0 => {
            if d.rotate == 1 {
                (d.height, d.width)
            } else {
                (d.width, d.height)
            }
        }
        _ => DEFAULT_VIDEO_SIZE,
    }
}

/// Assemble le flux à partir de la réponse `playurl`
fn build_stream(
    bvid: &str,
    play: PlayData,
    dimension: Option<Dimension>,
    buvid: &Buvid,
) -> Result<ResolvedStream> {
    let best_audio = play
        .dash
        .and_then(|d| d.audio)
        .unwrap_or_default()
        .into_iter()
        .filter(|a| !a.base_url.is_empty())
        .max_by_key(|a| a.id);
    let durl = play.durl.unwrap_or_default();

    let mut stream = match &best_audio {
        Some(audio) => ResolvedStream::new(audio.base_url.clone())
            .with_quality(audio_quality_label(audio.id))
            .segmented(true),
        None => {
            let first = durl
                .iter()
                .find(|d| !d.url.is_empty())
                .ok_or_else(|| SourceError::Other(format!("no audio stream for {bvid}")))?;
            ResolvedStream::new(first.url.clone()).with_quality("default")
        }
    };

    // Seul un MP4 progressif est lisible par le miroir vidéo
    if let Some(video) = durl
        .iter()
        .find(|d| !d.url.is_empty() && !d.url.split('?').next().unwrap_or("").ends_with(".m4s"))
    {
        let (width, height) = display_size(dimension);
        stream = stream.with_video(video.url.clone(), width, height);
        stream.video_quality_label = Some("MP4".into());
    } else {
        debug!(bvid, "No progressive MP4 video, audio only");
    }

    Ok(stream
        .with_header("User-Agent", DESKTOP_UA)
        .with_header("Referer", format!("https://www.bilibili.com/video/{bvid}"))
        .with_header("Cookie", buvid.cookie()))
}

#[derive(Debug)]
struct BilibiliApi {
    http: PlatformHttp,
    endpoints: BilibiliEndpoints,
    keys: Cache<(), WbiKeys>,
    buvid: OnceCell<Buvid>,
}

impl BilibiliApi {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoints.api_base, path)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<T> {
        let envelope: Envelope<T> = self.http.get_json(url, query, headers).await?;
        if envelope.code != 0 {
            return Err(SourceError::Api {
                code: envelope.code,
                message: envelope.message.unwrap_or_default(),
            });
        }
        envelope
            .data
            .ok_or_else(|| SourceError::Other(format!("empty response from {url}")))
    }

    async fn buvid(&self) -> &Buvid {
        self.buvid
            .get_or_init(|| async {
                let spi: Result<SpiData> = self
                    .get(&self.url("/x/frontend/finger/spi"), &[], &[("User-Agent", DESKTOP_UA)])
                    .await;
                match spi {
                    Ok(SpiData { b_3: Some(b3), b_4 }) if !b3.is_empty() => {
                        debug!(buvid3 = %b3, "Fetched buvid");
                        Buvid { buvid3: b3, buvid4: b_4 }
                    }
                    other => {
                        let buvid3 = generate_buvid();
                        if let Err(e) = other {
                            warn!(error = %e, "Bilibili buvid lookup failed, using generated one");
                        }
                        Buvid { buvid3, buvid4: None }
                    }
                }
            })
            .await
    }

    /// Clés WBI, rafraîchies au plus une fois par heure
    async fn wbi_keys(&self) -> Option<WbiKeys> {
        if let Some(keys) = self.keys.get(&()).await {
            return Some(keys);
        }
        // Le nav répond -101 hors connexion mais publie quand même les clés
        let envelope: Envelope<NavData> = match self
            .http
            .get_json(&self.url("/x/web-interface/nav"), &[], &[("User-Agent", DESKTOP_UA)])
            .await
        {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Failed to update WBI keys");
                return None;
            }
        };
        let img = envelope.data.and_then(|d| d.wbi_img)?;
        let keys = WbiKeys::from_urls(&img.img_url, &img.sub_url)?;
        info!(img_key = %keys.img_key, "WBI keys updated");
        self.keys.insert((), keys.clone()).await;
        Some(keys)
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        let cookie = self.buvid().await.cookie();
        let page = page.max(1).to_string();
        let size = PAGE_SIZE.to_string();
        let params = [
            ("search_type", "video"),
            ("keyword", query),
            ("page", page.as_str()),
            ("page_size", size.as_str()),
            ("platform", "pc"),
            ("order", "totalrank"),
        ];
        let referer = format!(
            "https://search.bilibili.com/all?keyword={}",
            urlencoding::encode(query)
        );
        let headers = [
            ("User-Agent", DESKTOP_UA),
            ("Cookie", cookie.as_str()),
            ("Referer", referer.as_str()),
        ];

        let base = self.url("/x/web-interface/wbi/search/type");
        let data: SearchData = match self.wbi_keys().await {
            Some(keys) => {
                let signed = wbi::sign(&params, &keys, wbi::now_secs());
                self.get(&format!("{base}?{signed}"), &[], &headers).await?
            }
            None => self.get(&base, &params, &headers).await?,
        };

        Ok(data
            .result
            .unwrap_or_default()
            .into_iter()
            .filter(|item| !item.bvid.trim().is_empty())
            .map(|item| {
                let mut meta = TrackMetadata::new(
                    PlatformId::Bilibili,
                    item.bvid,
                    clean_title(&item.title),
                    item.author,
                );
                meta.album = Some("Bilibili".into());
                meta.duration_ms = parse_clock_ms(&item.duration);
                meta.cover_url = Some(with_scheme(&item.pic)).filter(|p| !p.is_empty());
                meta
            })
            .collect())
    }

    async fn ranking(&self) -> Result<Vec<TrackMetadata>> {
        let cookie = self.buvid().await.cookie();
        let data: RankingData = self
            .get(
                &self.url("/x/web-interface/ranking/v2"),
                &[("rid", RANKING_RID), ("type", "all")],
                &[("User-Agent", DESKTOP_UA), ("Cookie", cookie.as_str())],
            )
            .await?;
        Ok(data
            .list
            .unwrap_or_default()
            .into_iter()
            .filter(|item| !item.bvid.is_empty())
            .map(|item| {
                let artist = item
                    .owner
                    .map(|o| o.name)
                    .unwrap_or_else(|| "Unknown".into());
                let mut meta = TrackMetadata::new(
                    PlatformId::Bilibili,
                    item.bvid,
                    clean_title(&item.title),
                    artist,
                );
                meta.album = Some("Bilibili ranking".into());
                meta.duration_ms = Some(item.duration * 1000);
                meta.cover_url = Some(with_scheme(&item.pic)).filter(|p| !p.is_empty());
                meta
            })
            .collect())
    }

    async fn stream(&self, bvid: &str) -> Result<ResolvedStream> {
        let buvid = self.buvid().await.clone();
        let cookie = buvid.cookie();

        let view: ViewData = self
            .get(
                &self.url("/x/web-interface/view"),
                &[("bvid", bvid)],
                &[("User-Agent", DESKTOP_UA), ("Cookie", cookie.as_str())],
            )
            .await?;
        let cid = view
            .cid
            .ok_or_else(|| SourceError::Other(format!("cid not found for {bvid}")))?
            .to_string();

        let referer = format!("https://www.bilibili.com/video/{bvid}");
        let play: PlayData = self
            .get(
                &self.url("/x/player/playurl"),
                &[("bvid", bvid), ("cid", cid.as_str()), ("fnval", FNVAL)],
                &[
                    ("User-Agent", DESKTOP_UA),
                    ("Cookie", cookie.as_str()),
                    ("Referer", referer.as_str()),
                ],
            )
            .await?;

        build_stream(bvid, play, view.dimension, &buvid)
    }
}

/// Adaptateur Bilibili
#[derive(Debug)]
pub struct BilibiliAdapter {
    api: Arc<BilibiliApi>,
    resolver: StreamResolver,
}

impl BilibiliAdapter {
    pub fn new(http: PlatformHttp, endpoints: BilibiliEndpoints, strategy_timeout: Duration) -> Self {
        let api = Arc::new(BilibiliApi {
            http,
            endpoints,
            keys: Cache::builder().max_capacity(1).time_to_live(KEY_TTL).build(),
            buvid: OnceCell::new(),
        });
        let playurl = api.clone();
        let resolver = StreamResolver::new(PlatformId::Bilibili)
            .with_timeout(strategy_timeout)
            .strategy("view+playurl", move |id| {
                let api = playurl.clone();
                async move { api.stream(&id).await }
            });
        Self { api, resolver }
    }
}

#[async_trait]
impl SourceAdapter for BilibiliAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Bilibili
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        self.api.search(query, page).await
    }

    fn supports_recommendations(&self) -> bool {
        true
    }

    async fn recommendations(&self, page: u32) -> Result<Vec<TrackMetadata>> {
        // Le classement tient en une seule page
        if page > 1 {
            return Ok(Vec::new());
        }
        self.api.ranking().await
    }

    async fn stream_url(&self, track_id: &str) -> Result<ResolvedStream> {
        self.resolver.resolve(track_id).await
    }
}
