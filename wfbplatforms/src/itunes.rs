//! Adaptateur iTunes Search API (extraits de 30 secondes)

use crate::http::{PlatformHttp, not_found};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use wfbsource::{PlatformId, ResolvedStream, Result, SourceAdapter, StreamResolver, TrackMetadata};

const PAGE_SIZE: u32 = 30;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    track_id: Option<u64>,
    track_name: Option<String>,
    artist_name: Option<String>,
    collection_name: Option<String>,
    artwork_url100: Option<String>,
    preview_url: Option<String>,
    track_time_millis: Option<u64>,
}

impl SearchItem {
    fn into_metadata(self) -> TrackMetadata {
        let artist = self.artist_name.unwrap_or_default();
        let title = self.track_name.unwrap_or_default();
        let id = match self.track_id {
            Some(id) => id.to_string(),
            None => format!("{artist}-{title}"),
        };
        let mut meta = TrackMetadata::new(PlatformId::Itunes, id, title, artist);
        meta.album = self.collection_name;
        meta.duration_ms = self.track_time_millis;
        meta.cover_url = self.artwork_url100;
        meta.quality = Some("preview".into());
        meta
    }
}

#[derive(Debug)]
struct ItunesApi {
    http: PlatformHttp,
    base: String,
}

impl ItunesApi {
    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        let offset = ((page.max(1) - 1) * PAGE_SIZE).to_string();
        let limit = PAGE_SIZE.to_string();
        let response: SearchResponse = self
            .http
            .get_json(
                &format!("{}/search", self.base),
                &[
                    ("media", "music"),
                    ("entity", "song"),
                    ("limit", limit.as_str()),
                    ("offset", offset.as_str()),
                    ("term", query),
                ],
                &[],
            )
            .await?;
        Ok(response
            .results
            .into_iter()
            .map(SearchItem::into_metadata)
            .collect())
    }

    async fn preview(&self, id: &str) -> Result<ResolvedStream> {
        let response: SearchResponse = self
            .http
            .get_json(&format!("{}/lookup", self.base), &[("id", id)], &[])
            .await?;
        response
            .results
            .into_iter()
            .find_map(|item| item.preview_url)
            .map(|u| ResolvedStream::new(u).with_quality("preview"))
            .ok_or_else(|| not_found("previewUrl"))
    }
}

/// Adaptateur iTunes
#[derive(Debug)]
pub struct ItunesAdapter {
    api: Arc<ItunesApi>,
    resolver: StreamResolver,
}

impl ItunesAdapter {
    pub const DEFAULT_BASE: &'static str = "https://itunes.apple.com";

    pub fn new(http: PlatformHttp, base: impl Into<String>, strategy_timeout: Duration) -> Self {
        let api = Arc::new(ItunesApi {
            http,
            base: base.into(),
        });
        let lookup = api.clone();
        let resolver = StreamResolver::new(PlatformId::Itunes)
            .with_timeout(strategy_timeout)
            .strategy("lookup", move |id| {
                let api = lookup.clone();
                async move { api.preview(&id).await }
            });
        Self { api, resolver }
    }
}

#[async_trait]
impl SourceAdapter for ItunesAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Itunes
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        self.api.search(query, page).await
    }

    async fn stream_url(&self, track_id: &str) -> Result<ResolvedStream> {
        self.resolver.resolve(track_id).await
    }
}
