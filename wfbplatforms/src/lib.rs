//! # wfbplatforms - Adaptateurs des plateformes musicales de WFBMusic
//!
//! Chaque module implémente [`wfbsource::SourceAdapter`] pour une plateforme :
//!
//! | Plateforme | Recherche                  | Flux                                         |
//! |------------|----------------------------|----------------------------------------------|
//! | Netease    | API web, proxys            | `enhance/player/url`, proxys `song/url/v1`   |
//! | QQ         | `client_search_cp`, proxys | matrice vkey `musicu.fcg`, proxys            |
//! | Kugou      | `song_search_v2`           | `trackercdn`, `play/getdata`, `getSongInfo`  |
//! | Kuwo       | `r.s`                      | `antiserver`, `player`                       |
//! | Migu       | `search_all.do`            | `listenSong`, v3, `resourceinfo`, proxys     |
//! | Bilibili   | WBI `search/type`          | `view` + `playurl` (DASH, MP4)               |
//! | iTunes     | Search API                 | extrait `lookup`                             |
//! | Local      | dossier configuré          | `file://`                                    |
//!
//! [`default_chain`] assemble la [`SourceChain`] dans l'ordre configuré.
//!
//! ```rust,no_run
//! use wfbplatforms::{SourcesSettings, default_chain};
//!
//! # async fn demo() -> wfbsource::Result<()> {
//! let chain = default_chain(&SourcesSettings::default().with_env_overrides())?;
//! let results = chain.search_all("晴天").await;
//! println!("{} results", results.total());
//! # Ok(())
//! # }
//! ```

pub mod bilibili;
pub mod http;
pub mod itunes;
pub mod kugou;
pub mod kuwo;
pub mod local;
pub mod migu;
pub mod netease;
pub mod proxy;
pub mod qq;

#[cfg(feature = "wfbconfig")]
pub mod config_ext;

pub use bilibili::{BilibiliAdapter, BilibiliEndpoints};
pub use http::PlatformHttp;
pub use itunes::ItunesAdapter;
pub use kugou::{KugouAdapter, KugouEndpoints};
pub use kuwo::{KuwoAdapter, KuwoEndpoints};
pub use local::LocalAdapter;
pub use migu::{MiguAdapter, MiguEndpoints};
pub use netease::{NeteaseAdapter, NeteaseEndpoints};
pub use qq::{QQAdapter, QQEndpoints};

#[cfg(feature = "wfbconfig")]
pub use config_ext::SourcesConfigExt;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wfbsource::{PlatformId, Result, SourceAdapter, SourceChain};

/// Variable d'environnement remplaçant les proxys NetEase
pub const NETEASE_API_BASE_ENV: &str = "NETEASE_API_BASE";
/// Variable d'environnement remplaçant les proxys QQ
pub const QQ_API_BASE_ENV: &str = "QQ_API_BASE";

/// Réglages de la chaîne de sources
#[derive(Debug, Clone)]
pub struct SourcesSettings {
    /// Plateformes actives, dans l'ordre de recherche
    pub order: Vec<PlatformId>,
    pub search_timeout: Duration,
    /// Borne de chaque stratégie de résolution
    pub strategy_timeout: Duration,
    pub local_directory: PathBuf,
    pub netease_api_base: Option<String>,
    pub qq_api_base: Option<String>,
}

impl Default for SourcesSettings {
    fn default() -> Self {
        Self {
            order: PlatformId::ALL.to_vec(),
            search_timeout: wfbsource::chain::DEFAULT_SEARCH_TIMEOUT,
            strategy_timeout: Duration::from_secs(10),
            local_directory: PathBuf::from("Music/local"),
            netease_api_base: None,
            qq_api_base: None,
        }
    }
}

impl SourcesSettings {
    /// Applique `NETEASE_API_BASE` et `QQ_API_BASE` s'ils sont définis
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(base) = std::env::var(NETEASE_API_BASE_ENV) {
            if !base.trim().is_empty() {
                self.netease_api_base = Some(base);
            }
        }
        if let Ok(base) = std::env::var(QQ_API_BASE_ENV) {
            if !base.trim().is_empty() {
                self.qq_api_base = Some(base);
            }
        }
        self
    }
}

/// Crée l'adaptateur d'une plateforme avec ses endpoints par défaut
pub fn build_adapter(
    platform: PlatformId,
    http: &PlatformHttp,
    settings: &SourcesSettings,
) -> Arc<dyn SourceAdapter> {
    let http = http.clone();
    let timeout = settings.strategy_timeout;
    match platform {
        PlatformId::Netease => Arc::new(NeteaseAdapter::new(
            http,
            NeteaseEndpoints::default().with_proxy_override(settings.netease_api_base.clone()),
            timeout,
        )),
        PlatformId::QQ => Arc::new(QQAdapter::new(
            http,
            QQEndpoints::default().with_proxy_override(settings.qq_api_base.clone()),
            timeout,
        )),
        PlatformId::Kugou => Arc::new(KugouAdapter::new(http, KugouEndpoints::default(), timeout)),
        PlatformId::Kuwo => Arc::new(KuwoAdapter::new(http, KuwoEndpoints::default(), timeout)),
        PlatformId::Migu => Arc::new(MiguAdapter::new(http, MiguEndpoints::default(), timeout)),
        PlatformId::Bilibili => {
            Arc::new(BilibiliAdapter::new(http, BilibiliEndpoints::default(), timeout))
        }
        PlatformId::Itunes => Arc::new(ItunesAdapter::new(http, ItunesAdapter::DEFAULT_BASE, timeout)),
        PlatformId::Local => Arc::new(LocalAdapter::new(settings.local_directory.clone())),
    }
}

/// Chaîne de toutes les plateformes configurées, partageant un client HTTP
pub fn default_chain(settings: &SourcesSettings) -> Result<SourceChain> {
    let http = PlatformHttp::new(http::DEFAULT_REQUEST_TIMEOUT)?;
    let mut chain = SourceChain::new(settings.search_timeout);
    for platform in &settings.order {
        chain.register(build_adapter(*platform, &http, settings));
    }
    info!(platforms = ?chain.platforms(), "Source chain ready");
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_adapter_matches_platform() {
        let http = PlatformHttp::new(Duration::from_secs(1)).unwrap();
        let settings = SourcesSettings::default();
        for platform in PlatformId::ALL {
            assert_eq!(build_adapter(platform, &http, &settings).platform(), platform);
        }
    }

    #[test]
    fn test_default_chain_respects_order() {
        let settings = SourcesSettings {
            order: vec![PlatformId::Itunes, PlatformId::Netease],
            ..Default::default()
        };
        let chain = default_chain(&settings).unwrap();
        assert_eq!(chain.platforms(), &[PlatformId::Itunes, PlatformId::Netease]);
        assert!(chain.adapter(PlatformId::QQ).is_err());
    }
}
