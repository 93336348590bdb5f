//! # wfbcache - Cache disque des pistes de WFBMusic
//!
//! Le cache rend jouable une piste distante avant la fin de son téléchargement :
//!
//! - chaque asset a un chemin canonique (voir [`layout`]) et un partiel `.part` ;
//! - un seul téléchargement par piste, rejoint par les appels concurrents ;
//! - un partiel est rendu dès `min_playable_bytes` octets, sauf pour un flux
//!   segmenté (DASH) qui n'est lisible qu'entier ;
//! - à la fin, le partiel est renommé atomiquement ; en cas d'échec il est supprimé ;
//! - un partiel laissé par une exécution précédente est repris avec `Range`.
//!
//! La vidéo secondaire (Bilibili) suit le même chemin via
//! [`CacheStore::start_secondary`] et [`CacheStore::video_availability`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use wfbcache::{CacheSettings, CacheStore, HttpFetcher};
//! use wfbsource::{PlatformId, ResolvedStream, TrackRef};
//!
//! # async fn demo() -> wfbcache::Result<()> {
//! let fetcher = HttpFetcher::new(Duration::from_secs(300))?;
//! let store = CacheStore::new(CacheSettings::new("/tmp/wfb-cache"), Arc::new(fetcher));
//! let track = TrackRef::new(PlatformId::Netease, "186016");
//! let asset = store
//!     .ensure_local(&track, &ResolvedStream::new("https://example.com/a.mp3"))
//!     .await?;
//! println!("{} (complete: {})", asset.path.display(), asset.complete);
//! # Ok(())
//! # }
//! ```

pub mod download;
pub mod error;
pub mod fetch;
pub mod layout;
pub mod store;

#[cfg(feature = "wfbconfig")]
pub mod config_ext;

pub use download::{Download, DownloadProgress, DownloadStatus};
pub use error::{CacheError, Result};
pub use fetch::{AssetFetcher, FetchResponse, HttpFetcher};
pub use layout::CacheLayout;
pub use store::{CacheSettings, CacheStore, LocalAsset, VideoAvailability};

#[cfg(feature = "wfbconfig")]
pub use config_ext::CacheConfigExt;
