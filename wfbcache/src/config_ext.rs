//! Extension pour intégrer la configuration du cache dans wfbconfig
//!
//! Ce module fournit le trait `CacheConfigExt` qui lit la section `cache` de
//! `wfbconfig::Config` et construit les [`CacheSettings`].

use crate::store::{CacheSettings, DEFAULT_MIN_PLAYABLE_BYTES};
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use wfbconfig::Config;

/// Trait d'extension pour la section `cache` de wfbconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use wfbconfig::get_config;
/// use wfbcache::{CacheConfigExt, CacheStore, HttpFetcher};
///
/// let config = get_config();
/// let fetcher = HttpFetcher::new(config.get_download_timeout())?;
/// let store = CacheStore::new(config.get_cache_settings()?, Arc::new(fetcher));
/// ```
pub trait CacheConfigExt {
    /// Répertoire racine du cache (créé si nécessaire)
    fn get_cache_dir(&self) -> Result<PathBuf>;

    /// Définit le répertoire du cache (absolu ou relatif au dossier de données)
    fn set_cache_dir(&self, directory: String) -> Result<()>;

    /// Seuil en octets au-delà duquel un partiel devient jouable
    fn get_min_playable_bytes(&self) -> u64;

    /// Durée maximale d'un téléchargement
    fn get_download_timeout(&self) -> Duration;

    fn get_cache_settings(&self) -> Result<CacheSettings>;
}

impl CacheConfigExt for Config {
    fn get_cache_dir(&self) -> Result<PathBuf> {
        self.get_managed_dir(&["cache", "directory"], "cache")
    }

    fn set_cache_dir(&self, directory: String) -> Result<()> {
        self.set_managed_dir(&["cache", "directory"], directory)
    }

    fn get_min_playable_bytes(&self) -> u64 {
        self.get_u64_or(&["cache", "min_playable_bytes"], DEFAULT_MIN_PLAYABLE_BYTES)
    }

    fn get_download_timeout(&self) -> Duration {
        Duration::from_secs(self.get_u64_or(&["cache", "download_timeout_secs"], 300))
    }

    fn get_cache_settings(&self) -> Result<CacheSettings> {
        Ok(CacheSettings::new(self.get_cache_dir()?)
            .with_min_playable_bytes(self.get_min_playable_bytes()))
    }
}
