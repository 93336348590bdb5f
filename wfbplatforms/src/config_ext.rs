//! Extension pour lire la configuration des sources depuis wfbconfig
//!
//! Ce module fournit le trait `SourcesConfigExt`, qui construit les
//! [`SourcesSettings`] à partir de la section `sources` de la configuration.

use crate::SourcesSettings;
use anyhow::Result;
use std::time::Duration;
use tracing::warn;
use wfbconfig::Config;
use wfbsource::PlatformId;

/// Trait d'extension pour la section `sources` de wfbconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use wfbconfig::get_config;
/// use wfbplatforms::{SourcesConfigExt, default_chain};
///
/// let settings = get_config().get_sources_settings()?;
/// let chain = default_chain(&settings)?;
/// ```
pub trait SourcesConfigExt {
    /// Plateformes actives, dans l'ordre de recherche
    ///
    /// Les identifiants inconnus sont ignorés avec un avertissement.
    fn get_sources_order(&self) -> Vec<PlatformId>;

    /// Dossier des fichiers locaux (créé si nécessaire)
    fn get_local_directory(&self) -> Result<std::path::PathBuf>;

    /// Réglages complets, variables d'environnement comprises
    fn get_sources_settings(&self) -> Result<SourcesSettings>;
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

impl SourcesConfigExt for Config {
    fn get_sources_order(&self) -> Vec<PlatformId> {
        let names: Vec<String> = self.get_or(&["sources", "order"], Vec::new());
        let order: Vec<PlatformId> = names
            .iter()
            .filter_map(|name| match name.parse() {
                Ok(platform) => Some(platform),
                Err(_) => {
                    warn!(platform = %name, "Unknown platform in sources.order, ignored");
                    None
                }
            })
            .collect();
        if order.is_empty() {
            PlatformId::ALL.to_vec()
        } else {
            order
        }
    }

    fn get_local_directory(&self) -> Result<std::path::PathBuf> {
        self.get_managed_dir(&["sources", "local_directory"], "Music/local")
    }

    fn get_sources_settings(&self) -> Result<SourcesSettings> {
        let defaults = SourcesSettings::default();
        let settings = SourcesSettings {
            order: self.get_sources_order(),
            search_timeout: Duration::from_secs(self.get_u64_or(
                &["sources", "search_timeout_secs"],
                defaults.search_timeout.as_secs(),
            )),
            strategy_timeout: Duration::from_secs(self.get_u64_or(
                &["sources", "strategy_timeout_secs"],
                defaults.strategy_timeout.as_secs(),
            )),
            local_directory: self.get_local_directory()?,
            netease_api_base: non_empty(self.get_or(&["sources", "netease_api_base"], String::new())),
            qq_api_base: non_empty(self.get_or(&["sources", "qq_api_base"], String::new())),
        };
        // Les variables d'environnement priment sur le fichier
        Ok(settings.with_env_overrides())
    }
}
