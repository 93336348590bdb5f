//! # wfbsource - Abstractions communes pour les plateformes musicales de WFBMusic
//!
//! Cette crate définit :
//!
//! - le modèle de données partagé ([`PlatformId`], [`TrackRef`], [`TrackMetadata`], [`ResolvedStream`])
//! - le trait [`SourceAdapter`] implémenté par chaque plateforme
//! - le combinateur [`StreamResolver`] (stratégies ordonnées, premier succès)
//! - la [`SourceChain`] qui distribue recherches et résolutions entre adaptateurs
//! - le document bibliothèque/playlists ([`library`])
//!
//! ## Architecture
//!
//! ```text
//!                SourceChain
//!   search_all ──┬──> NeteaseAdapter ──> StreamResolver [direct, proxy]
//!                ├──> QQAdapter      ──> StreamResolver [vkey h5, vkey 11, ..., proxies]
//!                ├──> ...
//!                └──> LocalAdapter
//! ```

pub mod chain;
pub mod error;
pub mod library;
pub mod model;
pub mod resolver;

pub use chain::{PlatformResults, SearchResults, SourceChain};
pub use error::{Result, SourceError};
pub use model::{
    PlatformId, ResolvedStream, TrackMetadata, TrackRef, is_playable_url, is_segmented_url,
    is_trial_url,
};
pub use resolver::{Strategy, StreamResolver};

use std::fmt::Debug;

/// Trait commun à toutes les plateformes
///
/// Les recherches ne sont pas chaînées : une plateforme sans résultat renvoie
/// une liste vide, pas une erreur. La résolution de flux est en général déléguée
/// à un [`StreamResolver`] propre à l'adaptateur.
#[async_trait::async_trait]
pub trait SourceAdapter: Debug + Send + Sync {
    // ============= Informations =============

    /// Plateforme servie par cet adaptateur
    fn platform(&self) -> PlatformId;

    /// Nom affichable
    fn name(&self) -> &str {
        self.platform().display_name()
    }

    // ============= Recherche =============

    /// Recherche paginée (pages numérotées à partir de 1)
    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>>;

    /// Indique si [`recommendations`](Self::recommendations) est disponible
    fn supports_recommendations(&self) -> bool {
        false
    }

    /// Recommandations (classements, sélections) si la plateforme en propose
    async fn recommendations(&self, _page: u32) -> Result<Vec<TrackMetadata>> {
        Err(SourceError::NotSupported(format!(
            "recommendations on {}",
            self.platform()
        )))
    }

    // ============= Résolution =============

    /// Résout un identifiant en flux lisible
    async fn stream_url(&self, track_id: &str) -> Result<ResolvedStream>;

    /// Paroles au format LRC, si disponibles
    async fn lyrics(&self, _track_id: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// URL de pochette, pour les plateformes qui ne la donnent pas à la recherche
    async fn cover(&self, _track_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}
