//! Gestion des erreurs pour les sources de musique

use crate::model::PlatformId;
use thiserror::Error;

/// Type Result personnalisé pour wfbsource et les adaptateurs
pub type Result<T> = std::result::Result<T, SourceError>;

/// Erreurs possibles lors de l'interrogation d'une plateforme
#[derive(Error, Debug)]
pub enum SourceError {
    /// Toutes les stratégies de résolution ont échoué
    #[error("No playable source for {platform}:{track_id} ({} strategies tried)", attempts.len())]
    NoPlayableSource {
        platform: PlatformId,
        track_id: String,
        /// Une ligne de diagnostic par stratégie essayée, dans l'ordre
        attempts: Vec<String>,
    },

    /// Identifiant de plateforme inconnu ou non enregistré dans la chaîne
    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    /// Capacité optionnelle non implémentée par l'adaptateur
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Erreur HTTP
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Erreur de parsing JSON
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Erreur renvoyée par l'API de la plateforme
    #[error("API error (code {code}): {message}")]
    Api { code: i64, message: String },

    /// Délai dépassé
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Erreur d'entrée/sortie (source locale, document bibliothèque)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Erreur générique
    #[error("{0}")]
    Other(String),
}

impl SourceError {
    /// Crée une erreur API depuis un code de statut HTTP et un message
    pub fn from_status_code(code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            code: code as i64,
            message: message.into(),
        }
    }

    /// Indique si l'erreur signale l'épuisement de la chaîne de résolution
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, SourceError::NoPlayableSource { .. })
    }

    /// Indique si l'erreur provient d'une capacité absente
    pub fn is_not_supported(&self) -> bool {
        matches!(self, SourceError::NotSupported(_))
    }
}
