//! Erreurs du lecteur et des backends

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlayerError>;

/// Catégorie d'une erreur de backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Fichier inaccessible (partiel renommé, verrou, disque)
    MediaInaccessible,
    /// Données illisibles, souvent un partiel trop court
    MediaInvalid,
    /// Le moteur s'est arrêté de lui-même
    Halted,
    Unsupported,
    Other,
}

/// Erreur remontée par un backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classe une erreur d'après le message brut du moteur
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let upper = message.to_ascii_uppercase();
        let kind = if upper.contains("MEDIA_INACCESSIBLE") {
            BackendErrorKind::MediaInaccessible
        } else if upper.contains("ERROR_MEDIA_INVALID") || upper.contains("0X80040265") {
            BackendErrorKind::MediaInvalid
        } else if upper.contains("HALT") {
            BackendErrorKind::Halted
        } else {
            BackendErrorKind::Other
        };
        Self { kind, message }
    }

    /// Erreur qui justifie de recréer le backend après un délai
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            BackendErrorKind::MediaInaccessible | BackendErrorKind::MediaInvalid | BackendErrorKind::Halted
        )
    }
}

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Cache error: {0}")]
    Cache(#[from] wfbcache::CacheError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// L'acteur est terminé (après `dispose`)
    #[error("Player actor is gone")]
    ActorGone,

    #[error("Track has no video stream")]
    NoVideo,
}
