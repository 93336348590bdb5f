//! Erreurs du cache

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Échec du téléchargement, partagé par tous les appelants en attente
    #[error("Download failed: {0}")]
    Download(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Téléchargement annulé par `cancel_all`
    #[error("Download cancelled")]
    Cancelled,
}
