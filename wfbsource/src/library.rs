//! Document bibliothèque / playlists
//!
//! Le document est un JSON externe au cœur du lecteur. Seuls les champs utiles
//! pour reconstruire une [`TrackRef`], ses métadonnées et éventuellement un flux
//! déjà résolu sont interprétés ; les champs absents prennent leur valeur par
//! défaut et les champs inconnus sont ignorés.

use crate::error::Result;
use crate::model::{PlatformId, ResolvedStream, TrackMetadata, TrackRef};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Élément de playlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub id: String,
    pub source: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    /// Flux déjà résolu, pour éviter une nouvelle résolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<ResolvedStream>,
}

impl PlaylistItem {
    /// Plateforme de l'élément, `None` si l'identifiant n'est pas reconnu
    pub fn platform(&self) -> Option<PlatformId> {
        self.source.parse().ok()
    }

    pub fn track_ref(&self) -> Option<TrackRef> {
        self.platform().map(|p| TrackRef::new(p, self.id.clone()))
    }

    pub fn metadata(&self) -> Option<TrackMetadata> {
        let platform = self.platform()?;
        Some(TrackMetadata {
            id: self.id.clone(),
            platform,
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            duration_ms: self.duration_ms,
            cover_url: self.cover_url.clone(),
            quality: None,
        })
    }

    pub fn cached_stream(&self) -> Option<&ResolvedStream> {
        self.stream.as_ref().filter(|s| !s.audio_url.trim().is_empty())
    }
}

impl From<&TrackMetadata> for PlaylistItem {
    fn from(meta: &TrackMetadata) -> Self {
        Self {
            id: meta.id.clone(),
            source: meta.platform.as_str().to_string(),
            title: meta.title.clone(),
            artist: meta.artist.clone(),
            album: meta.album.clone(),
            duration_ms: meta.duration_ms,
            cover_url: meta.cover_url.clone(),
            stream: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub items: Vec<PlaylistItem>,
}

/// Piste importée depuis le disque
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalTrack {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration_millis: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayHistoryItem {
    /// Horodatage en millisecondes
    pub at: i64,
    pub item: PlaylistItem,
}

/// Racine du document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryState {
    #[serde(default)]
    pub local_tracks: Vec<LocalTrack>,
    #[serde(default)]
    pub playlists: Vec<Playlist>,
    #[serde(default)]
    pub play_history: Vec<PlayHistoryItem>,
}

impl LibraryState {
    /// Lit le document ; un fichier absent donne une bibliothèque vide
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let state: LibraryState = serde_json::from_slice(&bytes)?;
                debug!(path = %path.display(), playlists = state.playlists.len(), "Library loaded");
                Ok(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Library file not found, starting empty");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Écrit le document en JSON indenté (fichier temporaire puis renommage)
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn playlist(&self, id: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.id == id)
    }
}
