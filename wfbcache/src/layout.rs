//! Arborescence du cache sur disque
//!
//! ```text
//! <root>/music/<platform>/<id>.<ext>        audio (m4a pour bilibili/itunes, mp3 sinon)
//! <root>/video/<platform>/<id>.mp4          vidéo secondaire
//! <fichier>.part                            téléchargement en cours
//! ```

use std::path::{Path, PathBuf};
use wfbsource::{PlatformId, TrackRef};

/// Suffixe des fichiers en cours de téléchargement
pub const PART_SUFFIX: &str = ".part";

#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chemin canonique de l'audio d'une piste
    pub fn audio_path(&self, track: &TrackRef) -> PathBuf {
        let id = sanitize_id(&track.track_id);
        // Un identifiant local porte déjà son extension
        let name = if track.platform == PlatformId::Local && id.contains('.') {
            id
        } else {
            format!("{id}.{}", track.platform.audio_extension())
        };
        self.root
            .join("music")
            .join(track.platform.as_str())
            .join(name)
    }

    /// Chemin canonique de la vidéo secondaire d'une piste
    pub fn video_path(&self, track: &TrackRef) -> PathBuf {
        self.root
            .join("video")
            .join(track.platform.as_str())
            .join(format!("{}.mp4", sanitize_id(&track.track_id)))
    }
}

/// Chemin du fichier partiel associé à un chemin canonique
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(PART_SUFFIX);
    path.with_file_name(name)
}

/// Rend un identifiant sûr comme nom de fichier
///
/// Seuls les caractères alphanumériques, `-`, `_` et `.` sont conservés ; un
/// identifiant vide ou réduit à des points ne peut pas sortir du dossier.
pub fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
