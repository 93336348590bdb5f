//! Adaptateur des fichiers audio locaux
//!
//! La recherche parcourt le dossier configuré ; l'identifiant d'une piste est
//! son chemin absolu et son flux une URL `file://` que le cache laisse passer
//! telle quelle.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;
use wfbsource::{PlatformId, ResolvedStream, Result, SourceAdapter, SourceError, TrackMetadata};

const PAGE_SIZE: usize = 30;

/// Extensions reconnues comme audio
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "flac", "wav", "ogg", "opus"];

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Déduit (titre, artiste) du nom de fichier `Artiste - Titre.ext`
fn title_and_artist(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.split_once(" - ") {
        Some((artist, title)) => (title.trim().to_string(), artist.trim().to_string()),
        None => (stem, "Unknown".to_string()),
    }
}

/// Fichiers audio de `root` dont le nom contient tous les mots de `query`
fn scan(root: &Path, query: &str) -> Vec<PathBuf> {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();

    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_audio(entry.path()))
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            words.iter().all(|w| name.contains(w.as_str()))
        })
        .map(|entry| entry.into_path())
        .collect();
    found.sort();
    found
}

/// Adaptateur local
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    root: PathBuf,
}

impl LocalAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl SourceAdapter for LocalAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Local
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<TrackMetadata>> {
        if !self.root.is_dir() {
            debug!(root = %self.root.display(), "Local directory missing");
            return Ok(Vec::new());
        }

        let root = self.root.clone();
        let query = query.to_string();
        let paths = tokio::task::spawn_blocking(move || scan(&root, &query))
            .await
            .map_err(|e| SourceError::Other(format!("local scan failed: {e}")))?;

        let skip = (page.max(1) as usize - 1) * PAGE_SIZE;
        Ok(paths
            .into_iter()
            .skip(skip)
            .take(PAGE_SIZE)
            .map(|path| {
                let (title, artist) = title_and_artist(&path);
                let mut meta =
                    TrackMetadata::new(PlatformId::Local, path.to_string_lossy(), title, artist);
                meta.album = path
                    .parent()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned());
                meta
            })
            .collect())
    }

    async fn stream_url(&self, track_id: &str) -> Result<ResolvedStream> {
        let path = Path::new(track_id);
        if !path.is_file() {
            return Err(SourceError::NoPlayableSource {
                platform: PlatformId::Local,
                track_id: track_id.to_string(),
                attempts: vec!["file: not found".to_string()],
            });
        }
        Ok(ResolvedStream::new(format!("file://{}", path.display())).with_quality("local"))
    }
}
