//! Le cache : chemins canoniques, jonction des téléchargements, disponibilité vidéo

use crate::download::{self, Download, DownloadStatus};
use crate::error::{CacheError, Result};
use crate::fetch::AssetFetcher;
use crate::layout::{partial_path, CacheLayout};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use wfbsource::{ResolvedStream, TrackRef};

/// Seuil par défaut avant de rendre un partiel jouable
pub const DEFAULT_MIN_PLAYABLE_BYTES: u64 = 1024 * 1024;

/// Réglages du cache
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub root: PathBuf,
    /// Octets à recevoir avant de rendre un partiel non segmenté
    pub min_playable_bytes: u64,
}

impl CacheSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            min_playable_bytes: DEFAULT_MIN_PLAYABLE_BYTES,
        }
    }

    pub fn with_min_playable_bytes(mut self, bytes: u64) -> Self {
        self.min_playable_bytes = bytes;
        self
    }
}

/// Fichier jouable renvoyé par [`CacheStore::ensure_local`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    pub path: PathBuf,
    /// Faux tant que `path` désigne un partiel encore en cours d'écriture
    pub complete: bool,
}

/// Disponibilité de la vidéo secondaire d'une piste
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoAvailability {
    Ready { path: PathBuf, complete: bool },
    /// Téléchargement en cours, pas encore assez d'octets
    Pending,
    /// Ni fichier ni téléchargement (échec ou jamais démarré)
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AssetKind {
    Audio,
    Video,
}

type InFlight = Arc<Mutex<HashMap<(TrackRef, AssetKind), Arc<Download>>>>;

#[derive(Debug)]
pub struct CacheStore {
    layout: CacheLayout,
    settings: CacheSettings,
    fetcher: Arc<dyn AssetFetcher>,
    in_flight: InFlight,
}

impl CacheStore {
    pub fn new(settings: CacheSettings, fetcher: Arc<dyn AssetFetcher>) -> Self {
        info!(root = %settings.root.display(), "Cache store ready");
        Self {
            layout: CacheLayout::new(settings.root.clone()),
            settings,
            fetcher,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Rend un fichier local jouable pour la piste
    ///
    /// Les pistes locales passent telles quelles. Sinon le fichier canonique est
    /// renvoyé s'il existe ; à défaut le téléchargement en cours est rejoint (ou
    /// démarré) et l'appel se termine dès que le partiel dépasse le seuil, ou à
    /// la fin du téléchargement pour un flux segmenté.
    pub async fn ensure_local(&self, track: &TrackRef, resolved: &ResolvedStream) -> Result<LocalAsset> {
        if let Some(path) = passthrough_path(&resolved.audio_url) {
            debug!(track = %track, path = %path.display(), "Local file, no download");
            return Ok(LocalAsset { path, complete: true });
        }

        let target = self.layout.audio_path(track);
        if target.is_file() {
            debug!(track = %track, "Cache hit");
            return Ok(LocalAsset {
                path: target,
                complete: true,
            });
        }

        let download = self.join_or_start(
            track,
            AssetKind::Audio,
            target,
            &resolved.audio_url,
            &resolved.request_headers,
        );

        if resolved.segmented {
            download.wait_until_finished().await?;
        } else {
            download
                .wait_until_min_size(self.settings.min_playable_bytes)
                .await?;
        }

        Ok(asset_of(&download))
    }

    /// Attend la fin du téléchargement audio d'une piste et renvoie le fichier final
    pub async fn wait_complete(&self, track: &TrackRef) -> Result<PathBuf> {
        let target = self.layout.audio_path(track);
        let download = self.lookup(track, AssetKind::Audio);
        match download {
            Some(download) => {
                download.wait_until_finished().await?;
                Ok(download.target().to_path_buf())
            }
            None if target.is_file() => Ok(target),
            None => Err(CacheError::Download(format!("no download for {track}"))),
        }
    }

    /// Démarre en arrière-plan le téléchargement de la vidéo secondaire
    pub fn start_secondary(&self, track: &TrackRef, url: &str, headers: &BTreeMap<String, String>) {
        let target = self.layout.video_path(track);
        if target.is_file() {
            return;
        }
        self.join_or_start(track, AssetKind::Video, target, url, headers);
    }

    /// État de la vidéo secondaire, avec la même règle de seuil que l'audio
    pub fn video_availability(&self, track: &TrackRef) -> VideoAvailability {
        let target = self.layout.video_path(track);
        match self.lookup(track, AssetKind::Video) {
            Some(download) => {
                let progress = download.progress();
                match progress.status {
                    DownloadStatus::Finished => VideoAvailability::Ready {
                        path: target,
                        complete: true,
                    },
                    DownloadStatus::Running if progress.written >= self.settings.min_playable_bytes => {
                        VideoAvailability::Ready {
                            path: download.partial().to_path_buf(),
                            complete: false,
                        }
                    }
                    DownloadStatus::Running => VideoAvailability::Pending,
                    DownloadStatus::Failed(_) | DownloadStatus::Cancelled => VideoAvailability::Absent,
                }
            }
            None if target.is_file() => VideoAvailability::Ready {
                path: target,
                complete: true,
            },
            None => VideoAvailability::Absent,
        }
    }

    pub fn downloads_in_flight(&self) -> usize {
        self.in_flight.lock().map(|map| map.len()).unwrap_or(0)
    }

    /// Annule tous les téléchargements ; les appelants en attente reçoivent `Cancelled`
    pub fn cancel_all(&self) {
        let drained: Vec<Arc<Download>> = match self.in_flight.lock() {
            Ok(mut map) => map.drain().map(|(_, d)| d).collect(),
            Err(_) => return,
        };
        if !drained.is_empty() {
            info!(count = drained.len(), "Cancelling downloads");
        }
        for download in drained {
            download.cancel();
        }
    }

    fn lookup(&self, track: &TrackRef, kind: AssetKind) -> Option<Arc<Download>> {
        self.in_flight
            .lock()
            .ok()
            .and_then(|map| map.get(&(track.clone(), kind)).cloned())
    }

    /// Vérifie puis insère sous le même verrou : un seul téléchargement par clé
    fn join_or_start(
        &self,
        track: &TrackRef,
        kind: AssetKind,
        target: PathBuf,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Arc<Download> {
        let key = (track.clone(), kind);
        let mut map = match self.in_flight.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(existing) = map.get(&key) {
            debug!(track = %track, ?kind, "Joining in-flight download");
            return existing.clone();
        }

        let partial = partial_path(&target);
        let download = Download::new(target, partial);
        info!(track = %track, ?kind, url, "Starting download");

        let task_download = download.clone();
        let fetcher = self.fetcher.clone();
        let in_flight = self.in_flight.clone();
        let url = url.to_string();
        let headers = headers.clone();
        let task_key = key.clone();

        // Le renommage final peut avoir eu lieu entre le test d'existence et le verrou
        let already_done = task_download.target().is_file();
        let handle = tokio::spawn(async move {
            let outcome = if already_done {
                Ok(())
            } else {
                download::run(&task_download, fetcher.as_ref(), &url, &headers).await
            };
            if let Err(e) = &outcome {
                warn!(url = %url, error = %e, "Download failed");
            }
            remove_if_same(&in_flight, &task_key, &task_download);
            task_download.finish(outcome);
        });
        download.set_task(handle.abort_handle());

        map.insert(key, download.clone());
        download
    }
}

fn remove_if_same(in_flight: &InFlight, key: &(TrackRef, AssetKind), download: &Arc<Download>) {
    let mut map = match in_flight.lock() {
        Ok(map) => map,
        Err(poisoned) => poisoned.into_inner(),
    };
    if map.get(key).is_some_and(|d| Arc::ptr_eq(d, download)) {
        map.remove(key);
    }
}

fn asset_of(download: &Download) -> LocalAsset {
    if download.finished() {
        LocalAsset {
            path: download.target().to_path_buf(),
            complete: true,
        }
    } else {
        LocalAsset {
            path: download.partial().to_path_buf(),
            complete: false,
        }
    }
}

/// Chemin local d'une URL `file://` ou d'un chemin absolu existant
fn passthrough_path(url: &str) -> Option<PathBuf> {
    let url = url.trim();
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    let path = Path::new(url);
    (path.is_absolute() && path.is_file()).then(|| path.to_path_buf())
}
