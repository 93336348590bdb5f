//! Téléchargement progressif vers un fichier `.part`
//!
//! Un [`Download`] publie sa progression sur un canal `watch` ; les appelants
//! attendent un seuil d'octets ou la fin sans jamais boucler sur un sleep.
//! À la fin, le partiel est renommé atomiquement vers le chemin canonique.

use crate::error::{CacheError, Result};
use crate::fetch::AssetFetcher;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// État d'un téléchargement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Running,
    Finished,
    Failed(String),
    Cancelled,
}

/// Progression publiée aux appelants
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// Octets présents dans le partiel (reprise comprise)
    pub written: u64,
    /// Taille totale attendue, si connue
    pub expected: Option<u64>,
    pub status: DownloadStatus,
}

impl DownloadProgress {
    fn outcome(&self) -> Result<()> {
        match &self.status {
            DownloadStatus::Running | DownloadStatus::Finished => Ok(()),
            DownloadStatus::Failed(message) => Err(CacheError::Download(message.clone())),
            DownloadStatus::Cancelled => Err(CacheError::Cancelled),
        }
    }
}

/// Objet représentant un téléchargement en cours
#[derive(Debug)]
pub struct Download {
    /// Chemin canonique, valide seulement une fois terminé
    target: PathBuf,
    /// Fichier partiel
    partial: PathBuf,
    progress: watch::Sender<DownloadProgress>,
    task: Mutex<Option<AbortHandle>>,
}

impl Download {
    pub(crate) fn new(target: PathBuf, partial: PathBuf) -> Arc<Self> {
        let (progress, _) = watch::channel(DownloadProgress {
            written: 0,
            expected: None,
            status: DownloadStatus::Running,
        });
        Arc::new(Self {
            target,
            partial,
            progress,
            task: Mutex::new(None),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn partial(&self) -> &Path {
        &self.partial
    }

    pub fn progress(&self) -> DownloadProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadProgress> {
        self.progress.subscribe()
    }

    pub fn finished(&self) -> bool {
        self.progress.borrow().status == DownloadStatus::Finished
    }

    /// Attend que le partiel atteigne `min_size` octets ou que le téléchargement s'arrête
    pub async fn wait_until_min_size(&self, min_size: u64) -> Result<()> {
        let mut rx = self.progress.subscribe();
        let progress = rx
            .wait_for(|p| p.written >= min_size || p.status != DownloadStatus::Running)
            .await
            .map_err(|_| CacheError::Cancelled)?;
        progress.outcome()
    }

    /// Attend que le téléchargement soit complètement terminé
    pub async fn wait_until_finished(&self) -> Result<()> {
        let mut rx = self.progress.subscribe();
        let progress = rx
            .wait_for(|p| p.status != DownloadStatus::Running)
            .await
            .map_err(|_| CacheError::Cancelled)?;
        progress.outcome()
    }

    pub(crate) fn set_task(&self, handle: AbortHandle) {
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    /// Interrompt la tâche ; le handle de fichier est libéré avec elle
    pub(crate) fn cancel(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        self.progress.send_modify(|p| {
            if p.status == DownloadStatus::Running {
                p.status = DownloadStatus::Cancelled;
            }
        });
    }

    pub(crate) fn finish(&self, outcome: Result<()>) {
        self.progress.send_modify(|p| {
            p.status = match &outcome {
                Ok(()) => DownloadStatus::Finished,
                Err(CacheError::Download(message)) => DownloadStatus::Failed(message.clone()),
                Err(e) => DownloadStatus::Failed(e.to_string()),
            };
        });
    }

    fn advance(&self, written: u64, expected: Option<u64>) {
        self.progress.send_modify(|p| {
            p.written = written;
            p.expected = expected;
        });
    }
}

/// Télécharge `url` dans le partiel de `download`, puis le renomme
///
/// En cas d'échec le partiel est supprimé : le nom canonique ne contient jamais
/// qu'un fichier complet.
pub(crate) async fn run(
    download: &Download,
    fetcher: &dyn AssetFetcher,
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<()> {
    match fetch_to_partial(download, fetcher, url, headers).await {
        Ok(written) => {
            tokio::fs::rename(&download.partial, &download.target).await?;
            info!(path = %download.target.display(), bytes = written, "Download complete");
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&download.partial).await;
            Err(e)
        }
    }
}

async fn fetch_to_partial(
    download: &Download,
    fetcher: &dyn AssetFetcher,
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<u64> {
    if let Some(parent) = download.partial.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let offset = match tokio::fs::metadata(&download.partial).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    let response = fetcher.open(url, headers, offset).await?;

    // Un serveur qui ignore le Range renvoie tout le fichier : on repart de zéro
    let (mut file, mut written) = if offset > 0 && response.resumed {
        debug!(path = %download.partial.display(), offset, "Resuming partial download");
        let file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&download.partial)
            .await?;
        (file, offset)
    } else {
        if offset > 0 {
            debug!(path = %download.partial.display(), "Range ignored, restarting download");
        }
        (tokio::fs::File::create(&download.partial).await?, 0)
    };

    let expected = response.content_length.map(|len| written + len);
    download.advance(written, expected);

    let mut body = response.body;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        download.advance(written, expected);
    }

    file.flush().await?;
    file.sync_all().await?;

    if let Some(expected) = expected {
        if written < expected {
            return Err(CacheError::Download(format!(
                "connection closed after {written} of {expected} bytes"
            )));
        }
    }
    Ok(written)
}
