//! WFBMusic en ligne de commande
//!
//! Recherche les termes passés en argument sur toutes les plateformes
//! configurées, puis joue les résultats à la suite : une piste sans flux
//! jouable est sautée, la fin d'une piste enchaîne la suivante. Ctrl+C arrête
//! la lecture en fondu.

mod logging;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wfbcache::{CacheConfigExt, CacheStore, HttpFetcher};
use wfbconfig::get_config;
use wfbplatforms::{SourcesConfigExt, default_chain};
use wfbplayer::{PlaybackController, PlaybackState, PlayerConfigExt, RodioBackendFactory};
use wfbsource::{SourceChain, TrackMetadata};

/// Résultats de recherche joués dans l'ordre
struct Queue {
    items: Vec<TrackMetadata>,
    next: usize,
}

impl Queue {
    /// Résout et charge la prochaine piste jouable ; `false` en fin de file
    async fn advance(&mut self, chain: &SourceChain, player: &PlaybackController) -> Result<bool> {
        while let Some(item) = self.items.get(self.next).cloned() {
            self.next += 1;
            match chain.resolve_stream(item.platform, &item.id).await {
                Ok(resolved) => {
                    info!(
                        "▶ {} - {} [{}{}]",
                        item.title,
                        item.artist,
                        item.platform.display_name(),
                        resolved
                            .quality_label
                            .as_deref()
                            .map(|q| format!(", {q}"))
                            .unwrap_or_default()
                    );
                    player.load_remote(item.track_ref(), resolved).await?;
                    player.play().await?;
                    return Ok(true);
                }
                Err(e) => warn!(track = %item.track_ref(), error = %e, "Skipping track"),
            }
        }
        Ok(false)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = get_config();
    let _log_guard = logging::init_logging(&config)?;

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        eprintln!("Usage: WFBMusic <search terms>");
        return Ok(());
    }

    let chain = default_chain(&config.get_sources_settings()?)?;
    let fetcher = HttpFetcher::new(config.get_download_timeout())?;
    let store = Arc::new(CacheStore::new(config.get_cache_settings()?, Arc::new(fetcher)));
    let player = PlaybackController::new(
        Arc::new(RodioBackendFactory),
        store.clone(),
        config.get_player_settings(),
    );

    info!("🔎 Searching \"{}\"...", query);
    let results = chain.search_all(&query).await;
    for (platform, error) in results.errors() {
        warn!(%platform, error, "Search failed");
    }
    let items: Vec<TrackMetadata> = results.merged().into_iter().cloned().collect();
    info!("✅ {} result(s)", items.len());
    for (index, item) in items.iter().enumerate() {
        info!("  {:>2}. {} - {} ({})", index + 1, item.title, item.artist, item.platform);
    }

    let mut queue = Queue { items, next: 0 };
    if !queue.advance(&chain, &player).await? {
        warn!("No playable track for \"{}\"", query);
        return Ok(());
    }

    let (finished_tx, mut finished) = mpsc::unbounded_channel();
    player
        .on_finished(move |track| {
            let _ = finished_tx.send(track);
        })
        .await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    let mut states = player.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Stopping...");
                break;
            }
            Some(track) = finished.recv() => {
                info!(%track, "Track finished");
                if !queue.advance(&chain, &player).await? {
                    break;
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = states.borrow_and_update().clone();
                if snapshot.state == PlaybackState::Error {
                    warn!(error = ?snapshot.last_error, "Playback failed, skipping");
                    if !queue.advance(&chain, &player).await? {
                        break;
                    }
                }
            }
        }
    }

    player.stop(true).await?;
    store.cancel_all();
    player.dispose().await?;
    info!("👋 Bye");
    Ok(())
}
