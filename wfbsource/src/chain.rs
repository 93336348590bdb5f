//! Coordination des adaptateurs : recherche en éventail, routage, pagination

use crate::error::{Result, SourceError};
use crate::model::{PlatformId, ResolvedStream, TrackMetadata};
use crate::SourceAdapter;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Délai par défaut d'une recherche sur une plateforme
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Résultats d'une plateforme pour une requête, avec l'état de pagination
#[derive(Debug, Clone)]
pub struct PlatformResults {
    pub platform: PlatformId,
    pub items: Vec<TrackMetadata>,
    /// Dernière erreur rencontrée (recherche initiale ou page suivante)
    pub error: Option<String>,
    /// Dernière page chargée avec succès (0 si aucune)
    pub page: u32,
    /// Plus rien de nouveau à charger
    pub exhausted: bool,
    seen: HashSet<String>,
}

impl PlatformResults {
    fn new(platform: PlatformId) -> Self {
        Self {
            platform,
            items: Vec::new(),
            error: None,
            page: 0,
            exhausted: false,
            seen: HashSet::new(),
        }
    }

    /// Ajoute les pistes dont l'identifiant n'a pas encore été vu
    ///
    /// Les pistes sont rattachées à la plateforme de ce bloc.
    fn append_unique(&mut self, items: Vec<TrackMetadata>) -> usize {
        let before = self.items.len();
        for mut item in items {
            if item.id.is_empty() || !self.seen.insert(item.id.clone()) {
                continue;
            }
            item.platform = self.platform;
            self.items.push(item);
        }
        self.items.len() - before
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Résultats agrégés d'une recherche sur toutes les plateformes
#[derive(Debug, Clone)]
pub struct SearchResults {
    query: String,
    platforms: Vec<PlatformResults>,
}

impl SearchResults {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn get(&self, platform: PlatformId) -> Option<&PlatformResults> {
        self.platforms.iter().find(|r| r.platform == platform)
    }

    fn entry(&mut self, platform: PlatformId) -> &mut PlatformResults {
        if let Some(index) = self.platforms.iter().position(|r| r.platform == platform) {
            return &mut self.platforms[index];
        }
        self.platforms.push(PlatformResults::new(platform));
        let last = self.platforms.len() - 1;
        &mut self.platforms[last]
    }

    /// Blocs par plateforme, dans l'ordre de la chaîne
    pub fn iter(&self) -> impl Iterator<Item = &PlatformResults> {
        self.platforms.iter()
    }

    /// Toutes les pistes, plateforme par plateforme
    pub fn merged(&self) -> Vec<&TrackMetadata> {
        self.platforms.iter().flat_map(|r| r.items.iter()).collect()
    }

    pub fn total(&self) -> usize {
        self.platforms.iter().map(|r| r.items.len()).sum()
    }

    /// Erreurs enregistrées, par plateforme
    pub fn errors(&self) -> Vec<(PlatformId, &str)> {
        self.platforms
            .iter()
            .filter_map(|r| r.error.as_deref().map(|e| (r.platform, e)))
            .collect()
    }
}

/// Chaîne des adaptateurs enregistrés
///
/// La chaîne ne connaît les adaptateurs qu'à travers [`SourceAdapter`] ; aucune
/// logique ne dépend du type concret.
#[derive(Debug, Clone)]
pub struct SourceChain {
    adapters: HashMap<PlatformId, Arc<dyn SourceAdapter>>,
    order: Vec<PlatformId>,
    search_timeout: Duration,
}

impl Default for SourceChain {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_TIMEOUT)
    }
}

impl SourceChain {
    pub fn new(search_timeout: Duration) -> Self {
        Self {
            adapters: HashMap::new(),
            order: Vec::new(),
            search_timeout,
        }
    }

    /// Enregistre un adaptateur ; remplace celui de la même plateforme sans changer l'ordre
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        let platform = adapter.platform();
        if self.adapters.insert(platform, adapter).is_none() {
            self.order.push(platform);
        }
        debug!(platform = %platform, "Adapter registered");
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Plateformes enregistrées, dans l'ordre de recherche
    pub fn platforms(&self) -> &[PlatformId] {
        &self.order
    }

    pub fn search_timeout(&self) -> Duration {
        self.search_timeout
    }

    pub fn adapter(&self, platform: PlatformId) -> Result<&Arc<dyn SourceAdapter>> {
        self.adapters
            .get(&platform)
            .ok_or_else(|| SourceError::UnknownPlatform(platform.to_string()))
    }

    /// Recherche la première page sur toutes les plateformes en parallèle
    ///
    /// Une tâche par plateforme, bornée par le délai de recherche. Une erreur,
    /// un dépassement ou une panique laisse la plateforme vide avec l'erreur
    /// enregistrée, sans affecter les autres.
    pub async fn search_all(&self, query: &str) -> SearchResults {
        let mut results = SearchResults {
            query: query.to_string(),
            platforms: Vec::with_capacity(self.order.len()),
        };
        let mut pending = HashSet::new();
        let mut tasks = JoinSet::new();

        for platform in &self.order {
            let Some(adapter) = self.adapters.get(platform).cloned() else {
                continue;
            };
            let platform = *platform;
            let limit = self.search_timeout;
            let query = query.to_string();
            results.entry(platform);
            pending.insert(platform);
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(limit, adapter.search(&query, 1)).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout(format!("search exceeded {limit:?}"))),
                };
                (platform, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (platform, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "Search task failed");
                    continue;
                }
            };
            pending.remove(&platform);
            let entry = results.entry(platform);
            match outcome {
                Ok(items) => {
                    entry.page = 1;
                    let added = entry.append_unique(items);
                    debug!(platform = %platform, count = added, "Search results");
                }
                Err(e) => {
                    warn!(platform = %platform, error = %e, "Search failed");
                    entry.error = Some(e.to_string());
                }
            }
        }

        // Plateformes dont la tâche n'a rien rendu (panique)
        for platform in pending {
            results.entry(platform).error = Some("search task panicked".to_string());
        }

        info!(query, total = results.total(), "Search completed");
        results
    }

    /// Recherche sur une seule plateforme
    pub async fn search_platform(
        &self,
        platform: PlatformId,
        query: &str,
        page: u32,
    ) -> Result<Vec<TrackMetadata>> {
        let adapter = self.adapter(platform)?;
        match tokio::time::timeout(self.search_timeout, adapter.search(query, page)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(format!(
                "search on {platform} exceeded {:?}",
                self.search_timeout
            ))),
        }
    }

    /// Charge la page suivante d'une plateforme et l'ajoute sans doublons
    ///
    /// # Returns
    ///
    /// Le nombre de pistes nouvelles ajoutées. Une page qui n'apporte rien de
    /// nouveau marque la plateforme comme épuisée.
    pub async fn load_more(&self, results: &mut SearchResults, platform: PlatformId) -> Result<usize> {
        let query = results.query.clone();
        let (next_page, exhausted) = {
            let entry = results.entry(platform);
            (entry.page + 1, entry.exhausted)
        };
        if exhausted {
            return Ok(0);
        }

        match self.search_platform(platform, &query, next_page).await {
            Ok(items) => {
                let entry = results.entry(platform);
                entry.page = next_page;
                entry.error = None;
                let added = entry.append_unique(items);
                if added == 0 {
                    entry.exhausted = true;
                }
                debug!(platform = %platform, page = next_page, added, "Loaded more results");
                Ok(added)
            }
            Err(e) => {
                results.entry(platform).error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Résout le flux d'une piste auprès de sa plateforme
    pub async fn resolve_stream(&self, platform: PlatformId, track_id: &str) -> Result<ResolvedStream> {
        self.adapter(platform)?.stream_url(track_id).await
    }

    pub async fn resolve_lyrics(&self, platform: PlatformId, track_id: &str) -> Result<Option<String>> {
        self.adapter(platform)?.lyrics(track_id).await
    }

    pub async fn resolve_cover(&self, platform: PlatformId, track_id: &str) -> Result<Option<String>> {
        self.adapter(platform)?.cover(track_id).await
    }

    pub async fn recommendations(&self, platform: PlatformId, page: u32) -> Result<Vec<TrackMetadata>> {
        let adapter = self.adapter(platform)?;
        if !adapter.supports_recommendations() {
            return Err(SourceError::NotSupported(format!("recommendations on {platform}")));
        }
        adapter.recommendations(page).await
    }
}
