//! Chaîne de résolution de flux par stratégies ordonnées
//!
//! Chaque plateforme expose plusieurs façons, indépendantes et fragiles, d'obtenir
//! une URL lisible (endpoint officiel mobile, endpoint web, proxys publics...).
//! [`StreamResolver`] les essaie dans l'ordre et retourne le premier résultat validé.
//!
//! # Exemple
//!
//! ```rust,no_run
//! use wfbsource::{PlatformId, ResolvedStream, StreamResolver};
//!
//! # async fn demo() -> wfbsource::Result<()> {
//! let resolver = StreamResolver::new(PlatformId::Kuwo)
//!     .strategy("antiserver", |id| async move {
//!         Ok(ResolvedStream::new(format!("https://cdn.example/{id}.mp3")))
//!     })
//!     .strategy("player", |_id| async move { Ok(ResolvedStream::new("")) });
//!
//! let stream = resolver.resolve("42").await?;
//! assert!(stream.audio_url.ends_with("42.mp3"));
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SourceError};
use crate::model::{PlatformId, ResolvedStream, is_playable_url, is_trial_url};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Future renvoyée par une stratégie
pub type StrategyFuture = BoxFuture<'static, Result<ResolvedStream>>;

type StrategyFn = Arc<dyn Fn(String) -> StrategyFuture + Send + Sync>;
type RejectFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Une méthode candidate pour transformer un identifiant en flux lisible
#[derive(Clone)]
pub struct Strategy {
    name: String,
    run: StrategyFn,
}

impl Strategy {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy").field("name", &self.name).finish()
    }
}

/// Combinateur « premier succès » sur une liste ordonnée de stratégies
#[derive(Clone)]
pub struct StreamResolver {
    platform: PlatformId,
    strategies: Vec<Strategy>,
    timeout: Option<Duration>,
    reject: Option<RejectFn>,
}

impl StreamResolver {
    pub fn new(platform: PlatformId) -> Self {
        Self {
            platform,
            strategies: Vec::new(),
            timeout: None,
            reject: None,
        }
    }

    /// Borne la durée de chaque stratégie ; un dépassement compte comme un échec
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Ajoute un critère de rejet spécifique à la plateforme (en plus des URL d'essai)
    pub fn reject_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.reject = Some(Arc::new(predicate));
        self
    }

    /// Ajoute une stratégie en fin de liste
    pub fn strategy<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResolvedStream>> + Send + 'static,
    {
        self.strategies.push(Strategy {
            name: name.into(),
            run: Arc::new(move |id| Box::pin(f(id))),
        });
        self
    }

    pub fn platform(&self) -> PlatformId {
        self.platform
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Essaie chaque stratégie dans l'ordre, une seule fois chacune
    ///
    /// # Returns
    ///
    /// Le flux de la première stratégie dont l'URL est validée, ou
    /// [`SourceError::NoPlayableSource`] listant l'échec de chaque stratégie.
    pub async fn resolve(&self, track_id: &str) -> Result<ResolvedStream> {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            debug!(platform = %self.platform, track = track_id, strategy = %strategy.name, "Trying strategy");

            let fut = (strategy.run)(track_id.to_string());
            let outcome = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout(format!(
                        "strategy {} exceeded {:?}",
                        strategy.name, limit
                    ))),
                },
                None => fut.await,
            };

            match outcome.and_then(|stream| self.validate(stream)) {
                Ok(stream) => {
                    info!(platform = %self.platform, track = track_id, strategy = %strategy.name, "Stream resolved");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(platform = %self.platform, track = track_id, strategy = %strategy.name, error = %e, "Strategy failed");
                    attempts.push(format!("{}: {}", strategy.name, e));
                }
            }
        }

        Err(SourceError::NoPlayableSource {
            platform: self.platform,
            track_id: track_id.to_string(),
            attempts,
        })
    }

    fn validate(&self, mut stream: ResolvedStream) -> Result<ResolvedStream> {
        let url = stream.audio_url.trim();
        if url.is_empty() {
            return Err(SourceError::Other("empty URL".into()));
        }
        if !is_playable_url(url) {
            return Err(SourceError::Other(format!("not a URL: {url}")));
        }
        if is_trial_url(url) {
            return Err(SourceError::Other("trial/preview URL".into()));
        }
        if self.reject.as_ref().is_some_and(|reject| reject(url)) {
            return Err(SourceError::Other(format!("rejected URL: {url}")));
        }
        stream.audio_url = url.to_string();
        Ok(stream)
    }
}

impl fmt::Debug for StreamResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResolver")
            .field("platform", &self.platform)
            .field("strategies", &self.strategies)
            .field("timeout", &self.timeout)
            .finish()
    }
}
