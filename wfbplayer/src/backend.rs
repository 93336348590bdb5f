//! Abstraction du moteur de lecture
//!
//! Un backend lit un seul fichier. Il est piloté de façon synchrone par l'acteur
//! qui le possède et signale ses événements (prêt, fin, erreur) à travers un
//! [`EventSink`] : chaque événement devient un message étiqueté par la
//! génération du backend, ce qui permet d'ignorer ceux d'un backend déjà remplacé.

use crate::error::BackendError;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// Événement asynchrone d'un backend
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Média ouvert ; durée si le conteneur la donne
    Ready { duration: Option<Duration> },
    EndOfMedia,
    Error(BackendError),
}

/// Événement accompagné de la génération du backend émetteur
#[derive(Debug, Clone)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: BackendEvent,
}

/// Adaptateur callback → message, utilisable depuis n'importe quel thread
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Les envois vers un acteur terminé sont ignorés
    pub fn emit(&self, event: BackendEvent) {
        let _ = self.tx.send(TaggedEvent {
            generation: self.generation,
            event,
        });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendOptions {
    /// Le miroir vidéo crée toujours des backends muets
    pub muted: bool,
}

/// Moteur de lecture d'un fichier
pub trait MediaBackend: Send {
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn seek(&mut self, position: Duration);
    fn position(&self) -> Duration;
    /// Volume natif, 0.0 à 1.0
    fn set_volume(&mut self, volume: f32);
    /// Gain appliqué après le volume natif
    fn set_makeup_gain_db(&mut self, gain_db: f32);
    /// Libère les ressources ; aucun événement n'est émis ensuite
    fn dispose(&mut self);
}

/// Fabrique de backends
pub trait BackendFactory: Send + Sync {
    fn create(
        &self,
        path: &Path,
        events: EventSink,
        options: BackendOptions,
    ) -> Result<Box<dyn MediaBackend>, BackendError>;
}

/// Convertit une position en secondes pour [`MediaBackend::seek`]
///
/// Les valeurs négatives valent 0 ; `None` pour une valeur non finie ou trop
/// grande pour une `Duration`.
pub fn seek_position(secs: f64) -> Option<Duration> {
    if !secs.is_finite() {
        return None;
    }
    Duration::try_from_secs_f64(secs.max(0.0)).ok()
}
