//! # wfbplayer - Lecture audio et miroir vidéo de WFBMusic
//!
//! Deux acteurs tokio, chacun propriétaire exclusif de son backend :
//!
//! - [`PlaybackController`] présente une machine à états stable au-dessus d'un
//!   backend remplaçable et peu fiable : chargement via le cache, lecture d'un
//!   partiel, reprises bornées sur erreur transitoire, fondu à l'arrêt ;
//! - [`VideoMirror`] suit le contrôleur et garde une vidéo muette à moins de
//!   `drift_threshold` de la position audio, qui fait toujours référence.
//!
//! Un backend est détruit (arrêt, libération) avant la création du suivant ; ses
//! événements portent une génération et ceux d'un backend remplacé sont ignorés.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wfbplayer::{PlaybackController, PlayerSettings, RodioBackendFactory};
//!
//! let player = PlaybackController::new(Arc::new(RodioBackendFactory), store, PlayerSettings::default());
//! player.load_remote(track, resolved).await?;
//! player.play().await?;
//! ```
//!
//! Le backend rodio est disponible avec la feature `rodio`.

pub mod backend;
pub mod controller;
pub mod error;
pub mod mirror;
pub mod settings;
pub mod volume;

#[cfg(feature = "rodio")]
pub mod rodio_backend;

#[cfg(feature = "wfbconfig")]
pub mod config_ext;

pub use backend::{
    seek_position, BackendEvent, BackendFactory, BackendOptions, EventSink, MediaBackend,
    TaggedEvent,
};
pub use controller::{FinishedCallback, PlaybackController, PlaybackState, PlayerSnapshot};
pub use error::{BackendError, BackendErrorKind, PlayerError, Result};
pub use mirror::{VideoMirror, VideoStatus, VideoSyncState};
pub use settings::{PlayerSettings, VideoSettings};

#[cfg(feature = "rodio")]
pub use rodio_backend::{RodioBackend, RodioBackendFactory};

#[cfg(feature = "wfbconfig")]
pub use config_ext::PlayerConfigExt;
