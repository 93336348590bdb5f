//! Miroir vidéo synchronisé sur l'audio
//!
//! Le miroir possède un backend vidéo muet qu'il aligne sur le contrôleur audio,
//! seule référence de temps : lecture et pause sont recopiées, et la vidéo est
//! recalée sur la position audio dès que l'écart dépasse le seuil. Le fichier
//! vidéo vient du cache, d'abord partiel puis final ; le miroir change de
//! fichier sans que l'interface le voie.

use crate::backend::{
    seek_position, BackendEvent, BackendFactory, BackendOptions, EventSink, MediaBackend,
    TaggedEvent,
};
use crate::controller::{PlaybackState, PlayerSnapshot};
use crate::error::{PlayerError, Result};
use crate::settings::VideoSettings;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use wfbcache::{CacheStore, VideoAvailability};
use wfbsource::{ResolvedStream, TrackRef};

/// En dessous, une position audio est considérée comme un début de piste
const MIN_INITIAL_SEEK_SECS: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoStatus {
    Closed,
    /// Téléchargement lancé, fichier pas encore jouable
    WaitingForAsset,
    Active,
    /// État terminal pour la piste ; l'audio n'est pas affecté
    Unavailable(String),
}

/// État observable du miroir
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSyncState {
    pub visible: bool,
    pub track: Option<TrackRef>,
    pub status: VideoStatus,
    /// Fichier lu par le backend courant
    pub path: Option<PathBuf>,
    pub drift_threshold_secs: f64,
    pub last_drift_secs: Option<f64>,
    /// Nombre de recalages effectués pour la piste
    pub corrections: u32,
}

type Ack = oneshot::Sender<()>;

enum Command {
    Open {
        track: TrackRef,
        resolved: ResolvedStream,
        ack: Ack,
    },
    Close(Ack),
    Dispose(Ack),
}

#[derive(Clone)]
pub struct VideoMirror {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<VideoSyncState>,
}

impl std::fmt::Debug for VideoMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoMirror")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl VideoMirror {
    /// Démarre le miroir, abonné aux instantanés du contrôleur audio
    pub fn new(
        factory: Arc<dyn BackendFactory>,
        store: Arc<CacheStore>,
        audio: watch::Receiver<PlayerSnapshot>,
        settings: VideoSettings,
    ) -> Self {
        let (state_tx, state) = watch::channel(VideoSyncState {
            visible: false,
            track: None,
            status: VideoStatus::Closed,
            path: None,
            drift_threshold_secs: settings.drift_threshold.as_secs_f64(),
            last_drift_secs: None,
            corrections: 0,
        });
        let (commands, commands_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let actor = MirrorActor {
            settings,
            factory,
            store,
            state: state_tx,
            audio,
            backend: None,
            generation: 0,
            events_tx,
            complete: false,
            poll_attempts: 0,
            backend_retries: 0,
            mirrored_playing: false,
        };
        tokio::spawn(actor.run(commands_rx, events_rx));

        Self { commands, state }
    }

    async fn request(&self, make: impl FnOnce(Ack) -> Command) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(make(ack))
            .await
            .map_err(|_| PlayerError::ActorGone)?;
        done.await.map_err(|_| PlayerError::ActorGone)
    }

    /// Affiche la vidéo d'une piste
    ///
    /// Sans flux vidéo, le miroir passe en `Unavailable` et l'appel renvoie
    /// [`PlayerError::NoVideo`].
    pub async fn open(&self, track: TrackRef, resolved: ResolvedStream) -> Result<()> {
        let has_video = resolved.has_video();
        self.request(|ack| Command::Open { track, resolved, ack })
            .await?;
        if has_video {
            Ok(())
        } else {
            Err(PlayerError::NoVideo)
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.request(Command::Close).await
    }

    pub async fn dispose(&self) -> Result<()> {
        self.request(Command::Dispose).await
    }

    pub fn subscribe(&self) -> watch::Receiver<VideoSyncState> {
        self.state.clone()
    }

    pub fn state(&self) -> VideoSyncState {
        self.state.borrow().clone()
    }
}

struct MirrorActor {
    settings: VideoSettings,
    factory: Arc<dyn BackendFactory>,
    store: Arc<CacheStore>,
    state: watch::Sender<VideoSyncState>,
    audio: watch::Receiver<PlayerSnapshot>,
    backend: Option<Box<dyn MediaBackend>>,
    generation: u64,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    /// Le backend lit le fichier final
    complete: bool,
    poll_attempts: u32,
    backend_retries: u32,
    mirrored_playing: bool,
}

impl MirrorActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut events: mpsc::UnboundedReceiver<TaggedEvent>) {
        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sync = tokio::time::interval(self.settings.sync_interval);
        sync.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut audio_alive = true;

        loop {
            let status = self.state.borrow().status.clone();
            let waiting = status == VideoStatus::WaitingForAsset;
            let active = status == VideoStatus::Active;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Open { track, resolved, ack }) => {
                        self.set_visible(true);
                        self.open(track, resolved);
                        let _ = ack.send(());
                    }
                    Some(Command::Close(ack)) => {
                        self.set_visible(false);
                        self.close();
                        let _ = ack.send(());
                    }
                    Some(Command::Dispose(ack)) => {
                        self.close();
                        let _ = ack.send(());
                        break;
                    }
                    None => break,
                },
                changed = self.audio.changed(), if audio_alive => {
                    if changed.is_err() {
                        debug!("Audio controller gone, closing video");
                        audio_alive = false;
                        self.close();
                    } else {
                        self.on_audio_changed();
                    }
                }
                Some(tagged) = events.recv() => self.on_backend_event(tagged),
                _ = poll.tick(), if waiting => self.poll_asset(),
                _ = sync.tick(), if active => self.sync(),
            }
        }

        self.teardown_backend();
        debug!("Video mirror stopped");
    }

    fn publish(&self, update: impl FnOnce(&mut VideoSyncState)) {
        self.state.send_if_modified(|state| {
            let before = state.clone();
            update(state);
            *state != before
        });
    }

    fn status(&self) -> VideoStatus {
        self.state.borrow().status.clone()
    }

    fn track(&self) -> Option<TrackRef> {
        self.state.borrow().track.clone()
    }

    fn set_visible(&self, visible: bool) {
        self.publish(|s| s.visible = visible);
    }

    fn open(&mut self, track: TrackRef, resolved: ResolvedStream) {
        self.teardown_backend();
        self.complete = false;
        self.poll_attempts = 0;
        self.backend_retries = 0;

        let video_url = resolved.video_url.clone().filter(|u| !u.trim().is_empty());
        let Some(video_url) = video_url else {
            debug!(track = %track, "Track has no video stream");
            self.publish(|s| {
                s.track = Some(track);
                s.status = VideoStatus::Unavailable("no video stream".to_string());
                s.path = None;
                s.last_drift_secs = None;
                s.corrections = 0;
            });
            return;
        };

        info!(track = %track, "Opening video mirror");
        // Idempotent : rejoint le téléchargement lancé au chargement audio
        self.store
            .start_secondary(&track, &video_url, &resolved.request_headers);
        self.publish(|s| {
            s.track = Some(track);
            s.status = VideoStatus::WaitingForAsset;
            s.path = None;
            s.last_drift_secs = None;
            s.corrections = 0;
        });
        self.poll_asset();
    }

    fn close(&mut self) {
        self.teardown_backend();
        self.publish(|s| {
            s.track = None;
            s.status = VideoStatus::Closed;
            s.path = None;
            s.last_drift_secs = None;
        });
    }

    fn unavailable(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "Video unavailable");
        self.teardown_backend();
        self.publish(|s| {
            s.status = VideoStatus::Unavailable(reason);
            s.path = None;
        });
    }

    // ============= Attente du fichier =============

    fn poll_asset(&mut self) {
        if self.status() != VideoStatus::WaitingForAsset {
            return;
        }
        let Some(track) = self.track() else {
            return;
        };
        self.poll_attempts += 1;

        match self.store.video_availability(&track) {
            VideoAvailability::Ready { path, complete } => {
                debug!(path = %path.display(), complete, "Video asset playable");
                self.create_backend(path, complete);
            }
            VideoAvailability::Absent => self.unavailable("video download failed"),
            VideoAvailability::Pending if self.poll_attempts >= self.settings.max_poll_attempts => {
                self.unavailable("video download timed out");
            }
            VideoAvailability::Pending => {}
        }
    }

    // ============= Backend =============

    fn create_backend(&mut self, path: PathBuf, complete: bool) {
        self.teardown_backend();
        let events = EventSink::new(self.generation, self.events_tx.clone());
        match self
            .factory
            .create(&path, events, BackendOptions { muted: true })
        {
            Ok(backend) => {
                self.backend = Some(backend);
                self.complete = complete;
                self.publish(|s| {
                    s.status = VideoStatus::Active;
                    s.path = Some(path);
                });
            }
            Err(e) => self.on_backend_failure(e.message),
        }
    }

    fn teardown_backend(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.stop();
            backend.dispose();
        }
        self.generation += 1;
        self.mirrored_playing = false;
    }

    fn on_backend_event(&mut self, tagged: TaggedEvent) {
        if tagged.generation != self.generation || self.backend.is_none() {
            return;
        }
        match tagged.event {
            BackendEvent::Ready { .. } => self.on_ready(),
            BackendEvent::EndOfMedia => {
                if !self.complete {
                    debug!("Video reached end of partial file");
                    self.repoint_if_complete();
                }
            }
            BackendEvent::Error(e) => self.on_backend_failure(e.message),
        }
    }

    fn on_ready(&mut self) {
        let audio_position = self.audio.borrow().position_secs;
        if let Some(backend) = self.backend.as_mut() {
            if audio_position > MIN_INITIAL_SEEK_SECS {
                if let Some(at) = seek_position(audio_position) {
                    backend.seek(at);
                }
            }
        }
        self.mirror_play_state();
    }

    /// Reconstruit le backend un nombre borné de fois avant d'abandonner
    fn on_backend_failure(&mut self, message: String) {
        self.backend_retries += 1;
        if self.backend_retries > self.settings.max_backend_retries {
            self.unavailable(message);
            return;
        }
        warn!(error = %message, attempt = self.backend_retries, "Video backend error, rebuilding");
        self.teardown_backend();
        let Some(track) = self.track() else {
            return;
        };
        match self.store.video_availability(&track) {
            VideoAvailability::Ready { path, complete } => self.create_backend(path, complete),
            VideoAvailability::Pending => {
                self.poll_attempts = 0;
                self.publish(|s| {
                    s.status = VideoStatus::WaitingForAsset;
                    s.path = None;
                });
            }
            VideoAvailability::Absent => self.unavailable(message),
        }
    }

    /// Passe du partiel au fichier final dès qu'il existe
    fn repoint_if_complete(&mut self) {
        let Some(track) = self.track() else {
            return;
        };
        if let VideoAvailability::Ready { path, complete: true } = self.store.video_availability(&track) {
            info!(path = %path.display(), "Switching video to the completed file");
            self.create_backend(path, true);
        }
    }

    // ============= Synchronisation =============

    fn on_audio_changed(&mut self) {
        let audio = self.audio.borrow_and_update().clone();
        let current = self.track();

        if audio.state == PlaybackState::Idle || audio.track.is_none() {
            if current.is_some() {
                debug!("Audio stopped, closing video");
                self.close();
            }
            return;
        }

        let visible = self.state.borrow().visible;
        if !visible && current.is_none() {
            return;
        }

        if audio.track != current {
            match (audio.track, audio.resolved) {
                (Some(track), Some(resolved)) if visible && resolved.has_video() => {
                    self.open(track, resolved);
                }
                _ => self.close(),
            }
            return;
        }

        self.mirror_play_state();
    }

    fn mirror_play_state(&mut self) {
        let playing = self.audio.borrow().state == PlaybackState::Playing;
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        if playing != self.mirrored_playing {
            if playing {
                backend.play();
            } else {
                backend.pause();
            }
            self.mirrored_playing = playing;
        }
    }

    fn sync(&mut self) {
        if !self.complete {
            self.repoint_if_complete();
        }
        let audio_position = self.audio.borrow().position_secs;
        let threshold = self.settings.drift_threshold.as_secs_f64();
        let Some(backend) = self.backend.as_mut() else {
            return;
        };

        let drift = (backend.position().as_secs_f64() - audio_position).abs();
        let target = seek_position(audio_position).filter(|_| drift > threshold);
        let corrected = target.is_some();
        if let Some(at) = target {
            debug!(drift, audio_position, "Correcting video drift");
            backend.seek(at);
        }
        self.publish(|s| {
            s.last_drift_secs = Some(drift);
            if corrected {
                s.corrections += 1;
            }
        });
    }
}
