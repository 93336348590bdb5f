//! Contrôleur de lecture
//!
//! Une tâche tokio (l'acteur) possède l'unique backend et l'état ; le handle
//! [`PlaybackController`] lui envoie des commandes, chacune acquittée une fois
//! appliquée. L'état est publié sur un canal `watch` sous forme de
//! [`PlayerSnapshot`].
//!
//! ```text
//! Idle --load--> Loading --ready--> Ready --play--> Playing <--pause/play--> Paused
//! Playing --fin--> Ended
//! * --erreur transitoire--> Loading (tentatives bornées)
//! * --erreur fatale--> Error
//! * --stop/dispose--> Idle
//! ```

use crate::backend::{
    seek_position, BackendEvent, BackendFactory, BackendOptions, EventSink, MediaBackend,
    TaggedEvent,
};
use crate::error::{BackendError, PlayerError, Result};
use crate::settings::{retry_delay, PlayerSettings};
use crate::volume::{clamp_volume, fade_steps, volume_levels};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use wfbcache::{CacheStore, LocalAsset};
use wfbsource::{ResolvedStream, TrackRef};

const COMMAND_QUEUE_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
    Error,
}

/// État observable du lecteur
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub state: PlaybackState,
    pub position_secs: f64,
    pub duration_secs: Option<f64>,
    pub last_error: Option<String>,
    pub track: Option<TrackRef>,
    pub resolved: Option<ResolvedStream>,
    /// Pourcentage, 0 à 150
    pub volume: u8,
    /// Tentatives consommées pour le chargement courant
    pub retry_count: u32,
}

impl PlayerSnapshot {
    fn idle(volume: u8) -> Self {
        Self {
            state: PlaybackState::Idle,
            position_secs: 0.0,
            duration_secs: None,
            last_error: None,
            track: None,
            resolved: None,
            volume,
            retry_count: 0,
        }
    }
}

/// Rappel de fin naturelle d'une piste
pub type FinishedCallback = Arc<dyn Fn(TrackRef) + Send + Sync>;

type Ack = oneshot::Sender<()>;

enum Command {
    LoadRemote {
        track: TrackRef,
        resolved: ResolvedStream,
        ack: Ack,
    },
    LoadLocal {
        track: TrackRef,
        path: PathBuf,
        ack: Ack,
    },
    Play(Ack),
    Pause(Ack),
    Seek(f64, Ack),
    Stop { fade_out: bool, ack: Ack },
    SetVolume(i32, Ack),
    OnFinished(FinishedCallback, Ack),
    Dispose(Ack),
}

/// Handle du contrôleur ; clonable, toutes les copies pilotent le même acteur
#[derive(Clone)]
pub struct PlaybackController {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<PlayerSnapshot>,
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("snapshot", &*self.snapshot.borrow())
            .finish()
    }
}

impl PlaybackController {
    /// Démarre l'acteur ; doit être appelé depuis un runtime tokio
    pub fn new(factory: Arc<dyn BackendFactory>, store: Arc<CacheStore>, settings: PlayerSettings) -> Self {
        let volume = clamp_volume(i32::from(settings.default_volume));
        let (snapshot_tx, snapshot) = watch::channel(PlayerSnapshot::idle(volume));
        let (commands, commands_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (loads_tx, loads_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            settings,
            factory,
            store,
            snapshot: snapshot_tx,
            backend: None,
            generation: 0,
            events_tx,
            loads_tx,
            load_seq: 0,
            load_task: None,
            source: None,
            asset: None,
            play_intent: false,
            resume_at: None,
            retry_at: None,
            volume,
            on_finished: None,
        };
        tokio::spawn(actor.run(commands_rx, events_rx, loads_rx));

        Self { commands, snapshot }
    }

    async fn request(&self, make: impl FnOnce(Ack) -> Command) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(make(ack))
            .await
            .map_err(|_| PlayerError::ActorGone)?;
        done.await.map_err(|_| PlayerError::ActorGone)
    }

    /// Charge une piste distante via le cache
    pub async fn load_remote(&self, track: TrackRef, resolved: ResolvedStream) -> Result<()> {
        self.request(|ack| Command::LoadRemote { track, resolved, ack })
            .await
    }

    /// Charge un fichier local sans passer par le cache
    pub async fn load_local(&self, track: TrackRef, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.request(|ack| Command::LoadLocal { track, path, ack }).await
    }

    pub async fn play(&self) -> Result<()> {
        self.request(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await
    }

    pub async fn seek(&self, position_secs: f64) -> Result<()> {
        self.request(|ack| Command::Seek(position_secs, ack)).await
    }

    pub async fn stop(&self, fade_out: bool) -> Result<()> {
        self.request(|ack| Command::Stop { fade_out, ack }).await
    }

    pub async fn set_volume(&self, percent: i32) -> Result<()> {
        self.request(|ack| Command::SetVolume(percent, ack)).await
    }

    /// Enregistre le rappel de fin naturelle
    ///
    /// Le rappel s'exécute dans l'acteur : il ne doit pas attendre le contrôleur,
    /// seulement lancer une tâche s'il veut enchaîner une autre piste.
    pub async fn on_finished(&self, callback: impl Fn(TrackRef) + Send + Sync + 'static) -> Result<()> {
        let callback: FinishedCallback = Arc::new(callback);
        self.request(|ack| Command::OnFinished(callback, ack)).await
    }

    /// Arrête sans fondu puis termine l'acteur
    pub async fn dispose(&self) -> Result<()> {
        self.request(Command::Dispose).await
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerSnapshot> {
        self.snapshot.clone()
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.snapshot.borrow().state
    }

    pub fn position(&self) -> f64 {
        self.snapshot.borrow().position_secs
    }

    pub fn duration(&self) -> Option<f64> {
        self.snapshot.borrow().duration_secs
    }

    pub fn last_error(&self) -> Option<String> {
        self.snapshot.borrow().last_error.clone()
    }
}

/// Ce que l'acteur sait charger
#[derive(Debug, Clone)]
enum Source {
    Remote { track: TrackRef, resolved: ResolvedStream },
    Local { track: TrackRef, path: PathBuf },
}

impl Source {
    fn track(&self) -> &TrackRef {
        match self {
            Source::Remote { track, .. } | Source::Local { track, .. } => track,
        }
    }
}

/// Résultat d'une tâche de chargement
struct LoadOutcome {
    seq: u64,
    result: Result<LocalAsset>,
}

struct Actor {
    settings: PlayerSettings,
    factory: Arc<dyn BackendFactory>,
    store: Arc<CacheStore>,
    snapshot: watch::Sender<PlayerSnapshot>,
    backend: Option<Box<dyn MediaBackend>>,
    /// Incrémentée à chaque remplacement du backend
    generation: u64,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    loads_tx: mpsc::UnboundedSender<LoadOutcome>,
    load_seq: u64,
    load_task: Option<JoinHandle<()>>,
    source: Option<Source>,
    asset: Option<LocalAsset>,
    /// `play` demandé avant que le backend soit prêt
    play_intent: bool,
    /// Position à rétablir au prochain `Ready`
    resume_at: Option<f64>,
    retry_at: Option<Instant>,
    volume: u8,
    on_finished: Option<FinishedCallback>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<TaggedEvent>,
        mut loads: mpsc::UnboundedReceiver<LoadOutcome>,
    ) {
        let mut ticker = tokio::time::interval(self.settings.position_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let playing = self.state() == PlaybackState::Playing;
            let retry_at = self.retry_at;

            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command).await {
                        break;
                    }
                }
                Some(tagged) = events.recv() => self.on_backend_event(tagged),
                Some(outcome) = loads.recv() => self.on_loaded(outcome),
                _ = ticker.tick(), if playing => self.sample_position(),
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_now();
                }
            }
        }

        self.cancel_load().await;
        self.teardown_backend();
        debug!("Playback actor stopped");
    }

    /// Applique une commande ; `false` termine l'acteur
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::LoadRemote { track, resolved, ack } => {
                self.load(Source::Remote { track, resolved }).await;
                let _ = ack.send(());
            }
            Command::LoadLocal { track, path, ack } => {
                self.load(Source::Local { track, path }).await;
                let _ = ack.send(());
            }
            Command::Play(ack) => {
                self.play();
                let _ = ack.send(());
            }
            Command::Pause(ack) => {
                self.pause();
                let _ = ack.send(());
            }
            Command::Seek(position, ack) => {
                self.seek(position);
                let _ = ack.send(());
            }
            Command::Stop { fade_out, ack } => {
                self.stop(fade_out).await;
                let _ = ack.send(());
            }
            Command::SetVolume(percent, ack) => {
                self.set_volume(percent);
                let _ = ack.send(());
            }
            Command::OnFinished(callback, ack) => {
                self.on_finished = Some(callback);
                let _ = ack.send(());
            }
            Command::Dispose(ack) => {
                self.stop(false).await;
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn state(&self) -> PlaybackState {
        self.snapshot.borrow().state
    }

    fn publish(&self, update: impl FnOnce(&mut PlayerSnapshot)) {
        self.snapshot.send_if_modified(|snapshot| {
            let before = snapshot.clone();
            update(snapshot);
            *snapshot != before
        });
    }

    // ============= Chargement =============

    async fn load(&mut self, source: Source) {
        self.cancel_load().await;
        self.teardown_backend();
        self.retry_at = None;
        self.play_intent = false;
        self.resume_at = None;
        self.asset = None;

        info!(track = %source.track(), "Loading track");
        let (track, resolved) = match &source {
            Source::Remote { track, resolved } => (track.clone(), Some(resolved.clone())),
            Source::Local { track, .. } => (track.clone(), None),
        };
        self.source = Some(source);
        self.publish(|s| {
            s.state = PlaybackState::Loading;
            s.position_secs = 0.0;
            s.duration_secs = None;
            s.last_error = None;
            s.track = Some(track);
            s.resolved = resolved;
            s.retry_count = 0;
        });
        self.spawn_load(false);
    }

    /// Lance la tâche de chargement ; seule cette tâche attend le cache
    ///
    /// `until_complete` attend la fin du téléchargement en cours au lieu du seuil.
    fn spawn_load(&mut self, until_complete: bool) {
        let Some(source) = self.source.clone() else {
            return;
        };
        self.load_seq += 1;
        let seq = self.load_seq;
        let store = self.store.clone();
        let loads = self.loads_tx.clone();

        self.load_task = Some(tokio::spawn(async move {
            let result = match source {
                Source::Local { path, .. } => Ok(LocalAsset { path, complete: true }),
                Source::Remote { track, .. } if until_complete => store
                    .wait_complete(&track)
                    .await
                    .map(|path| LocalAsset { path, complete: true })
                    .map_err(PlayerError::from),
                Source::Remote { track, resolved } => {
                    if let Some(video) = resolved.video_url.as_deref().filter(|u| !u.trim().is_empty()) {
                        store.start_secondary(&track, video, &resolved.request_headers);
                    }
                    store
                        .ensure_local(&track, &resolved)
                        .await
                        .map_err(PlayerError::from)
                }
            };
            let _ = loads.send(LoadOutcome { seq, result });
        }));
    }

    /// Annule la tâche de chargement en cours et attend sa fin
    async fn cancel_load(&mut self) {
        if let Some(task) = self.load_task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    fn on_loaded(&mut self, outcome: LoadOutcome) {
        if outcome.seq != self.load_seq || self.source.is_none() {
            return;
        }
        self.load_task = None;

        match outcome.result {
            Ok(asset) => {
                debug!(path = %asset.path.display(), complete = asset.complete, "Asset ready");
                self.create_backend(asset);
            }
            Err(e) => {
                error!(error = %e, "Failed to load track");
                self.fail(e.to_string());
            }
        }
    }

    fn create_backend(&mut self, asset: LocalAsset) {
        self.teardown_backend();
        let events = EventSink::new(self.generation, self.events_tx.clone());
        match self
            .factory
            .create(&asset.path, events, BackendOptions { muted: false })
        {
            Ok(mut backend) => {
                let levels = volume_levels(self.volume);
                backend.set_volume(levels.native);
                backend.set_makeup_gain_db(levels.makeup_gain_db);
                self.backend = Some(backend);
                self.asset = Some(asset);
            }
            Err(e) => self.on_backend_error(e),
        }
    }

    /// Arrête et libère le backend courant ; ses événements futurs seront ignorés
    fn teardown_backend(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.stop();
            backend.dispose();
        }
        self.generation += 1;
    }

    // ============= Événements du backend =============

    fn on_backend_event(&mut self, tagged: TaggedEvent) {
        if tagged.generation != self.generation || self.backend.is_none() {
            debug!(generation = tagged.generation, "Ignoring stale backend event");
            return;
        }
        match tagged.event {
            BackendEvent::Ready { duration } => self.on_ready(duration),
            BackendEvent::EndOfMedia => self.on_end_of_media(),
            BackendEvent::Error(e) => self.on_backend_error(e),
        }
    }

    fn on_ready(&mut self, duration: Option<Duration>) {
        if self.state() != PlaybackState::Loading {
            return;
        }
        let duration = duration
            .map(|d| d.as_secs_f64())
            .filter(|d| *d > 0.0)
            .or(self.state_duration());
        let resume = self.resume_at.take();
        let resume_position = resume.and_then(seek_position);
        if let (Some(position), Some(backend)) = (resume_position, self.backend.as_mut()) {
            backend.seek(position);
        }

        info!(duration = ?duration, "Track ready");
        self.publish(|s| {
            s.state = PlaybackState::Ready;
            s.duration_secs = duration;
            if let Some(position) = resume {
                s.position_secs = position;
            }
        });

        if self.play_intent {
            self.play();
        }
    }

    fn state_duration(&self) -> Option<f64> {
        self.snapshot.borrow().duration_secs
    }

    fn on_end_of_media(&mut self) {
        // Fin d'un partiel : on reprend sur le fichier final à la même position
        if self.asset.as_ref().is_some_and(|a| !a.complete) {
            let position = self.current_position();
            info!(position, "Reached end of partial file, waiting for the download");
            self.teardown_backend();
            self.resume_at = Some(position);
            self.play_intent = true;
            self.publish(|s| s.state = PlaybackState::Loading);
            self.spawn_load(true);
            return;
        }

        self.play_intent = false;
        let position = self.state_duration().unwrap_or_else(|| self.current_position());
        self.publish(|s| {
            s.state = PlaybackState::Ended;
            s.position_secs = position;
        });

        let track = self.source.as_ref().map(|s| s.track().clone());
        if let (Some(callback), Some(track)) = (self.on_finished.clone(), track) {
            info!(track = %track, "Track finished");
            callback(track);
        }
    }

    fn on_backend_error(&mut self, e: BackendError) {
        let retries = self.snapshot.borrow().retry_count;
        let was_playing = matches!(self.state(), PlaybackState::Playing) || self.play_intent;

        match retry_delay(retries + 1, &self.settings.retry_delays) {
            Some(delay) if e.is_transient() => {
                warn!(error = %e, attempt = retries + 1, ?delay, "Transient backend error, retrying");
                let position = self.current_position();
                self.teardown_backend();
                self.resume_at = (position > 0.0).then_some(position);
                self.play_intent = was_playing;
                self.retry_at = Some(Instant::now() + delay);
                self.publish(|s| {
                    s.state = PlaybackState::Loading;
                    s.retry_count = retries + 1;
                    s.last_error = Some(e.message.clone());
                });
            }
            _ => {
                error!(error = %e, retries, "Backend error");
                self.fail(e.message);
            }
        }
    }

    fn retry_now(&mut self) {
        self.retry_at = None;
        if self.source.is_some() {
            debug!("Retrying load");
            self.spawn_load(false);
        }
    }

    fn fail(&mut self, message: String) {
        self.teardown_backend();
        self.retry_at = None;
        self.play_intent = false;
        self.publish(|s| {
            s.state = PlaybackState::Error;
            s.last_error = Some(message);
        });
    }

    // ============= Commandes de lecture =============

    fn play(&mut self) {
        match self.state() {
            PlaybackState::Loading => self.play_intent = true,
            PlaybackState::Ready | PlaybackState::Paused => {
                let Some(backend) = self.backend.as_mut() else {
                    return;
                };
                backend.play();
                self.play_intent = false;
                self.publish(|s| s.state = PlaybackState::Playing);
            }
            PlaybackState::Ended => self.replay(),
            PlaybackState::Playing | PlaybackState::Idle | PlaybackState::Error => {}
        }
    }

    /// Relit depuis le début sur un backend neuf
    ///
    /// Un backend arrivé en fin de média a consommé sa source ; il est remplacé
    /// par un backend ouvert sur le même fichier, qui démarre dès son `Ready`.
    fn replay(&mut self) {
        let Some(asset) = self.asset.clone() else {
            return;
        };
        info!(path = %asset.path.display(), "Replaying track from the start");
        self.resume_at = None;
        self.play_intent = true;
        self.publish(|s| {
            s.state = PlaybackState::Loading;
            s.position_secs = 0.0;
        });
        self.create_backend(asset);
    }

    fn pause(&mut self) {
        match self.state() {
            PlaybackState::Playing => {
                if let Some(backend) = self.backend.as_mut() {
                    backend.pause();
                }
                self.sample_position();
                self.publish(|s| s.state = PlaybackState::Paused);
            }
            PlaybackState::Loading => self.play_intent = false,
            _ => {}
        }
    }

    fn seek(&mut self, position: f64) {
        if !position.is_finite() {
            warn!(position, "Ignoring seek to a non-finite position");
            return;
        }
        let mut target = position.max(0.0);
        if let Some(duration) = self.state_duration() {
            target = target.min(duration);
        }
        // Sans durée connue, seule une position représentable est acceptée
        let Some(at) = seek_position(target) else {
            warn!(position, "Ignoring seek beyond the representable range");
            return;
        };
        match self.state() {
            // Le backend n'est pas encore prêt : la position sera rétablie au `Ready`
            PlaybackState::Loading => self.resume_at = (target > 0.0).then_some(target),
            PlaybackState::Idle => {}
            _ => {
                if let Some(backend) = self.backend.as_mut() {
                    backend.seek(at);
                }
            }
        }
        self.publish(|s| s.position_secs = target);
    }

    async fn stop(&mut self, fade_out: bool) {
        self.cancel_load().await;
        self.retry_at = None;
        self.play_intent = false;
        self.resume_at = None;

        if fade_out && self.state() == PlaybackState::Playing {
            let native = volume_levels(self.volume).native;
            let steps = self.settings.fade_steps.max(1);
            let pause = self.settings.fade_out / steps;
            for level in fade_steps(native, steps) {
                match self.backend.as_mut() {
                    Some(backend) => backend.set_volume(level),
                    None => break,
                }
                tokio::time::sleep(pause).await;
            }
        }

        self.teardown_backend();
        self.source = None;
        self.asset = None;
        let volume = self.volume;
        self.publish(|s| *s = PlayerSnapshot::idle(volume));
    }

    fn set_volume(&mut self, percent: i32) {
        self.volume = clamp_volume(percent);
        let levels = volume_levels(self.volume);
        if let Some(backend) = self.backend.as_mut() {
            backend.set_volume(levels.native);
            backend.set_makeup_gain_db(levels.makeup_gain_db);
        }
        let volume = self.volume;
        self.publish(|s| s.volume = volume);
    }

    // ============= Position =============

    fn current_position(&self) -> f64 {
        match &self.backend {
            Some(backend) => backend.position().as_secs_f64(),
            None => self.snapshot.borrow().position_secs,
        }
    }

    fn sample_position(&mut self) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let position = backend.position().as_secs_f64();
        self.publish(|s| s.position_secs = position);
    }
}
