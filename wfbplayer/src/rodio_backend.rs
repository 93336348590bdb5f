//! Backend de lecture basé sur rodio
//!
//! Le flux de sortie rodio doit rester sur le thread qui l'a ouvert : chaque
//! backend possède donc un thread dédié, piloté par un canal de commandes. Le
//! thread publie la position dans un atomique et signale la fin du média par
//! l'[`EventSink`].

use crate::backend::{BackendEvent, BackendFactory, BackendOptions, EventSink, MediaBackend};
use crate::error::{BackendError, BackendErrorKind};
use crate::volume::db_to_linear;
use rodio::{Decoder, OutputStreamBuilder, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Cadence de la boucle du thread de sortie
const TICK: Duration = Duration::from_millis(100);

/// Fabrique de backends rodio sur la sortie audio par défaut
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioBackendFactory;

impl BackendFactory for RodioBackendFactory {
    fn create(
        &self,
        path: &Path,
        events: EventSink,
        options: BackendOptions,
    ) -> Result<Box<dyn MediaBackend>, BackendError> {
        let backend = RodioBackend::spawn(path.to_path_buf(), events, options)?;
        Ok(Box::new(backend))
    }
}

enum Control {
    Play,
    Pause,
    Stop,
    Seek(Duration),
    Volume(f32),
    Shutdown,
}

pub struct RodioBackend {
    controls: mpsc::Sender<Control>,
    position_ms: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
    native_volume: f32,
    gain_db: f32,
    muted: bool,
}

impl RodioBackend {
    fn spawn(path: PathBuf, events: EventSink, options: BackendOptions) -> Result<Self, BackendError> {
        let (controls, rx) = mpsc::channel();
        let position_ms = Arc::new(AtomicU64::new(0));
        let thread_position = position_ms.clone();

        let thread = thread::Builder::new()
            .name(format!("rodio-{}", events.generation()))
            .spawn(move || run_output(path, events, rx, thread_position))
            .map_err(|e| BackendError::new(BackendErrorKind::Other, format!("cannot spawn output thread: {e}")))?;

        Ok(Self {
            controls,
            position_ms,
            thread: Some(thread),
            native_volume: 1.0,
            gain_db: 0.0,
            muted: options.muted,
        })
    }

    fn send(&self, control: Control) {
        // Le thread a pu s'arrêter sur une erreur déjà signalée
        let _ = self.controls.send(control);
    }

    fn apply_volume(&self) {
        let level = if self.muted {
            0.0
        } else {
            self.native_volume * db_to_linear(self.gain_db)
        };
        self.send(Control::Volume(level));
    }
}

impl MediaBackend for RodioBackend {
    fn play(&mut self) {
        self.send(Control::Play);
    }

    fn pause(&mut self) {
        self.send(Control::Pause);
    }

    fn stop(&mut self) {
        self.send(Control::Stop);
    }

    fn seek(&mut self, position: Duration) {
        self.position_ms
            .store(position.as_millis() as u64, Ordering::Relaxed);
        self.send(Control::Seek(position));
    }

    fn position(&self) -> Duration {
        Duration::from_millis(self.position_ms.load(Ordering::Relaxed))
    }

    fn set_volume(&mut self, volume: f32) {
        self.native_volume = volume.clamp(0.0, 1.0);
        self.apply_volume();
    }

    fn set_makeup_gain_db(&mut self, gain_db: f32) {
        self.gain_db = gain_db.max(0.0);
        self.apply_volume();
    }

    fn dispose(&mut self) {
        self.send(Control::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Rodio output thread panicked");
            }
        }
    }
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn run_output(path: PathBuf, events: EventSink, controls: mpsc::Receiver<Control>, position_ms: Arc<AtomicU64>) {
    let builder = match OutputStreamBuilder::from_default_device() {
        Ok(builder) => builder,
        Err(e) => {
            events.emit(BackendEvent::Error(BackendError::new(
                BackendErrorKind::Unsupported,
                format!("no audio output device: {e}"),
            )));
            return;
        }
    };
    let mut stream = match builder.open_stream_or_fallback() {
        Ok(stream) => stream,
        Err(e) => {
            events.emit(BackendEvent::Error(BackendError::new(
                BackendErrorKind::Unsupported,
                format!("cannot open audio stream: {e}"),
            )));
            return;
        }
    };
    stream.log_on_drop(false);

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) => {
            events.emit(BackendEvent::Error(BackendError::new(
                BackendErrorKind::MediaInaccessible,
                format!("MEDIA_INACCESSIBLE {}: {e}", path.display()),
            )));
            return;
        }
    };
    let source = match Decoder::new(BufReader::new(file)) {
        Ok(source) => source,
        Err(e) => {
            events.emit(BackendEvent::Error(BackendError::new(
                BackendErrorKind::MediaInvalid,
                format!("ERROR_MEDIA_INVALID {}: {e}", path.display()),
            )));
            return;
        }
    };

    let duration = source.total_duration();
    let sink = Sink::connect_new(stream.mixer());
    sink.pause();
    sink.append(source);
    debug!(path = %path.display(), ?duration, "Rodio backend ready");
    events.emit(BackendEvent::Ready { duration });

    let mut playing = false;
    let mut ended = false;

    loop {
        match controls.recv_timeout(TICK) {
            Ok(Control::Play) => {
                sink.play();
                playing = true;
            }
            Ok(Control::Pause) => {
                sink.pause();
                playing = false;
            }
            Ok(Control::Stop) => {
                sink.stop();
                playing = false;
            }
            Ok(Control::Seek(position)) => match sink.try_seek(position) {
                Ok(()) => ended = false,
                Err(e) => warn!(error = %e, "Seek failed"),
            },
            Ok(Control::Volume(level)) => sink.set_volume(level),
            Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        position_ms.store(sink.get_pos().as_millis() as u64, Ordering::Relaxed);

        if playing && !ended && sink.empty() {
            ended = true;
            playing = false;
            events.emit(BackendEvent::EndOfMedia);
        }
    }

    sink.stop();
}
