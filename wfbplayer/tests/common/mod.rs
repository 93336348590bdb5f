//! Backends et fetcher scriptés pour piloter le contrôleur et le miroir
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use wfbcache::{AssetFetcher, CacheError, FetchResponse};
use wfbplayer::{BackendError, BackendEvent, BackendFactory, BackendOptions, EventSink, MediaBackend};

// ============= Backends =============

/// Vue du test sur un backend créé par [`ScriptedFactory`]
#[derive(Debug)]
pub struct BackendProbe {
    pub path: PathBuf,
    pub muted: bool,
    events: EventSink,
    position_ms: AtomicU64,
    playing: AtomicBool,
    disposed: AtomicBool,
    volumes: Mutex<Vec<f32>>,
    gain_db: Mutex<f32>,
    seeks: Mutex<Vec<Duration>>,
}

impl BackendProbe {
    pub fn ready(&self, duration_secs: Option<f64>) {
        self.events.emit(BackendEvent::Ready {
            duration: duration_secs.map(Duration::from_secs_f64),
        });
    }

    pub fn end(&self) {
        self.events.emit(BackendEvent::EndOfMedia);
    }

    pub fn error(&self, message: &str) {
        self.events
            .emit(BackendEvent::Error(BackendError::from_message(message)));
    }

    pub fn set_position(&self, secs: f64) {
        self.position_ms
            .store((secs * 1000.0) as u64, Ordering::SeqCst);
    }

    pub fn position_secs(&self) -> f64 {
        self.position_ms.load(Ordering::SeqCst) as f64 / 1000.0
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn volumes(&self) -> Vec<f32> {
        self.volumes.lock().unwrap().clone()
    }

    pub fn gain_db(&self) -> f32 {
        *self.gain_db.lock().unwrap()
    }

    pub fn seeks(&self) -> Vec<Duration> {
        self.seeks.lock().unwrap().clone()
    }
}

struct ProbeBackend {
    probe: Arc<BackendProbe>,
    live: Arc<AtomicUsize>,
}

impl ProbeBackend {
    fn release(&self) {
        if !self.probe.disposed.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl MediaBackend for ProbeBackend {
    fn play(&mut self) {
        self.probe.playing.store(true, Ordering::SeqCst);
    }

    fn pause(&mut self) {
        self.probe.playing.store(false, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.probe.playing.store(false, Ordering::SeqCst);
    }

    fn seek(&mut self, position: Duration) {
        self.probe.seeks.lock().unwrap().push(position);
        self.probe
            .position_ms
            .store(position.as_millis() as u64, Ordering::SeqCst);
    }

    fn position(&self) -> Duration {
        Duration::from_millis(self.probe.position_ms.load(Ordering::SeqCst))
    }

    fn set_volume(&mut self, volume: f32) {
        self.probe.volumes.lock().unwrap().push(volume);
    }

    fn set_makeup_gain_db(&mut self, gain_db: f32) {
        *self.probe.gain_db.lock().unwrap() = gain_db;
    }

    fn dispose(&mut self) {
        self.release();
    }
}

impl Drop for ProbeBackend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fabrique qui compte les backends vivants et garde une sonde par création
#[derive(Default)]
pub struct ScriptedFactory {
    live: Arc<AtomicUsize>,
    max_live: AtomicUsize,
    created: Mutex<Vec<Arc<BackendProbe>>>,
    failures: Mutex<VecDeque<BackendError>>,
    /// Si défini, chaque backend émet `Ready` avec cette durée dès sa création
    auto_ready: Mutex<Option<Option<f64>>>,
}

impl ScriptedFactory {
    pub fn auto_ready(duration_secs: Option<f64>) -> Self {
        let factory = Self::default();
        *factory.auto_ready.lock().unwrap() = Some(duration_secs);
        factory
    }

    /// La prochaine création échoue avec ce message
    pub fn fail_next(&self, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .push_back(BackendError::from_message(message));
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<Arc<BackendProbe>> {
        self.created.lock().unwrap().clone()
    }

    pub fn probe(&self, index: usize) -> Arc<BackendProbe> {
        self.created.lock().unwrap()[index].clone()
    }

    pub fn last(&self) -> Arc<BackendProbe> {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no backend created")
    }
}

impl BackendFactory for ScriptedFactory {
    fn create(
        &self,
        path: &Path,
        events: EventSink,
        options: BackendOptions,
    ) -> Result<Box<dyn MediaBackend>, BackendError> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        let probe = Arc::new(BackendProbe {
            path: path.to_path_buf(),
            muted: options.muted,
            events,
            position_ms: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            volumes: Mutex::new(Vec::new()),
            gain_db: Mutex::new(0.0),
            seeks: Mutex::new(Vec::new()),
        });
        self.created.lock().unwrap().push(probe.clone());

        if let Some(duration) = *self.auto_ready.lock().unwrap() {
            probe.ready(duration);
        }

        Ok(Box::new(ProbeBackend {
            probe,
            live: self.live.clone(),
        }))
    }
}

// ============= Fetcher =============

/// Côté test d'un corps de téléchargement ; le fermer termine le flux
pub struct BodyFeed {
    tx: mpsc::UnboundedSender<wfbcache::Result<Bytes>>,
}

impl BodyFeed {
    pub fn send_zeros(&self, len: usize) {
        let _ = self.tx.send(Ok(Bytes::from(vec![0u8; len])));
    }

    pub fn fail(self, message: &str) {
        let _ = self.tx.send(Err(CacheError::Download(message.to_string())));
    }

    pub fn finish(self) {}
}

/// Un corps scripté par URL, consommé dans l'ordre des ouvertures
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    opens: AtomicUsize,
    bodies: Mutex<HashMap<String, VecDeque<mpsc::UnboundedReceiver<wfbcache::Result<Bytes>>>>>,
}

impl ScriptedFetcher {
    pub fn script(&self, url: &str) -> BodyFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.bodies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(rx);
        BodyFeed { tx }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetFetcher for ScriptedFetcher {
    async fn open(
        &self,
        url: &str,
        _headers: &BTreeMap<String, String>,
        _offset: u64,
    ) -> wfbcache::Result<FetchResponse> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .bodies
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
            .ok_or_else(|| CacheError::Download(format!("no scripted body for {url}")))?;

        let body = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        Ok(FetchResponse {
            resumed: false,
            content_length: None,
            body,
        })
    }
}

// ============= Attentes =============

pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
