//! Fetcher scripté : chaque ouverture consomme un corps alimenté par le test

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use wfbcache::{AssetFetcher, CacheError, FetchResponse, Result};

#[derive(Debug)]
struct ScriptedBody {
    rx: mpsc::UnboundedReceiver<Result<Bytes>>,
    resumed: bool,
    content_length: Option<u64>,
}

/// Côté test d'un corps scripté ; le fermer termine le flux
pub struct BodyFeed {
    tx: mpsc::UnboundedSender<Result<Bytes>>,
}

impl BodyFeed {
    pub fn send(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.tx.send(Ok(Bytes::from(bytes.into())));
    }

    pub fn send_zeros(&self, len: usize) {
        self.send(vec![0u8; len]);
    }

    pub fn fail(self, message: &str) {
        let _ = self.tx.send(Err(CacheError::Download(message.to_string())));
    }

    pub fn finish(self) {}
}

#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    opens: AtomicUsize,
    offsets: Mutex<Vec<u64>>,
    urls: Mutex<Vec<String>>,
    bodies: Mutex<VecDeque<ScriptedBody>>,
}

impl ScriptedFetcher {
    pub fn script(&self) -> BodyFeed {
        self.script_with(false, None)
    }

    pub fn script_with(&self, resumed: bool, content_length: Option<u64>) -> BodyFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.bodies.lock().unwrap().push_back(ScriptedBody {
            rx,
            resumed,
            content_length,
        });
        BodyFeed { tx }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.offsets.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetFetcher for ScriptedFetcher {
    async fn open(
        &self,
        url: &str,
        _headers: &BTreeMap<String, String>,
        offset: u64,
    ) -> Result<FetchResponse> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.offsets.lock().unwrap().push(offset);
        self.urls.lock().unwrap().push(url.to_string());
        let body = self
            .bodies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CacheError::Download(format!("no scripted body for {url}")))?;

        let stream = futures::stream::unfold(body.rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        Ok(FetchResponse {
            resumed: body.resumed,
            content_length: body.content_length,
            body: stream,
        })
    }
}
