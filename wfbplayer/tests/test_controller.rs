mod common;

use common::{eventually, ScriptedFactory, ScriptedFetcher};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wfbcache::{CacheSettings, CacheStore};
use wfbplayer::volume::fade_steps;
use wfbplayer::{PlaybackController, PlaybackState, PlayerError, PlayerSettings, PlayerSnapshot};
use wfbsource::{PlatformId, ResolvedStream, TrackRef};

struct Harness {
    dir: TempDir,
    fetcher: Arc<ScriptedFetcher>,
    factory: Arc<ScriptedFactory>,
    store: Arc<CacheStore>,
    player: PlaybackController,
}

fn settings() -> PlayerSettings {
    PlayerSettings {
        retry_delays: vec![Duration::from_millis(20), Duration::from_millis(40)],
        fade_out: Duration::from_millis(50),
        fade_steps: 5,
        position_interval: Duration::from_millis(20),
        default_volume: 80,
    }
}

fn harness(factory: ScriptedFactory) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    let factory = Arc::new(factory);
    let store = Arc::new(CacheStore::new(
        CacheSettings::new(dir.path().join("cache")).with_min_playable_bytes(1024),
        fetcher.clone(),
    ));
    let player = PlaybackController::new(factory.clone(), store.clone(), settings());
    Harness {
        dir,
        fetcher,
        factory,
        store,
        player,
    }
}

impl Harness {
    fn local(&self, name: &str) -> (TrackRef, PathBuf) {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"ID3").unwrap();
        (
            TrackRef::new(PlatformId::Local, path.to_string_lossy()),
            path,
        )
    }

    async fn wait_for(&self, check: impl FnMut(&PlayerSnapshot) -> bool) -> PlayerSnapshot {
        let mut rx = self.player.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(check))
            .await
            .expect("timed out waiting for player state")
            .expect("player actor gone")
            .clone();
        snapshot
    }

    async fn wait_state(&self, state: PlaybackState) -> PlayerSnapshot {
        self.wait_for(|s| s.state == state).await
    }
}

#[tokio::test]
async fn test_load_play_pause_stop() {
    let h = harness(ScriptedFactory::auto_ready(Some(200.0)));
    let (track, path) = h.local("a.mp3");
    assert_eq!(h.player.state(), PlaybackState::Idle);

    h.player.load_local(track.clone(), &path).await.unwrap();
    let ready = h.wait_state(PlaybackState::Ready).await;
    assert_eq!(ready.duration_secs, Some(200.0));
    assert_eq!(ready.track, Some(track));
    assert_eq!(ready.retry_count, 0);

    let probe = h.factory.last();
    assert_eq!(probe.path, path);
    assert!(!probe.muted);
    assert_eq!(probe.volumes(), vec![0.8]);

    h.player.play().await.unwrap();
    assert_eq!(h.player.state(), PlaybackState::Playing);
    assert!(probe.is_playing());

    probe.set_position(12.5);
    h.wait_for(|s| s.position_secs == 12.5).await;

    h.player.pause().await.unwrap();
    assert_eq!(h.player.state(), PlaybackState::Paused);
    assert!(!probe.is_playing());

    h.player.stop(false).await.unwrap();
    let idle = h.player.snapshot();
    assert_eq!(idle.state, PlaybackState::Idle);
    assert_eq!(idle.track, None);
    assert_eq!(idle.position_secs, 0.0);
    assert!(probe.is_disposed());
    assert_eq!(h.factory.live(), 0);
}

#[tokio::test]
async fn test_play_before_ready_starts_on_ready() {
    let h = harness(ScriptedFactory::default());
    let (track, path) = h.local("a.mp3");

    h.player.load_local(track, &path).await.unwrap();
    h.player.play().await.unwrap();
    eventually(|| h.factory.created().len() == 1).await;

    let probe = h.factory.last();
    assert!(!probe.is_playing());
    probe.ready(Some(90.0));

    h.wait_state(PlaybackState::Playing).await;
    assert!(probe.is_playing());
}

#[tokio::test]
async fn test_pause_while_loading_cancels_play_intent() {
    let h = harness(ScriptedFactory::default());
    let (track, path) = h.local("a.mp3");

    h.player.load_local(track, &path).await.unwrap();
    h.player.play().await.unwrap();
    h.player.pause().await.unwrap();
    eventually(|| h.factory.created().len() == 1).await;
    h.factory.last().ready(Some(90.0));

    h.wait_state(PlaybackState::Ready).await;
    assert!(!h.factory.last().is_playing());
}

#[tokio::test]
async fn test_only_one_backend_alive_across_loads() {
    let h = harness(ScriptedFactory::auto_ready(Some(60.0)));
    let (a, path_a) = h.local("a.mp3");
    let (b, path_b) = h.local("b.mp3");
    let (c, path_c) = h.local("c.mp3");

    h.player.load_local(a, &path_a).await.unwrap();
    h.player.load_local(b, &path_b).await.unwrap();
    h.wait_state(PlaybackState::Ready).await;
    h.player.play().await.unwrap();
    h.player.load_local(c.clone(), &path_c).await.unwrap();

    let ready = h.wait_state(PlaybackState::Ready).await;
    assert_eq!(ready.track, Some(c));
    assert_eq!(h.factory.max_live(), 1);
    assert_eq!(h.factory.live(), 1);

    let created = h.factory.created();
    let (last, previous) = created.split_last().unwrap();
    assert_eq!(last.path, path_c);
    assert!(previous.iter().all(|p| p.is_disposed() && !p.is_playing()));
}

#[tokio::test]
async fn test_seek_is_clamped_to_duration() {
    let h = harness(ScriptedFactory::auto_ready(Some(200.0)));
    let (track, path) = h.local("a.mp3");
    h.player.load_local(track, &path).await.unwrap();
    h.wait_state(PlaybackState::Ready).await;

    h.player.seek(1000.0).await.unwrap();
    assert_eq!(h.player.position(), 200.0);
    h.player.seek(-5.0).await.unwrap();
    assert_eq!(h.player.position(), 0.0);
    h.player.seek(42.0).await.unwrap();
    assert_eq!(h.player.position(), 42.0);

    assert_eq!(
        h.factory.last().seeks(),
        vec![
            Duration::from_secs(200),
            Duration::ZERO,
            Duration::from_secs(42)
        ]
    );
}

#[tokio::test]
async fn test_out_of_range_seek_with_unknown_duration_is_ignored() {
    let h = harness(ScriptedFactory::auto_ready(None));
    let (track, path) = h.local("a.mp3");
    h.player.load_local(track, &path).await.unwrap();
    let ready = h.wait_state(PlaybackState::Ready).await;
    assert_eq!(ready.duration_secs, None);

    h.player.seek(42.0).await.unwrap();
    tokio_test::assert_ok!(h.player.seek(1e20).await);
    tokio_test::assert_ok!(h.player.seek(f64::INFINITY).await);
    tokio_test::assert_ok!(h.player.seek(f64::NAN).await);
    assert_eq!(h.player.position(), 42.0);

    // L'acteur reste vivant et pilote toujours le même backend
    h.player.play().await.unwrap();
    assert_eq!(h.player.state(), PlaybackState::Playing);
    let probe = h.factory.last();
    assert!(probe.is_playing());
    assert_eq!(probe.seeks(), vec![Duration::from_secs(42)]);
    assert_eq!(h.factory.created().len(), 1);
}

#[tokio::test]
async fn test_non_finite_seek_while_loading_is_ignored() {
    let h = harness(ScriptedFactory::default());
    let (track, path) = h.local("a.mp3");
    h.player.load_local(track, &path).await.unwrap();

    h.player.seek(f64::INFINITY).await.unwrap();
    eventually(|| h.factory.created().len() == 1).await;
    let probe = h.factory.last();
    probe.ready(None);

    let ready = h.wait_state(PlaybackState::Ready).await;
    assert_eq!(ready.position_secs, 0.0);
    assert!(probe.seeks().is_empty());
}

#[tokio::test]
async fn test_seek_without_backend_only_moves_position() {
    let h = harness(ScriptedFactory::default());

    h.player.seek(30.0).await.unwrap();

    assert_eq!(h.player.position(), 30.0);
    assert_eq!(h.player.state(), PlaybackState::Idle);
    assert!(h.factory.created().is_empty());
}

#[tokio::test]
async fn test_transient_error_recovers_at_same_position() {
    let h = harness(ScriptedFactory::auto_ready(Some(300.0)));
    let (track, path) = h.local("a.mp3");
    h.player.load_local(track, &path).await.unwrap();
    h.wait_state(PlaybackState::Ready).await;
    h.player.play().await.unwrap();

    let first = h.factory.last();
    first.set_position(42.0);
    h.wait_for(|s| s.position_secs == 42.0).await;
    first.error("MEDIA_INACCESSIBLE: file is locked");

    let retrying = h
        .wait_for(|s| s.state == PlaybackState::Loading && s.retry_count == 1)
        .await;
    assert_eq!(retrying.last_error.as_deref(), Some("MEDIA_INACCESSIBLE: file is locked"));

    let playing = h.wait_state(PlaybackState::Playing).await;
    assert_eq!(playing.retry_count, 1);
    assert!(first.is_disposed());

    let second = h.factory.last();
    assert_eq!(h.factory.created().len(), 2);
    assert_eq!(second.seeks(), vec![Duration::from_secs(42)]);
    assert!(second.is_playing());
    assert_eq!(h.factory.max_live(), 1);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let h = harness(ScriptedFactory::auto_ready(Some(300.0)));
    for _ in 0..3 {
        h.factory.fail_next("ERROR_MEDIA_INVALID");
    }
    let (track, path) = h.local("a.mp3");

    h.player.load_local(track, &path).await.unwrap();

    let failed = h.wait_state(PlaybackState::Error).await;
    assert_eq!(failed.retry_count, 2);
    assert_eq!(failed.last_error.as_deref(), Some("ERROR_MEDIA_INVALID"));
    assert!(h.factory.created().is_empty());
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
    let h = harness(ScriptedFactory::auto_ready(Some(300.0)));
    let (track, path) = h.local("a.mp3");
    h.player.load_local(track, &path).await.unwrap();
    h.wait_state(PlaybackState::Ready).await;

    h.factory.last().error("unsupported codec");

    let failed = h.wait_state(PlaybackState::Error).await;
    assert_eq!(failed.retry_count, 0);
    assert_eq!(failed.last_error.as_deref(), Some("unsupported codec"));
    assert_eq!(h.factory.created().len(), 1);
    assert_eq!(h.factory.live(), 0);
}

#[tokio::test]
async fn test_events_from_replaced_backend_are_ignored() {
    let h = harness(ScriptedFactory::default());
    let (a, path_a) = h.local("a.mp3");
    let (b, path_b) = h.local("b.mp3");

    h.player.load_local(a, &path_a).await.unwrap();
    eventually(|| h.factory.created().len() == 1).await;
    let stale = h.factory.probe(0);

    h.player.load_local(b.clone(), &path_b).await.unwrap();
    eventually(|| h.factory.created().len() == 2).await;

    stale.error("HALT");
    stale.end();
    stale.ready(Some(1.0));
    h.factory.probe(1).ready(Some(240.0));

    let ready = h.wait_state(PlaybackState::Ready).await;
    assert_eq!(ready.track, Some(b));
    assert_eq!(ready.duration_secs, Some(240.0));
    assert_eq!(ready.retry_count, 0);
    assert_eq!(ready.last_error, None);
}

#[tokio::test]
async fn test_stop_fades_out_before_teardown() {
    let h = harness(ScriptedFactory::auto_ready(Some(300.0)));
    let (track, path) = h.local("a.mp3");
    h.player.load_local(track, &path).await.unwrap();
    h.wait_state(PlaybackState::Ready).await;
    h.player.play().await.unwrap();

    h.player.stop(true).await.unwrap();

    let probe = h.factory.last();
    let mut expected = vec![0.8];
    expected.extend(fade_steps(0.8, 5));
    assert_eq!(probe.volumes(), expected);
    assert!(probe.is_disposed());
    assert_eq!(h.player.state(), PlaybackState::Idle);
}

#[tokio::test]
async fn test_volume_above_100_uses_makeup_gain() {
    let h = harness(ScriptedFactory::auto_ready(Some(300.0)));
    h.player.set_volume(50).await.unwrap();
    let (track, path) = h.local("a.mp3");
    h.player.load_local(track, &path).await.unwrap();
    h.wait_state(PlaybackState::Ready).await;
    let probe = h.factory.last();
    assert_eq!(probe.volumes(), vec![0.5]);

    h.player.set_volume(150).await.unwrap();
    assert_eq!(h.player.snapshot().volume, 150);
    assert_eq!(probe.volumes().last(), Some(&1.0));
    assert!((probe.gain_db() - 3.5218).abs() < 1e-3);

    h.player.set_volume(500).await.unwrap();
    assert_eq!(h.player.snapshot().volume, 150);

    h.player.set_volume(-20).await.unwrap();
    assert_eq!(h.player.snapshot().volume, 0);
    assert_eq!(probe.volumes().last(), Some(&0.0));
    assert_eq!(probe.gain_db(), 0.0);
}

#[tokio::test]
async fn test_end_of_track_notifies_and_replays_from_start() {
    let h = harness(ScriptedFactory::auto_ready(Some(180.0)));
    let finished = Arc::new(Mutex::new(Vec::new()));
    let sink = finished.clone();
    h.player
        .on_finished(move |track| sink.lock().unwrap().push(track))
        .await
        .unwrap();

    let (track, path) = h.local("a.mp3");
    h.player.load_local(track.clone(), &path).await.unwrap();
    h.wait_state(PlaybackState::Ready).await;
    h.player.play().await.unwrap();

    let probe = h.factory.last();
    probe.end();
    let ended = h.wait_state(PlaybackState::Ended).await;
    assert_eq!(ended.position_secs, 180.0);
    assert_eq!(*finished.lock().unwrap(), vec![track]);

    h.player.play().await.unwrap();
    let replay = h.wait_state(PlaybackState::Playing).await;
    assert_eq!(replay.position_secs, 0.0);
    assert_eq!(replay.duration_secs, Some(180.0));

    // Le backend épuisé est remplacé par un neuf sur le même fichier
    assert_eq!(h.factory.created().len(), 2);
    assert!(probe.is_disposed());
    assert_eq!(h.factory.max_live(), 1);
    let fresh = h.factory.last();
    assert_eq!(fresh.path, path);
    assert!(fresh.is_playing());
    assert!(fresh.seeks().is_empty());
    assert_eq!(fresh.volumes(), vec![0.8]);
}

#[tokio::test]
async fn test_plays_partial_then_resumes_on_final_file() {
    let h = harness(ScriptedFactory::auto_ready(None));
    let track = TrackRef::new(PlatformId::Netease, "186016");
    let url = "https://m7.music.126.net/186016.mp3";
    let stream = ResolvedStream::new(url);
    let feed = h.fetcher.script(url);

    h.player.load_remote(track.clone(), stream.clone()).await.unwrap();
    h.player.play().await.unwrap();
    feed.send_zeros(2048);

    let playing = h.wait_state(PlaybackState::Playing).await;
    assert_eq!(playing.resolved, Some(stream));
    let partial = h.factory.last();
    assert!(partial.path.to_string_lossy().ends_with("186016.mp3.part"));

    partial.set_position(30.0);
    h.wait_for(|s| s.position_secs == 30.0).await;
    partial.end();
    h.wait_state(PlaybackState::Loading).await;
    assert!(partial.is_disposed());

    feed.send_zeros(4096);
    feed.finish();

    h.wait_for(|s| s.state == PlaybackState::Playing && h.factory.created().len() == 2)
        .await;
    let complete = h.factory.last();
    assert_eq!(complete.path, h.store.layout().audio_path(&track));
    assert_eq!(complete.seeks(), vec![Duration::from_secs(30)]);
    assert!(complete.is_playing());
    assert_eq!(h.fetcher.opens(), 1);
    assert_eq!(h.factory.max_live(), 1);
}

#[tokio::test]
async fn test_download_failure_surfaces_as_error() {
    let h = harness(ScriptedFactory::auto_ready(None));
    let track = TrackRef::new(PlatformId::Kuwo, "228908");
    let url = "https://other.web.nf01.sycdn.kuwo.cn/a.mp3";
    let feed = h.fetcher.script(url);

    h.player
        .load_remote(track, ResolvedStream::new(url))
        .await
        .unwrap();
    feed.fail("connection reset");

    let failed = h.wait_state(PlaybackState::Error).await;
    assert!(failed.last_error.unwrap().contains("connection reset"));
    assert!(h.factory.created().is_empty());
}

#[tokio::test]
async fn test_dispose_stops_the_actor() {
    let h = harness(ScriptedFactory::auto_ready(Some(60.0)));
    let (track, path) = h.local("a.mp3");
    h.player.load_local(track, &path).await.unwrap();
    h.wait_state(PlaybackState::Ready).await;

    tokio_test::assert_ok!(h.player.dispose().await);
    assert!(h.factory.last().is_disposed());

    let err = h.player.play().await.unwrap_err();
    assert!(matches!(err, PlayerError::ActorGone));
}
