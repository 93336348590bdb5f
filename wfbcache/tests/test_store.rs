mod common;

use common::ScriptedFetcher;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wfbcache::{CacheError, CacheSettings, CacheStore, LocalAsset, VideoAvailability};
use wfbsource::{PlatformId, ResolvedStream, TrackRef};

const MIN_BYTES: u64 = 1024;

fn setup() -> (TempDir, Arc<ScriptedFetcher>, Arc<CacheStore>) {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    let store = Arc::new(CacheStore::new(
        CacheSettings::new(dir.path()).with_min_playable_bytes(MIN_BYTES),
        fetcher.clone(),
    ));
    (dir, fetcher, store)
}

fn spawn_ensure(
    store: &Arc<CacheStore>,
    track: &TrackRef,
    stream: &ResolvedStream,
) -> tokio::task::JoinHandle<wfbcache::Result<LocalAsset>> {
    let (store, track, stream) = (store.clone(), track.clone(), stream.clone());
    tokio::spawn(async move { store.ensure_local(&track, &stream).await })
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_concurrent_callers_share_one_download() {
    let (_dir, fetcher, store) = setup();
    let track = TrackRef::new(PlatformId::Netease, "186016");
    let stream = ResolvedStream::new("https://m7.music.126.net/186016.mp3");
    let feed = fetcher.script();

    let a = spawn_ensure(&store, &track, &stream);
    let b = spawn_ensure(&store, &track, &stream);
    feed.send_zeros(1536);

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_eq!(a, b);
    assert!(!a.complete);
    assert!(a.path.to_string_lossy().ends_with("186016.mp3.part"));
    assert_eq!(fetcher.opens(), 1);
    assert_eq!(store.downloads_in_flight(), 1);

    feed.finish();
    let final_path = tokio_test::assert_ok!(store.wait_complete(&track).await);
    assert_eq!(final_path, store.layout().audio_path(&track));
    assert_eq!(std::fs::metadata(&final_path).unwrap().len(), 1536);
    assert!(!a.path.exists());
    assert_eq!(store.downloads_in_flight(), 0);

    // Le fichier final court-circuite tout nouveau téléchargement
    let again = store.ensure_local(&track, &stream).await.unwrap();
    assert!(again.complete);
    assert_eq!(fetcher.opens(), 1);
}

#[tokio::test]
async fn test_partial_is_not_returned_below_threshold() {
    let (_dir, fetcher, store) = setup();
    let track = TrackRef::new(PlatformId::Kuwo, "228908");
    let stream = ResolvedStream::new("http://other.web.nf01.sycdn.kuwo.cn/228908.mp3");
    let feed = fetcher.script();

    let handle = spawn_ensure(&store, &track, &stream);
    feed.send_zeros(100);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    feed.send_zeros(1000);
    let asset = handle.await.unwrap().unwrap();
    assert!(!asset.complete);
    assert!(asset.path.exists());
    feed.finish();
}

#[tokio::test]
async fn test_segmented_stream_waits_for_completion() {
    let (_dir, fetcher, store) = setup();
    let track = TrackRef::new(PlatformId::Bilibili, "BV1xx411c7mD");
    let stream = ResolvedStream::new("https://upos.bilivideo.com/30280.m4s").segmented(true);
    let feed = fetcher.script();

    let handle = spawn_ensure(&store, &track, &stream);
    feed.send_zeros(4096);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    feed.finish();
    let asset = handle.await.unwrap().unwrap();
    assert!(asset.complete);
    assert_eq!(asset.path, store.layout().audio_path(&track));
    assert!(asset.path.to_string_lossy().ends_with(".m4a"));
}

#[tokio::test]
async fn test_failure_removes_partial_and_reaches_every_waiter() {
    let (_dir, fetcher, store) = setup();
    let track = TrackRef::new(PlatformId::QQ, "003abc");
    let stream = ResolvedStream::new("https://dl.stream.qqmusic.qq.com/M500003abc.mp3");
    let feed = fetcher.script();

    let a = spawn_ensure(&store, &track, &stream);
    let b = spawn_ensure(&store, &track, &stream);
    feed.send_zeros(10);
    feed.fail("connection reset");

    for handle in [a, b] {
        match handle.await.unwrap() {
            Err(CacheError::Download(message)) => assert_eq!(message, "connection reset"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    let target = store.layout().audio_path(&track);
    assert!(!target.exists());
    assert!(!wfbcache::layout::partial_path(&target).exists());
    assert_eq!(store.downloads_in_flight(), 0);
}

#[tokio::test]
async fn test_short_body_is_a_failure() {
    let (_dir, fetcher, store) = setup();
    let track = TrackRef::new(PlatformId::Migu, "1|2");
    let stream = ResolvedStream::new("https://freetyst.nf.migu.cn/a.mp3").segmented(true);
    let feed = fetcher.script_with(false, Some(100));
    feed.send_zeros(10);
    feed.finish();

    let err = store.ensure_local(&track, &stream).await.unwrap_err();
    assert!(err.to_string().contains("10 of 100"));
}

#[tokio::test]
async fn test_local_files_pass_through() {
    let (dir, fetcher, store) = setup();
    let file = dir.path().join("Jay Chou - Qing Tian.mp3");
    std::fs::write(&file, b"x").unwrap();
    let track = TrackRef::new(PlatformId::Local, file.to_string_lossy());

    let by_url = ResolvedStream::new(format!("file://{}", file.display()));
    let asset = store.ensure_local(&track, &by_url).await.unwrap();
    assert_eq!(asset, LocalAsset { path: file.clone(), complete: true });

    let by_path = ResolvedStream::new(file.to_string_lossy());
    assert_eq!(store.ensure_local(&track, &by_path).await.unwrap().path, file);
    assert_eq!(fetcher.opens(), 0);
}

#[tokio::test]
async fn test_existing_partial_is_resumed() {
    let (_dir, fetcher, store) = setup();
    let track = TrackRef::new(PlatformId::Kugou, "ABCDEF");
    let target = store.layout().audio_path(&track);
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(wfbcache::layout::partial_path(&target), b"hello ").unwrap();

    let feed = fetcher.script_with(true, Some(5));
    feed.send("world");
    feed.finish();

    let stream = ResolvedStream::new("https://fs.kugou.com/a.mp3").segmented(true);
    let asset = store.ensure_local(&track, &stream).await.unwrap();
    assert_eq!(std::fs::read(&asset.path).unwrap(), b"hello world");
    assert_eq!(fetcher.offsets(), vec![6]);
}

#[tokio::test]
async fn test_ignored_range_restarts_download() {
    let (_dir, fetcher, store) = setup();
    let track = TrackRef::new(PlatformId::Kugou, "FEDCBA");
    let target = store.layout().audio_path(&track);
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(wfbcache::layout::partial_path(&target), b"stale bytes").unwrap();

    let feed = fetcher.script_with(false, None);
    feed.send("fresh");
    feed.finish();

    let stream = ResolvedStream::new("https://fs.kugou.com/b.mp3").segmented(true);
    let asset = store.ensure_local(&track, &stream).await.unwrap();
    assert_eq!(std::fs::read(&asset.path).unwrap(), b"fresh");
}

#[tokio::test]
async fn test_video_availability_follows_the_download() {
    let (_dir, fetcher, store) = setup();
    let track = TrackRef::new(PlatformId::Bilibili, "BV1video");
    assert_eq!(store.video_availability(&track), VideoAvailability::Absent);

    let feed = fetcher.script();
    store.start_secondary(&track, "https://upos.bilivideo.com/v.mp4", &Default::default());
    assert_eq!(store.video_availability(&track), VideoAvailability::Pending);

    feed.send_zeros(2048);
    eventually(|| matches!(store.video_availability(&track), VideoAvailability::Ready { complete: false, .. })).await;
    if let VideoAvailability::Ready { path, .. } = store.video_availability(&track) {
        assert!(path.to_string_lossy().ends_with("BV1video.mp4.part"));
    }
    assert_eq!(fetcher.urls(), vec!["https://upos.bilivideo.com/v.mp4".to_string()]);

    feed.finish();
    let final_path = store.layout().video_path(&track);
    eventually(|| {
        store.video_availability(&track)
            == VideoAvailability::Ready {
                path: final_path.clone(),
                complete: true,
            }
    })
    .await;
    assert!(Path::new(&final_path).is_file());

    // Un deuxième démarrage ne relance rien
    store.start_secondary(&track, "https://upos.bilivideo.com/v.mp4", &Default::default());
    assert_eq!(fetcher.opens(), 1);
}

#[tokio::test]
async fn test_failed_video_is_absent() {
    let (_dir, fetcher, store) = setup();
    let track = TrackRef::new(PlatformId::Bilibili, "BVbroken");
    let feed = fetcher.script();
    store.start_secondary(&track, "https://upos.bilivideo.com/broken.mp4", &Default::default());
    feed.fail("403");

    eventually(|| store.video_availability(&track) == VideoAvailability::Absent).await;
    assert_eq!(store.downloads_in_flight(), 0);
}

#[tokio::test]
async fn test_cancel_all_releases_waiters() {
    let (_dir, fetcher, store) = setup();
    let track = TrackRef::new(PlatformId::Netease, "1");
    let _feed = fetcher.script();
    let handle = spawn_ensure(&store, &track, &ResolvedStream::new("https://m7.music.126.net/1.mp3"));

    eventually(|| store.downloads_in_flight() == 1).await;
    store.cancel_all();

    assert!(matches!(handle.await.unwrap(), Err(CacheError::Cancelled)));
    assert_eq!(store.downloads_in_flight(), 0);
}
