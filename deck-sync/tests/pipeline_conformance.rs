use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use deck_blob::{
    ImageStore, MemoryImageStore, ResourceId, StorageKind, StoreError, StoreResult, UploadedObject,
};
use deck_sync::{
    completion_channel, CleanupSweeper, EmbeddedImage, FetchedContent, Image, ImageFetcher,
    ImageSync, MimeType, Page, PageElement, Preloader, Presentation, Slide, SlideAction,
    SyncConfig, SyncError, SyncResult, UploadDispatcher, UploadState, UploadedImage,
};

/// Counts how many callers are inside a section at once
#[derive(Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct GaugeGuard<'a>(&'a Gauge);

impl Gauge {
    fn enter(&self) -> GaugeGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serves canned content per source, with optional latency and failures
#[derive(Default)]
struct MapFetcher {
    sources: HashMap<String, Bytes>,
    latency: HashMap<String, Duration>,
    failing: HashSet<String>,
    calls: AtomicUsize,
    gauge: Gauge,
}

impl MapFetcher {
    fn new() -> Self {
        Self::default()
    }

    fn with_image(mut self, source: &str, bytes: Bytes) -> Self {
        self.sources.insert(source.to_string(), bytes);
        self
    }

    fn with_latency(mut self, source: &str, latency: Duration) -> Self {
        self.latency.insert(source.to_string(), latency);
        self
    }

    fn failing(mut self, source: &str) -> Self {
        self.failing.insert(source.to_string());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for MapFetcher {
    async fn fetch(&self, source: &str) -> SyncResult<FetchedContent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _active = self.gauge.enter();

        if let Some(latency) = self.latency.get(source) {
            tokio::time::sleep(*latency).await;
        }
        if self.failing.contains(source) {
            return Err(SyncError::fetch(source, "404 Not Found"));
        }
        self.sources
            .get(source)
            .cloned()
            .map(|bytes| FetchedContent {
                bytes,
                content_type: None,
            })
            .ok_or_else(|| SyncError::fetch(source, "unknown source"))
    }
}

/// Memory store that records every call and can be told to fail
#[derive(Default)]
struct RecordingStore {
    inner: MemoryImageStore,
    latency: Duration,
    upload_latency: HashMap<Bytes, Duration>,
    failing_upload: Option<Bytes>,
    failing_deletes: HashSet<String>,
    uploads: AtomicUsize,
    uploaded: Mutex<Vec<(String, Bytes)>>,
    deletes: Mutex<Vec<String>>,
    deletes_finished: AtomicUsize,
    upload_gauge: Gauge,
    delete_gauge: Gauge,
}

impl RecordingStore {
    fn new() -> Self {
        Self::default()
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Upload latency for one content, overriding `with_latency`
    fn with_upload_latency_of(mut self, content: Bytes, latency: Duration) -> Self {
        self.upload_latency.insert(content, latency);
        self
    }

    fn failing_upload_of(mut self, content: Bytes) -> Self {
        self.failing_upload = Some(content);
        self
    }

    fn failing_delete_of(mut self, resource_id: &str) -> Self {
        self.failing_deletes.insert(resource_id.to_string());
        self
    }

    fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn uploaded_names(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Stored content behind an uploaded URL
    fn content_at(&self, url: &str) -> Option<Bytes> {
        let name = url.strip_prefix("memory://")?;
        self.uploaded
            .lock()
            .unwrap()
            .iter()
            .find(|(stored, _)| stored == name)
            .map(|(_, data)| data.clone())
    }

    fn uploaded_contents(&self) -> Vec<Bytes> {
        self.uploaded.lock().unwrap().iter().map(|(_, data)| data.clone()).collect()
    }

    fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    fn deletes_finished(&self) -> usize {
        self.deletes_finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageStore for RecordingStore {
    async fn upload(&self, data: Bytes, mime_type: &str, name: &str) -> StoreResult<UploadedObject> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let _active = self.upload_gauge.enter();

        let latency = self.upload_latency.get(&data).copied().unwrap_or(self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing_upload.as_ref() == Some(&data) {
            return Err(StoreError::upload_failed("rejected by backend"));
        }
        self.uploaded
            .lock()
            .unwrap()
            .push((name.to_string(), data.clone()));
        self.inner.upload(data, mime_type, name).await
    }

    async fn delete(&self, resource_id: &ResourceId) -> StoreResult<()> {
        self.deletes.lock().unwrap().push(resource_id.to_string());
        let _active = self.delete_gauge.enter();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = if self.failing_deletes.contains(resource_id.as_str()) {
            Err(StoreError::backend(std::io::Error::other("delete refused")))
        } else {
            self.inner.delete(resource_id).await
        };
        self.deletes_finished.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Memory
    }
}

/// Content that sniffs as PNG; distinct tags never compare equivalent
fn png(tag: &str) -> Bytes {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend_from_slice(tag.as_bytes());
    Bytes::from(data)
}

/// A real, decodable square PNG of one colour
fn solid(size: u32, rgb: [u8; 3]) -> Bytes {
    let img = image::RgbImage::from_pixel(size, size, image::Rgb(rgb));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    Bytes::from(buf.into_inner())
}

fn raw(tag: &str) -> Image {
    Image::from_bytes(png(tag), MimeType::Png)
}

/// A presentation whose slides hold `(object id, content url)` image elements
fn deck(slides: &[&[(&str, &str)]]) -> Presentation {
    Presentation {
        id: "deck".to_string(),
        slides: slides
            .iter()
            .map(|elements| Page {
                object_id: String::new(),
                elements: elements
                    .iter()
                    .map(|(id, url)| PageElement {
                        object_id: id.to_string(),
                        description: None,
                        image: Some(EmbeddedImage {
                            content_url: Some(url.to_string()),
                            placeholder: false,
                            link: None,
                        }),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn event(id: &str) -> UploadedImage {
    UploadedImage {
        resource_id: ResourceId::from(id),
        image: raw(id),
    }
}

/// P1. Preloaded Images Land At Their Recorded Slots
#[tokio::test(start_paused = true)]
async fn test_preload_places_images_by_position() {
    let fetcher = MapFetcher::new()
        .with_image("https://lh3/a", png("a"))
        .with_latency("https://lh3/a", Duration::from_millis(30))
        .with_image("https://lh3/b", png("b"))
        .with_latency("https://lh3/b", Duration::from_millis(10))
        .with_image("https://lh3/c", png("c"))
        .with_latency("https://lh3/c", Duration::from_millis(20))
        .with_image("https://lh3/d", png("d"));
    let preloader = Preloader::new(Arc::new(fetcher), 4);

    let presentation = deck(&[
        &[("el-a", "https://lh3/a"), ("el-b", "https://lh3/b"), ("el-c", "https://lh3/c")],
        &[("el-d", "https://lh3/d")],
    ]);
    let actions = vec![
        SlideAction::update(0, Slide::new("body")),
        SlideAction::update(1, Slide::new("body")),
    ];

    // Completion order is b, c, a; slots must still read a, b, c
    let snapshot = preloader
        .preload(&presentation, &actions, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.image_count(), 4);
    let first = snapshot.get(0).unwrap();
    let ids: Vec<&str> = first.iter().map(|(_, id)| id).collect();
    assert_eq!(ids, vec!["el-a", "el-b", "el-c"]);
    assert_eq!(first.images()[0].bytes(), &png("a"));
    assert_eq!(first.images()[2].bytes(), &png("c"));

    // Sources the editing service fetches itself never need uploading
    assert!(matches!(first.images()[1].upload_state(), UploadState::NotNeeded));
    assert_eq!(snapshot.get(1).unwrap().object_id_for(&snapshot.get(1).unwrap().images()[0]), Some("el-d"));
}

/// P2. One Failed Fetch Fails The Whole Preload
#[tokio::test(start_paused = true)]
async fn test_preload_failure_returns_no_snapshot() {
    let fetcher = Arc::new(
        MapFetcher::new()
            .with_image("https://lh3/ok", png("ok"))
            .with_image("https://lh3/slow", png("slow"))
            .with_latency("https://lh3/slow", Duration::from_secs(10))
            .failing("https://lh3/bad")
            .with_latency("https://lh3/bad", Duration::from_millis(10)),
    );
    let preloader = Preloader::new(fetcher.clone(), 4);

    let presentation = deck(&[
        &[("ok", "https://lh3/ok"), ("slow", "https://lh3/slow")],
        &[("bad", "https://lh3/bad")],
    ]);
    let actions = vec![
        SlideAction::update(0, Slide::new("body")),
        SlideAction::update(1, Slide::new("body")),
    ];

    let started = tokio::time::Instant::now();
    let err = preloader
        .preload(&presentation, &actions, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Preload { failed: 1, .. }));
    assert!(err.to_string().contains("https://lh3/bad"));
    // The slow fetch was abandoned instead of awaited
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(fetcher.calls(), 3);
}

/// P3. Admission Stops After The First Failure
#[tokio::test(start_paused = true)]
async fn test_preload_failure_stops_pending_fetches() {
    let mut fetcher = MapFetcher::new()
        .failing("https://lh3/0")
        .with_latency("https://lh3/0", Duration::from_millis(5));
    let mut elements = Vec::new();
    for i in 1..10 {
        let url = format!("https://lh3/{}", i);
        fetcher = fetcher
            .with_image(&url, png(&i.to_string()))
            .with_latency(&url, Duration::from_millis(50));
    }
    for i in 0..10 {
        elements.push((format!("el-{}", i), format!("https://lh3/{}", i)));
    }
    let fetcher = Arc::new(fetcher);
    let preloader = Preloader::new(fetcher.clone(), 1);

    let borrowed: Vec<(&str, &str)> = elements.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    let presentation = deck(&[&borrowed[..]]);
    let actions = vec![SlideAction::update(0, Slide::new("body"))];

    let result = preloader
        .preload(&presentation, &actions, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(SyncError::Preload { .. })));
    assert_eq!(fetcher.calls(), 1);
}

/// P4. Nothing To Preload Spawns Nothing
#[tokio::test]
async fn test_preload_without_targets() {
    let fetcher = Arc::new(MapFetcher::new());
    let preloader = Preloader::new(fetcher.clone(), 4);

    let presentation = deck(&[&[("el", "https://lh3/x")]]);
    let actions = vec![
        SlideAction::append(1, Slide::new("body")),
        SlideAction::delete(0),
    ];

    let snapshot = preloader
        .preload(&presentation, &actions, &CancellationToken::new())
        .await
        .unwrap();

    assert!(snapshot.is_empty());
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(preloader.limiter().peak(), 0);
}

/// P5. External Cancellation Aborts Preload
#[tokio::test(start_paused = true)]
async fn test_preload_external_cancellation() {
    let fetcher = MapFetcher::new()
        .with_image("https://lh3/x", png("x"))
        .with_latency("https://lh3/x", Duration::from_secs(5));
    let preloader = Preloader::new(Arc::new(fetcher), 4);
    let presentation = deck(&[&[("el", "https://lh3/x")]]);
    let actions = vec![SlideAction::update(0, Slide::new("body"))];

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let result = preloader.preload(&presentation, &actions, &cancel).await;
    assert!(matches!(result, Err(SyncError::Cancelled)));
}

/// D1. Identical Content In Two Slides Is Uploaded Once
#[tokio::test]
async fn test_identical_content_uploaded_once() {
    let store = Arc::new(RecordingStore::new());
    let dispatcher = UploadDispatcher::new(store.clone(), 4);

    let left = raw("logo");
    let right = raw("logo");
    let actions = vec![
        SlideAction::append(0, Slide::new("body").with_image(left.clone())),
        SlideAction::append(1, Slide::new("body").with_image(right.clone())),
    ];

    let stream = dispatcher.start_upload(&actions, &Default::default(), &CancellationToken::new());
    let url = right.wait_uploaded_url().await.unwrap();
    let events: Vec<UploadedImage> = stream.collect().await;

    assert_eq!(store.uploads(), 1);
    assert_eq!(events.len(), 1);
    assert_eq!(left.uploaded_url(), Some(url.clone()));
    assert!(url.starts_with("memory://________tmp-for-deck-"));
    assert_eq!(events[0].resource_id.as_str(), store.uploaded_names()[0]);
}

/// D2. Nothing To Upload Yields A Closed Stream
#[tokio::test]
async fn test_empty_dispatch_is_closed() {
    let store = Arc::new(RecordingStore::new());
    let dispatcher = UploadDispatcher::new(store.clone(), 4);

    let remote = Image::load(
        &MapFetcher::new().with_image("https://cdn/x.png", png("x")),
        "https://cdn/x.png",
    )
    .await
    .unwrap();
    let actions = vec![
        SlideAction::update(0, Slide::new("body").with_image(remote)),
        SlideAction::delete(1),
    ];

    let mut stream = dispatcher.start_upload(&actions, &Default::default(), &CancellationToken::new());
    let drained = tokio::time::timeout(Duration::from_secs(1), stream.recv()).await;

    assert!(matches!(drained, Ok(None)));
    assert_eq!(store.uploads(), 0);
}

/// D3. A Failed Upload Stops Later Admissions
#[tokio::test]
async fn test_upload_failure_cancels_remaining() {
    let store = Arc::new(RecordingStore::new().failing_upload_of(png("u0")));
    let dispatcher = UploadDispatcher::new(store.clone(), 1);

    let images: Vec<Image> = (0..5).map(|i| raw(&format!("u{}", i))).collect();
    let slide = images
        .iter()
        .cloned()
        .fold(Slide::new("body"), Slide::with_image);
    let actions = vec![SlideAction::append(0, slide)];

    let stream = dispatcher.start_upload(&actions, &Default::default(), &CancellationToken::new());
    let events: Vec<UploadedImage> = stream.collect().await;

    assert!(events.is_empty());
    assert_eq!(store.uploads(), 1);
    assert!(images[0].upload_error().unwrap().contains("rejected by backend"));
    for image in &images[1..] {
        assert_eq!(image.upload_error().as_deref(), Some("Operation cancelled"));
        assert!(matches!(image.wait_uploaded_url().await, Err(SyncError::Upload { .. })));
    }
}

/// D4. Admitted Uploads Finish After A Sibling Fails
#[tokio::test(start_paused = true)]
async fn test_in_flight_uploads_finish() {
    // `bad` fails well before `good` finishes and frees its permit
    let store = Arc::new(
        RecordingStore::new()
            .with_latency(Duration::from_millis(20))
            .with_upload_latency_of(png("bad"), Duration::from_millis(5))
            .failing_upload_of(png("bad")),
    );
    let dispatcher = UploadDispatcher::new(store.clone(), 2);

    let bad = raw("bad");
    let good = raw("good");
    let late = raw("late");
    let actions = vec![SlideAction::append(
        0,
        Slide::new("body")
            .with_image(bad.clone())
            .with_image(good.clone())
            .with_image(late.clone()),
    )];

    let stream = dispatcher.start_upload(&actions, &Default::default(), &CancellationToken::new());
    let events: Vec<UploadedImage> = stream.collect().await;

    // `bad` and `good` were admitted together; `late` never was
    assert_eq!(events.len(), 1);
    assert!(good.uploaded_url().is_some());
    assert!(bad.upload_error().is_some());
    assert_eq!(late.upload_error().as_deref(), Some("Operation cancelled"));
    assert_eq!(store.uploads(), 2);
}

/// D5. Look-Alike Images Are Uploaded Separately
#[tokio::test]
async fn test_look_alike_images_uploaded_separately() {
    let store = Arc::new(RecordingStore::new());
    let dispatcher = UploadDispatcher::new(store.clone(), 4);

    let red = Image::from_bytes(solid(32, [255, 0, 0]), MimeType::Png);
    let blue = Image::from_bytes(solid(32, [0, 0, 255]), MimeType::Png);
    let large_red = Image::from_bytes(solid(64, [255, 0, 0]), MimeType::Png);
    let actions = vec![
        SlideAction::append(0, Slide::new("red").with_image(red.clone())),
        SlideAction::append(1, Slide::new("blue").with_image(blue.clone())),
        SlideAction::append(2, Slide::new("large").with_image(large_red.clone())),
    ];

    let stream = dispatcher.start_upload(&actions, &Default::default(), &CancellationToken::new());
    let events: Vec<UploadedImage> = stream.collect().await;

    assert_eq!(store.uploads(), 3);
    assert_eq!(events.len(), 3);

    let urls: HashSet<String> = [&red, &blue, &large_red]
        .iter()
        .map(|image| image.uploaded_url().unwrap())
        .collect();
    assert_eq!(urls.len(), 3);
    for image in [&red, &blue, &large_red] {
        let url = image.uploaded_url().unwrap();
        assert_eq!(store.content_at(&url).as_ref(), Some(image.bytes()));
    }
}

/// D6. A Recoloured Image On An Updated Slide Is Uploaded
#[tokio::test]
async fn test_recoloured_image_is_not_unchanged() {
    let fetcher = Arc::new(MapFetcher::new().with_image("https://lh3/red", solid(32, [255, 0, 0])));
    let store = Arc::new(RecordingStore::new());
    let sync = ImageSync::new(store.clone(), fetcher, SyncConfig::default()).unwrap();

    let presentation = deck(&[&[("red-el", "https://lh3/red")]]);
    let kept = Image::from_bytes(solid(32, [255, 0, 0]), MimeType::Png);
    let blue = Image::from_bytes(solid(32, [0, 0, 255]), MimeType::Png);
    let actions = vec![SlideAction::update(
        0,
        Slide::new("body").with_image(kept.clone()).with_image(blue.clone()),
    )];
    let cancel = CancellationToken::new();

    let snapshot = sync.preload(&presentation, &actions, &cancel).await.unwrap();
    let current = snapshot.get(0).unwrap();
    assert!(current.contains_equivalent(&kept));
    assert!(!current.contains_equivalent(&blue));

    let stream = sync.start_upload(&actions, &snapshot, &cancel);
    let url = blue.wait_uploaded_url().await.unwrap();
    sync.cleanup(stream, &cancel).await.unwrap();

    assert!(matches!(kept.upload_state(), UploadState::Needed));
    assert_eq!(store.uploads(), 1);
    assert_eq!(store.uploaded_contents(), vec![solid(32, [0, 0, 255])]);
    assert_eq!(store.deletes(), vec![url.trim_start_matches("memory://").to_string()]);
}

/// C1. Cleanup Continues Past A Failed Deletion
#[tokio::test]
async fn test_cleanup_continues_on_error() {
    let store = Arc::new(RecordingStore::new().failing_delete_of("b"));
    let sweeper = CleanupSweeper::new(store.clone(), 4);

    let (tx, stream) = completion_channel(3);
    for id in ["a", "b", "c"] {
        tx.send(event(id)).await.unwrap();
    }
    drop(tx);

    sweeper.cleanup(stream, &CancellationToken::new()).await.unwrap();

    let mut deleted = store.deletes();
    deleted.sort();
    assert_eq!(deleted, vec!["a", "b", "c"]);
    assert_eq!(store.deletes_finished(), 3);
}

/// C2. Cancelled Cleanup Waits For Started Deletions
#[tokio::test(start_paused = true)]
async fn test_cleanup_cancellation_waits_for_deletions() {
    let store = Arc::new(RecordingStore::new().with_latency(Duration::from_millis(50)));
    let sweeper = CleanupSweeper::new(store.clone(), 4);

    let (tx, stream) = completion_channel(4);
    tx.send(event("a")).await.unwrap();

    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let cancel = cancel.clone();
        async move { sweeper.cleanup(stream, &cancel).await }
    });

    while store.deletes().is_empty() {
        tokio::task::yield_now().await;
    }
    cancel.cancel();

    let result = running.await.unwrap();
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert_eq!(store.deletes_finished(), 1);
    assert!(tx.send(event("late")).await.is_err());
}

/// L1. No Stage Exceeds Its Admission Limit
#[tokio::test(start_paused = true)]
async fn test_stage_limits_hold_under_load() {
    let count = 24;
    let latency = Duration::from_millis(10);

    let mut fetcher = MapFetcher::new();
    let mut elements = Vec::new();
    for i in 0..count {
        let url = format!("https://lh3/{}", i);
        fetcher = fetcher
            .with_image(&url, png(&format!("current-{}", i)))
            .with_latency(&url, latency);
        elements.push((format!("el-{}", i), url));
    }
    let fetcher = Arc::new(fetcher);
    let store = Arc::new(RecordingStore::new().with_latency(latency));
    let sync = ImageSync::new(store.clone(), fetcher.clone(), SyncConfig::default()).unwrap();

    let borrowed: Vec<(&str, &str)> = elements.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    let presentation = deck(&[&borrowed[..]]);
    let slide = (0..count)
        .map(|i| raw(&format!("new-{}", i)))
        .fold(Slide::new("body"), Slide::with_image);
    let actions = vec![SlideAction::update(0, slide)];
    let cancel = CancellationToken::new();

    let snapshot = sync.preload(&presentation, &actions, &cancel).await.unwrap();
    assert_eq!(snapshot.image_count(), count);

    let stream = sync.start_upload(&actions, &snapshot, &cancel);
    sync.cleanup(stream, &cancel).await.unwrap();

    assert_eq!(store.uploads(), count);
    assert_eq!(store.deletes_finished(), count);

    for peak in [
        fetcher.gauge.peak(),
        store.upload_gauge.peak(),
        store.delete_gauge.peak(),
        sync.preloader().limiter().peak(),
        sync.dispatcher().limiter().peak(),
        sync.sweeper().limiter().peak(),
    ] {
        assert!(peak <= 4, "peak {} exceeds the limit", peak);
        assert!(peak >= 1);
    }
}

/// L2. Serial Configuration Uploads In Selection Order
#[tokio::test(start_paused = true)]
async fn test_serial_configuration() {
    let store = Arc::new(RecordingStore::new().with_latency(Duration::from_millis(5)));
    let sync = ImageSync::new(store.clone(), Arc::new(MapFetcher::new()), SyncConfig::serial()).unwrap();

    let tags = ["one", "two", "three", "four"];
    let slide = tags.iter().map(|t| raw(t)).fold(Slide::new("body"), Slide::with_image);
    let actions = vec![SlideAction::append(0, slide)];
    let cancel = CancellationToken::new();

    let stream = sync.start_upload(&actions, &Default::default(), &cancel);
    sync.cleanup(stream, &cancel).await.unwrap();

    let expected: Vec<Bytes> = tags.iter().map(|t| png(t)).collect();
    assert_eq!(store.uploaded_contents(), expected);
    assert_eq!(store.upload_gauge.peak(), 1);
    assert_eq!(store.delete_gauge.peak(), 1);
}

/// E1. Unchanged Images Stay, New Ones Are Uploaded And Cleaned Up
#[tokio::test]
async fn test_end_to_end_edit_cycle() {
    let fetcher = Arc::new(
        MapFetcher::new()
            .with_image("https://lh3/x", png("X"))
            .with_image("https://lh3/y", png("Y")),
    );
    let store = Arc::new(RecordingStore::new());
    let sync = ImageSync::new(store.clone(), fetcher, SyncConfig::default()).unwrap();

    let presentation = deck(&[&[("x-el", "https://lh3/x")], &[("y-el", "https://lh3/y")]]);
    let unchanged = raw("X");
    let fresh = raw("Z");
    let actions = vec![
        SlideAction::update(0, Slide::new("body").with_image(unchanged.clone())),
        SlideAction::update(1, Slide::new("body").with_image(fresh.clone())),
    ];
    let cancel = CancellationToken::new();

    let snapshot = sync.preload(&presentation, &actions, &cancel).await.unwrap();
    assert_eq!(snapshot.get(0).unwrap().images()[0].bytes(), &png("X"));
    assert_eq!(snapshot.get(1).unwrap().images()[0].bytes(), &png("Y"));
    let (_, kept) = snapshot.get(0).unwrap().find_equivalent(&unchanged).unwrap();
    assert_eq!(kept, "x-el");

    let stream = sync.start_upload(&actions, &snapshot, &cancel);
    let url = fresh.wait_uploaded_url().await.unwrap();
    assert!(url.starts_with("memory://"));
    assert!(matches!(unchanged.upload_state(), UploadState::Needed));

    sync.cleanup(stream, &cancel).await.unwrap();

    assert_eq!(store.uploads(), 1);
    assert_eq!(store.uploaded_contents(), vec![png("Z")]);
    assert_eq!(store.deletes(), store.uploaded_names());
    assert!(store.inner.is_empty());
}
