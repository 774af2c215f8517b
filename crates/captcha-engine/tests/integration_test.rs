//! End-to-end behaviour of the locator engine.

use async_trait::async_trait;
use captcha_core::{ChallengeType, EngineConfig, SiteKey};
use captcha_dom::Page;
use captcha_engine::{
    BoxError, CaptureRequest, CapturedImage, EngineError, FixedRecognizer, ImageSource,
    LocatorEngine, NoopCallbacks, PageContext, Recognition, Recognizer, ResolutionFailure,
    StaticImageSource, VisitState,
};
use captcha_store::{
    Locator, LocatorOrigin, LocatorStore, MemoryStore, PersistenceStore, SqliteStore, StoreError,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const LOGIN: &str = r#"<html><body>
    <img id="logo" src="/logo.png" width="200" height="60" alt="Example shop">
    <form action="/login">
        <input name="user" type="text">
        <input name="pass" type="password">
        <input name="vcode" type="text" placeholder="Verification code">
        <img id="captcha123" src="/captcha.jpg" alt="verify code" width="120" height="40">
        <a href="javascript:void(0)" class="refresh-link">Change one</a>
        <button type="submit">Sign in</button>
    </form>
</body></html>"#;

fn site() -> SiteKey {
    SiteKey::new("shop.example.com").expect("valid site key")
}

fn captcha_image() -> CapturedImage {
    CapturedImage {
        bytes: b"captcha-bitmap".to_vec(),
        width: 120.0,
        height: 40.0,
    }
}

fn images() -> Arc<StaticImageSource> {
    Arc::new(StaticImageSource::new().with_image("/captcha.jpg", captcha_image()))
}

fn engine_with(store: Arc<dyn PersistenceStore>, recognizer: Arc<dyn Recognizer>) -> LocatorEngine {
    LocatorEngine::builder(EngineConfig::default())
        .store(store)
        .recognizer(recognizer)
        .image_source(images())
        .build()
        .expect("engine builds")
}

fn engine() -> (Arc<MemoryStore>, LocatorEngine) {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(store.clone(), Arc::new(FixedRecognizer::new("7XK2", 0.9)));
    (store, engine)
}

/// Answers from a script, one entry per call.
struct ScriptedRecognizer {
    script: Mutex<VecDeque<Result<Recognition, String>>>,
}

impl ScriptedRecognizer {
    fn new(script: Vec<Result<Recognition, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, _image: &[u8]) -> Result<Recognition, BoxError> {
        let next = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()));
        next.map_err(Into::into)
    }
}

/// Never answers.
struct StalledRecognizer;

#[async_trait]
impl Recognizer for StalledRecognizer {
    async fn recognize(&self, _image: &[u8]) -> Result<Recognition, BoxError> {
        std::future::pending().await
    }
}

/// Serves images after a delay, counting calls.
struct SlowImageSource {
    delay: Duration,
    calls: Mutex<usize>,
}

#[async_trait]
impl ImageSource for SlowImageSource {
    async fn capture(&self, _request: &CaptureRequest) -> Result<CapturedImage, BoxError> {
        *self.calls.lock().expect("calls lock") += 1;
        tokio::time::sleep(self.delay).await;
        Ok(captcha_image())
    }
}

/// Rejects every call.
struct DownStore;

#[async_trait]
impl PersistenceStore for DownStore {
    async fn get(&self, _key: &str) -> captcha_store::Result<Option<String>> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn put(&self, _key: &str, _value: String) -> captcha_store::Result<()> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn remove(&self, _key: &str) -> captcha_store::Result<()> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn keys(&self, _prefix: &str) -> captcha_store::Result<Vec<String>> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// Never answers.
struct HangingStore;

#[async_trait]
impl PersistenceStore for HangingStore {
    async fn get(&self, _key: &str) -> captcha_store::Result<Option<String>> {
        std::future::pending().await
    }

    async fn put(&self, _key: &str, _value: String) -> captcha_store::Result<()> {
        std::future::pending().await
    }

    async fn remove(&self, _key: &str) -> captcha_store::Result<()> {
        std::future::pending().await
    }

    async fn keys(&self, _prefix: &str) -> captcha_store::Result<Vec<String>> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_character_challenge_detected_and_persisted() {
    let (store, engine) = engine();
    let ctx = PageContext::new(Page::parse(LOGIN));

    let locator = engine
        .find_or_create_locator(&site(), &ctx)
        .await
        .expect("find")
        .expect("challenge found");

    assert_eq!(locator.challenge_type, ChallengeType::Character);
    assert_eq!(locator.selector, "#captcha123");
    assert_eq!(locator.origin, LocatorOrigin::Auto);
    assert!(locator.score.expect("scan score") >= engine.config().detection.character_threshold);

    let related: Vec<_> = locator
        .related_elements
        .iter()
        .map(|r| r.selector.as_str())
        .collect();
    assert_eq!(
        related,
        vec![r#"input[name="vcode"]"#, "a.refresh-link", r#"button[type="submit"]"#]
    );

    let stored = LocatorStore::new(store, Duration::from_secs(1))
        .get(&site())
        .await
        .expect("get")
        .expect("persisted");
    assert_eq!(stored.id, locator.id);
}

#[tokio::test]
async fn test_hash_like_id_not_used_as_selector() {
    let (_, engine) = engine();
    let page = Page::parse(
        r#"<html><body><form>
            <input name="vcode" type="text">
            <img id="js-a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4" alt="verify code" width="120" height="40">
        </form></body></html>"#,
    );
    let ctx = PageContext::new(page);

    let locator = engine
        .find_or_create_locator(&site(), &ctx)
        .await
        .expect("find")
        .expect("challenge found");

    assert!(!locator.selector.starts_with('#'));
    assert_eq!(locator.selector, r#"img[alt="verify code"]"#);
    let el = ctx.page().resolve_unique(&locator.selector).expect("unique");
    assert_eq!(el.value().name(), "img");
}

#[tokio::test]
async fn test_unreliable_locator_is_superseded() {
    let (store, engine) = engine();
    let locators = LocatorStore::new(store, Duration::from_secs(1));

    let mut old = Locator::new(site(), ChallengeType::Character, "#captcha123", LocatorOrigin::Auto);
    for _ in 0..6 {
        old.record_failure("recognition failed", 10);
    }
    for _ in 0..4 {
        old.record_success("AB12");
    }
    assert_eq!((old.try_count, old.error_count), (10, 6));
    locators.save(&old).await.expect("save old");

    let ctx = PageContext::new(Page::parse(LOGIN));
    let report = engine.visit(&site(), &ctx).await;

    assert_eq!(
        report.states,
        vec![
            VisitState::Idle,
            VisitState::LookupExisting,
            VisitState::Scanning,
            VisitState::Resolved,
        ]
    );
    let fresh = report.locator.expect("new locator");
    assert_ne!(fresh.id, old.id);
    assert_eq!(fresh.supersedes.as_ref(), Some(&old.id));
    assert_eq!((fresh.try_count, fresh.success_count), (1, 1));

    let stored = locators.get(&site()).await.expect("get").expect("stored");
    assert_eq!(stored.id, fresh.id);
}

#[tokio::test]
async fn test_reliable_locator_is_reused() {
    let (store, engine) = engine();
    let locators = LocatorStore::new(store, Duration::from_secs(1));
    let mut existing =
        Locator::new(site(), ChallengeType::Character, "#captcha123", LocatorOrigin::Manual);
    existing.record_success("AB12");
    locators.save(&existing).await.expect("save");

    let ctx = PageContext::new(Page::parse(LOGIN));
    let report = engine.visit(&site(), &ctx).await;

    assert_eq!(report.states[2], VisitState::UseExisting);
    assert!(report.is_resolved());
    assert_eq!(ctx.scans_started(), 0);
    let locator = report.locator.expect("locator");
    assert_eq!(locator.id, existing.id);
    assert_eq!(locator.try_count, 2);
}

#[tokio::test]
async fn test_stale_selector_forces_rescan() {
    let (store, engine) = engine();
    let locators = LocatorStore::new(store, Duration::from_secs(1));
    let old = Locator::new(site(), ChallengeType::Character, "#old-captcha", LocatorOrigin::Auto);
    locators.save(&old).await.expect("save");

    let ctx = PageContext::new(Page::parse(LOGIN));
    let locator = engine
        .find_or_create_locator(&site(), &ctx)
        .await
        .expect("find")
        .expect("rescanned");

    assert_eq!(locator.selector, "#captcha123");
    assert_eq!(locator.supersedes.as_ref(), Some(&old.id));
    assert_eq!(ctx.scans_started(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_one_scan() {
    let images = Arc::new(SlowImageSource {
        delay: Duration::from_millis(200),
        calls: Mutex::new(0),
    });
    let engine = LocatorEngine::builder(EngineConfig::default())
        .image_source(images.clone())
        .build()
        .expect("engine");
    // No declared size: the scan has to probe the image, which takes a while.
    let page = Page::parse(
        r#"<html><body><form>
            <input name="vcode" type="text">
            <img id="captcha" src="/captcha.jpg" alt="verify code">
        </form></body></html>"#,
    );
    let ctx = PageContext::new(page);
    let site = site();

    let (first, second) = futures::join!(
        engine.find_or_create_locator(&site, &ctx),
        engine.find_or_create_locator(&site, &ctx),
    );
    let first = first.expect("first").expect("found");
    let second = second.expect("second").expect("found");

    assert_eq!(first.id, second.id);
    assert_eq!(first.selector, "#captcha");
    assert_eq!(ctx.scans_started(), 1);
    assert_eq!(*images.calls.lock().expect("calls lock"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scans_for_different_sites_are_not_shared() {
    let images = Arc::new(SlowImageSource {
        delay: Duration::from_millis(200),
        calls: Mutex::new(0),
    });
    let engine = LocatorEngine::builder(EngineConfig::default())
        .image_source(images.clone())
        .build()
        .expect("engine");
    let ctx = PageContext::new(Page::parse(
        r#"<html><body><form>
            <input name="vcode" type="text">
            <img id="captcha" src="/captcha.jpg" alt="verify code">
        </form></body></html>"#,
    ));
    let shop = site();
    let mirror = SiteKey::new("mirror.example.com").expect("valid site key");

    let (first, second) = futures::join!(
        engine.find_or_create_locator(&shop, &ctx),
        engine.find_or_create_locator(&mirror, &ctx),
    );
    let first = first.expect("first").expect("found");
    let second = second.expect("second").expect("found");

    assert_eq!(first.site_key, shop);
    assert_eq!(second.site_key, mirror);
    assert_ne!(first.id, second.id);
    assert_eq!(ctx.scans_started(), 2);
    assert_eq!(*images.calls.lock().expect("calls lock"), 2);
    assert!(engine.locators().get(&mirror).await.expect("get").is_some());
}

#[tokio::test]
async fn test_manual_selection_keeps_outer_node() {
    let (_, engine) = engine();
    let page = Page::parse(
        r#"<html><body>
            <div class="challenge-box"><img src="/puzzle.png" width="300" height="150"></div>
            <p>Drag the piece into place</p>
        </body></html>"#,
    );
    let ctx = PageContext::new(page);
    let outer = ctx
        .page()
        .resolve_unique("div.challenge-box")
        .expect("div")
        .id();

    let mut selection =
        engine.begin_manual_selection(&ctx, site(), ChallengeType::Slide, Box::new(NoopCallbacks));
    selection.hover(outer).expect("hover");
    selection.select().expect("select");
    let locator = engine
        .confirm_manual_selection(&mut selection)
        .await
        .expect("confirm");

    let el = ctx.page().resolve_unique(&locator.selector).expect("unique");
    assert_eq!(el.id(), outer);
    assert_eq!(el.value().name(), "div");
    assert_eq!(locator.origin, LocatorOrigin::Manual);
    assert_eq!(locator.challenge_type, ChallengeType::Slide);
    assert!(locator.score.is_none());

    let stored = engine.locators().get(&site()).await.expect("get").expect("stored");
    assert_eq!(stored.id, locator.id);
    assert!(matches!(
        selection.select(),
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_counters_track_every_attempt() {
    let store = Arc::new(MemoryStore::new());
    let recognizer = ScriptedRecognizer::new(vec![
        Err("model crashed".to_string()),
        Ok(Recognition::new("7XK2", 0.1)),
        Ok(Recognition::new("7XK2", 0.95)),
    ]);
    let engine = engine_with(store, Arc::new(recognizer));
    let ctx = PageContext::new(Page::parse(LOGIN));
    let mut locator = engine
        .find_or_create_locator(&site(), &ctx)
        .await
        .expect("find")
        .expect("found");

    let failed = engine.resolve(&mut locator, &ctx).await;
    assert!(matches!(failed, Err(ResolutionFailure::RecognitionFailed(_))));

    let low = engine.resolve(&mut locator, &ctx).await;
    assert!(matches!(low, Err(ResolutionFailure::LowConfidence { .. })));

    let ok = engine.resolve(&mut locator, &ctx).await.expect("recognised");
    assert!(!ok.cached);

    // Same image again: served from the cache without calling the recognizer
    let cached = engine.resolve(&mut locator, &ctx).await.expect("cached");
    assert!(cached.cached);
    assert_eq!(cached.text, "7XK2");

    assert_eq!(locator.try_count, 4);
    assert_eq!(locator.success_count, 2);
    assert_eq!(locator.error_count, 2);
    assert_eq!(locator.recent_errors.len(), 2);
    assert_eq!(locator.last_result.as_deref(), Some("7XK2"));

    let stored = engine.locators().get(&site()).await.expect("get").expect("stored");
    assert_eq!(stored.try_count, 4);
    assert!(stored.success_count + stored.error_count <= stored.try_count);
}

#[tokio::test(start_paused = true)]
async fn test_recognizer_timeout_is_a_failure() {
    let engine = engine_with(Arc::new(MemoryStore::new()), Arc::new(StalledRecognizer));
    let ctx = PageContext::new(Page::parse(LOGIN));
    let mut locator = engine
        .find_or_create_locator(&site(), &ctx)
        .await
        .expect("find")
        .expect("found");

    let result = engine.resolve(&mut locator, &ctx).await;
    assert_eq!(
        result,
        Err(ResolutionFailure::RecognitionTimeout(
            engine.config().resolution.recognizer_timeout()
        ))
    );
    assert_eq!((locator.try_count, locator.error_count), (1, 1));
}

#[tokio::test]
async fn test_ambiguous_selector_fails_resolution() {
    let (_, engine) = engine();
    let ctx = PageContext::new(Page::parse(LOGIN));
    let mut locator = Locator::new(site(), ChallengeType::Character, "img", LocatorOrigin::Manual);

    let result = engine.resolve(&mut locator, &ctx).await;
    assert_eq!(
        result,
        Err(ResolutionFailure::SelectorAmbiguous {
            selector: "img".to_string(),
            matches: 2,
        })
    );
    assert_eq!(locator.error_count, 1);
}

#[tokio::test]
async fn test_no_challenge_persists_nothing() {
    let (store, engine) = engine();
    let ctx = PageContext::new(Page::parse(
        r#"<html><body><img src="/logo.png" width="200" height="60" alt="Example shop"><p>Welcome</p></body></html>"#,
    ));

    let report = engine.visit(&site(), &ctx).await;
    assert_eq!(report.final_state(), VisitState::Failed);
    assert!(report.locator.is_none());
    assert!(report.resolution.is_none());
    assert!(store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_scan_persists_nothing() {
    let store = Arc::new(MemoryStore::new());
    let engine = LocatorEngine::builder(EngineConfig::default())
        .store(store.clone())
        .image_source(Arc::new(SlowImageSource {
            delay: Duration::from_secs(1),
            calls: Mutex::new(0),
        }))
        .build()
        .expect("engine");
    let ctx = PageContext::new(Page::parse(
        r#"<html><body><form>
            <input name="vcode" type="text">
            <img id="captcha" src="/captcha.jpg" alt="verify code">
        </form></body></html>"#,
    ));

    let site_key = site();
    let (result, ()) = futures::join!(engine.find_or_create_locator(&site_key, &ctx), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.cancel();
    });

    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_store_outage_does_not_block_resolution() {
    let engine = engine_with(Arc::new(DownStore), Arc::new(FixedRecognizer::new("7XK2", 0.9)));
    let ctx = PageContext::new(Page::parse(LOGIN));

    let report = engine.visit(&site(), &ctx).await;

    assert!(report.is_resolved());
    let locator = report.locator.expect("locator in memory");
    assert_eq!(locator.selector, "#captcha123");
    assert_eq!(locator.success_count, 1);
    assert!(matches!(
        engine.popular_locators(5).await,
        Err(EngineError::Store(StoreError::Unavailable(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_store_times_out() {
    let engine = engine_with(Arc::new(HangingStore), Arc::new(FixedRecognizer::new("7XK2", 0.9)));
    let ctx = PageContext::new(Page::parse(LOGIN));

    let report = engine.visit(&site(), &ctx).await;
    assert!(report.is_resolved());
    assert_eq!(report.states[2], VisitState::Scanning);
}

#[tokio::test]
async fn test_locators_survive_restart_on_sqlite() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("locators.db");

    let first_id = {
        let store = Arc::new(SqliteStore::open(&path).await.expect("open"));
        let engine = engine_with(store, Arc::new(FixedRecognizer::new("7XK2", 0.9)));
        let ctx = PageContext::new(Page::parse(LOGIN));
        let report = engine.visit(&site(), &ctx).await;
        assert!(report.is_resolved());
        report.locator.expect("locator").id
    };

    let store = Arc::new(SqliteStore::open(&path).await.expect("reopen"));
    let engine = engine_with(store, Arc::new(FixedRecognizer::new("7XK2", 0.9)));
    let ctx = PageContext::new(Page::parse(LOGIN));
    let report = engine.visit(&site(), &ctx).await;

    assert_eq!(report.states[2], VisitState::UseExisting);
    let locator = report.locator.expect("locator");
    assert_eq!(locator.id, first_id);
    assert_eq!(locator.try_count, 2);
    let resolution = report.resolution.expect("attempted").expect("resolved");
    assert!(resolution.cached);

    assert!(engine.forget_locator(&site()).await.expect("forget"));
    assert!(engine.popular_locators(10).await.expect("popular").is_empty());
}
