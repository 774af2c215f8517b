//! The locator engine: lookup, scanning, resolution and visit orchestration.
//!
//! A visit walks `Idle -> LookupExisting -> {UseExisting | Scanning} ->
//! {Resolved | Failed}`. Stored locators are reused while their selector
//! still resolves to one node and their error ratio stays acceptable;
//! otherwise the page is scanned and the winner supersedes the old record.
//!
//! Persistence is best-effort throughout: store failures are logged and the
//! in-memory result is still returned.

use crate::capture::{CaptureRequest, CapturedImage, ImageSource};
use crate::context::PageContext;
use crate::error::{ResolutionFailure, Result};
use crate::recognizer::{Recognition, Recognizer};
use captcha_core::{EngineConfig, SiteKey};
use captcha_detect::{MatchResult, MatcherRegistry, RelatedFinder, RuleMatcher, RuleSetLoader, ScanPlanner};
use captcha_dom::{DomError, ElementRef, FeatureExtractor, Page, SelectorGenerator, Size, VolatilityPredicate};
use captcha_store::{
    cache_key, Locator, LocatorOrigin, LocatorStore, MemoryStore, PersistenceStore, ResolutionCache,
};
use futures::FutureExt;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of scanning a page.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// A candidate was accepted and turned into a locator
    Accepted(Locator),
    /// Every pass was exhausted; nothing was persisted
    NotFound,
    /// The page context was cancelled; nothing was persisted
    Cancelled,
}

/// States a visit passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    /// Before any work
    Idle,
    /// Looking up the stored locator
    LookupExisting,
    /// Reusing the stored locator
    UseExisting,
    /// Scanning the page for a challenge
    Scanning,
    /// Recognition succeeded
    Resolved,
    /// No challenge found or resolution failed
    Failed,
}

impl fmt::Display for VisitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::LookupExisting => "lookup_existing",
            Self::UseExisting => "use_existing",
            Self::Scanning => "scanning",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Recognised answer
    pub text: String,
    /// Recognizer confidence
    pub confidence: f64,
    /// Whether the answer came from the resolution cache
    pub cached: bool,
}

/// What happened during [`LocatorEngine::visit`].
#[derive(Debug, Clone, PartialEq)]
pub struct VisitReport {
    /// States in the order they were entered
    pub states: Vec<VisitState>,
    /// The locator used or created, with updated counters
    pub locator: Option<Locator>,
    /// Outcome of the resolution attempt, if one was made
    pub resolution: Option<std::result::Result<Resolution, ResolutionFailure>>,
}

impl VisitReport {
    fn new() -> Self {
        Self {
            states: vec![VisitState::Idle],
            locator: None,
            resolution: None,
        }
    }

    fn enter(&mut self, state: VisitState) {
        debug!(from = ?self.final_state(), to = %state, "visit transition");
        self.states.push(state);
    }

    /// Last state entered.
    #[must_use]
    pub fn final_state(&self) -> VisitState {
        self.states.last().copied().unwrap_or(VisitState::Idle)
    }

    /// Whether the visit ended in [`VisitState::Resolved`].
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.final_state() == VisitState::Resolved
    }
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    registry: MatcherRegistry,
    planner: ScanPlanner,
    pub(crate) generator: SelectorGenerator,
    pub(crate) related: RelatedFinder,
    locators: LocatorStore,
    cache: ResolutionCache,
    recognizer: Option<Arc<dyn Recognizer>>,
    images: Option<Arc<dyn ImageSource>>,
}

/// Finds, stores and resolves challenge locators.
///
/// Cheap to clone; clones share configuration, matchers and stores.
#[derive(Clone)]
pub struct LocatorEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl fmt::Debug for LocatorEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocatorEngine")
            .field("challenge_types", &self.inner.registry.challenge_types())
            .field("has_recognizer", &self.inner.recognizer.is_some())
            .field("has_image_source", &self.inner.images.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`LocatorEngine`].
pub struct LocatorEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn PersistenceStore>>,
    recognizer: Option<Arc<dyn Recognizer>>,
    images: Option<Arc<dyn ImageSource>>,
    registry: Option<MatcherRegistry>,
    volatility: Option<Arc<dyn VolatilityPredicate>>,
}

impl LocatorEngineBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            recognizer: None,
            images: None,
            registry: None,
            volatility: None,
        }
    }

    /// Persistence backend. Defaults to an in-memory store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Recognizer used by [`LocatorEngine::resolve`].
    #[must_use]
    pub fn recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Image source for size probes and captures.
    #[must_use]
    pub fn image_source(mut self, images: Arc<dyn ImageSource>) -> Self {
        self.images = Some(images);
        self
    }

    /// Replace the default matcher registry.
    #[must_use]
    pub fn registry(mut self, registry: MatcherRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the configured volatility rules.
    #[must_use]
    pub fn volatility(mut self, volatility: Arc<dyn VolatilityPredicate>) -> Self {
        self.volatility = Some(volatility);
        self
    }

    /// Validate the configuration and assemble the engine.
    ///
    /// Rule sets found in `detection.rule_set_dir` replace the matchers of
    /// their challenge type.
    pub fn build(self) -> Result<LocatorEngine> {
        let config = self.config;
        config.validate()?;

        let extractor = FeatureExtractor::new(config.features.clone());
        let mut registry = match self.registry {
            Some(registry) => registry,
            None => MatcherRegistry::with_defaults(extractor.clone(), &config.detection)?,
        };

        if let Some(dir) = &config.detection.rule_set_dir {
            let loader = RuleSetLoader::new(dir)?;
            for rule_set in loader.load_all()? {
                if !config.detection.enabled.contains(&rule_set.challenge_type) {
                    debug!(challenge_type = %rule_set.challenge_type, "skipping rule set for disabled type");
                    continue;
                }
                info!(
                    challenge_type = %rule_set.challenge_type,
                    rules = rule_set.rules.len(),
                    "using rule set from file"
                );
                registry.upsert(Arc::new(RuleMatcher::new(rule_set)?));
            }
        }

        let generator = match self.volatility {
            Some(volatility) => SelectorGenerator::with_predicate(config.selector.clone(), volatility),
            None => SelectorGenerator::new(config.selector.clone())?,
        };
        let related = RelatedFinder::new(config.related.clone(), &config.scan, extractor);
        let planner = ScanPlanner::new(config.scan.clone(), &config.features);

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn PersistenceStore>);
        let store_timeout = config.resolution.store_timeout();
        let locators = LocatorStore::new(Arc::clone(&store), store_timeout);
        let cache = ResolutionCache::new(store, config.cache.ttl(), store_timeout);

        info!(
            challenge_types = ?registry.challenge_types(),
            "locator engine ready"
        );

        Ok(LocatorEngine {
            inner: Arc::new(EngineInner {
                config,
                registry,
                planner,
                generator,
                related,
                locators,
                cache,
                recognizer: self.recognizer,
                images: self.images,
            }),
        })
    }
}

impl LocatorEngine {
    /// Start building an engine.
    #[must_use]
    pub fn builder(config: EngineConfig) -> LocatorEngineBuilder {
        LocatorEngineBuilder::new(config)
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Registered matchers.
    #[must_use]
    pub fn registry(&self) -> &MatcherRegistry {
        &self.inner.registry
    }

    /// Locator persistence.
    #[must_use]
    pub fn locators(&self) -> &LocatorStore {
        &self.inner.locators
    }

    /// Recognition result cache.
    #[must_use]
    pub fn cache(&self) -> &ResolutionCache {
        &self.inner.cache
    }

    /// Sweep expired cache entries on the configured interval until `cancel`.
    #[must_use]
    pub fn spawn_cache_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.inner
            .cache
            .spawn_sweeper(self.inner.config.cache.sweep_interval(), cancel)
    }

    /// Delete a site's locator. Returns `true` if one existed.
    pub async fn forget_locator(&self, site_key: &SiteKey) -> Result<bool> {
        Ok(self.inner.locators.remove(site_key).await?)
    }

    /// The `limit` most-used locators.
    pub async fn popular_locators(&self, limit: usize) -> Result<Vec<Locator>> {
        Ok(self.inner.locators.popular(limit).await?)
    }

    /// Return the site's locator, scanning the page when there is none or
    /// the stored one can no longer be trusted.
    ///
    /// `Ok(None)` means the scan found no challenge. Concurrent calls on the
    /// same page context share one scan.
    pub async fn find_or_create_locator(
        &self,
        site_key: &SiteKey,
        ctx: &PageContext,
    ) -> Result<Option<Locator>> {
        if ctx.is_cancelled() {
            return Err(crate::EngineError::Cancelled);
        }

        let existing = self.inner.load_locator(site_key).await;
        if existing
            .as_ref()
            .is_some_and(|locator| self.inner.is_usable(locator, ctx))
        {
            return Ok(existing);
        }

        match self.scan(site_key, ctx, existing).await {
            ScanOutcome::Accepted(locator) => Ok(Some(locator)),
            ScanOutcome::NotFound => Ok(None),
            ScanOutcome::Cancelled => Err(crate::EngineError::Cancelled),
        }
    }

    /// Capture and recognise the locator's challenge, updating its counters.
    ///
    /// Every attempt except a cancelled one increments `try_count` and one
    /// of `success_count` or `error_count`, and the updated locator is saved.
    pub async fn resolve(
        &self,
        locator: &mut Locator,
        ctx: &PageContext,
    ) -> std::result::Result<Resolution, ResolutionFailure> {
        let outcome = self.inner.attempt(locator, ctx).await;
        if outcome
            .as_ref()
            .is_err_and(|failure| !failure.counts_as_attempt())
        {
            info!(site = %locator.site_key, "resolution cancelled");
            return outcome;
        }

        match &outcome {
            Ok(resolution) => {
                locator.record_success(&resolution.text);
                info!(
                    site = %locator.site_key,
                    locator_id = %locator.id,
                    cached = resolution.cached,
                    confidence = resolution.confidence,
                    "resolved challenge"
                );
            }
            Err(failure) => {
                locator.record_failure(failure.to_string(), self.inner.config.locator.max_recent_errors);
                warn!(
                    site = %locator.site_key,
                    locator_id = %locator.id,
                    error = %failure,
                    errors = locator.error_count,
                    tries = locator.try_count,
                    "resolution failed"
                );
            }
        }

        self.inner.save_best_effort(locator).await;
        outcome
    }

    /// Run a full visit: look up or scan for a locator, then resolve it.
    pub async fn visit(&self, site_key: &SiteKey, ctx: &PageContext) -> VisitReport {
        let mut report = VisitReport::new();
        report.enter(VisitState::LookupExisting);

        let existing = self.inner.load_locator(site_key).await;
        let mut locator = match existing {
            Some(locator) if self.inner.is_usable(&locator, ctx) => {
                report.enter(VisitState::UseExisting);
                locator
            }
            previous => {
                report.enter(VisitState::Scanning);
                match self.scan(site_key, ctx, previous).await {
                    ScanOutcome::Accepted(locator) => locator,
                    ScanOutcome::NotFound => {
                        report.enter(VisitState::Failed);
                        return report;
                    }
                    ScanOutcome::Cancelled => {
                        report.resolution = Some(Err(ResolutionFailure::Cancelled));
                        report.enter(VisitState::Failed);
                        return report;
                    }
                }
            }
        };

        let resolution = self.resolve(&mut locator, ctx).await;
        report.enter(if resolution.is_ok() {
            VisitState::Resolved
        } else {
            VisitState::Failed
        });
        report.locator = Some(locator);
        report.resolution = Some(resolution);
        report
    }

    /// Scan the page, joining the scan already running on `ctx` for the
    /// same site key.
    ///
    /// A joining caller receives the running scan's outcome, including the
    /// `previous` locator that scan was started with. A scan running for a
    /// different site key is awaited first, then a fresh scan starts, so a
    /// document never has two scans in flight.
    pub async fn scan(
        &self,
        site_key: &SiteKey,
        ctx: &PageContext,
        previous: Option<Locator>,
    ) -> ScanOutcome {
        while let Some((owner, in_flight)) = ctx.in_flight() {
            if owner == *site_key {
                info!(site = %site_key, "joining in-flight scan");
                let outcome = in_flight.clone().await;
                ctx.finish_in_flight(&in_flight);
                return outcome;
            }
            info!(site = %site_key, running = %owner, "waiting for scan of another site");
            in_flight.clone().await;
            ctx.finish_in_flight(&in_flight);
        }

        ctx.note_scan_started();
        let scan = run_scan(
            Arc::clone(&self.inner),
            ctx.page_handle(),
            ctx.cancellation_token(),
            site_key.clone(),
            previous,
        )
        .boxed_local()
        .shared();
        ctx.set_in_flight(site_key.clone(), scan.clone());

        let outcome = scan.clone().await;
        ctx.finish_in_flight(&scan);
        outcome
    }
}

async fn run_scan(
    inner: Arc<EngineInner>,
    page: Rc<Page>,
    cancel: CancellationToken,
    site_key: SiteKey,
    previous: Option<Locator>,
) -> ScanOutcome {
    info!(site = %site_key, replacing = ?previous.as_ref().map(|l| &l.id), "scanning page");
    let candidates = inner.planner.plan(&page);
    let total = candidates.len();

    for (index, candidate) in candidates.into_iter().enumerate() {
        if cancel.is_cancelled() {
            info!(site = %site_key, evaluated = index, "scan cancelled");
            return ScanOutcome::Cancelled;
        }
        let Some(el) = page.element(candidate.node) else {
            continue;
        };

        let natural = if inner.planner.needs_probe(&page, el) {
            inner.probe(&page, el, &cancel).await
        } else {
            None
        };

        let Some(result) = inner.registry.evaluate(&page, el, natural) else {
            continue;
        };
        info!(
            site = %site_key,
            pass = %candidate.pass,
            challenge_type = %result.challenge_type,
            score = result.score,
            evaluated = index + 1,
            "accepted scan candidate"
        );

        let Some(locator) = inner.build_locator(&page, el, &site_key, &result, previous.as_ref()) else {
            continue;
        };

        if cancel.is_cancelled() {
            info!(site = %site_key, "scan cancelled before persisting");
            return ScanOutcome::Cancelled;
        }
        inner.save_best_effort(&locator).await;
        return ScanOutcome::Accepted(locator);
    }

    if cancel.is_cancelled() {
        info!(site = %site_key, "scan cancelled");
        return ScanOutcome::Cancelled;
    }
    info!(site = %site_key, evaluated = total, "no scan candidate accepted");
    ScanOutcome::NotFound
}

impl EngineInner {
    pub(crate) async fn load_locator(&self, site_key: &SiteKey) -> Option<Locator> {
        match self.locators.get(site_key).await {
            Ok(locator) => locator,
            Err(e) => {
                warn!(site = %site_key, error = %e, "locator lookup failed, treating as absent");
                None
            }
        }
    }

    pub(crate) async fn save_best_effort(&self, locator: &Locator) -> bool {
        match self.locators.save(locator).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    site = %locator.site_key,
                    locator_id = %locator.id,
                    error = %e,
                    "failed to persist locator"
                );
                false
            }
        }
    }

    fn is_usable(&self, locator: &Locator, ctx: &PageContext) -> bool {
        if locator.is_unreliable(&self.config.locator) {
            info!(
                site = %locator.site_key,
                errors = locator.error_count,
                tries = locator.try_count,
                "stored locator is unreliable"
            );
            return false;
        }
        match ctx.page().count(&locator.selector) {
            Ok(1) => {
                debug!(site = %locator.site_key, selector = %locator.selector, "reusing stored locator");
                true
            }
            Ok(matches) => {
                info!(
                    site = %locator.site_key,
                    selector = %locator.selector,
                    matches,
                    "stored selector no longer unique"
                );
                false
            }
            Err(e) => {
                warn!(site = %locator.site_key, error = %e, "stored selector is invalid");
                false
            }
        }
    }

    fn build_locator(
        &self,
        page: &Page,
        el: ElementRef<'_>,
        site_key: &SiteKey,
        result: &MatchResult,
        previous: Option<&Locator>,
    ) -> Option<Locator> {
        let generated = match self.generator.generate(page, el) {
            Ok(generated) => generated,
            Err(e) => {
                warn!(site = %site_key, error = %e, "accepted candidate has no unique selector");
                return None;
            }
        };
        let related = self.related.describe(page, el, &self.generator);

        let mut locator = Locator::new(
            site_key.clone(),
            result.challenge_type,
            generated.selector,
            LocatorOrigin::Auto,
        )
        .with_related(related)
        .with_score(result.score);
        if let Some(previous) = previous {
            locator = locator.superseding(previous);
        }
        Some(locator)
    }

    /// Natural size of an image candidate, or `None` on failure or timeout.
    async fn probe(&self, page: &Page, el: ElementRef<'_>, cancel: &CancellationToken) -> Option<Size> {
        let images = self.images.as_ref()?;
        let selector = match self.generator.generate(page, el) {
            Ok(generated) => generated.selector,
            Err(e) => {
                debug!(error = %e, "skipping probe for element without unique selector");
                return None;
            }
        };
        let request = CaptureRequest {
            selector,
            src: el.value().attr("src").map(str::to_string),
        };
        let timeout = self.config.scan.image_load_timeout();

        tokio::select! {
            () = cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, images.capture(&request)) => match result {
                Ok(Ok(image)) => Some(image.size()),
                Ok(Err(e)) => {
                    debug!(selector = %request.selector, error = %e, "image probe failed");
                    None
                }
                Err(_) => {
                    debug!(selector = %request.selector, ?timeout, "image probe timed out");
                    None
                }
            }
        }
    }

    async fn attempt(
        &self,
        locator: &Locator,
        ctx: &PageContext,
    ) -> std::result::Result<Resolution, ResolutionFailure> {
        let cancel = ctx.cancellation_token();
        if cancel.is_cancelled() {
            return Err(ResolutionFailure::Cancelled);
        }

        let el = ctx.page().resolve_unique(&locator.selector).map_err(|e| match e {
            DomError::SelectorAmbiguous { selector, matches } => {
                ResolutionFailure::SelectorAmbiguous { selector, matches }
            }
            other => {
                debug!(error = %other, "stored selector could not be evaluated");
                ResolutionFailure::SelectorAmbiguous {
                    selector: locator.selector.clone(),
                    matches: 0,
                }
            }
        })?;
        let request = CaptureRequest {
            selector: locator.selector.clone(),
            src: el.value().attr("src").map(str::to_string),
        };

        let image = self.capture(&request, &cancel).await?;
        let key = cache_key(&locator.site_key, &locator.id, &image.bytes);
        if let Some(hit) = self.cached(&key).await {
            return Ok(hit);
        }

        let recognition = self.recognize(&image.bytes, &cancel).await?;
        if recognition.text.trim().is_empty() {
            return Err(ResolutionFailure::RecognitionFailed(
                "recognizer returned no text".to_string(),
            ));
        }
        let minimum = self.config.resolution.min_confidence;
        if recognition.confidence < minimum {
            return Err(ResolutionFailure::LowConfidence {
                confidence: recognition.confidence,
                minimum,
            });
        }

        self.cache_best_effort(&key, &recognition).await;
        Ok(Resolution {
            text: recognition.text,
            confidence: recognition.confidence,
            cached: false,
        })
    }

    async fn capture(
        &self,
        request: &CaptureRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<CapturedImage, ResolutionFailure> {
        let Some(images) = self.images.as_ref() else {
            return Err(ResolutionFailure::CaptureFailed(
                "no image source configured".to_string(),
            ));
        };
        let timeout = self.config.resolution.capture_timeout();

        tokio::select! {
            () = cancel.cancelled() => Err(ResolutionFailure::Cancelled),
            result = tokio::time::timeout(timeout, images.capture(request)) => match result {
                Ok(Ok(image)) => Ok(image),
                Ok(Err(e)) => Err(ResolutionFailure::CaptureFailed(e.to_string())),
                Err(_) => Err(ResolutionFailure::CaptureTimeout(timeout)),
            }
        }
    }

    async fn recognize(
        &self,
        image: &[u8],
        cancel: &CancellationToken,
    ) -> std::result::Result<Recognition, ResolutionFailure> {
        let Some(recognizer) = self.recognizer.as_ref() else {
            return Err(ResolutionFailure::RecognitionFailed(
                "no recognizer configured".to_string(),
            ));
        };
        let timeout = self.config.resolution.recognizer_timeout();

        tokio::select! {
            () = cancel.cancelled() => Err(ResolutionFailure::Cancelled),
            result = tokio::time::timeout(timeout, recognizer.recognize(image)) => match result {
                Ok(Ok(recognition)) => Ok(recognition),
                Ok(Err(e)) => Err(ResolutionFailure::RecognitionFailed(e.to_string())),
                Err(_) => Err(ResolutionFailure::RecognitionTimeout(timeout)),
            }
        }
    }

    async fn cached(&self, key: &str) -> Option<Resolution> {
        let raw = match self.cache.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "cache lookup failed, recognising instead");
                return None;
            }
        };
        match serde_json::from_str::<Recognition>(&raw) {
            Ok(recognition) => {
                debug!(key, "resolution cache hit");
                Some(Resolution {
                    text: recognition.text,
                    confidence: recognition.confidence,
                    cached: true,
                })
            }
            Err(e) => {
                warn!(key, error = %e, "ignoring unreadable cached result");
                None
            }
        }
    }

    async fn cache_best_effort(&self, key: &str, recognition: &Recognition) {
        let raw = match serde_json::to_string(recognition) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to encode recognition for cache");
                return;
            }
        };
        if let Err(e) = self.cache.put(key, &raw, self.cache.ttl()).await {
            warn!(key, error = %e, "failed to cache recognition");
        }
    }
}
