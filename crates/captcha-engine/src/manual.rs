//! Manual challenge selection.
//!
//! The user points at the challenge directly, bypassing scoring:
//! `Inactive -> Hovering -> Selected -> {Confirmed | Cancelled}`. A cancelled
//! session (explicit, timed out, or navigated away) returns to `Inactive`
//! without persisting anything. Confirming stores the exact node the user
//! picked with `origin = manual`.

use crate::context::PageContext;
use crate::engine::LocatorEngine;
use crate::error::{EngineError, Result};
use captcha_core::{ChallengeType, SiteKey};
use captcha_dom::NodeId;
use captcha_store::{Locator, LocatorOrigin};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Manual selection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualState {
    /// No session running
    Inactive,
    /// Following the pointer
    Hovering,
    /// A node is picked, awaiting confirmation
    Selected,
    /// The pick was persisted
    Confirmed,
    /// The session was abandoned
    Cancelled,
}

impl fmt::Display for ManualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inactive => "inactive",
            Self::Hovering => "hovering",
            Self::Selected => "selected",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Why a session was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The user backed out
    User,
    /// No activity before the deadline
    Timeout,
    /// The page context was cancelled
    Navigation,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Timeout => f.write_str("timeout"),
            Self::Navigation => f.write_str("navigation"),
        }
    }
}

/// Hooks for the embedding UI. Every method defaults to doing nothing.
pub trait SelectionCallbacks {
    /// The session moved between states.
    fn on_state_change(&self, _from: ManualState, _to: ManualState) {}

    /// A node is under the pointer.
    fn on_hover(&self, _node: NodeId) {}

    /// A node was picked.
    fn on_select(&self, _node: NodeId) {}

    /// The pick was stored.
    fn on_confirm(&self, _locator: &Locator) {}

    /// The session was cancelled.
    fn on_cancel(&self, _reason: CancelReason) {}
}

/// Callbacks that ignore every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl SelectionCallbacks for NoopCallbacks {}

/// A running manual selection session.
///
/// Any operation attempted after `manual.timeout_secs` without activity
/// cancels the session with [`CancelReason::Timeout`].
pub struct ManualSelection {
    ctx: PageContext,
    site_key: SiteKey,
    challenge_type: ChallengeType,
    state: ManualState,
    hovered: Option<NodeId>,
    selected: Option<NodeId>,
    timeout: Duration,
    deadline: Instant,
    cancel_reason: Option<CancelReason>,
    callbacks: Box<dyn SelectionCallbacks>,
}

impl fmt::Debug for ManualSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualSelection")
            .field("site_key", &self.site_key)
            .field("challenge_type", &self.challenge_type)
            .field("state", &self.state)
            .field("cancel_reason", &self.cancel_reason)
            .finish_non_exhaustive()
    }
}

impl ManualSelection {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> ManualState {
        self.state
    }

    /// Site the pick will be stored for.
    #[must_use]
    pub fn site_key(&self) -> &SiteKey {
        &self.site_key
    }

    /// Challenge type the pick will be stored as.
    #[must_use]
    pub fn challenge_type(&self) -> ChallengeType {
        self.challenge_type
    }

    /// Node under the pointer.
    #[must_use]
    pub fn hovered(&self) -> Option<NodeId> {
        self.hovered
    }

    /// Picked node.
    #[must_use]
    pub fn selected(&self) -> Option<NodeId> {
        self.selected
    }

    /// When the session cancels itself if left idle.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Why the session was last cancelled.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason
    }

    /// Track the node under the pointer.
    ///
    /// Hovering after a pick discards it. Hovering an inactive session
    /// starts it again.
    pub fn hover(&mut self, node: NodeId) -> Result<()> {
        self.check_live("hover")?;
        if self.ctx.page().element(node).is_none() {
            return Err(EngineError::UnknownNode);
        }
        self.selected = None;
        self.hovered = Some(node);
        self.transition(ManualState::Hovering);
        self.touch();
        self.callbacks.on_hover(node);
        Ok(())
    }

    /// Pick the hovered node.
    pub fn select(&mut self) -> Result<NodeId> {
        self.check_live("select")?;
        let (ManualState::Hovering, Some(node)) = (self.state, self.hovered) else {
            return Err(EngineError::InvalidTransition {
                state: self.state,
                action: "select",
            });
        };
        self.selected = Some(node);
        self.transition(ManualState::Selected);
        self.touch();
        self.callbacks.on_select(node);
        Ok(node)
    }

    /// Abandon the session. Nothing is persisted.
    pub fn cancel(&mut self, reason: CancelReason) {
        if matches!(self.state, ManualState::Confirmed | ManualState::Inactive) {
            debug!(state = %self.state, "nothing to cancel");
            return;
        }
        self.transition(ManualState::Cancelled);
        self.hovered = None;
        self.selected = None;
        self.cancel_reason = Some(reason);
        self.callbacks.on_cancel(reason);
        info!(site = %self.site_key, reason = %reason, "manual selection cancelled");
        self.transition(ManualState::Inactive);
    }

    fn check_live(&mut self, action: &'static str) -> Result<()> {
        if self.state == ManualState::Confirmed {
            return Err(EngineError::InvalidTransition {
                state: self.state,
                action,
            });
        }
        if self.ctx.is_cancelled() {
            self.cancel(CancelReason::Navigation);
            return Err(EngineError::Cancelled);
        }
        if self.state != ManualState::Inactive && Instant::now() >= self.deadline {
            self.cancel(CancelReason::Timeout);
            return Err(EngineError::SelectionTimedOut);
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.deadline = Instant::now() + self.timeout;
    }

    fn transition(&mut self, to: ManualState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(from = %from, to = %to, "manual selection transition");
        self.state = to;
        self.callbacks.on_state_change(from, to);
    }
}

impl LocatorEngine {
    /// Start a manual selection session on a page.
    ///
    /// The session begins in [`ManualState::Hovering`].
    #[must_use]
    pub fn begin_manual_selection(
        &self,
        ctx: &PageContext,
        site_key: SiteKey,
        challenge_type: ChallengeType,
        callbacks: Box<dyn SelectionCallbacks>,
    ) -> ManualSelection {
        let timeout = self.inner.config.manual.timeout();
        let mut selection = ManualSelection {
            ctx: ctx.clone(),
            site_key,
            challenge_type,
            state: ManualState::Inactive,
            hovered: None,
            selected: None,
            timeout,
            deadline: Instant::now() + timeout,
            cancel_reason: None,
            callbacks,
        };
        info!(site = %selection.site_key, challenge_type = %challenge_type, "manual selection started");
        selection.transition(ManualState::Hovering);
        selection
    }

    /// Cancel a manual selection session. Nothing is persisted.
    pub fn cancel_manual_selection(&self, selection: &mut ManualSelection) {
        selection.cancel(CancelReason::User);
    }

    /// Store the picked node as the site's locator.
    ///
    /// The selector is generated for exactly the node the user picked.
    /// An existing locator for the site is superseded.
    pub async fn confirm_manual_selection(&self, selection: &mut ManualSelection) -> Result<Locator> {
        selection.check_live("confirm")?;
        let (ManualState::Selected, Some(node)) = (selection.state, selection.selected) else {
            return Err(EngineError::InvalidTransition {
                state: selection.state,
                action: "confirm",
            });
        };

        let ctx = selection.ctx.clone();
        let page = ctx.page();
        let el = page.element(node).ok_or(EngineError::UnknownNode)?;
        let generated = self.inner.generator.generate(page, el)?;
        let related = self.inner.related.describe(page, el, &self.inner.generator);

        let mut locator = Locator::new(
            selection.site_key.clone(),
            selection.challenge_type,
            generated.selector,
            LocatorOrigin::Manual,
        )
        .with_related(related);
        if let Some(previous) = self.inner.load_locator(&selection.site_key).await {
            locator = locator.superseding(&previous);
        }

        if ctx.is_cancelled() {
            selection.cancel(CancelReason::Navigation);
            return Err(EngineError::Cancelled);
        }
        self.inner.save_best_effort(&locator).await;

        selection.transition(ManualState::Confirmed);
        selection.callbacks.on_confirm(&locator);
        info!(
            site = %locator.site_key,
            locator_id = %locator.id,
            selector = %locator.selector,
            "manual locator confirmed"
        );
        Ok(locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use captcha_core::EngineConfig;
    use captcha_dom::Page;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder {
        events: Rc<RefCell<Vec<String>>>,
    }

    impl SelectionCallbacks for Recorder {
        fn on_state_change(&self, from: ManualState, to: ManualState) {
            self.events.borrow_mut().push(format!("{from}->{to}"));
        }

        fn on_cancel(&self, reason: CancelReason) {
            self.events.borrow_mut().push(format!("cancel:{reason}"));
        }
    }

    fn setup() -> (LocatorEngine, PageContext, SiteKey) {
        let engine = LocatorEngine::builder(EngineConfig::default())
            .build()
            .expect("engine");
        let page = Page::parse(
            r#"<html><body><div id="challenge"><img src="/c.png"></div><p>text</p></body></html>"#,
        );
        let site = SiteKey::new("example.com").expect("site");
        (engine, PageContext::new(page), site)
    }

    #[test]
    fn test_select_requires_hover() {
        let (engine, ctx, site) = setup();
        let mut selection =
            engine.begin_manual_selection(&ctx, site, ChallengeType::Character, Box::new(NoopCallbacks));
        assert_eq!(selection.state(), ManualState::Hovering);
        assert!(matches!(
            selection.select(),
            Err(EngineError::InvalidTransition { action: "select", .. })
        ));
    }

    #[test]
    fn test_cancel_returns_to_inactive() {
        let (engine, ctx, site) = setup();
        let events = Rc::new(RefCell::new(Vec::new()));
        let recorder = Recorder {
            events: Rc::clone(&events),
        };
        let mut selection =
            engine.begin_manual_selection(&ctx, site, ChallengeType::Character, Box::new(recorder));
        let div = ctx.page().resolve_unique("#challenge").expect("div").id();

        selection.hover(div).expect("hover");
        selection.select().expect("select");
        engine.cancel_manual_selection(&mut selection);

        assert_eq!(selection.state(), ManualState::Inactive);
        assert_eq!(selection.cancel_reason(), Some(CancelReason::User));
        assert_eq!(selection.selected(), None);
        assert_eq!(
            *events.borrow(),
            vec![
                "inactive->hovering",
                "hovering->selected",
                "selected->cancelled",
                "cancel:user",
                "cancelled->inactive",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_times_out() {
        let (engine, ctx, site) = setup();
        let mut selection =
            engine.begin_manual_selection(&ctx, site, ChallengeType::Character, Box::new(NoopCallbacks));
        let div = ctx.page().resolve_unique("#challenge").expect("div").id();
        selection.hover(div).expect("hover");

        tokio::time::advance(engine.config().manual.timeout() + Duration::from_secs(1)).await;

        assert!(matches!(selection.select(), Err(EngineError::SelectionTimedOut)));
        assert_eq!(selection.state(), ManualState::Inactive);
        assert_eq!(selection.cancel_reason(), Some(CancelReason::Timeout));
        assert!(engine.locators().list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_navigation_cancels_session() {
        let (engine, ctx, site) = setup();
        let mut selection =
            engine.begin_manual_selection(&ctx, site, ChallengeType::Character, Box::new(NoopCallbacks));
        let div = ctx.page().resolve_unique("#challenge").expect("div").id();
        selection.hover(div).expect("hover");
        selection.select().expect("select");

        ctx.cancel();
        let result = engine.confirm_manual_selection(&mut selection).await;

        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert_eq!(selection.cancel_reason(), Some(CancelReason::Navigation));
        assert!(engine.locators().list().await.expect("list").is_empty());
    }
}
