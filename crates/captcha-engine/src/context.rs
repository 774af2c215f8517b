//! Per-document state shared by engine operations.
//!
//! A [`PageContext`] wraps one parsed document. It owns the cancellation
//! token for everything running against that document and the slot that
//! lets concurrent `find_or_create_locator` calls share a single scan.
//!
//! Page handles are not `Send`; engine futures that borrow a context run
//! on the caller's task.

use crate::engine::ScanOutcome;
use captcha_core::SiteKey;
use captcha_dom::Page;
use futures::future::{LocalBoxFuture, Shared};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) type InFlightScan = Shared<LocalBoxFuture<'static, ScanOutcome>>;

struct ContextInner {
    page: Rc<Page>,
    cancel: CancellationToken,
    in_flight: RefCell<Option<(SiteKey, InFlightScan)>>,
    scans_started: Cell<usize>,
}

/// Handle to a document the engine works on.
///
/// Clones share the same document, cancellation token and in-flight scan.
#[derive(Clone)]
pub struct PageContext {
    inner: Rc<ContextInner>,
}

impl fmt::Debug for PageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageContext")
            .field("url", &self.inner.page.url())
            .field("cancelled", &self.is_cancelled())
            .field("scans_started", &self.inner.scans_started.get())
            .finish_non_exhaustive()
    }
}

impl PageContext {
    /// Wrap a parsed document.
    #[must_use]
    pub fn new(page: Page) -> Self {
        Self::with_token(page, CancellationToken::new())
    }

    /// Wrap a document under an existing token, e.g. a child of a tab's token.
    #[must_use]
    pub fn with_token(page: Page, cancel: CancellationToken) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                page: Rc::new(page),
                cancel,
                in_flight: RefCell::new(None),
                scans_started: Cell::new(0),
            }),
        }
    }

    /// The document.
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.inner.page
    }

    /// Shared handle to the document, for work that outlives a borrow.
    pub(crate) fn page_handle(&self) -> Rc<Page> {
        Rc::clone(&self.inner.page)
    }

    /// Cancel all work for this document, as on navigation away.
    ///
    /// Running scans stop before persisting anything and pending resolutions
    /// fail with a cancellation.
    pub fn cancel(&self) {
        debug!(url = ?self.inner.page.url(), "page context cancelled");
        self.inner.cancel.cancel();
    }

    /// Whether [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Token cancelled together with this context.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Number of scans actually run against this document.
    ///
    /// Calls that joined an in-flight scan are not counted.
    #[must_use]
    pub fn scans_started(&self) -> usize {
        self.inner.scans_started.get()
    }

    pub(crate) fn note_scan_started(&self) {
        self.inner.scans_started.set(self.inner.scans_started.get() + 1);
    }

    /// The running scan and the site key it was started for.
    pub(crate) fn in_flight(&self) -> Option<(SiteKey, InFlightScan)> {
        self.inner.in_flight.borrow().clone()
    }

    pub(crate) fn set_in_flight(&self, site_key: SiteKey, scan: InFlightScan) {
        *self.inner.in_flight.borrow_mut() = Some((site_key, scan));
    }

    /// Clear the slot if it still holds `scan`.
    pub(crate) fn finish_in_flight(&self, scan: &InFlightScan) {
        let mut slot = self.inner.in_flight.borrow_mut();
        if slot.as_ref().is_some_and(|(_, current)| current.ptr_eq(scan)) {
            *slot = None;
        }
    }
}
