//! Client-side navigation detection.
//!
//! The host application changes its URL without reloading. Three detection
//! strategies are provided, and they all feed one [`NavigationSink`]:
//!
//! - [`HistoryInterceptor`] wraps the host's history mutators;
//! - [`MutationFallback`] compares URLs whenever the document subtree grows;
//! - [`PopStateListener`] reacts to back/forward notifications.
//!
//! The sink drops signals for the URL it last published, and the channel
//! behind it keeps only the newest event, so a busy host coalesces into a
//! single pending navigation.

use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace, warn};
use url::Url;

use crate::context::{NavigationContext, parse_url};
use crate::document::{Document, MemoryDocument};
use crate::error::Result;

/// Strategy that produced a navigation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `pushState` / `replaceState` interception.
    History,
    /// Subtree insertion fallback.
    Mutation,
    /// Back/forward notification.
    PopState,
    /// Programmatic refresh or startup.
    Initial,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::History => write!(f, "history"),
            Self::Mutation => write!(f, "mutation"),
            Self::PopState => write!(f, "popstate"),
            Self::Initial => write!(f, "initial"),
        }
    }
}

/// A navigation observed by one of the sources.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationEvent {
    pub url: Url,
    pub title: String,
    pub source: SourceKind,
}

impl NavigationEvent {
    pub fn new(url: Url, title: impl Into<String>, source: SourceKind) -> Self {
        Self {
            url,
            title: title.into(),
            source,
        }
    }

    /// Fresh context for resolving this event.
    pub fn context(&self) -> NavigationContext {
        NavigationContext::new(self.url.clone(), self.title.clone())
    }
}

/// Write side shared by every source.
#[derive(Clone)]
pub struct NavigationSink {
    tx: Arc<watch::Sender<Option<NavigationEvent>>>,
}

impl NavigationSink {
    /// Publish a navigation unless it targets the last published URL.
    /// Relative URLs are resolved against the last published one.
    /// Returns whether the event was published.
    pub fn emit(&self, url: &str, title: &str, source: SourceKind) -> bool {
        let url = match self.resolve(url) {
            Ok(url) => url,
            Err(e) => {
                warn!(%source, error = %e, "Dropping navigation with unusable URL");
                return false;
            }
        };

        let published = self.tx.send_if_modified(|current| {
            if current.as_ref().is_some_and(|event| event.url == url) {
                return false;
            }
            *current = Some(NavigationEvent::new(url.clone(), title, source));
            true
        });

        if published {
            debug!(%source, %url, "Navigation detected");
        } else {
            trace!(%source, %url, "Ignoring navigation to current URL");
        }
        published
    }

    /// Last published URL.
    pub fn current_url(&self) -> Option<Url> {
        self.tx.borrow().as_ref().map(|event| event.url.clone())
    }

    fn resolve(&self, url: &str) -> Result<Url> {
        match self.current_url() {
            Some(base) => match base.join(url) {
                Ok(url) => Ok(url),
                Err(_) => parse_url(url),
            },
            None => parse_url(url),
        }
    }
}

impl fmt::Debug for NavigationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationSink")
            .field("current_url", &self.current_url())
            .finish()
    }
}

/// Read side consumed by the engine loop.
#[derive(Debug)]
pub struct NavigationReceiver {
    rx: watch::Receiver<Option<NavigationEvent>>,
    tx: Weak<watch::Sender<Option<NavigationEvent>>>,
    seen: Option<NavigationEvent>,
}

impl NavigationReceiver {
    /// Wait for the next unseen navigation. Intermediate events published
    /// while the caller was busy are skipped. Returns `None` once every
    /// sink is gone.
    pub async fn next(&mut self) -> Option<NavigationEvent> {
        loop {
            self.rx.changed().await.ok()?;
            self.seen = self.rx.borrow_and_update().clone();
            if let Some(event) = &self.seen {
                return Some(event.clone());
            }
        }
    }

    /// Latest published event, seen or not.
    pub fn latest(&self) -> Option<NavigationEvent> {
        self.rx.borrow().clone()
    }

    /// Latest published event, marking it seen so [`next`](Self::next)
    /// waits for a newer one.
    pub fn take_latest(&mut self) -> Option<NavigationEvent> {
        self.seen = self.rx.borrow_and_update().clone();
        self.seen.clone()
    }

    /// Record a location the engine moved to on its own, such as an explicit
    /// refresh, so sinks deduplicate against it. A navigation that is still
    /// pending is left in place and wins.
    pub fn record(&mut self, url: &Url, title: &str) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };

        let event = NavigationEvent::new(url.clone(), title, SourceKind::Initial);
        let written = tx.send_if_modified(|current| {
            if *current != self.seen || current.as_ref().is_some_and(|e| &e.url == url) {
                return false;
            }
            *current = Some(event.clone());
            true
        });
        if !written {
            return;
        }

        let latest = self.rx.borrow_and_update().clone();
        if latest.as_ref() == Some(&event) {
            self.seen = latest;
        } else {
            // A sink published between the write and this read.
            self.rx.mark_changed();
        }
    }
}

/// Creates the sink/receiver pair.
pub struct NavigationDetector;

impl NavigationDetector {
    /// Channel with no known location yet.
    pub fn channel() -> (NavigationSink, NavigationReceiver) {
        Self::with_initial(None)
    }

    /// Channel seeded with the location the page was loaded at. The seed
    /// counts as already seen.
    pub fn starting_at(url: &str, title: &str) -> Result<(NavigationSink, NavigationReceiver)> {
        let event = NavigationEvent::new(parse_url(url)?, title, SourceKind::Initial);
        Ok(Self::with_initial(Some(event)))
    }

    fn with_initial(initial: Option<NavigationEvent>) -> (NavigationSink, NavigationReceiver) {
        let (tx, rx) = watch::channel(initial);
        let tx = Arc::new(tx);
        let seen = rx.borrow().clone();
        let receiver = NavigationReceiver {
            seen,
            rx,
            tx: Arc::downgrade(&tx),
        };
        (NavigationSink { tx }, receiver)
    }
}

/// A navigation detection strategy.
pub trait NavigationSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Stop emitting. The host primitives keep working.
    fn detach(&self);

    fn is_attached(&self) -> bool;
}

/// The host's URL mutation entry points.
pub trait History: Send + Sync {
    fn push_state(&self, url: &str, title: &str);
    fn replace_state(&self, url: &str, title: &str);
}

/// Wraps a [`History`] so every mutation is reported before it is
/// delegated to the host.
pub struct HistoryInterceptor<H> {
    inner: H,
    sink: NavigationSink,
    attached: AtomicBool,
}

impl<H: History> HistoryInterceptor<H> {
    pub fn new(inner: H, sink: NavigationSink) -> Self {
        Self {
            inner,
            sink,
            attached: AtomicBool::new(true),
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    fn report(&self, url: &str, title: &str) {
        if self.is_attached() {
            self.sink.emit(url, title, SourceKind::History);
        }
    }
}

impl<H: History> History for HistoryInterceptor<H> {
    fn push_state(&self, url: &str, title: &str) {
        self.report(url, title);
        self.inner.push_state(url, title);
    }

    fn replace_state(&self, url: &str, title: &str) {
        self.report(url, title);
        self.inner.replace_state(url, title);
    }
}

impl<H: History> NavigationSource for HistoryInterceptor<H> {
    fn kind(&self) -> SourceKind {
        SourceKind::History
    }

    fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

/// Coarse fallback when history interception is unavailable: every subtree
/// insertion compares the document URL against the last one observed.
pub struct MutationFallback {
    document: Arc<dyn Document>,
    sink: NavigationSink,
    last_seen: Mutex<Option<String>>,
    attached: AtomicBool,
}

impl MutationFallback {
    pub fn new(document: Arc<dyn Document>, sink: NavigationSink) -> Self {
        let last_seen = Some(document.current_url());
        Self {
            document,
            sink,
            last_seen: Mutex::new(last_seen),
            attached: AtomicBool::new(true),
        }
    }

    /// Called by the host's mutation observer. Returns whether the insertion
    /// produced a navigation event.
    pub fn on_subtree_inserted(&self) -> bool {
        if !self.is_attached() {
            return false;
        }
        let url = self.document.current_url();
        {
            let mut last_seen = self.last_seen.lock();
            if last_seen.as_deref() == Some(url.as_str()) {
                return false;
            }
            *last_seen = Some(url.clone());
        }
        self.sink
            .emit(&url, &self.document.title(), SourceKind::Mutation)
    }
}

impl NavigationSource for MutationFallback {
    fn kind(&self) -> SourceKind {
        SourceKind::Mutation
    }

    fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

/// Reacts to the browser's back/forward notification.
pub struct PopStateListener {
    document: Arc<dyn Document>,
    sink: NavigationSink,
    attached: AtomicBool,
}

impl PopStateListener {
    pub fn new(document: Arc<dyn Document>, sink: NavigationSink) -> Self {
        Self {
            document,
            sink,
            attached: AtomicBool::new(true),
        }
    }

    pub fn on_pop_state(&self) -> bool {
        if !self.is_attached() {
            return false;
        }
        self.sink.emit(
            &self.document.current_url(),
            &self.document.title(),
            SourceKind::PopState,
        )
    }
}

impl NavigationSource for PopStateListener {
    fn kind(&self) -> SourceKind {
        SourceKind::PopState
    }

    fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

/// History backed by a [`MemoryDocument`], recording every entry.
pub struct MemoryHistory {
    document: Arc<MemoryDocument>,
    entries: Mutex<Vec<String>>,
}

impl MemoryHistory {
    pub fn new(document: Arc<MemoryDocument>) -> Self {
        let entries = vec![document.current_url()];
        Self {
            document,
            entries: Mutex::new(entries),
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    fn absolute(&self, url: &str) -> String {
        Url::parse(&self.document.current_url())
            .and_then(|base| base.join(url))
            .map(String::from)
            .unwrap_or_else(|_| url.to_string())
    }
}

impl History for MemoryHistory {
    fn push_state(&self, url: &str, title: &str) {
        let url = self.absolute(url);
        self.entries.lock().push(url.clone());
        self.document.set_location(url, title);
    }

    fn replace_state(&self, url: &str, title: &str) {
        let url = self.absolute(url);
        if let Some(last) = self.entries.lock().last_mut() {
            *last = url.clone();
        }
        self.document.set_location(url, title);
    }
}
