use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::ViewError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Missing,
    Hidden,
    Disabled,
    Ready,
}

/// One loaded row: its DOM position and outer markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowHandle {
    pub position: usize,
    pub markup: String,
}

/// The rendering engine as seen by the pipeline. One view is driven by one
/// session at a time.
pub trait PageView {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), ViewError>;
    fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), ViewError>;
    fn count(&mut self, selector: &str) -> Result<usize, ViewError>;
    fn control_state(&mut self, selector: &str) -> Result<ControlState, ViewError>;
    fn click(&mut self, selector: &str) -> Result<(), ViewError>;
    fn settle(&mut self, delay: Duration) -> Result<(), ViewError>;
    /// Outer markup of every element matching `selector`, in DOM order.
    fn row_markup(&mut self, selector: &str) -> Result<Vec<String>, ViewError>;
}

// ── Cancellation ──

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Called before every navigation, click and wait.
    pub fn check(&self) -> Result<(), ViewError> {
        if self.is_cancelled() {
            Err(ViewError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ── Rate limiting ──

/// Spaces out requests across every view sharing it.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        RateLimiter {
            interval,
            next: Mutex::new(Instant::now()),
        }
    }

    /// Block until the next slot is free. Returns how long we waited.
    pub fn acquire(&self) -> Duration {
        let wait = {
            let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot - now
        };
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        wait
    }
}

/// Acquires a shared [`RateLimiter`] before every navigation and click.
pub struct Throttled<V> {
    inner: V,
    limiter: Arc<RateLimiter>,
}

impl<V: PageView> Throttled<V> {
    pub fn new(inner: V, limiter: Arc<RateLimiter>) -> Self {
        Throttled { inner, limiter }
    }

    pub fn into_inner(self) -> V {
        self.inner
    }
}

impl<V: PageView> PageView for Throttled<V> {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), ViewError> {
        self.limiter.acquire();
        self.inner.navigate(url, timeout)
    }

    fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), ViewError> {
        self.inner.wait_for(selector, timeout)
    }

    fn count(&mut self, selector: &str) -> Result<usize, ViewError> {
        self.inner.count(selector)
    }

    fn control_state(&mut self, selector: &str) -> Result<ControlState, ViewError> {
        self.inner.control_state(selector)
    }

    fn click(&mut self, selector: &str) -> Result<(), ViewError> {
        self.limiter.acquire();
        self.inner.click(selector)
    }

    fn settle(&mut self, delay: Duration) -> Result<(), ViewError> {
        self.inner.settle(delay)
    }

    fn row_markup(&mut self, selector: &str) -> Result<Vec<String>, ViewError> {
        self.inner.row_markup(selector)
    }
}

// ── Snapshot replay ──

struct Route {
    prefix: String,
    snapshots: Vec<String>,
}

/// Replays captured HTML. Each route maps a URL prefix to the sequence of
/// documents a table went through; clicking a ready control advances to the
/// next document, or does nothing once the sequence is spent.
///
/// Replay never sleeps: settle delays are only accumulated.
pub struct SnapshotView {
    routes: Vec<Route>,
    current: Option<(usize, usize)>,
    doc: Html,
    clicks: usize,
    settled: Duration,
}

impl SnapshotView {
    pub fn new() -> Self {
        SnapshotView {
            routes: Vec::new(),
            current: None,
            doc: Html::parse_document(""),
            clicks: 0,
            settled: Duration::ZERO,
        }
    }

    /// A view that is already "navigated" to the given document sequence.
    pub fn single(snapshots: Vec<String>) -> Self {
        let mut view = SnapshotView::new().route("", snapshots);
        view.load(0, 0);
        view
    }

    /// Register documents for URLs starting with `prefix`. Routes are tried
    /// in registration order; an empty prefix matches everything.
    pub fn route(mut self, prefix: &str, snapshots: Vec<String>) -> Self {
        self.routes.push(Route {
            prefix: prefix.to_string(),
            snapshots,
        });
        self
    }

    pub fn clicks(&self) -> usize {
        self.clicks
    }

    pub fn settled(&self) -> Duration {
        self.settled
    }

    fn load(&mut self, route: usize, step: usize) {
        let html = self.routes[route]
            .snapshots
            .get(step)
            .map(String::as_str)
            .unwrap_or("");
        self.doc = Html::parse_document(html);
        self.current = Some((route, step));
    }

    fn select<'a>(&'a self, selector: &str) -> Result<Vec<ElementRef<'a>>, ViewError> {
        let sel = Selector::parse(selector).map_err(|e| ViewError::Selector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.doc.select(&sel).collect())
    }
}

impl Default for SnapshotView {
    fn default() -> Self {
        SnapshotView::new()
    }
}

fn control_state_of(el: &ElementRef<'_>) -> ControlState {
    let v = el.value();
    let style = v.attr("style").unwrap_or("").replace(' ', "").to_ascii_lowercase();
    let hidden = v.attr("hidden").is_some()
        || style.contains("display:none")
        || style.contains("visibility:hidden")
        || v.classes().any(|c| c == "u-hidden");
    if hidden {
        return ControlState::Hidden;
    }
    if v.attr("disabled").is_some() || v.attr("aria-disabled") == Some("true") {
        return ControlState::Disabled;
    }
    ControlState::Ready
}

impl PageView for SnapshotView {
    fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), ViewError> {
        let route = self
            .routes
            .iter()
            .position(|r| url.starts_with(&r.prefix))
            .ok_or_else(|| ViewError::Navigation {
                url: url.to_string(),
                reason: "no snapshot registered for this URL".into(),
            })?;
        debug!("replaying {} from route {:?}", url, self.routes[route].prefix);
        self.load(route, 0);
        Ok(())
    }

    fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), ViewError> {
        if self.current.is_some() && !self.select(selector)?.is_empty() {
            Ok(())
        } else {
            Err(ViewError::Timeout {
                selector: selector.to_string(),
                timeout,
            })
        }
    }

    fn count(&mut self, selector: &str) -> Result<usize, ViewError> {
        Ok(self.select(selector)?.len())
    }

    fn control_state(&mut self, selector: &str) -> Result<ControlState, ViewError> {
        Ok(self
            .select(selector)?
            .first()
            .map(control_state_of)
            .unwrap_or(ControlState::Missing))
    }

    fn click(&mut self, selector: &str) -> Result<(), ViewError> {
        if self.control_state(selector)? != ControlState::Ready {
            return Err(ViewError::NotInteractable(selector.to_string()));
        }
        self.clicks += 1;
        if let Some((route, step)) = self.current {
            if step + 1 < self.routes[route].snapshots.len() {
                self.load(route, step + 1);
            }
        }
        Ok(())
    }

    fn settle(&mut self, delay: Duration) -> Result<(), ViewError> {
        self.settled += delay;
        Ok(())
    }

    fn row_markup(&mut self, selector: &str) -> Result<Vec<String>, ViewError> {
        Ok(self.select(selector)?.iter().map(|el| el.html()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUTTON: &str = "button.more";

    fn page(rows: usize, button: &str) -> String {
        let trs: String = (0..rows).map(|i| format!("<tr class=\"r\"><td>{}</td></tr>", i + 1)).collect();
        format!("<html><body><table><tbody>{}</tbody></table>{}</body></html>", trs, button)
    }

    #[test]
    fn control_states() {
        let cases = [
            ("", ControlState::Missing),
            (r#"<button class="more">More</button>"#, ControlState::Ready),
            (r#"<button class="more" disabled>More</button>"#, ControlState::Disabled),
            (r#"<button class="more" aria-disabled="true">More</button>"#, ControlState::Disabled),
            (r#"<button class="more" hidden>More</button>"#, ControlState::Hidden),
            (r#"<button class="more" style="display: none">More</button>"#, ControlState::Hidden),
            (r#"<button class="more u-hidden">More</button>"#, ControlState::Hidden),
        ];
        for (button, expected) in cases {
            let mut v = SnapshotView::single(vec![page(1, button)]);
            assert_eq!(v.control_state(BUTTON).unwrap(), expected, "{}", button);
        }
    }

    #[test]
    fn click_advances_then_goes_inert() {
        let ready = r#"<button class="more">More</button>"#;
        let mut v = SnapshotView::single(vec![page(2, ready), page(4, ready)]);
        assert_eq!(v.count("tr.r").unwrap(), 2);
        v.click(BUTTON).unwrap();
        assert_eq!(v.count("tr.r").unwrap(), 4);
        v.click(BUTTON).unwrap();
        assert_eq!(v.count("tr.r").unwrap(), 4);
        assert_eq!(v.clicks(), 2);
    }

    #[test]
    fn click_on_disabled_control_fails() {
        let mut v = SnapshotView::single(vec![page(1, r#"<button class="more" disabled>x</button>"#)]);
        assert!(matches!(v.click(BUTTON), Err(ViewError::NotInteractable(_))));
    }

    #[test]
    fn routes_by_prefix() {
        let mut v = SnapshotView::new()
            .route("https://site/search?", vec![page(1, "")])
            .route("", vec![page(3, "")]);
        assert!(v.wait_for("tr.r", Duration::from_secs(1)).is_err());
        v.navigate("https://site/search?name=x", Duration::from_secs(1)).unwrap();
        assert_eq!(v.count("tr.r").unwrap(), 1);
        v.navigate("https://site/athletes/1", Duration::from_secs(1)).unwrap();
        assert_eq!(v.count("tr.r").unwrap(), 3);
    }

    #[test]
    fn unknown_route_is_a_navigation_error() {
        let mut v = SnapshotView::new().route("https://a/", vec![page(1, "")]);
        assert!(matches!(
            v.navigate("https://b/", Duration::from_secs(1)),
            Err(ViewError::Navigation { .. })
        ));
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(matches!(token.check(), Err(ViewError::Cancelled)));
    }

    #[test]
    fn limiter_spaces_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(20));
        assert_eq!(limiter.acquire(), Duration::ZERO);
        let start = Instant::now();
        limiter.acquire();
        limiter.acquire();
        assert!(start.elapsed() >= Duration::from_millis(35));
    }

    #[test]
    fn throttled_view_delegates() {
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO));
        let inner = SnapshotView::single(vec![page(2, "")]);
        let mut v = Throttled::new(inner, limiter);
        assert_eq!(v.row_markup("tr.r").unwrap().len(), 2);
        v.settle(Duration::from_millis(5)).unwrap();
        assert_eq!(v.into_inner().settled(), Duration::from_millis(5));
    }
}
