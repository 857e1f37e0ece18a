//! The fetch → cache → normalize → measure → layout cycle, plus the card
//! actions (quote-to-clipboard) and the UI event stream.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use arboard::Clipboard;
use crossbeam_channel::{never, unbounded, Receiver, Sender};
use thiserror::Error;

use crate::cache::Store;
use crate::feed::FeedAdapter;
use crate::layout::{self, CardBox, Margins};
use crate::media::{self, Handle as MediaHandle, PendingResource, ProbeRequest, ResourceKind};
use crate::render;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Loading,
    /// Payload came from a fresh cache entry; the network call was skipped.
    Cached,
    /// Payload fetched; cards are being normalized and measured.
    Rendering,
    Ready,
    Failed,
}

/// Where the last successful cycle got its payload from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrigin {
    Cached,
    Fetched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Toast { message: String },
    ScrollToComments,
    Relayout,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no item at index {0}")]
    UnknownItem(usize),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub container_width: f64,
    pub card_width: f64,
    pub card_margin: f64,
    pub cache_ttl: Duration,
    pub ready_timeout: Duration,
    pub resize_debounce: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            container_width: 780.0,
            card_width: 360.0,
            card_margin: 8.0,
            cache_ttl: Duration::from_secs(30 * 60),
            ready_timeout: Duration::from_millis(2500),
            resize_debounce: Duration::from_millis(80),
        }
    }
}

/// Coalesces resize bursts; only the last width within the window wins.
struct Debouncer {
    window: Duration,
    pending: Option<(f64, Instant)>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self { window, pending: None }
    }

    fn trigger(&mut self, width: f64) {
        self.pending = Some((width, Instant::now()));
    }

    fn poll(&mut self) -> Option<f64> {
        match self.pending {
            Some((width, at)) if at.elapsed() >= self.window => {
                self.pending = None;
                Some(width)
            }
            _ => None,
        }
    }
}

pub struct Pipeline {
    adapter: Box<dyn FeedAdapter>,
    store: Store,
    media: MediaHandle,
    config: Config,
    events: Sender<UiEvent>,

    state: RenderState,
    origin: Option<DataOrigin>,
    items: Vec<crate::feed::FeedItem>,
    image_dims: HashMap<String, (u32, u32)>,
    still_pending: Vec<PendingResource>,
    late_relayout_done: bool,
    container_width: f64,
    page: String,
    resize: Debouncer,
}

impl Pipeline {
    pub fn new(
        adapter: Box<dyn FeedAdapter>,
        store: Store,
        media: MediaHandle,
        config: Config,
        events: Sender<UiEvent>,
    ) -> Self {
        let container_width = config.container_width;
        let resize = Debouncer::new(config.resize_debounce);
        Self {
            adapter,
            store,
            media,
            config,
            events,
            state: RenderState::Idle,
            origin: None,
            items: Vec::new(),
            image_dims: HashMap::new(),
            still_pending: Vec::new(),
            late_relayout_done: false,
            container_width,
            page: String::new(),
            resize,
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn origin(&self) -> Option<DataOrigin> {
        self.origin
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    /// Runs one full cycle. Always leaves a renderable page behind, even on
    /// failure; a broken upstream never panics the caller.
    pub fn render(&mut self) {
        // The previous cycle's leftovers die here: probes it was still
        // waiting on and its one-shot late-relayout subscription.
        self.still_pending.clear();
        self.late_relayout_done = false;
        self.state = RenderState::Loading;

        let key = self.adapter.cache_key();
        let cached = self
            .store
            .get(&key)
            .filter(|payload| payload.is_fresh(self.config.cache_ttl));

        let raw = match cached {
            Some(payload) => {
                self.origin = Some(DataOrigin::Cached);
                self.state = RenderState::Cached;
                payload.payload
            }
            None => match self.adapter.fetch() {
                Ok(raw) => {
                    if let Err(err) = self.store.set(&key, &raw) {
                        log::warn!("pipeline: cache write failed: {err:#}");
                    }
                    self.origin = Some(DataOrigin::Fetched);
                    self.state = RenderState::Rendering;
                    raw
                }
                Err(err) => {
                    log::error!("pipeline: fetch {} failed: {err:#}", self.adapter.source());
                    self.page =
                        render::notice_page("talk-error", "获取数据失败", self.container_width);
                    self.state = RenderState::Failed;
                    return;
                }
            },
        };

        self.items = self.adapter.items(&raw);
        if self.items.is_empty() {
            self.page = render::notice_page("talk-empty", "暂无数据", self.container_width);
            self.state = RenderState::Ready;
            return;
        }

        // Probe every distinct image once; frame embeds only need a
        // reachability check and do not block on dimensions.
        let mut pending = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for item in &self.items {
            for url in &item.image_urls {
                if seen.insert(url.clone()) {
                    pending.push(self.media.enqueue(ProbeRequest {
                        url: url.clone(),
                        kind: ResourceKind::Image,
                    }));
                }
            }
        }
        // Dimensions cached for images no longer in the feed would pile up
        // across cycles of a long-lived pipeline.
        self.image_dims.retain(|url, _| seen.contains(url));

        // Cycles run to completion on this thread, so there is no canceller;
        // the waiter is bounded by its timeout alone.
        let report = media::wait_ready(pending, self.config.ready_timeout, &never());
        for outcome in report.settled {
            if let Some(dims) = outcome.dimensions {
                self.image_dims.insert(outcome.url, dims);
            }
        }
        self.still_pending = report.still_pending;

        self.relayout();
        self.state = RenderState::Ready;
    }

    fn relayout(&mut self) {
        let mut boxes: Vec<CardBox> = self
            .items
            .iter()
            .map(|item| CardBox {
                width: self.config.card_width,
                height: render::estimate_height(item, self.config.card_width, &self.image_dims),
                margins: Margins::uniform(self.config.card_margin),
                top: 0.0,
                left: 0.0,
            })
            .collect();
        let container_height = layout::layout(self.container_width, &mut boxes);

        let cards: Vec<(String, CardBox)> = self
            .items
            .iter()
            .enumerate()
            .zip(boxes)
            .map(|((index, item), card_box)| (render::card_html(item, index), card_box))
            .collect();
        self.page = render::page_html(&cards, self.container_width, container_height);
    }

    /// Picks up probes that settled after the ready window. At most one
    /// late relayout happens per cycle, matching the once-only listener the
    /// first settle consumes.
    pub fn poll_late(&mut self) -> bool {
        if self.late_relayout_done || self.still_pending.is_empty() {
            return false;
        }
        let mut settled_any = false;
        let mut pending = std::mem::take(&mut self.still_pending);
        pending.retain(|resource| match resource.outcome_rx.try_recv() {
            Ok(outcome) => {
                if let Some(dims) = outcome.dimensions {
                    self.image_dims.insert(outcome.url, dims);
                }
                settled_any = true;
                false
            }
            Err(_) => true,
        });
        self.still_pending = pending;
        if !settled_any {
            return false;
        }
        self.late_relayout_done = true;
        self.relayout();
        let _ = self.events.send(UiEvent::Relayout);
        true
    }

    pub fn resize(&mut self, container_width: f64) {
        self.resize.trigger(container_width);
    }

    /// Applies a debounced resize if its window has elapsed.
    pub fn poll_resize(&mut self) -> bool {
        let Some(width) = self.resize.poll() else {
            return false;
        };
        if (width - self.container_width).abs() < f64::EPSILON {
            return false;
        }
        self.container_width = width;
        if self.state == RenderState::Ready {
            self.relayout();
            let _ = self.events.send(UiEvent::Relayout);
        }
        true
    }

    /// Quote action: copies the item's plain text as a blockquote and asks
    /// the UI to move to the comment box. A clipboard failure downgrades to
    /// a manual-copy hint instead of erroring out.
    pub fn quote(&self, index: usize) -> Result<(), PipelineError> {
        let item = self
            .items
            .get(index)
            .ok_or(PipelineError::UnknownItem(index))?;
        let quoted = format!("> {}\n\n", item.plain_text);

        match Clipboard::new().and_then(|mut clipboard| clipboard.set_text(quoted)) {
            Ok(()) => {
                let _ = self.events.send(UiEvent::ScrollToComments);
                let _ = self.events.send(UiEvent::Toast {
                    message: "已复制引用文本并跳转到评论区，请粘贴使用 ✨".to_string(),
                });
            }
            Err(err) => {
                log::warn!("pipeline: clipboard unavailable: {err}");
                let _ = self.events.send(UiEvent::ScrollToComments);
                let _ = self.events.send(UiEvent::Toast {
                    message: "已跳转到评论区，请手动复制引用文本 ✨".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Convenience pair for wiring a pipeline to an event drain.
pub fn event_channel() -> (Sender<UiEvent>, Receiver<UiEvent>) {
    unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache;
    use crate::feed::FeedItem;
    use anyhow::anyhow;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct StaticAdapter {
        payload: Value,
        fetches: Arc<AtomicUsize>,
    }

    impl FeedAdapter for StaticAdapter {
        fn source(&self) -> &'static str {
            "talks"
        }

        fn fetch(&self) -> anyhow::Result<Value> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.payload.clone())
        }

        fn items(&self, raw: &Value) -> Vec<FeedItem> {
            raw.as_array()
                .map(|entries| {
                    entries
                        .iter()
                        .map(|entry| {
                            let mut item = FeedItem::new(
                                entry["author"].as_str().unwrap_or("a"),
                                Utc::now(),
                            );
                            item.content_html = "body".to_string();
                            item.plain_text = "body".to_string();
                            item
                        })
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    struct FailingAdapter;

    impl FeedAdapter for FailingAdapter {
        fn source(&self) -> &'static str {
            "talks"
        }

        fn fetch(&self) -> anyhow::Result<Value> {
            Err(anyhow!("upstream status 500"))
        }

        fn items(&self, _raw: &Value) -> Vec<FeedItem> {
            Vec::new()
        }
    }

    fn pipeline(adapter: Box<dyn FeedAdapter>, dir: &std::path::Path) -> (Pipeline, Receiver<UiEvent>) {
        let store = cache::Store::open(cache::Options {
            path: Some(dir.join("cache.db")),
        })
        .unwrap();
        let manager = media::Manager::new(media::Config::default()).unwrap();
        let handle = manager.handle();
        // Workers stay alive for the test via the leaked manager.
        std::mem::forget(manager);
        let (tx, rx) = event_channel();
        (
            Pipeline::new(adapter, store, handle, Config::default(), tx),
            rx,
        )
    }

    #[test]
    fn failed_fetch_leaves_an_error_page_without_retry() {
        let dir = tempdir().unwrap();
        let (mut pipe, _rx) = pipeline(Box::new(FailingAdapter), dir.path());
        pipe.render();
        assert_eq!(pipe.state(), RenderState::Failed);
        assert!(pipe.page().contains("获取数据失败"));
    }

    #[test]
    fn fresh_cache_skips_the_second_fetch() {
        let dir = tempdir().unwrap();
        let fetches = Arc::new(AtomicUsize::new(0));
        let adapter = StaticAdapter {
            payload: json!([{ "author": "x" }]),
            fetches: fetches.clone(),
        };
        let (mut pipe, _rx) = pipeline(Box::new(adapter), dir.path());

        pipe.render();
        assert_eq!(pipe.state(), RenderState::Ready);
        assert_eq!(pipe.origin(), Some(DataOrigin::Fetched));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        pipe.render();
        assert_eq!(pipe.origin(), Some(DataOrigin::Cached));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(pipe.page().contains("talk_item"));
    }

    #[test]
    fn empty_feed_renders_the_empty_notice() {
        let dir = tempdir().unwrap();
        let adapter = StaticAdapter {
            payload: json!([]),
            fetches: Arc::new(AtomicUsize::new(0)),
        };
        let (mut pipe, _rx) = pipeline(Box::new(adapter), dir.path());
        pipe.render();
        assert_eq!(pipe.state(), RenderState::Ready);
        assert!(pipe.page().contains("暂无数据"));
    }

    #[test]
    fn quote_emits_scroll_and_exactly_one_toast() {
        let dir = tempdir().unwrap();
        let adapter = StaticAdapter {
            payload: json!([{ "author": "x" }]),
            fetches: Arc::new(AtomicUsize::new(0)),
        };
        let (mut pipe, rx) = pipeline(Box::new(adapter), dir.path());
        pipe.render();

        pipe.quote(0).unwrap();
        let events: Vec<UiEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(events.contains(&UiEvent::ScrollToComments));
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::Toast { message } if message.ends_with('✨'))));

        assert!(matches!(
            pipe.quote(99),
            Err(PipelineError::UnknownItem(99))
        ));
    }

    #[test]
    fn second_render_drops_the_previous_cycles_pending_probes() {
        let dir = tempdir().unwrap();
        let adapter = StaticAdapter {
            payload: json!([{ "author": "x" }]),
            fetches: Arc::new(AtomicUsize::new(0)),
        };
        let (mut pipe, _rx) = pipeline(Box::new(adapter), dir.path());
        pipe.render();

        // Simulate a probe that had not settled inside the ready window.
        let (outcome_tx, outcome_rx) = unbounded();
        pipe.still_pending.push(PendingResource {
            request: ProbeRequest {
                url: "https://img.example/slow.png".to_string(),
                kind: ResourceKind::Image,
            },
            outcome_rx,
        });

        pipe.render();
        assert!(pipe.still_pending.is_empty());

        // A stale probe settling after the next cycle started must not
        // trigger a late relayout.
        outcome_tx
            .send(media::ProbeOutcome {
                url: "https://img.example/slow.png".to_string(),
                kind: ResourceKind::Image,
                dimensions: Some((640, 480)),
                error: None,
            })
            .unwrap();
        assert!(!pipe.poll_late());
    }

    #[test]
    fn dimensions_for_images_gone_from_the_feed_are_evicted() {
        let dir = tempdir().unwrap();
        let adapter = StaticAdapter {
            payload: json!([{ "author": "x" }]),
            fetches: Arc::new(AtomicUsize::new(0)),
        };
        let (mut pipe, _rx) = pipeline(Box::new(adapter), dir.path());
        pipe.image_dims
            .insert("https://img.example/gone.png".to_string(), (640, 480));
        pipe.render();
        assert!(pipe.image_dims.is_empty());
    }

    #[test]
    fn resize_applies_only_after_the_debounce_window() {
        let dir = tempdir().unwrap();
        let adapter = StaticAdapter {
            payload: json!([{ "author": "x" }]),
            fetches: Arc::new(AtomicUsize::new(0)),
        };
        let (mut pipe, rx) = pipeline(Box::new(adapter), dir.path());
        pipe.render();
        let _ = rx;

        pipe.resize(560.0);
        assert!(!pipe.poll_resize());
        std::thread::sleep(Duration::from_millis(100));
        assert!(pipe.poll_resize());
        assert!(pipe.page().contains("width:560px"));
    }
}
