//! Remote-resource readiness. Rendering should not lay cards out before
//! images have real dimensions, so probes run on background workers and
//! the pipeline waits for them with a hard timeout. A probe "settles" on
//! success or failure alike: a broken image still has a final box size.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Select, Sender};
use image::GenericImageView;
use reqwest::blocking::Client;

#[derive(Debug, Clone)]
pub struct Config {
    pub workers: usize,
    pub probe_timeout: Duration,
    pub http_client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 2,
            probe_timeout: Duration::from_secs(10),
            http_client: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// An image whose intrinsic dimensions drive the card measurement.
    Image,
    /// An embed frame; reachable-or-not is all we need (cross-origin
    /// content is opaque by design, so no document inspection happens).
    Frame,
}

#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub url: String,
    pub kind: ResourceKind,
}

#[derive(Debug)]
pub struct ProbeOutcome {
    pub url: String,
    pub kind: ResourceKind,
    pub dimensions: Option<(u32, u32)>,
    pub error: Option<anyhow::Error>,
}

/// A resource whose probe has not come back yet. Holding on to these after
/// the wait window lets the caller run a late relayout when a slow probe
/// eventually settles.
#[derive(Debug)]
pub struct PendingResource {
    pub request: ProbeRequest,
    pub outcome_rx: Receiver<ProbeOutcome>,
}

#[derive(Debug, Default)]
pub struct ReadyReport {
    pub settled: Vec<ProbeOutcome>,
    pub still_pending: Vec<PendingResource>,
    pub timed_out: bool,
    pub cancelled: bool,
}

struct Job {
    request: ProbeRequest,
    tx: Sender<ProbeOutcome>,
}

struct Inner {
    cfg: Config,
    client: Client,
    jobs: Sender<Job>,
    stop: Sender<()>,
}

pub struct Manager {
    inner: Arc<Inner>,
    handles: Vec<thread::JoinHandle<()>>,
}

/// Cheap cloneable submission handle, detached from worker lifetime.
#[derive(Clone)]
pub struct Handle {
    jobs: Sender<Job>,
}

impl Handle {
    pub fn enqueue(&self, request: ProbeRequest) -> PendingResource {
        let (tx, rx) = unbounded();
        let job = Job {
            request: request.clone(),
            tx,
        };
        let _ = self.jobs.send(job);
        PendingResource {
            request,
            outcome_rx: rx,
        }
    }
}

impl Manager {
    pub fn new(cfg: Config) -> Result<Self> {
        let mut cfg = cfg;
        if cfg.workers == 0 {
            cfg.workers = 2;
        }

        let client = if let Some(client) = cfg.http_client.clone() {
            client
        } else {
            Client::builder()
                .timeout(cfg.probe_timeout)
                .build()
                .context("media: build http client")?
        };

        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let inner = Arc::new(Inner {
            cfg,
            client,
            jobs: job_tx,
            stop: stop_tx,
        });

        let mut handles = Vec::new();
        for _ in 0..inner.cfg.workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker_inner = inner.clone();
            handles.push(thread::spawn(move || worker_inner.worker(rx_jobs, rx_stop)));
        }

        Ok(Self { inner, handles })
    }

    pub fn handle(&self) -> Handle {
        Handle {
            jobs: self.inner.jobs.clone(),
        }
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => self.process(job),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, job: Job) {
        let outcome = match self.probe(&job.request) {
            Ok(dimensions) => ProbeOutcome {
                url: job.request.url.clone(),
                kind: job.request.kind,
                dimensions,
                error: None,
            },
            Err(err) => {
                log::debug!("media: probe {} failed: {err:#}", job.request.url);
                ProbeOutcome {
                    url: job.request.url.clone(),
                    kind: job.request.kind,
                    dimensions: None,
                    error: Some(err),
                }
            }
        };
        let _ = job.tx.send(outcome);
    }

    fn probe(&self, request: &ProbeRequest) -> Result<Option<(u32, u32)>> {
        if request.url.is_empty() {
            return Err(anyhow!("media: url required"));
        }
        match request.kind {
            ResourceKind::Frame => {
                let response = self
                    .client
                    .head(&request.url)
                    .send()
                    .context("media: frame probe")?;
                if !response.status().is_success() {
                    return Err(anyhow!("media: frame probe status {}", response.status()));
                }
                Ok(None)
            }
            ResourceKind::Image => {
                let response = self
                    .client
                    .get(&request.url)
                    .send()
                    .context("media: image download")?;
                if !response.status().is_success() {
                    return Err(anyhow!("media: image status {}", response.status()));
                }
                let bytes = response.bytes().context("media: image body")?;
                let decoded =
                    image::load_from_memory(&bytes).context("media: decode image")?;
                Ok(Some(decoded.dimensions()))
            }
        }
    }
}

/// Races "all pending probes settled" against a fixed timeout and a cancel
/// channel. Never blocks past the deadline; the original pending handles
/// that did not settle come back in `still_pending` so the caller can pick
/// them up later.
pub fn wait_ready(
    mut pending: Vec<PendingResource>,
    timeout: Duration,
    cancel: &Receiver<()>,
) -> ReadyReport {
    let deadline = Instant::now() + timeout;
    let mut settled = Vec::new();
    let mut cancelled = false;
    let mut timed_out = false;

    while !pending.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            timed_out = true;
            break;
        }

        let mut sel = Select::new();
        let cancel_idx = sel.recv(cancel);
        for res in &pending {
            sel.recv(&res.outcome_rx);
        }

        let op = match sel.select_timeout(remaining) {
            Ok(op) => op,
            Err(_) => {
                timed_out = true;
                break;
            }
        };

        let idx = op.index();
        if idx == cancel_idx {
            let _ = op.recv(cancel);
            cancelled = true;
            break;
        }

        let res_idx = idx - 1;
        match op.recv(&pending[res_idx].outcome_rx) {
            Ok(outcome) => {
                settled.push(outcome);
                pending.remove(res_idx);
            }
            Err(_) => {
                // Worker vanished; the resource has no further events, so
                // treat it as settled without dimensions.
                let gone = pending.remove(res_idx);
                settled.push(ProbeOutcome {
                    url: gone.request.url,
                    kind: gone.request.kind,
                    dimensions: None,
                    error: Some(anyhow!("media: probe channel closed")),
                });
            }
        }
    }

    ReadyReport {
        settled,
        still_pending: pending,
        timed_out,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_pending(url: &str) -> (Sender<ProbeOutcome>, PendingResource) {
        let (tx, rx) = unbounded();
        (
            tx,
            PendingResource {
                request: ProbeRequest {
                    url: url.into(),
                    kind: ResourceKind::Image,
                },
                outcome_rx: rx,
            },
        )
    }

    fn outcome(url: &str, dims: Option<(u32, u32)>) -> ProbeOutcome {
        ProbeOutcome {
            url: url.into(),
            kind: ResourceKind::Image,
            dimensions: dims,
            error: None,
        }
    }

    #[test]
    fn resolves_once_all_probes_settle() {
        let (tx_a, a) = fake_pending("a");
        let (tx_b, b) = fake_pending("b");
        let (_cancel_tx, cancel_rx) = unbounded();

        tx_a.send(outcome("a", Some((100, 50)))).unwrap();
        tx_b.send(outcome("b", None)).unwrap();

        let report = wait_ready(vec![a, b], Duration::from_secs(1), &cancel_rx);
        assert_eq!(report.settled.len(), 2);
        assert!(report.still_pending.is_empty());
        assert!(!report.timed_out);
        assert!(!report.cancelled);
    }

    #[test]
    fn timeout_returns_the_original_pending_handles() {
        let (tx_a, a) = fake_pending("slow");
        let (tx_b, b) = fake_pending("fast");
        let (_cancel_tx, cancel_rx) = unbounded();

        tx_b.send(outcome("fast", Some((10, 10)))).unwrap();

        let report = wait_ready(vec![a, b], Duration::from_millis(50), &cancel_rx);
        assert!(report.timed_out);
        assert_eq!(report.settled.len(), 1);
        assert_eq!(report.still_pending.len(), 1);
        assert_eq!(report.still_pending[0].request.url, "slow");

        // A late settle is still observable through the returned handle.
        tx_a.send(outcome("slow", Some((1, 1)))).unwrap();
        assert!(report.still_pending[0].outcome_rx.try_recv().is_ok());
    }

    #[test]
    fn cancel_aborts_the_wait_immediately() {
        let (_tx, pending) = fake_pending("never");
        let (cancel_tx, cancel_rx) = unbounded();
        cancel_tx.send(()).unwrap();

        let started = Instant::now();
        let report = wait_ready(vec![pending], Duration::from_secs(5), &cancel_rx);
        assert!(report.cancelled);
        assert_eq!(report.still_pending.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn failed_probe_counts_as_settled() {
        let (tx, pending) = fake_pending("broken");
        let (_cancel_tx, cancel_rx) = unbounded();
        tx.send(ProbeOutcome {
            url: "broken".into(),
            kind: ResourceKind::Image,
            dimensions: None,
            error: Some(anyhow!("boom")),
        })
        .unwrap();

        let report = wait_ready(vec![pending], Duration::from_secs(1), &cancel_rx);
        assert_eq!(report.settled.len(), 1);
        assert!(report.settled[0].error.is_some());
    }
}
