//! Shared test doubles for dispatcher integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use renderpool_backend::api::{BackendApiError, RenderBackend};
use renderpool_backend::engine::{CompletionResult, RenderEngine};
use renderpool_backend::{shared_pool, SharedPool};
use renderpool_core::{JobDescription, RenderRequest, RendererType, SlotInfo, SlotPool};
use renderpool_worker::dispatcher::{Dispatcher, HostError, RenderHost};
use renderpool_worker::queue::{JobMode, TargetId};
use tokio::sync::{mpsc, Semaphore};

/// First ID handed out by [`RecordingHost::create_placeholder`].
pub const FIRST_PLACEHOLDER: TargetId = 1000;

pub fn png_body() -> String {
    let img = RgbaImage::from_pixel(2, 2, Rgba([200, 100, 50, 255]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    serde_json::json!({ "images": [BASE64.encode(buf.into_inner())] }).to_string()
}

// ---------------------------------------------------------------------------
// Backend double
// ---------------------------------------------------------------------------

/// Always answers with a small PNG. Optionally holds each reply until a
/// gate permit is available, and tracks concurrent calls per URL.
#[derive(Default)]
pub struct GatedBackend {
    gate: Option<Arc<Semaphore>>,
    pub calls: AtomicUsize,
    in_flight: Mutex<Vec<String>>,
    pub max_per_url: AtomicUsize,
}

impl GatedBackend {
    pub fn open() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

#[async_trait]
impl RenderBackend for GatedBackend {
    async fn render(
        &self,
        url: &str,
        _body: &serde_json::Value,
    ) -> Result<String, BackendApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut in_flight = self.in_flight.lock();
            in_flight.push(url.to_string());
            let same = in_flight.iter().filter(|u| *u == url).count();
            self.max_per_url.fetch_max(same, Ordering::SeqCst);
        }

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        {
            let mut in_flight = self.in_flight.lock();
            if let Some(pos) = in_flight.iter().position(|u| u == url) {
                in_flight.remove(pos);
            }
        }
        Ok(png_body())
    }
}

// ---------------------------------------------------------------------------
// Host double
// ---------------------------------------------------------------------------

pub type Completion = (TargetId, JobMode, CompletionResult);

/// Records every job it builds and forwards completions to a channel.
pub struct RecordingHost {
    pub built: Mutex<Vec<(JobMode, TargetId)>>,
    pub placeholders: Mutex<Vec<TargetId>>,
    next_placeholder: AtomicU64,
    /// Targets for which `build_job` / `default_job` fail.
    pub failing: Mutex<HashSet<TargetId>>,
    /// When set, the next `build_job` swaps the pool for a single fresh
    /// local slot before returning, like a concurrent `reset_pool`.
    pub reset_on_build: Mutex<Option<SharedPool>>,
    done_tx: mpsc::UnboundedSender<Completion>,
}

impl RecordingHost {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Completion>) {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let host = Arc::new(Self {
            built: Mutex::new(Vec::new()),
            placeholders: Mutex::new(Vec::new()),
            next_placeholder: AtomicU64::new(FIRST_PLACEHOLDER),
            failing: Mutex::new(HashSet::new()),
            reset_on_build: Mutex::new(None),
            done_tx,
        });
        (host, done_rx)
    }

    pub fn built_targets(&self) -> Vec<TargetId> {
        self.built.lock().iter().map(|(_, t)| *t).collect()
    }

    fn job_for(&self, mode: JobMode, target: TargetId) -> Result<JobDescription, HostError> {
        if self.failing.lock().contains(&target) {
            return Err(format!("target {target} was deleted").into());
        }
        self.built.lock().push((mode, target));
        Ok(JobDescription::new(RenderRequest::new(format!("target {target}")))?)
    }
}

impl RenderHost for RecordingHost {
    fn build_job(&self, mode: JobMode, target: TargetId) -> Result<JobDescription, HostError> {
        if let Some(pool) = self.reset_on_build.lock().take() {
            let mut pool = pool.lock();
            pool.remove_all();
            pool.add_slot(local(7861))?;
        }
        self.job_for(mode, target)
    }

    fn create_placeholder(&self) -> TargetId {
        let id = self.next_placeholder.fetch_add(1, Ordering::SeqCst);
        self.placeholders.lock().push(id);
        id
    }

    fn default_job(&self, target: TargetId) -> Result<JobDescription, HostError> {
        self.job_for(JobMode::Generate, target)
    }

    fn on_complete(&self, target: TargetId, mode: JobMode, result: CompletionResult) {
        let _ = self.done_tx.send((target, mode, result));
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn local(port: u16) -> SlotInfo {
    SlotInfo::new(format!("http://127.0.0.1:{port}"), RendererType::Automatic1111, true)
}

pub fn comfy(port: u16) -> SlotInfo {
    SlotInfo::new(format!("http://10.0.0.5:{port}"), RendererType::ComfyUI, false)
}

pub fn remote() -> SlotInfo {
    SlotInfo::new("https://render.example", RendererType::Remote, false)
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub host: Arc<RecordingHost>,
    pub done: mpsc::UnboundedReceiver<Completion>,
    pub backend: Arc<GatedBackend>,
}

pub fn harness(slots: Vec<SlotInfo>, backend: GatedBackend) -> Harness {
    let mut pool = SlotPool::new();
    for info in slots {
        pool.add_slot(info).unwrap();
    }
    let backend = Arc::new(backend);
    let engine = RenderEngine::new(
        shared_pool(pool),
        Arc::clone(&backend) as Arc<dyn RenderBackend>,
    );
    let (host, done) = RecordingHost::new();
    let dispatcher = Dispatcher::new(engine, Arc::clone(&host) as Arc<dyn RenderHost>)
        .with_tick_interval(Duration::from_millis(10));
    Harness {
        dispatcher: Arc::new(dispatcher),
        host,
        done,
        backend,
    }
}

impl Harness {
    pub fn is_busy(&self, id: u32) -> bool {
        self.dispatcher.engine().pool().lock().is_busy(id).unwrap()
    }

    /// Wait for the next completion delivered to the host.
    pub async fn next_completion(&mut self) -> Completion {
        tokio::time::timeout(Duration::from_secs(5), self.done.recv())
            .await
            .expect("timed out waiting for completion")
            .expect("host channel closed")
    }

    pub async fn wait_in_flight(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.backend.in_flight() < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("jobs never reached the backend");
    }
}
