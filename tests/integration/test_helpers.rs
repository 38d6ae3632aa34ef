//! Shared fakes and pipeline construction for intake integration tests.
//!
//! The fakes stand in for the screenshot source, the recognition service and
//! the marketplace so tests can script per-screenshot outcomes, hold any
//! stage mid-flight, and observe call order. Persistence is a real
//! in-memory `SQLite` database, wrapped so working-set reads can be held too.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, Notify};

use inventory_intake::catalog::{Catalog, CatalogEntry};
use inventory_intake::market::enricher::MarketEnricher;
use inventory_intake::market::{MarketplaceClient, TopOrders};
use inventory_intake::models::item::WorkingSetItem;
use inventory_intake::models::report::BatchReport;
use inventory_intake::models::screenshot::PendingScreenshot;
use inventory_intake::models::session::{Session, SessionKind};
use inventory_intake::orchestrator::intake::BatchIntake;
use inventory_intake::orchestrator::ports::{ChannelReportSink, WorkingSetStore};
use inventory_intake::orchestrator::registry::RunRegistry;
use inventory_intake::orchestrator::worker::{BatchWorker, WorkerDeps, WorkerSettings};
use inventory_intake::persistence::db;
use inventory_intake::persistence::item_repo::ItemRepo;
use inventory_intake::persistence::session_repo::SessionRepo;
use inventory_intake::recognition::{ExtractedLine, Recognizer};
use inventory_intake::retry::RetryPolicy;
use inventory_intake::screenshot::ScreenshotSource;
use inventory_intake::{AppError, Result};

pub const ITEM_PAGE_BASE: &str = "https://market.test/items";

/// Catalog used by most tests.
pub fn test_catalog() -> Catalog {
    Catalog::from_entries([
        entry("wisp-prime-chassis", "Висп Прайм: Каркас"),
        entry("wisp-prime-blueprint", "Висп Прайм (Чертеж)"),
        entry("ash-prime-systems", "Эш Прайм: Системы"),
        entry("forma", "Форма"),
    ])
}

fn entry(id: &str, name: &str) -> CatalogEntry {
    CatalogEntry {
        catalog_id: id.to_owned(),
        display_name: name.to_owned(),
    }
}

// ── Hold points ──────────────────────────────────────────

/// Named hold points for a fake.
///
/// Every call through [`Gates::pass`] announces its key on the started
/// channel, then waits if the key is held. [`Gates::release`] lets the held
/// call through and forgets the hold.
pub struct Gates {
    held: Mutex<HashMap<String, Arc<Notify>>>,
    started_tx: mpsc::UnboundedSender<String>,
}

impl Gates {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        (
            Self {
                held: Mutex::new(HashMap::new()),
                started_tx,
            },
            started_rx,
        )
    }

    pub fn hold(&self, key: &str) {
        self.held
            .lock()
            .unwrap()
            .insert(key.to_owned(), Arc::new(Notify::new()));
    }

    pub fn release(&self, key: &str) {
        if let Some(gate) = self.held.lock().unwrap().remove(key) {
            gate.notify_one();
        }
    }

    async fn pass(&self, key: &str) {
        let _ = self.started_tx.send(key.to_owned());
        let gate = self.held.lock().unwrap().get(key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

// ── Screenshot source ────────────────────────────────────

/// Returns the handle itself as the image bytes.
pub struct FakeSource {
    gates: Gates,
    failing: Mutex<HashSet<String>>,
}

impl FakeSource {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (gates, started) = Gates::new();
        (
            Self {
                gates,
                failing: Mutex::new(HashSet::new()),
            },
            started,
        )
    }

    /// Block the fetch of `handle` until released.
    pub fn hold(&self, handle: &str) {
        self.gates.hold(handle);
    }

    pub fn release(&self, handle: &str) {
        self.gates.release(handle);
    }

    /// Make fetches of `handle` fail.
    pub fn fail(&self, handle: &str) {
        self.failing.lock().unwrap().insert(handle.to_owned());
    }
}

impl ScreenshotSource for FakeSource {
    fn fetch_bytes<'a>(&'a self, screenshot: &'a PendingScreenshot) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            self.gates.pass(&screenshot.handle).await;
            if self.failing.lock().unwrap().contains(&screenshot.handle) {
                return Err(AppError::Screenshot(format!("cannot fetch {}", screenshot.handle)));
            }
            Ok(Bytes::from(screenshot.handle.clone().into_bytes()))
        })
    }
}

// ── Recognizer ───────────────────────────────────────────

/// Scripted recognition keyed by image bytes (the handle).
pub struct FakeRecognizer {
    gates: Gates,
    scripts: Mutex<HashMap<String, Option<Vec<ExtractedLine>>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRecognizer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (gates, started) = Gates::new();
        (
            Self {
                gates,
                scripts: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            },
            started,
        )
    }

    /// Keep recognition of `handle` in flight until released.
    pub fn hold(&self, handle: &str) {
        self.gates.hold(handle);
    }

    pub fn release(&self, handle: &str) {
        self.gates.release(handle);
    }

    /// Answer `lines` for `handle`.
    pub fn script(&self, handle: &str, lines: &[(&str, u32)]) {
        let lines = lines
            .iter()
            .map(|(name, quantity)| ExtractedLine::new(*name, *quantity))
            .collect();
        self.scripts
            .lock()
            .unwrap()
            .insert(handle.to_owned(), Some(lines));
    }

    /// Fail recognition for `handle`.
    pub fn fail(&self, handle: &str) {
        self.scripts.lock().unwrap().insert(handle.to_owned(), None);
    }

    /// Handles recognized so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Recognizer for FakeRecognizer {
    fn recognize(&self, image: Bytes) -> BoxFuture<'_, Result<Vec<ExtractedLine>>> {
        Box::pin(async move {
            let handle = String::from_utf8(image.to_vec()).unwrap();
            self.calls.lock().unwrap().push(handle.clone());
            self.gates.pass(&handle).await;
            match self.scripts.lock().unwrap().get(&handle) {
                Some(Some(lines)) => Ok(lines.clone()),
                Some(None) => Err(AppError::Recognition(format!("model refused {handle}"))),
                None => Ok(Vec::new()),
            }
        })
    }
}

// ── Marketplace ──────────────────────────────────────────

/// Per-id queue of answers; an id without answers fails with `Market`.
pub struct FakeMarket {
    gates: Gates,
    answers: Mutex<HashMap<String, VecDeque<Result<TopOrders>>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeMarket {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (gates, started) = Gates::new();
        (
            Self {
                gates,
                answers: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            },
            started,
        )
    }

    /// Keep the next lookup of `catalog_id` in flight until released.
    pub fn hold(&self, catalog_id: &str) {
        self.gates.hold(catalog_id);
    }

    pub fn release(&self, catalog_id: &str) {
        self.gates.release(catalog_id);
    }

    pub fn push(&self, catalog_id: &str, sell: &[f64], buy: &[f64]) {
        self.answers
            .lock()
            .unwrap()
            .entry(catalog_id.to_owned())
            .or_default()
            .push_back(Ok(TopOrders {
                sell: sell.to_vec(),
                buy: buy.to_vec(),
            }));
    }

    pub fn push_error(&self, catalog_id: &str, err: AppError) {
        self.answers
            .lock()
            .unwrap()
            .entry(catalog_id.to_owned())
            .or_default()
            .push_back(Err(err));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl MarketplaceClient for FakeMarket {
    fn fetch_top_orders<'a>(&'a self, catalog_id: &'a str) -> BoxFuture<'a, Result<TopOrders>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(catalog_id.to_owned());
            self.gates.pass(catalog_id).await;
            self.answers
                .lock()
                .unwrap()
                .get_mut(catalog_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(AppError::Market(format!("no answer for {catalog_id}"))))
        })
    }
}

// ── Working-set store ────────────────────────────────────

/// `ItemRepo` whose reads can be held per session.
pub struct GatedStore {
    inner: ItemRepo,
    gates: Gates,
}

impl GatedStore {
    pub fn new(inner: ItemRepo) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (gates, started) = Gates::new();
        (Self { inner, gates }, started)
    }

    /// Keep the next working-set read of `session_id` in flight until released.
    pub fn hold_read(&self, session_id: &str) {
        self.gates.hold(session_id);
    }

    pub fn release_read(&self, session_id: &str) {
        self.gates.release(session_id);
    }
}

impl WorkingSetStore for GatedStore {
    fn get_items<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Vec<WorkingSetItem>>> {
        Box::pin(async move {
            self.gates.pass(session_id).await;
            self.inner.list_for_session(session_id).await
        })
    }

    fn replace_items<'a>(
        &'a self,
        session_id: &'a str,
        items: &'a [WorkingSetItem],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.inner.replace_for_session(session_id, items).await })
    }
}

// ── Harness ──────────────────────────────────────────────

pub struct Harness {
    pub intake: Arc<BatchIntake>,
    pub registry: Arc<RunRegistry>,
    pub session_repo: SessionRepo,
    pub item_repo: ItemRepo,
    pub reports: mpsc::Receiver<BatchReport>,
    /// Handles whose fetch has started.
    pub started: mpsc::UnboundedReceiver<String>,
    /// Handles whose recognition has started.
    pub recognizing: mpsc::UnboundedReceiver<String>,
    /// Catalog ids whose price lookup has started.
    pub pricing: mpsc::UnboundedReceiver<String>,
    /// Sessions whose working set is being read by the worker.
    pub reading: mpsc::UnboundedReceiver<String>,
    pub source: Arc<FakeSource>,
    pub recognizer: Arc<FakeRecognizer>,
    pub market: Arc<FakeMarket>,
    pub store: Arc<GatedStore>,
}

/// Settings with a check on every screenshot and no finalize on drain.
pub fn settings() -> WorkerSettings {
    WorkerSettings {
        session_check_interval: 1,
        report_preview_limit: 5,
        finalize_on_drain: false,
    }
}

pub async fn harness(settings: WorkerSettings, debounce: Duration) -> Harness {
    let db = Arc::new(db::connect_memory().await.expect("db connect"));
    let session_repo = SessionRepo::new(Arc::clone(&db));
    let item_repo = ItemRepo::new(Arc::clone(&db));

    let (source, started) = FakeSource::new();
    let source = Arc::new(source);
    let (recognizer, recognizing) = FakeRecognizer::new();
    let recognizer = Arc::new(recognizer);
    let (market, pricing) = FakeMarket::new();
    let market = Arc::new(market);
    let (store, reading) = GatedStore::new(item_repo.clone());
    let store = Arc::new(store);
    let catalog = Arc::new(test_catalog());
    let enricher = Arc::new(MarketEnricher::new(
        Arc::clone(&catalog),
        Arc::clone(&market) as Arc<dyn MarketplaceClient>,
        2,
        RetryPolicy::new(3, 1),
        ITEM_PAGE_BASE,
    ));
    let (sink, reports) = ChannelReportSink::new(16);
    let registry = Arc::new(RunRegistry::new());

    let deps = WorkerDeps {
        source: Arc::clone(&source) as Arc<dyn ScreenshotSource>,
        recognizer: Arc::clone(&recognizer) as Arc<dyn Recognizer>,
        catalog,
        enricher,
        gate: Arc::new(session_repo.clone()),
        store: Arc::clone(&store) as Arc<dyn WorkingSetStore>,
        sink: Arc::new(sink),
    };
    let worker = Arc::new(BatchWorker::new(deps, settings, Arc::clone(&registry)));
    let intake = BatchIntake::new(worker, debounce);

    Harness {
        intake,
        registry,
        session_repo,
        item_repo,
        reports,
        started,
        recognizing,
        pricing,
        reading,
        source,
        recognizer,
        market,
        store,
    }
}

/// Store an active session for `user` with the given screenshot limit.
pub async fn active_session(repo: &SessionRepo, user: &str, limit: u32) -> Session {
    let session = Session::new(
        user.to_owned(),
        SessionKind::Multishot,
        limit,
        chrono::Duration::minutes(60),
    );
    repo.create(&session).await.expect("create session")
}

/// Working set of a session.
pub async fn items(repo: &ItemRepo, session_id: &str) -> Vec<WorkingSetItem> {
    repo.list_for_session(session_id).await.expect("list items")
}

/// Wait until a fake announces `key` on its started channel.
pub async fn wait_started(started: &mut mpsc::UnboundedReceiver<String>, key: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(seen) = started.recv().await {
            if seen == key {
                return;
            }
        }
        panic!("started channel closed before {key}");
    })
    .await
    .expect("stage should start within timeout");
}

/// Receive the next report or fail after a timeout.
pub async fn next_report(reports: &mut mpsc::Receiver<BatchReport>) -> BatchReport {
    tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .expect("report within timeout")
        .expect("report channel open")
}
