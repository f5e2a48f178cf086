//! SearchEngine - debounced, cancellable search over a shared store
//!
//! Concurrency model:
//! - One long-lived scheduler thread drains query submissions from a
//!   crossbeam channel, coalescing them until a submission's deadline passes
//!   with nothing newer queued.
//! - Each started query is a *generation*. Its cohort of workers runs on a
//!   dedicated rayon pool (low thread priority) over an immutable snapshot of
//!   the store and stops cooperatively when its `CancellationToken` fires.
//! - Before generation g+1 starts, generation g is cancelled and joined, so at
//!   most one cohort is live and results never interleave.
//! - The last worker of a cohort to exit sorts and delivers the hits, then
//!   fires `on_complete` once. Delivery stops as soon as the generation is no
//!   longer current.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};
use parking_lot::{Condvar, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::interface::{CodeLibError, CodeLibResult, Ranking, ResultCatcher};
use crate::ranking::{sort_hits, ScoringWeights};
use crate::search::{self, parse_query, Cohort, ParsedQuery, QueryPlan};
use crate::store::SnippetStore;

/// Store handle shared by the hosting session and the search engine.
pub type SharedStore = Arc<RwLock<SnippetStore>>;

/// Default debounce window for [`SearchEngine::submit_debounced`].
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Workers per generation; 0 means available hardware parallelism.
    pub worker_threads: usize,
    pub debounce: Duration,
    pub weights: ScoringWeights,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            debounce: DEFAULT_DEBOUNCE,
            weights: ScoringWeights::default(),
        }
    }
}

impl SearchOptions {
    fn resolved_workers(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    }
}

#[derive(Debug)]
struct PendingQuery {
    text: String,
    not_before: Instant,
    ticket: u64,
}

#[derive(Debug)]
enum Command {
    Query(PendingQuery),
    Cancel,
    Shutdown,
}

/// State read by the public handle, the scheduler and the workers.
struct Shared {
    generation: AtomicU64,
    /// Submission tickets handed out so far.
    submitted: AtomicU64,
    /// Every ticket up to this one was cancelled by [`SearchEngine::cancel`].
    cancelled_through: AtomicU64,
    /// Token of the live generation, if any.
    active: Mutex<Option<CancellationToken>>,
}

impl Shared {
    fn ticket_cancelled(&self, ticket: u64) -> bool {
        ticket <= self.cancelled_through.load(Ordering::Acquire)
    }
}

/// One-shot completion signal, released when a cohort has fully finished.
#[derive(Default)]
struct Latch {
    done: Mutex<bool>,
    cvar: Condvar,
}

impl Latch {
    fn release(&self) {
        *self.done.lock() = true;
        self.cvar.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cvar.wait(&mut done);
        }
    }
}

/// Releases the latch when dropped, including while unwinding.
struct LatchRelease<'a>(&'a Latch);

impl Drop for LatchRelease<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Everything a running generation's workers share.
struct LiveGeneration {
    cohort: Cohort,
    ticket: u64,
    started: Instant,
    shared: Arc<Shared>,
    catcher: Arc<dyn ResultCatcher>,
    latch: Latch,
}

impl LiveGeneration {
    fn is_current(&self) -> bool {
        !self.cohort.token.is_cancelled()
            && self.shared.generation.load(Ordering::Acquire) == self.cohort.generation
            && !self.shared.ticket_cancelled(self.ticket)
    }

    /// Runs on the last worker out.
    fn finish(&self) {
        let _release = LatchRelease(&self.latch);
        let cohort = &self.cohort;
        let mut hits = cohort.take_hits();

        if !self.is_current() {
            debug!(
                "event=search_generation module=engine status=cancelled generation={}",
                cohort.generation
            );
            return;
        }

        let ranking = cohort.plan.ranking();
        #[cfg(feature = "perf-log")]
        let t_sort = Instant::now();
        sort_hits(&mut hits, ranking);
        #[cfg(feature = "perf-log")]
        eprintln!(
            "[perf] scan={:.1}ms sort={:.1}ms hits={}",
            (t_sort - self.started).as_secs_f64() * 1000.0,
            t_sort.elapsed().as_secs_f64() * 1000.0,
            hits.len()
        );

        let total = hits.len();
        for hit in hits {
            if !self.is_current() {
                debug!(
                    "event=search_delivery module=engine status=superseded generation={}",
                    cohort.generation
                );
                return;
            }
            self.catcher
                .on_result(&cohort.keyword, &hit.snippet, hit.match_degree);
        }
        if !self.is_current() {
            return;
        }
        self.catcher.on_complete(&cohort.keyword, ranking);

        info!(
            "event=search_generation module=engine status=complete generation={} hits={} elapsed_ms={}",
            cohort.generation,
            total,
            self.started.elapsed().as_millis()
        );
    }
}

/// Counts a worker out of its cohort when dropped.
struct WorkerExit<'a>(&'a LiveGeneration);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        if self.0.cohort.leave() {
            self.0.finish();
        }
    }
}

fn worker_main(live: Arc<LiveGeneration>) {
    let _exit = WorkerExit(&live);
    search::run_worker(&live.cohort);
}

// ─────────────────────────────────────────────────────────────────────────────
// SCHEDULER
// ─────────────────────────────────────────────────────────────────────────────

struct Scheduler {
    rx: Receiver<Command>,
    store: SharedStore,
    catcher: Arc<dyn ResultCatcher>,
    shared: Arc<Shared>,
    pool: rayon::ThreadPool,
    workers: usize,
    weights: ScoringWeights,
    live: Option<Arc<LiveGeneration>>,
}

impl Scheduler {
    fn run(mut self) {
        while let Some(query) = self.next_query() {
            self.start_generation(query);
        }
        self.stop_live();
        debug!("event=scheduler module=engine status=stopped");
    }

    /// Block until a submission's deadline passes with no newer submission.
    /// `None` means shut down.
    fn next_query(&mut self) -> Option<PendingQuery> {
        let mut pending: Option<PendingQuery> = None;

        loop {
            let command = match pending.as_ref().map(|q| q.not_before) {
                None => self.rx.recv().ok()?,
                Some(not_before) => {
                    let now = Instant::now();
                    if not_before <= now {
                        return pending;
                    }
                    match self.rx.recv_timeout(not_before - now) {
                        Ok(command) => command,
                        Err(RecvTimeoutError::Timeout) => return pending,
                        Err(RecvTimeoutError::Disconnected) => return None,
                    }
                }
            };

            match command {
                Command::Query(query) => {
                    if let Some(prev) = pending.replace(query) {
                        debug!(
                            "event=query_coalesced module=engine status=discarded ticket={}",
                            prev.ticket
                        );
                    }
                }
                Command::Cancel => {
                    pending = None;
                    self.stop_live();
                }
                Command::Shutdown => return None,
            }
        }
    }

    /// Cancel the live cohort, if any, and wait for every worker to exit.
    fn stop_live(&mut self) {
        if let Some(live) = self.live.take() {
            live.cohort.token.cancel();
            live.latch.wait();
        }
    }

    fn start_generation(&mut self, query: PendingQuery) {
        self.stop_live();

        let token = CancellationToken::new();
        let generation = {
            let mut active = self.shared.active.lock();
            if self.shared.ticket_cancelled(query.ticket) {
                return;
            }
            *active = Some(token.clone());
            self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1
        };

        let plan = match parse_query(&query.text) {
            ParsedQuery::Blank => {
                debug!(
                    "event=search_generation module=engine status=blank generation={}",
                    generation
                );
                self.catcher.on_complete(&query.text, Ranking::MatchDegree);
                return;
            }
            ParsedQuery::BrowseAll => QueryPlan::BrowseAll,
            ParsedQuery::Terms(needles) => QueryPlan::Terms(needles),
        };

        let (snapshot, content_types) = {
            let store = self.store.read();
            (store.snapshot(), Arc::clone(store.content_types()))
        };
        let workers = self.workers.min(snapshot.len()).max(1);

        info!(
            "event=search_generation module=engine status=started generation={} snippets={} workers={}",
            generation,
            snapshot.len(),
            workers
        );

        let live = Arc::new(LiveGeneration {
            cohort: Cohort::new(
                generation,
                query.text,
                plan,
                snapshot,
                token,
                content_types,
                self.weights,
                workers,
            ),
            ticket: query.ticket,
            started: Instant::now(),
            shared: Arc::clone(&self.shared),
            catcher: Arc::clone(&self.catcher),
            latch: Latch::default(),
        });

        for _ in 0..workers {
            let live = Arc::clone(&live);
            self.pool.spawn(move || worker_main(live));
        }
        self.live = Some(live);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PUBLIC HANDLE
// ─────────────────────────────────────────────────────────────────────────────

/// Debounced, cancellable search over a [`SharedStore`].
///
/// The store must not be mutated while a generation is in flight if callers
/// expect results to reflect the mutation; each generation searches the
/// snapshot taken when it started.
///
/// Callbacks run on search worker threads (blank queries: on the scheduler
/// thread). They may call [`SearchEngine::cancel`] but must not drop the
/// engine.
pub struct SearchEngine {
    tx: Sender<Command>,
    shared: Arc<Shared>,
    debounce: Duration,
    scheduler: Option<JoinHandle<()>>,
}

impl SearchEngine {
    pub fn new(
        store: SharedStore,
        catcher: Arc<dyn ResultCatcher>,
        options: SearchOptions,
    ) -> CodeLibResult<Self> {
        let workers = options.resolved_workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("codelib-search-{}", i))
            .start_handler(|_| {
                // Keep the UI and scheduler responsive while a scan runs.
                use thread_priority::*;
                let _ = set_current_thread_priority(ThreadPriority::Min);
            })
            .panic_handler(|_| {
                error!("event=search_worker module=engine status=panicked");
            })
            .build()?;

        let shared = Arc::new(Shared {
            generation: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            cancelled_through: AtomicU64::new(0),
            active: Mutex::new(None),
        });
        let (tx, rx) = crossbeam_channel::unbounded();

        let scheduler = Scheduler {
            rx,
            store,
            catcher,
            shared: Arc::clone(&shared),
            pool,
            workers,
            weights: options.weights,
            live: None,
        };
        let handle = thread::Builder::new()
            .name("codelib-search-scheduler".to_string())
            .spawn(move || scheduler.run())
            .map_err(|e| {
                CodeLibError::Configuration(format!("failed to start search scheduler: {e}"))
            })?;

        info!(
            "event=search_engine module=engine status=started workers={} debounce_ms={}",
            workers,
            options.debounce.as_millis()
        );

        Ok(Self {
            tx,
            shared,
            debounce: options.debounce,
            scheduler: Some(handle),
        })
    }

    /// Queue `text` to start no earlier than `not_before`. Never blocks.
    ///
    /// A later submission that arrives before this deadline replaces it.
    pub fn submit_query(&self, text: impl Into<String>, not_before: Instant) {
        let ticket = self.shared.submitted.fetch_add(1, Ordering::AcqRel) + 1;
        let _ = self.tx.send(Command::Query(PendingQuery {
            text: text.into(),
            not_before,
            ticket,
        }));
    }

    /// Queue `text` with the configured debounce window.
    pub fn submit_debounced(&self, text: impl Into<String>) {
        self.submit_query(text, Instant::now() + self.debounce);
    }

    /// Queue `text` to start as soon as the scheduler picks it up.
    pub fn search_now(&self, text: impl Into<String>) {
        self.submit_query(text, Instant::now());
    }

    /// Cancel the live generation and every submission made so far.
    ///
    /// No result or completion for those is delivered after this returns,
    /// except for a callback already in progress.
    pub fn cancel(&self) {
        self.shared
            .cancelled_through
            .store(self.shared.submitted.load(Ordering::Acquire), Ordering::Release);
        if let Some(token) = self.shared.active.lock().take() {
            token.cancel();
        }
        let _ = self.tx.send(Command::Cancel);
    }

    /// Number of generations started so far.
    pub fn current_generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }
}

impl Drop for SearchEngine {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(token) = self.shared.active.lock().take() {
            token.cancel();
        }
        if let Some(handle) = self.scheduler.take() {
            if handle.join().is_err() {
                error!("event=scheduler module=engine status=panicked");
            }
        }
    }
}
