//! Dispatcher: worker pool for blocking engine calls
//!
//! The dispatcher owns the engine and a fixed pool of named worker threads.
//! Each worker owns one [`EngineContext`] (the engine's error list and IO
//! handlers) for its whole life and lends it to every job it runs.
//!
//! The host side is single-threaded. [`Dispatcher::submit`] never runs
//! engine code; completions only run when the host drives the dispatcher
//! with [`Dispatcher::poll`], [`Dispatcher::run_one`] or
//! [`Dispatcher::run_until_idle`], so they always execute on the thread that
//! submitted them.

use crate::config::{CompletionPanic, RuntimeConfig};
use crate::error::{ErrorKind, MapserverError};
use crate::task::{AsyncTask, Finisher, Job, TaskId};
use crate::translate::ErrorTranslator;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use mapserv_sdk::{EngineContext, EngineLocks, MapEngine};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Version information gathered once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Versions {
    /// Version of this bridge
    pub mapserv: String,
    /// Engine version string
    pub engine: String,
    /// Engine numeric version
    pub engine_numeric: Option<u32>,
    /// Engine build details
    pub engine_details: String,
}

/// What a job sees while it runs on a worker
pub struct WorkerScope<'a, E: MapEngine> {
    /// The engine
    pub engine: &'a E,
    /// This worker's engine context
    pub ctx: &'a mut EngineContext,
    /// Process-wide engine locks
    pub locks: &'a EngineLocks,
    worker: usize,
}

impl<E: MapEngine> WorkerScope<'_, E> {
    /// Index of the worker thread
    pub fn worker(&self) -> usize {
        self.worker
    }
}

struct Shared<E> {
    engine: E,
    locks: EngineLocks,
}

struct Envelope<E: MapEngine> {
    id: TaskId,
    name: &'static str,
    job: Job<E>,
}

/// Schedules [`AsyncTask`]s onto worker threads and runs their completions
/// on the host thread
pub struct Dispatcher<E: MapEngine> {
    shared: Arc<Shared<E>>,
    work_tx: Option<Sender<Envelope<E>>>,
    done_rx: Receiver<TaskId>,
    pending: RefCell<HashMap<TaskId, Finisher>>,
    backlog: RefCell<VecDeque<Envelope<E>>>,
    workers: Vec<JoinHandle<()>>,
    versions: Versions,
    on_panic: CompletionPanic,
}

impl<E: MapEngine> Dispatcher<E> {
    /// Check the engine, initialise it and start the worker pool
    pub fn start(engine: E, config: &RuntimeConfig) -> Result<Self, MapserverError> {
        let version = engine.version();
        if !version.supports_threads() {
            return Err(MapserverError::new(
                ErrorKind::Setup,
                "Mapserver is not compiled with support for threads",
            ));
        }

        let mut ctx = EngineContext::new();
        let status = engine.setup(&mut ctx);
        let chain = ErrorTranslator::snapshot(&mut ctx.errors);
        if !status.is_success() {
            return Err(ErrorTranslator::failure_or_fallback(ErrorKind::Setup, chain));
        }

        let versions = Versions {
            mapserv: env!("CARGO_PKG_VERSION").to_string(),
            engine: version.version,
            engine_numeric: version.numeric,
            engine_details: version.details,
        };

        let worker_count = config.dispatcher.effective_workers();
        let (work_tx, work_rx) = channel::bounded::<Envelope<E>>(config.dispatcher.queue_capacity.max(1));
        let (done_tx, done_rx) = channel::unbounded::<TaskId>();
        let shared = Arc::new(Shared {
            engine,
            locks: EngineLocks::new(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let rx = work_rx.clone();
            let tx = done_tx.clone();
            let shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("mapserv-worker-{}", i))
                .spawn(move || Self::worker_loop(i, shared, rx, tx));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    drop(work_tx);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(MapserverError::new(
                        ErrorKind::Setup,
                        format!("Failed to spawn worker thread: {}", e),
                    ));
                }
            }
        }

        info!(
            workers = worker_count,
            queue = config.dispatcher.queue_capacity,
            engine = %versions.engine,
            "dispatcher started"
        );

        Ok(Self {
            shared,
            work_tx: Some(work_tx),
            done_rx,
            pending: RefCell::new(HashMap::new()),
            backlog: RefCell::new(VecDeque::new()),
            workers,
            versions,
            on_panic: config.completion.on_panic,
        })
    }

    fn worker_loop(index: usize, shared: Arc<Shared<E>>, work_rx: Receiver<Envelope<E>>, done_tx: Sender<TaskId>) {
        debug!(worker = index, "worker started");
        let mut ctx = EngineContext::new();

        while let Ok(envelope) = work_rx.recv() {
            let Envelope { id, name, job } = envelope;
            trace!(worker = index, task = %id, op = name, "job started");
            {
                let mut scope = WorkerScope {
                    engine: &shared.engine,
                    ctx: &mut ctx,
                    locks: &shared.locks,
                    worker: index,
                };
                job(&mut scope);
            }
            if !ctx.is_clean() {
                warn!(worker = index, task = %id, op = name, errors = ctx.errors.len(), "job left engine state behind, resetting");
                ctx.reset();
            }
            if done_tx.send(id).is_err() {
                break;
            }
        }

        debug!(worker = index, "worker stopped");
    }

    /// Queue a task. Never blocks and never runs engine code.
    pub fn submit<I, O>(&self, task: AsyncTask<E, I, O>) -> TaskId
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let id = task.id();
        let name = task.name();
        let (job, finisher) = task.into_parts();
        self.pending.borrow_mut().insert(id, finisher);
        debug!(task = %id, op = name, "task submitted");

        let envelope = Envelope { id, name, job };
        if self.backlog.borrow().is_empty() {
            self.send(envelope);
        } else {
            self.backlog.borrow_mut().push_back(envelope);
        }
        id
    }

    fn send(&self, envelope: Envelope<E>) {
        let Some(tx) = self.work_tx.as_ref() else {
            self.abandon(envelope);
            return;
        };
        match tx.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                trace!(task = %envelope.id, "submission queue full, holding task");
                self.backlog.borrow_mut().push_back(envelope);
            }
            Err(TrySendError::Disconnected(envelope)) => self.abandon(envelope),
        }
    }

    fn flush_backlog(&self) {
        let Some(tx) = self.work_tx.as_ref() else {
            return;
        };
        loop {
            let Some(envelope) = self.backlog.borrow_mut().pop_front() else {
                break;
            };
            match tx.try_send(envelope) {
                Ok(()) => {}
                Err(TrySendError::Full(envelope)) => {
                    self.backlog.borrow_mut().push_front(envelope);
                    break;
                }
                Err(TrySendError::Disconnected(envelope)) => self.abandon(envelope),
            }
        }
    }

    /// No worker will run this job; complete it with an empty slot
    fn abandon(&self, envelope: Envelope<E>) {
        error!(task = %envelope.id, op = envelope.name, "no worker available for task");
        let finisher = self.pending.borrow_mut().remove(&envelope.id);
        if let Some(finisher) = finisher {
            self.complete(envelope.id, finisher);
        }
    }

    /// Run every completion that is ready without blocking.
    ///
    /// Returns the number of completions run.
    pub fn poll(&self) -> usize {
        self.flush_backlog();
        let mut completed = 0;
        loop {
            match self.done_rx.try_recv() {
                Ok(id) => {
                    if self.finish(id) {
                        completed += 1;
                    }
                    self.flush_backlog();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        completed
    }

    /// Block until one task completes and run its completion.
    ///
    /// Returns `false` immediately when nothing is pending.
    pub fn run_one(&self) -> bool {
        loop {
            self.flush_backlog();
            if self.pending.borrow().is_empty() {
                return false;
            }
            match self.done_rx.recv() {
                Ok(id) => {
                    if self.finish(id) {
                        self.flush_backlog();
                        return true;
                    }
                }
                Err(_) => return false,
            }
        }
    }

    /// Run completions until no task is pending
    pub fn run_until_idle(&self) -> usize {
        let mut completed = 0;
        while self.run_one() {
            completed += 1;
        }
        completed
    }

    fn finish(&self, id: TaskId) -> bool {
        let finisher = self.pending.borrow_mut().remove(&id);
        match finisher {
            Some(finisher) => {
                self.complete(id, finisher);
                true
            }
            None => {
                warn!(task = %id, "completion for unknown task");
                false
            }
        }
    }

    fn complete(&self, id: TaskId, finisher: Finisher) {
        match self.on_panic {
            CompletionPanic::Propagate => finisher(),
            CompletionPanic::Abort => {
                if panic::catch_unwind(AssertUnwindSafe(finisher)).is_err() {
                    error!(task = %id, "completion handler panicked, aborting");
                    std::process::abort();
                }
            }
        }
    }

    /// The engine being driven
    pub fn engine(&self) -> &E {
        &self.shared.engine
    }

    /// Version information gathered at startup
    pub fn versions(&self) -> &Versions {
        &self.versions
    }

    /// Number of submitted tasks whose completion has not run yet
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl<E: MapEngine> Drop for Dispatcher<E> {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().len();
        if pending > 0 {
            warn!(pending, "dispatcher dropped with tasks outstanding; their completions will not run");
        }
        self.backlog.get_mut().clear();
        self.work_tx = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
        self.pending.get_mut().clear();
        self.shared.engine.cleanup();
        debug!("dispatcher stopped");
    }
}
