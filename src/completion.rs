//! Synchronous and deferred request completion.
//!
//! ```text
//! submit ──► Submitted ──┬── sync ──────────────────────────► Completed
//!                        └── deferred ── delay ── transfer ──► Completed
//! ```
//!
//! A deferred request is handed to the [`Scheduler`] and runs once the
//! configured delay has passed, taking the store guard for each segment like
//! any other caller. Its notifier fires exactly once. Two deferred requests
//! against the same store complete in no particular order.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    scheduler::Scheduler,
    store::{SparseStore, Store},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Read,
    Write,
}

/// A scatter/gather transfer starting at `offset`. Each segment is one store
/// call at the running offset, so a segment never spans more than one block.
#[derive(Debug, Clone)]
pub struct Request {
    kind: Kind,
    offset: u64,
    segments: Vec<Vec<u8>>,
    sync: bool,
}

impl Request {
    /// Reads into segments of the given lengths.
    pub fn read(offset: u64, lens: impl IntoIterator<Item = usize>) -> Self {
        Self {
            kind: Kind::Read,
            offset,
            segments: lens.into_iter().map(|len| vec![0u8; len]).collect(),
            sync: false,
        }
    }

    pub fn write(offset: u64, segments: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            kind: Kind::Write,
            offset,
            segments: segments.into_iter().collect(),
            sync: false,
        }
    }

    /// Complete inline instead of deferring.
    pub fn synchronous(mut self) -> Self {
        self.sync = true;
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_sync(&self) -> bool {
        self.sync
    }
}

/// Result of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub kind: Kind,
    pub transferred: usize,
    /// Offset just past the last transferred byte
    pub position: u64,
    /// Read data, each segment cut to what was actually read. Empty for writes.
    pub segments: Vec<Vec<u8>>,
}

impl Outcome {
    /// Byte count on success, negative error code otherwise.
    pub fn status(result: &Result<Outcome>) -> i64 {
        match result {
            Ok(outcome) => outcome.transferred as i64,
            Err(e) => i64::from(e.code()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Submitted,
    Deferred,
    Completed,
}

impl RequestState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => RequestState::Submitted,
            1 => RequestState::Deferred,
            _ => RequestState::Completed,
        }
    }
}

type Notifier = Box<dyn FnOnce(Result<Outcome>) + Send>;

/// Resolves to the outcome of a submitted request.
pub struct Completion {
    state: Arc<AtomicU8>,
    inner: Inner,
}

enum Inner {
    Ready(Option<Result<Outcome>>),
    Pending(oneshot::Receiver<Result<Outcome>>),
}

impl Completion {
    /// A request refused before it reached the queue.
    pub(crate) fn rejected(error: Error) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RequestState::Completed as u8)),
            inner: Inner::Ready(Some(Err(error))),
        }
    }

    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("state", &self.state())
            .finish()
    }
}

impl Future for Completion {
    type Output = Result<Outcome>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            Inner::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(Error::InvalidState("completion polled after it resolved".into()))
            })),
            Inner::Pending(rx) => Pin::new(rx).poll(cx).map(|received| {
                received.unwrap_or_else(|_| {
                    Err(Error::InvalidState("completion worker went away".into()))
                })
            }),
        }
    }
}

#[derive(Debug, Default)]
struct Stats {
    submitted: AtomicUsize,
    completed_sync: AtomicUsize,
    deferred: AtomicUsize,
    completed: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: usize,
    pub completed_sync: usize,
    pub deferred: usize,
    pub completed: usize,
}

/// Submits requests against one store.
pub struct CompletionQueue<S: Store + ?Sized = SparseStore> {
    store: Arc<S>,
    scheduler: Arc<Scheduler>,
    delay: Duration,
    stats: Arc<Stats>,
}

impl<S: Store + ?Sized> Clone for CompletionQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            scheduler: self.scheduler.clone(),
            delay: self.delay,
            stats: self.stats.clone(),
        }
    }
}

impl<S: Store + ?Sized + 'static> CompletionQueue<S> {
    pub fn new(store: Arc<S>, scheduler: Arc<Scheduler>, delay: Duration) -> Self {
        Self {
            store,
            scheduler,
            delay,
            stats: Arc::new(Stats::default()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Submits a request. Synchronous requests have already run when this
    /// returns; `cancel` only applies to them.
    pub async fn submit(&self, request: Request, cancel: &CancellationToken) -> Completion {
        let state = Arc::new(AtomicU8::new(RequestState::Submitted as u8));

        if request.sync {
            let result = self.run_inline(request, cancel).await;
            state.store(RequestState::Completed as u8, Ordering::SeqCst);
            return Completion {
                state,
                inner: Inner::Ready(Some(result)),
            };
        }

        // set before spawning so the worker's Completed is never overwritten
        state.store(RequestState::Deferred as u8, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let worker_state = state.clone();
        self.defer(
            request,
            Box::new(move |result| {
                worker_state.store(RequestState::Completed as u8, Ordering::SeqCst);
                // the caller may have stopped waiting
                let _ = tx.send(result);
            }),
        );
        Completion {
            state,
            inner: Inner::Pending(rx),
        }
    }

    /// Like [`submit`](Self::submit) but reports through `callback`, which is
    /// invoked exactly once.
    pub async fn submit_with<F>(
        &self,
        request: Request,
        cancel: &CancellationToken,
        callback: F,
    ) -> RequestState
    where
        F: FnOnce(Result<Outcome>) + Send + 'static,
    {
        if request.sync {
            callback(self.run_inline(request, cancel).await);
            return RequestState::Completed;
        }
        self.defer(request, Box::new(callback));
        RequestState::Deferred
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.stats.submitted.load(Ordering::SeqCst),
            completed_sync: self.stats.completed_sync.load(Ordering::SeqCst),
            deferred: self.stats.deferred.load(Ordering::SeqCst),
            completed: self.stats.completed.load(Ordering::SeqCst),
        }
    }

    async fn run_inline(&self, request: Request, cancel: &CancellationToken) -> Result<Outcome> {
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        let result = transfer(&*self.store, request, cancel).await;
        self.stats.completed_sync.fetch_add(1, Ordering::SeqCst);
        self.stats.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn defer(&self, request: Request, notify: Notifier) {
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        self.stats.deferred.fetch_add(1, Ordering::SeqCst);

        let store = self.store.clone();
        let stats = self.stats.clone();
        self.scheduler.spawn_after(self.delay, async move {
            // deferred work has no cancellation
            let cancel = CancellationToken::new();
            let result = transfer(&*store, request, &cancel).await;
            if let Err(e) = &result {
                tracing::debug!(error = %e, "Deferred request failed");
            }
            stats.completed.fetch_add(1, Ordering::SeqCst);
            notify(result);
        });
    }
}

/// One store call per segment at the running offset. A failure after some
/// bytes moved ends the request with the partial count.
async fn transfer<S: Store + ?Sized>(
    store: &S,
    request: Request,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    let Request {
        kind,
        offset,
        mut segments,
        ..
    } = request;
    let mut position = offset;
    let mut transferred = 0usize;
    let mut done = 0usize;

    for segment in segments.iter_mut() {
        let result = match kind {
            Kind::Read => store.read_at(position, segment, cancel).await,
            Kind::Write => store.write_at(position, segment, cancel).await,
        };
        match result {
            Ok(n) => {
                if kind == Kind::Read {
                    segment.truncate(n);
                }
                position += n as u64;
                transferred += n;
                done += 1;
            }
            Err(e) if transferred == 0 => return Err(e),
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    transferred,
                    "Request stopped after a partial transfer"
                );
                break;
            }
        }
    }

    match kind {
        Kind::Read => {
            for segment in &mut segments[done..] {
                segment.clear();
            }
        }
        Kind::Write => segments.clear(),
    }

    Ok(Outcome {
        kind,
        transferred,
        position,
        segments,
    })
}
