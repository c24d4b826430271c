//! Worker threads with cooperative cancellation and a bounded shutdown.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Shared stop signal. Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What the pool hears from its workers.
#[derive(Debug)]
pub enum Event<T> {
    /// A worker produced a result. Workers may report more than once.
    Report { worker: usize, result: T },
    /// A worker's job returned or panicked. Sent exactly once per worker.
    Exited { worker: usize },
}

/// A worker's view of its pool.
pub struct WorkerContext<T> {
    id: usize,
    cancel: CancelToken,
    events: Sender<Event<T>>,
}

impl<T> WorkerContext<T> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sends `result` to the pool. Returns false once nobody is listening.
    pub fn report(&self, result: T) -> bool {
        self.events
            .send(Event::Report {
                worker: self.id,
                result,
            })
            .is_ok()
    }
}

/// Announces a worker's exit however its job ends, panics included.
struct ExitGuard<T> {
    worker: usize,
    events: Sender<Event<T>>,
    live: Arc<AtomicUsize>,
}

impl<T> Drop for ExitGuard<T> {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        let _ = self.events.send(Event::Exited {
            worker: self.worker,
        });
    }
}

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub joined: usize,
    /// Workers still running after the grace period, left detached.
    pub abandoned: usize,
}

/// A fixed set of named OS threads running the same job.
///
/// Dropping the pool cancels it but does not wait; call
/// [`shutdown`](WorkerPool::shutdown) to reap the workers.
pub struct WorkerPool<T> {
    handles: Vec<(usize, JoinHandle<()>)>,
    exited: Vec<bool>,
    events: Receiver<Event<T>>,
    cancel: CancelToken,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Starts `count` workers running `job`.
    ///
    /// `live` counts running workers; it is incremented per spawned thread and
    /// decremented as each one exits. If the first thread cannot be spawned
    /// the error is returned; later failures shrink the pool instead.
    pub fn spawn<F>(
        count: usize,
        name: &str,
        live: Arc<AtomicUsize>,
        cancel: CancelToken,
        job: F,
    ) -> io::Result<Self>
    where
        F: Fn(&WorkerContext<T>) + Send + Sync + 'static,
    {
        let (sender, events) = mpsc::channel();
        let job = Arc::new(job);
        let mut handles = Vec::with_capacity(count);

        for id in 0..count {
            let context = WorkerContext {
                id,
                cancel: cancel.clone(),
                events: sender.clone(),
            };
            let guard = ExitGuard {
                worker: id,
                events: sender.clone(),
                live: Arc::clone(&live),
            };
            let job = Arc::clone(&job);

            live.fetch_add(1, Ordering::SeqCst);
            let spawned = thread::Builder::new()
                .name(format!("{name}-{id}"))
                .spawn(move || {
                    let _guard = guard;
                    job(&context);
                });

            match spawned {
                Ok(handle) => {
                    debug!(worker = id, "worker started");
                    handles.push((id, handle));
                }
                Err(err) => {
                    // The closure, and the guard inside it, was dropped
                    // unrun; its decrement already happened.
                    if handles.is_empty() {
                        cancel.cancel();
                        return Err(err);
                    }
                    warn!(
                        worker = id,
                        %err,
                        started = handles.len(),
                        "could not start every worker"
                    );
                    break;
                }
            }
        }

        let exited = vec![false; handles.len()];
        Ok(Self {
            handles,
            exited,
            events,
            cancel,
        })
    }
}

impl<T> WorkerPool<T> {
    /// Number of workers actually started.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Workers that have not been seen exiting.
    pub fn running(&self) -> usize {
        self.exited.iter().filter(|&&exited| !exited).count()
    }

    /// Waits up to `timeout` for the next event.
    pub fn next_event(&mut self, timeout: Duration) -> Result<Event<T>, RecvTimeoutError> {
        let event = self.events.recv_timeout(timeout)?;
        if let Event::Exited { worker } = event {
            self.mark_exited(worker);
        }
        Ok(event)
    }

    /// Cancels every worker, waits up to `grace` for them to exit and joins
    /// them. Stragglers are detached. Late reports are discarded.
    pub fn shutdown(&mut self, grace: Duration) -> ShutdownReport {
        self.cancel.cancel();
        let deadline = Instant::now() + grace;

        while self.running() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.events.recv_timeout(remaining) {
                Ok(Event::Exited { worker }) => self.mark_exited(worker),
                Ok(Event::Report { .. }) => {}
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    // Every guard has been dropped.
                    self.exited.iter_mut().for_each(|exited| *exited = true);
                }
            }
        }

        let mut report = ShutdownReport::default();
        for (id, handle) in std::mem::take(&mut self.handles) {
            if self.exited.get(id).copied().unwrap_or(false) {
                if handle.join().is_err() {
                    warn!(worker = id, "worker panicked");
                }
                report.joined += 1;
            } else {
                warn!(
                    worker = id,
                    grace_ms = grace.as_millis() as u64,
                    "worker ignored cancellation, detaching"
                );
                report.abandoned += 1;
            }
        }
        debug!(joined = report.joined, abandoned = report.abandoned, "pool shut down");
        report
    }

    fn mark_exited(&mut self, worker: usize) {
        if let Some(exited) = self.exited.get_mut(worker) {
            *exited = true;
        }
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
