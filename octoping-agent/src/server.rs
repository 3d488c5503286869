//! Listener supervisor
//!
//! Runs long-lived listeners (probe loops, the status endpoint) under one
//! cancellation token:
//! - listeners start in registration order; a listener registered with
//!   `ready_required` blocks startup until it calls [`Ready::ready`]
//! - the first error returned by any task is latched and cancels all others
//! - an optional limit bounds the number of running task bodies, including
//!   sub-tasks scheduled through [`Runner::run`]
//! - SIGTERM/SIGINT cancel the token and trigger graceful shutdown

use anyhow::anyhow;
use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How often the steady-state loop checks for remaining work
const STEADY_STATE_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unimplemented")]
    Unimplemented,

    #[error("too many running tasks (limit {0})")]
    TooManyTasks(usize),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    #[error("server: {0:#}")]
    Task(#[source] anyhow::Error),
}

/// A long-lived unit of work supervised by [`Server`].
#[async_trait]
pub trait Listener: Send + Sync {
    /// Runs until `token` is cancelled or the listener fails.
    async fn start(
        &self,
        token: CancellationToken,
        ready: Ready,
        run: Runner,
    ) -> anyhow::Result<()>;
}

/// Listener without an implementation. Always fails with
/// [`ServerError::Unimplemented`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Unimplemented;

#[async_trait]
impl Listener for Unimplemented {
    async fn start(
        &self,
        _token: CancellationToken,
        _ready: Ready,
        _run: Runner,
    ) -> anyhow::Result<()> {
        Err(ServerError::Unimplemented.into())
    }
}

/// Readiness callback handed to each listener.
///
/// Consuming `self` makes readiness a one-shot signal. Listeners that were
/// not registered as `ready_required` may call it anyway; it is a no-op.
#[derive(Debug)]
pub struct Ready {
    tx: Option<oneshot::Sender<()>>,
}

impl Ready {
    pub fn ready(self) {
        if let Some(tx) = self.tx {
            let _ = tx.send(());
        }
    }
}

/// Run-helper for scheduling sub-tasks under the server's supervision.
#[derive(Clone)]
pub struct Runner {
    shared: Arc<Shared>,
}

impl Runner {
    /// Spawns `task` as a supervised sub-task. Exceeding the concurrency
    /// limit fails and is latched as the server's error.
    pub fn run<F>(&self, task: F) -> Result<(), ServerError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.shared.spawn(task)
    }

    pub fn token(&self) -> CancellationToken {
        self.shared.token.clone()
    }
}

#[derive(Clone)]
struct Limit {
    sem: Arc<Semaphore>,
    capacity: usize,
}

struct Shared {
    token: CancellationToken,
    tracker: TaskTracker,
    limit: RwLock<Option<Limit>>,
    err: Mutex<Option<anyhow::Error>>,
}

impl Shared {
    fn spawn<F>(self: &Arc<Self>, task: F) -> Result<(), ServerError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let permit = self.admit()?;
        let shared = Arc::clone(self);

        self.tracker.spawn(async move {
            let _permit = permit;
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => shared.fail(e),
                Err(_) => shared.fail(anyhow!("task panicked")),
            }
        });

        Ok(())
    }

    fn admit(&self) -> Result<Option<OwnedSemaphorePermit>, ServerError> {
        let limit = self
            .limit
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(limit) = limit else {
            return Ok(None);
        };

        match Arc::clone(&limit.sem).try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => {
                self.fail(ServerError::TooManyTasks(limit.capacity).into());
                Err(ServerError::TooManyTasks(limit.capacity))
            }
        }
    }

    /// Latches the first error and cancels every sibling.
    fn fail(&self, e: anyhow::Error) {
        let mut slot = self.err.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!("Dropping error after first failure: {:#}", e);
            return;
        }

        error!("Task failed: {:#}", e);
        *slot = Some(e);
        self.token.cancel();
    }

    fn take_error(&self) -> Option<anyhow::Error> {
        self.err
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Supervisor for a group of listeners sharing one lifetime.
///
/// ```no_run
/// # use octoping_agent::server::{Server, Unimplemented};
/// # use tokio_util::sync::CancellationToken;
/// # async fn run() -> Result<(), octoping_agent::server::ServerError> {
/// let mut server = Server::new(&CancellationToken::new());
/// server.listen(Unimplemented, false);
/// server.wait().await
/// # }
/// ```
pub struct Server {
    shared: Arc<Shared>,
    listeners: Vec<(Arc<dyn Listener>, bool)>,
}

impl Server {
    /// Create a server whose token is a child of `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                token: parent.child_token(),
                tracker: TaskTracker::new(),
                limit: RwLock::new(None),
                err: Mutex::new(None),
            }),
            listeners: Vec::new(),
        }
    }

    /// The token shared by every supervised task
    pub fn token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    pub fn runner(&self) -> Runner {
        Runner {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Register a listener. It is started by [`Server::wait`].
    pub fn listen<L>(&mut self, listener: L, ready_required: bool)
    where
        L: Listener + 'static,
    {
        self.listeners.push((Arc::new(listener), ready_required));
    }

    /// Bound the number of concurrently running tasks; `None` removes the
    /// bound.
    ///
    /// # Panics
    ///
    /// Panics if any task is running.
    pub fn set_limit(&mut self, limit: Option<usize>) {
        let running = self.shared.tracker.len();
        assert!(
            running == 0,
            "server: modify limit while {} tasks run",
            running
        );

        let mut slot = self
            .shared
            .limit
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = limit.map(|capacity| Limit {
            sem: Arc::new(Semaphore::new(capacity)),
            capacity,
        });
    }

    pub fn limit(&self) -> Option<usize> {
        self.shared
            .limit
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.capacity)
    }

    /// Start all listeners and block until the group shuts down.
    ///
    /// Returns the first task error, wrapped in [`ServerError::Task`], or
    /// `Ok(())` on a signal, on cancellation of the parent token, or once
    /// no task is left running.
    pub async fn wait(self) -> Result<(), ServerError> {
        let mut signals = Signals::new().map_err(ServerError::Signal)?;
        let Server { shared, listeners } = self;
        let token = shared.token.clone();
        let total = listeners.len();

        for (index, (listener, ready_required)) in listeners.into_iter().enumerate() {
            if token.is_cancelled() {
                warn!(
                    "Startup aborted, {} of {} listeners not started",
                    total - index,
                    total
                );
                break;
            }

            let (tx, rx) = oneshot::channel();
            let ready = Ready {
                tx: ready_required.then_some(tx),
            };
            let run = Runner {
                shared: Arc::clone(&shared),
            };
            let child = token.clone();

            if shared
                .spawn(async move { listener.start(child, ready, run).await })
                .is_err()
            {
                break;
            }

            if !ready_required {
                continue;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = signals.recv() => {
                    info!("Shutdown signal received during startup");
                    token.cancel();
                    break;
                }
                _ = rx => {
                    debug!("Listener {} ready", index);
                }
            }
        }

        let mut ticker = tokio::time::interval(STEADY_STATE_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = signals.recv() => {
                    info!("Shutdown signal received");
                    token.cancel();
                }
                _ = ticker.tick() => {
                    if shared.tracker.is_empty() {
                        debug!("No running tasks left, shutting down");
                        token.cancel();
                    }
                }
            }
        }

        shared.tracker.close();
        shared.tracker.wait().await;

        match shared.take_error() {
            Some(e) => Err(ServerError::Task(e)),
            None => Ok(()),
        }
    }
}

/// Termination and interrupt signals
struct Signals {
    #[cfg(unix)]
    term: tokio::signal::unix::Signal,
    #[cfg(unix)]
    int: tokio::signal::unix::Signal,
}

impl Signals {
    #[cfg(unix)]
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            term: signal(SignalKind::terminate())?,
            int: signal(SignalKind::interrupt())?,
        })
    }

    #[cfg(not(unix))]
    fn new() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        tokio::select! {
            _ = self.term.recv() => {}
            _ = self.int.recv() => {}
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        let _ = tokio::signal::ctrl_c().await;
    }
}
