//! Service group with graceful shutdown.
//!
//! A [`ServiceGroup`] runs one-shot routines and long-lived services. The
//! first routine or service error cancels the whole group. A stop signal
//! asks every service to shut down, waits for them up to a grace period,
//! then cancels the group.

use crate::error::BoxError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A long-lived component with an explicit stop.
#[async_trait]
pub trait Service: Send + Sync {
    /// Runs until finished or until `shutdown` is called.
    async fn run(&self) -> Result<(), BoxError>;

    /// Asks `run` to return. Must not wait for it.
    async fn shutdown(&self) -> Result<(), BoxError>;
}

/// Supervisor for routines and services.
///
/// Cheap to clone; clones share the same group.
#[derive(Clone)]
pub struct ServiceGroup {
    /// Cancelled when the group is stopping for good.
    root: CancellationToken,
    /// Cancelled when services should begin a graceful stop.
    grace: CancellationToken,
    /// Every routine and service.
    tasks: TaskTracker,
    /// Served services only.
    services: TaskTracker,
    first_error: Arc<Mutex<Option<BoxError>>>,
}

impl ServiceGroup {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            grace: CancellationToken::new(),
            tasks: TaskTracker::new(),
            services: TaskTracker::new(),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns a token cancelled when the group stops.
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Returns whether the group has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Runs a routine. An error cancels the group.
    pub fn start<F>(&self, routine: F)
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let group = self.clone();
        self.tasks.spawn(async move {
            if let Err(e) = routine.await {
                group.fail(e);
            }
        });
    }

    /// Runs a service until it returns or the group begins to stop.
    ///
    /// A stopping service gets until the group is cancelled to return from
    /// `run`; after that its task is aborted.
    pub fn serve<S>(&self, service: Arc<S>)
    where
        S: Service + ?Sized + 'static,
    {
        let group = self.clone();
        let fut = self.services.track_future(async move {
            if let Err(e) = group.serve_inner(service).await {
                group.fail(e);
            }
        });
        self.tasks.spawn(fut);
    }

    async fn serve_inner<S>(&self, service: Arc<S>) -> Result<(), BoxError>
    where
        S: Service + ?Sized + 'static,
    {
        let runner = Arc::clone(&service);
        let mut run = tokio::spawn(async move { runner.run().await });

        tokio::select! {
            result = &mut run => return flatten(result),
            _ = self.root.cancelled() => {}
            _ = self.grace.cancelled() => {}
        }

        let stopped = service.shutdown().await;
        let result = tokio::select! {
            biased;
            result = &mut run => flatten(result),
            _ = self.root.cancelled() => {
                tracing::warn!("Service still running at forced shutdown, aborting it");
                run.abort();
                match run.await {
                    Err(e) if e.is_cancelled() => Ok(()),
                    other => flatten(other),
                }
            }
        };
        stopped?;
        result
    }

    /// Waits for `signal`, then stops the group gracefully.
    ///
    /// Services get `delay` to finish after being asked to shut down; a
    /// zero delay waits for them indefinitely. If the group is cancelled
    /// before the signal arrives, services are told to stop as well.
    pub fn listen<F>(&self, signal: F, delay: Duration)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let group = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = signal => {
                    tracing::info!("Received stop signal, stopping services...");
                    group.drain(delay).await;
                }
                _ = group.root.cancelled() => {
                    group.grace.cancel();
                }
            }
        });
    }

    /// Stops the group on SIGINT or SIGTERM.
    pub fn listen_os(&self, delay: Duration) {
        self.listen(stop_signal(), delay);
    }

    /// Stops the group now, waiting for services without a deadline.
    pub async fn shutdown(&self) {
        self.drain(Duration::ZERO).await;
    }

    async fn drain(&self, delay: Duration) {
        self.grace.cancel();
        self.services.close();

        let graceful = if delay.is_zero() {
            tokio::select! {
                _ = self.services.wait() => true,
                _ = self.root.cancelled() => false,
            }
        } else {
            tokio::select! {
                result = tokio::time::timeout(delay, self.services.wait()) => result.is_ok(),
                _ = self.root.cancelled() => false,
            }
        };

        if graceful {
            tracing::info!("All services stopped gracefully");
        } else {
            tracing::warn!("Services did not stop in time, forcing shutdown");
        }
        self.root.cancel();
    }

    /// Waits for every routine and service, returning the first error.
    pub async fn wait(&self) -> Result<(), BoxError> {
        self.tasks.close();
        self.tasks.wait().await;
        match self.first_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail(&self, err: BoxError) {
        tracing::error!("Service group failed: {}", err);
        let mut first = self.first_error.lock();
        if first.is_none() {
            *first = Some(err);
        }
        drop(first);
        self.root.cancel();
    }
}

impl Default for ServiceGroup {
    fn default() -> Self {
        Self::new()
    }
}

fn flatten(
    result: Result<Result<(), BoxError>, tokio::task::JoinError>,
) -> Result<(), BoxError> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
async fn stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
