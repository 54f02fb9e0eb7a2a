//! Bounded execution pool.
//!
//! The pool owns every engine session. A submission waits for capacity,
//! checks out an idle session (or opens one while below the maximum), runs
//! the invocation on a tracked task, and returns the session before the
//! capacity permit is released. Engine faults, panics and timeouts are all
//! converted into failure results; nothing escapes [`ExecutionPool::submit`]
//! as an error.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;

use crate::invocation::{Parameters, Target};
use crate::result::ExecutionResult;
use crate::scripting::engine::{ScriptEngine, ScriptError};

/// Sessions opened before the pool accepts work.
pub const DEFAULT_MIN_SIZE: usize = 4;

/// Failure detail for submissions rejected during shutdown.
pub const SHUTDOWN_MESSAGE: &str = "Execution pool is shutting down";

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_size: usize,
    /// `None` lets the pool grow on demand without bound.
    pub max_size: Option<usize>,
    /// Joins multiple output items into the result text.
    pub output_delimiter: String,
    /// `None` waits for the engine indefinitely.
    pub invocation_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            max_size: None,
            output_delimiter: "\n".to_string(),
            invocation_timeout: None,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if let Some(max) = self.max_size {
            if max == 0 {
                return Err(PoolError::InvalidConfig(
                    "maximum size must be at least 1".into(),
                ));
            }
            if max < self.min_size {
                return Err(PoolError::InvalidConfig(format!(
                    "maximum size {max} is below minimum size {}",
                    self.min_size
                )));
            }
        }
        if self.invocation_timeout.is_some_and(|t| t.is_zero()) {
            return Err(PoolError::InvalidConfig(
                "invocation timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open session {index} of {min} during startup: {source}")]
    Prewarm {
        index: usize,
        min: usize,
        #[source]
        source: ScriptError,
    },
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub min: usize,
    pub max: Option<usize>,
    /// Sessions currently alive (idle plus busy).
    pub sessions: usize,
    pub idle: usize,
    pub busy: usize,
}

struct Shared<E: ScriptEngine> {
    engine: E,
    idle: Mutex<Vec<E::Session>>,
    sessions: AtomicUsize,
    busy: AtomicUsize,
    next_id: AtomicUsize,
    closed: AtomicBool,
}

impl<E: ScriptEngine> Shared<E> {
    fn idle(&self) -> MutexGuard<'_, Vec<E::Session>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ExecutionPool<E: ScriptEngine> {
    shared: Arc<Shared<E>>,
    config: PoolConfig,
    permits: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
}

impl<E: ScriptEngine> ExecutionPool<E> {
    /// Validate `config` and open the minimum number of sessions.
    ///
    /// The pool is not returned until every pre-warmed session is open, so
    /// front-ends started afterwards never race initialization.
    pub async fn start(engine: E, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let mut idle = Vec::with_capacity(config.min_size);
        for index in 0..config.min_size {
            let session = engine
                .open_session(index)
                .await
                .map_err(|source| PoolError::Prewarm {
                    index,
                    min: config.min_size,
                    source,
                })?;
            idle.push(session);
        }

        tracing::info!(
            min = config.min_size,
            max = ?config.max_size,
            timeout_ms = config.invocation_timeout.map(|t| t.as_millis() as u64),
            "Execution pool started",
        );

        Ok(Self {
            shared: Arc::new(Shared {
                engine,
                sessions: AtomicUsize::new(idle.len()),
                idle: Mutex::new(idle),
                busy: AtomicUsize::new(0),
                next_id: AtomicUsize::new(config.min_size),
                closed: AtomicBool::new(false),
            }),
            permits: config.max_size.map(|max| Arc::new(Semaphore::new(max))),
            config,
            tracker: TaskTracker::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.shared.engine
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Run `target` with `parameters` and return its result.
    ///
    /// Waits while the pool is at capacity. Never returns an error: faults
    /// are reported as failure results with the sentinel exit status.
    pub async fn submit(&self, target: &Target, parameters: &Parameters) -> ExecutionResult {
        if self.is_closed() {
            return ExecutionResult::fault(SHUTDOWN_MESSAGE);
        }

        let permit = match &self.permits {
            Some(permits) => match Arc::clone(permits).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return ExecutionResult::fault(SHUTDOWN_MESSAGE),
            },
            None => None,
        };
        if self.is_closed() {
            return ExecutionResult::fault(SHUTDOWN_MESSAGE);
        }

        // The invocation runs on its own task so a cancelled caller cannot
        // strand a session, and so a panic is contained by the JoinHandle.
        let handle = self.tracker.spawn(run_invocation(
            Arc::clone(&self.shared),
            target.clone(),
            parameters.clone(),
            self.config.invocation_timeout,
            self.config.output_delimiter.clone(),
            permit,
        ));

        match handle.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => {
                tracing::error!(target = %target, "Engine invocation panicked");
                ExecutionResult::fault("Engine invocation panicked")
            }
            Err(err) => ExecutionResult::fault(err.to_string()),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            min: self.config.min_size,
            max: self.config.max_size,
            sessions: self.shared.sessions.load(Ordering::SeqCst),
            idle: self.shared.idle().len(),
            busy: self.shared.busy.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting work, wait for in-flight invocations, then drop every
    /// session. Waiting and later submissions get a failure result.
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Execution pool already shutting down");
        }
        if let Some(permits) = &self.permits {
            permits.close();
        }

        self.tracker.close();
        self.tracker.wait().await;

        let drained = std::mem::take(&mut *self.shared.idle());
        self.shared
            .sessions
            .fetch_sub(drained.len(), Ordering::SeqCst);
        tracing::info!(sessions = drained.len(), "Execution pool drained");
    }
}

async fn run_invocation<E: ScriptEngine>(
    shared: Arc<Shared<E>>,
    target: Target,
    parameters: Parameters,
    timeout: Option<Duration>,
    delimiter: String,
    _permit: Option<OwnedSemaphorePermit>,
) -> ExecutionResult {
    // A submission that raced `shutdown` may be spawned after the tracker
    // was drained; it must not open a session on a closed pool.
    if shared.closed.load(Ordering::SeqCst) {
        return ExecutionResult::fault(SHUTDOWN_MESSAGE);
    }

    let mut lease = match SessionLease::checkout(&shared).await {
        Ok(lease) => lease,
        Err(err) => {
            tracing::warn!(error = %err, target = %target, "Could not obtain an engine session");
            return ExecutionResult::fault(err.to_string());
        }
    };

    let Some(session) = lease.session.as_mut() else {
        return ExecutionResult::fault("Engine session was lost");
    };
    let invocation = shared.engine.invoke(session, &target, &parameters);
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, invocation).await.ok(),
        None => Some(invocation.await),
    };

    match outcome {
        Some(Ok(output)) => {
            lease.release();
            ExecutionResult::from_engine(output, &delimiter)
        }
        Some(Err(err)) => {
            lease.release();
            tracing::warn!(error = %err, target = %target, "Engine invocation failed");
            ExecutionResult::fault(err.to_string())
        }
        None => {
            let limit_ms = timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
            // The cancelled invocation may have left the session mid-call.
            drop(lease);
            tracing::warn!(target = %target, limit_ms, "Engine invocation timed out");
            ExecutionResult::fault(format!("Invocation timed out after {limit_ms} ms"))
        }
    }
}

/// A checked-out session.
///
/// Dropping a lease that still holds its session discards the session (timeout,
/// panic unwind), which shrinks the pool; [`SessionLease::release`] returns it
/// to the idle set instead.
struct SessionLease<'a, E: ScriptEngine> {
    shared: &'a Shared<E>,
    session: Option<E::Session>,
}

impl<'a, E: ScriptEngine> SessionLease<'a, E> {
    async fn checkout(shared: &'a Shared<E>) -> Result<Self, ScriptError> {
        let reused = shared.idle().pop();
        let session = match reused {
            Some(session) => session,
            None => {
                let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
                let session = shared.engine.open_session(id).await?;
                shared.sessions.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(session_id = id, "Opened additional engine session");
                session
            }
        };
        shared.busy.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            shared,
            session: Some(session),
        })
    }

    fn release(mut self) {
        if let Some(session) = self.session.take() {
            self.shared.idle().push(session);
        }
    }
}

impl<E: ScriptEngine> Drop for SessionLease<'_, E> {
    fn drop(&mut self) {
        if self.session.take().is_some() {
            self.shared.sessions.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!("Discarded engine session");
        }
        self.shared.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
