//! Hands normalized requests from any front-end to the shared pool.

use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use crate::invocation::InvocationRequest;
use crate::pool::ExecutionPool;
use crate::result::ExecutionResult;
use crate::scripting::engine::ScriptEngine;

/// One dispatcher per process, cloned into every front-end.
pub struct Dispatcher<E: ScriptEngine> {
    pool: Arc<ExecutionPool<E>>,
}

impl<E: ScriptEngine> Clone for Dispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<E: ScriptEngine> Dispatcher<E> {
    pub fn new(pool: Arc<ExecutionPool<E>>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ExecutionPool<E> {
        &self.pool
    }

    /// Run `request` on the pool.
    ///
    /// The credential has already been checked by the front-end; the
    /// correlation token is carried into every log line for the invocation.
    pub async fn handle(&self, request: InvocationRequest) -> ExecutionResult {
        let span = tracing::info_span!(
            "invocation",
            correlation_id = %request.correlation,
            target = %request.target,
        );

        async move {
            let started = Instant::now();
            let result = self
                .pool
                .submit(&request.target, &request.parameters)
                .await;
            tracing::debug!(
                succeeded = result.succeeded,
                exit_status = result.exit_status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Invocation finished",
            );
            result
        }
        .instrument(span)
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
