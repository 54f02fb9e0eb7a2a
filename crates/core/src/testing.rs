//! Scriptable in-memory engine for tests.
//!
//! Available to this crate's unit tests and, through the `testing` feature,
//! to the front-end crates' tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::invocation::{Parameters, Target};
use crate::scripting::engine::{EngineOutput, ScriptEngine, ScriptError};

type Behavior = dyn Fn(&Target, &Parameters) -> Result<EngineOutput, ScriptError> + Send + Sync;

/// Session handed out by [`FakeEngine`].
#[derive(Debug)]
pub struct FakeSession {
    pub id: usize,
    pub invocations: u64,
}

/// Engine whose output is computed by a closure.
///
/// Optionally waits on a gate semaphore (one permit consumed per call) or
/// sleeps before answering, and counts calls, concurrency and sessions.
#[derive(Clone)]
pub struct FakeEngine {
    state: Arc<FakeState>,
}

struct FakeState {
    behavior: Box<Behavior>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
    fail_open: AtomicBool,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    opened: AtomicUsize,
    last: Mutex<Option<(String, Parameters)>>,
}

impl FakeEngine {
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(&Target, &Parameters) -> Result<EngineOutput, ScriptError> + Send + Sync + 'static,
    {
        Self::build(Box::new(behavior), None, None)
    }

    /// Emits the target followed by one `name=value` (or `name`) item per
    /// parameter.
    pub fn echo() -> Self {
        Self::build(Box::new(echo), None, None)
    }

    /// [`FakeEngine::echo`] that blocks each call until `gate` yields a permit.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self::build(Box::new(echo), Some(gate), None)
    }

    /// [`FakeEngine::echo`] that sleeps for `delay` before answering.
    pub fn sleeping(delay: Duration) -> Self {
        Self::build(Box::new(echo), None, Some(delay))
    }

    fn build(behavior: Box<Behavior>, gate: Option<Arc<Semaphore>>, delay: Option<Duration>) -> Self {
        Self {
            state: Arc::new(FakeState {
                behavior,
                gate,
                delay,
                fail_open: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                opened: AtomicUsize::new(0),
                last: Mutex::new(None),
            }),
        }
    }

    /// Make subsequent `open_session` calls fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Invocations currently inside the engine.
    pub fn active(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Highest concurrent invocation count observed.
    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Target and parameters of the most recent invocation.
    pub fn last_request(&self) -> Option<(String, Parameters)> {
        self.state
            .last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Successful output with the given items.
pub fn ok_output<I, S>(items: I) -> EngineOutput
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    EngineOutput {
        exit_code: 0,
        items: items.into_iter().map(Into::into).collect(),
        first_error: None,
    }
}

/// Engine-reported failure with the given exit code and error message.
pub fn failed_output(exit_code: i32, error: &str) -> EngineOutput {
    EngineOutput {
        exit_code,
        items: Vec::new(),
        first_error: Some(error.to_string()),
    }
}

fn echo(target: &Target, parameters: &Parameters) -> Result<EngineOutput, ScriptError> {
    let mut items = vec![target.to_string()];
    items.extend(parameters.iter().map(|(name, value)| match value {
        Some(value) => format!("{name}={value}"),
        None => name.to_string(),
    }));
    Ok(ok_output(items))
}

impl ScriptEngine for FakeEngine {
    type Session = FakeSession;

    async fn open_session(&self, id: usize) -> Result<FakeSession, ScriptError> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(ScriptError::Session(format!("session {id} refused")));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession { id, invocations: 0 })
    }

    async fn invoke(
        &self,
        session: &mut FakeSession,
        target: &Target,
        parameters: &Parameters,
    ) -> Result<EngineOutput, ScriptError> {
        let state = &self.state;
        state.calls.fetch_add(1, Ordering::SeqCst);
        let now = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak.fetch_max(now, Ordering::SeqCst);
        *state.last.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((target.to_string(), parameters.clone()));

        let _active = ActiveGuard(&state.active);

        if let Some(gate) = &state.gate {
            gate.acquire()
                .await
                .map_err(|_| ScriptError::Session("gate closed".into()))?
                .forget();
        }
        if let Some(delay) = state.delay {
            tokio::time::sleep(delay).await;
        }

        session.invocations += 1;
        (state.behavior)(target, parameters)
    }
}

/// Decrements the active counter even when the call is cancelled or panics.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
