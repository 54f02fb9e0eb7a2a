//! Script engine interface and shared types.
//!
//! Defines [`ScriptEngine`], the seam the execution pool drives, along with
//! [`EngineOutput`] and [`ScriptError`].

use std::future::Future;

use crate::invocation::{Parameters, Target};

/// What the engine reported for a controlled run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Engine exit status; `0` is success.
    pub exit_code: i32,
    /// Output items in emission order.
    pub items: Vec<String>,
    /// First error the engine reported, if any.
    pub first_error: Option<String>,
}

/// Engine-level faults: the invocation could not produce a status at all.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// No script exists for the target. Carries the target, not the
    /// resolved filesystem path.
    #[error("Script not found: {0}")]
    NotFound(String),

    /// The engine executable could not be started.
    #[error("Failed to start engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A session could not be opened.
    #[error("Engine session unavailable: {0}")]
    Session(String),

    /// An I/O error occurred while communicating with the engine.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait implemented by script engines the execution pool can drive.
///
/// A session is one concurrently-usable engine handle. The pool guarantees a
/// session is used by at most one invocation at a time.
pub trait ScriptEngine: Send + Sync + 'static {
    type Session: Send + 'static;

    /// Open a new session. `id` is unique within the pool's lifetime.
    fn open_session(
        &self,
        id: usize,
    ) -> impl Future<Output = Result<Self::Session, ScriptError>> + Send;

    /// Run `target` with `parameters` on `session`.
    fn invoke(
        &self,
        session: &mut Self::Session,
        target: &Target,
        parameters: &Parameters,
    ) -> impl Future<Output = Result<EngineOutput, ScriptError>> + Send;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
