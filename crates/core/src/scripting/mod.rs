//! Script engines.
//!
//! [`engine::ScriptEngine`] is the seam between the execution pool and a
//! concrete interpreter. The PowerShell engine drives `pwsh` child processes
//! through [`subprocess::run_command`].

pub mod engine;
pub mod powershell;
pub mod subprocess;
