//! PowerShell engine.
//!
//! Each invocation runs `pwsh` non-interactively with a generated wrapper
//! script passed via `-EncodedCommand`. The wrapper imports the configured
//! modules, calls the target script with its parameters, and writes every
//! pipeline item to stdout followed by an ASCII record separator so items
//! containing newlines survive intact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use tokio::process::Command;

use super::engine::{EngineOutput, ScriptEngine, ScriptError};
use super::subprocess;
use crate::invocation::{Parameters, Target};

/// Separator written after each output item.
const ITEM_SEPARATOR: char = '\u{1E}';

/// Default script file extension.
pub const DEFAULT_EXTENSION: &str = "ps1";

/// Default engine executable.
pub const DEFAULT_EXECUTABLE: &str = "pwsh";

// ---------------------------------------------------------------------------
// Execution policy
// ---------------------------------------------------------------------------

/// PowerShell execution policy applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPolicy {
    AllSigned,
    Bypass,
    Default,
    RemoteSigned,
    Restricted,
    Undefined,
    Unrestricted,
}

impl ExecutionPolicy {
    /// Interpret a configured policy name.
    ///
    /// `"None"` (or empty) leaves the engine's own policy in place. Unknown
    /// names log a warning and fall back to [`ExecutionPolicy::Default`].
    pub fn from_setting(value: &str) -> Option<Self> {
        let value = value.trim();
        let policy = match value {
            "" | "None" => return None,
            "AllSigned" => Self::AllSigned,
            "Bypass" => Self::Bypass,
            "Default" => Self::Default,
            "RemoteSigned" => Self::RemoteSigned,
            "Restricted" => Self::Restricted,
            "Undefined" => Self::Undefined,
            "Unrestricted" => Self::Unrestricted,
            other => {
                tracing::warn!(
                    policy = other,
                    "Unknown execution policy, falling back to Default"
                );
                Self::Default
            }
        };
        Some(policy)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllSigned => "AllSigned",
            Self::Bypass => "Bypass",
            Self::Default => "Default",
            Self::RemoteSigned => "RemoteSigned",
            Self::Restricted => "Restricted",
            Self::Undefined => "Undefined",
            Self::Unrestricted => "Unrestricted",
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PowerShellConfig {
    /// Engine executable, looked up on `PATH` when not absolute.
    pub executable: String,
    /// Directory the target's segments are resolved under.
    pub scripts_root: PathBuf,
    /// Script file extension, without the dot.
    pub extension: String,
    /// Modules imported before every invocation.
    pub modules: Vec<String>,
    pub execution_policy: Option<ExecutionPolicy>,
}

impl PowerShellConfig {
    pub fn new(scripts_root: impl Into<PathBuf>) -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            scripts_root: scripts_root.into(),
            extension: DEFAULT_EXTENSION.to_string(),
            modules: Vec::new(),
            execution_policy: None,
        }
    }
}

/// One logical PowerShell session.
///
/// The module-import preamble is rendered once when the session opens.
#[derive(Debug)]
pub struct PowerShellSession {
    pub id: usize,
    pub invocations: u64,
    preamble: String,
}

#[derive(Debug, Clone)]
pub struct PowerShellEngine {
    config: Arc<PowerShellConfig>,
}

impl PowerShellEngine {
    pub fn new(config: PowerShellConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PowerShellConfig {
        &self.config
    }

    fn command(&self, encoded: &str) -> Command {
        let mut cmd = Command::new(&self.config.executable);
        cmd.args(["-NoLogo", "-NoProfile", "-NonInteractive"]);
        if let Some(policy) = self.config.execution_policy {
            cmd.args(["-ExecutionPolicy", policy.as_str()]);
        }
        cmd.args(["-EncodedCommand", encoded]);
        cmd
    }
}

impl ScriptEngine for PowerShellEngine {
    type Session = PowerShellSession;

    async fn open_session(&self, id: usize) -> Result<PowerShellSession, ScriptError> {
        let preamble = self
            .config
            .modules
            .iter()
            .map(|m| format!("Import-Module {}\n", quote_literal(m)))
            .collect();
        tracing::debug!(session_id = id, modules = self.config.modules.len(), "Opened PowerShell session");
        Ok(PowerShellSession {
            id,
            invocations: 0,
            preamble,
        })
    }

    async fn invoke(
        &self,
        session: &mut PowerShellSession,
        target: &Target,
        parameters: &Parameters,
    ) -> Result<EngineOutput, ScriptError> {
        let path = resolve_script_path(&self.config.scripts_root, target, &self.config.extension);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ScriptError::NotFound(target.to_string()));
        }

        let script = render_wrapper(&session.preamble, &build_invocation(&path, parameters));
        let encoded = encode_command(&script);
        session.invocations += 1;

        let output = subprocess::run_command(&mut self.command(&encoded)).await?;
        tracing::debug!(
            session_id = session.id,
            target = %target,
            exit_code = output.exit_code,
            duration_ms = output.duration_ms,
            "PowerShell invocation finished",
        );

        let stderr = output.stderr.trim();
        Ok(EngineOutput {
            exit_code: output.exit_code,
            items: split_items(&output.stdout),
            first_error: (!stderr.is_empty()).then(|| stderr.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Script rendering
// ---------------------------------------------------------------------------

/// `<root>/<ns...>/<command>.<ext>`
pub fn resolve_script_path(root: &Path, target: &Target, extension: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in target.namespace() {
        path.push(segment);
    }
    if extension.is_empty() {
        path.push(target.command());
    } else {
        path.push(format!("{}.{}", target.command(), extension));
    }
    path
}

/// Render `value` as a single-quoted PowerShell literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `& '<path>' -name 'value' -flag ...`
///
/// Names are already restricted to identifier characters, so only values
/// need quoting.
pub fn build_invocation(path: &Path, parameters: &Parameters) -> String {
    let mut line = format!("& {}", quote_literal(&path.to_string_lossy()));
    for (name, value) in parameters.iter() {
        line.push_str(" -");
        line.push_str(name);
        if let Some(value) = value {
            line.push(' ');
            line.push_str(&quote_literal(value));
        }
    }
    line
}

/// Only pipeline output reaches stdout. Warning, verbose, debug and
/// information streams (`Write-Host` included) are discarded so they cannot
/// merge into an item.
fn render_wrapper(preamble: &str, invocation: &str) -> String {
    format!(
        "[Console]::OutputEncoding = [System.Text.Encoding]::UTF8\n\
         $ErrorActionPreference = 'Stop'\n\
         try {{\n\
         {preamble}\
         {invocation} 3>$null 4>$null 5>$null 6>$null | ForEach-Object {{ [Console]::Out.Write([string]$_); [Console]::Out.Write([char]0x1E) }}\n\
         }} catch {{\n\
         [Console]::Error.Write($_.Exception.Message)\n\
         exit 1\n\
         }}\n\
         if ($LASTEXITCODE) {{ exit $LASTEXITCODE }}\n\
         exit 0\n"
    )
}

/// Base64 of the UTF-16LE script text, as `-EncodedCommand` expects.
fn encode_command(script: &str) -> String {
    let bytes: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn split_items(stdout: &str) -> Vec<String> {
    let mut items: Vec<String> = stdout.split(ITEM_SEPARATOR).map(str::to_string).collect();
    if items.last().is_some_and(|s| s.is_empty()) {
        items.pop();
    }
    items
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn params(pairs: &[(&str, Option<&str>)]) -> Parameters {
        let mut p = Parameters::new();
        for (k, v) in pairs {
            p.insert(*k, v.map(str::to_string)).expect("valid name");
        }
        p
    }

    #[test]
    fn policy_names_round_trip() {
        for name in [
            "AllSigned",
            "Bypass",
            "Default",
            "RemoteSigned",
            "Restricted",
            "Undefined",
            "Unrestricted",
        ] {
            let policy = ExecutionPolicy::from_setting(name).expect("known policy");
            assert_eq!(policy.as_str(), name);
        }
    }

    #[test]
    fn policy_none_leaves_engine_default() {
        assert_eq!(ExecutionPolicy::from_setting("None"), None);
        assert_eq!(ExecutionPolicy::from_setting(""), None);
    }

    #[test]
    fn unknown_policy_falls_back_to_default() {
        assert_eq!(
            ExecutionPolicy::from_setting("Whatever"),
            Some(ExecutionPolicy::Default)
        );
    }

    #[test]
    fn script_path_follows_segments() {
        let target = Target::parse("reports/daily/summary").unwrap();
        let path = resolve_script_path(Path::new("/srv/scripts"), &target, "ps1");
        assert_eq!(path, PathBuf::from("/srv/scripts/reports/daily/summary.ps1"));
    }

    #[test]
    fn single_segment_target_sits_at_root() {
        let target = Target::parse("hello").unwrap();
        let path = resolve_script_path(Path::new("/srv"), &target, "ps1");
        assert_eq!(path, PathBuf::from("/srv/hello.ps1"));
    }

    #[test]
    fn literals_double_embedded_quotes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("$(rm -rf)"), "'$(rm -rf)'");
    }

    #[test]
    fn invocation_line_includes_values_and_flags_in_order() {
        let line = build_invocation(
            Path::new("/s/run.ps1"),
            &params(&[("Name", Some("O'Brien")), ("Force", None), ("Count", Some("3"))]),
        );
        assert_eq!(line, "& '/s/run.ps1' -Name 'O''Brien' -Force -Count '3'");
    }

    #[test]
    fn wrapper_imports_modules_before_invocation() {
        let script = render_wrapper("Import-Module 'Az'\n", "& '/s/x.ps1'");
        let import = script.find("Import-Module 'Az'").expect("import");
        let call = script.find("& '/s/x.ps1'").expect("call");
        assert!(import < call);
        assert!(script.contains("$ErrorActionPreference = 'Stop'\ntry {"));
    }

    #[test]
    fn wrapper_discards_non_pipeline_streams_and_forces_utf8() {
        let script = render_wrapper("", "& '/s/x.ps1'");
        assert!(script.contains("& '/s/x.ps1' 3>$null 4>$null 5>$null 6>$null | ForEach-Object"));
        assert!(script.starts_with("[Console]::OutputEncoding = [System.Text.Encoding]::UTF8\n"));
    }

    #[test]
    fn encoded_command_is_utf16le_base64() {
        let encoded = encode_command("ab");
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(bytes, [b'a', 0, b'b', 0]);
    }

    #[test]
    fn items_split_on_record_separator() {
        assert_eq!(split_items("a\u{1E}b\nc\u{1E}"), ["a", "b\nc"]);
        assert_eq!(split_items("\u{1E}"), [""]);
        assert!(split_items("").is_empty());
    }

    #[tokio::test]
    async fn missing_script_is_not_found_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PowerShellConfig::new(dir.path());
        config.executable = "/nonexistent/pwsh".into();
        let engine = PowerShellEngine::new(config);

        let mut session = engine.open_session(0).await.unwrap();
        let target = Target::parse("missing/script").unwrap();
        let result = engine.invoke(&mut session, &target, &Parameters::new()).await;
        assert_matches!(result, Err(ScriptError::NotFound(t)) if t == "missing/script");
        assert_eq!(session.invocations, 0);
    }

    fn pwsh_available() -> bool {
        std::process::Command::new(DEFAULT_EXECUTABLE)
            .args(["-NoLogo", "-NoProfile", "-Command", "exit 0"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn runs_script_and_collects_items() {
        if !pwsh_available() {
            eprintln!("pwsh not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("greet.ps1"),
            "param([string]$Name, [switch]$Loud)\n\"Hello $Name\"\nif ($Loud) { 'LOUD' }\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("fail.ps1"), "throw 'nope'\n").unwrap();

        let engine = PowerShellEngine::new(PowerShellConfig::new(dir.path()));
        let mut session = engine.open_session(1).await.unwrap();

        let ok = engine
            .invoke(
                &mut session,
                &Target::parse("greet").unwrap(),
                &params(&[("Name", Some("it's me")), ("Loud", None)]),
            )
            .await
            .unwrap();
        assert_eq!(ok.exit_code, 0);
        assert_eq!(ok.items, ["Hello it's me", "LOUD"]);

        let failed = engine
            .invoke(&mut session, &Target::parse("fail").unwrap(), &Parameters::new())
            .await
            .unwrap();
        assert_ne!(failed.exit_code, 0);
        assert_eq!(failed.first_error.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn host_and_side_streams_stay_out_of_items() {
        if !pwsh_available() {
            eprintln!("pwsh not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("chatty.ps1"),
            "[CmdletBinding()] param()\n\
             Write-Host 'banner'\n\
             Write-Warning 'careful'\n\
             Write-Verbose 'details' -Verbose\n\
             Write-Information 'info' -InformationAction Continue\n\
             Write-Output 'result'\n",
        )
        .unwrap();

        let engine = PowerShellEngine::new(PowerShellConfig::new(dir.path()));
        let mut session = engine.open_session(2).await.unwrap();
        let output = engine
            .invoke(&mut session, &Target::parse("chatty").unwrap(), &Parameters::new())
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert_eq!(output.items, ["result"]);
    }
}
