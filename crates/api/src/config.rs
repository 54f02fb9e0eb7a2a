use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderName;
use scriptgate_amqp::AmqpConfig;
use scriptgate_core::pool::{PoolConfig, PoolError};
use scriptgate_core::scripting::powershell::{
    ExecutionPolicy, PowerShellConfig, DEFAULT_EXECUTABLE, DEFAULT_EXTENSION,
};

use crate::auth::AuthConfig;

/// Default bound on waiting for background tasks during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name}='{value}' is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("No front-end configured: set HTTP_LISTEN_ADDR and/or the AMQP_* variables")]
    NoFrontEnd,
}

/// HTTP front-end settings. Present only when `HTTP_LISTEN_ADDR` is set.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub listen_addr: String,
    pub auth: AuthConfig,
    /// Outer request bound answered with 408.
    pub request_timeout: Option<Duration>,
}

/// Whole-process configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub engine: PowerShellConfig,
    pub pool: PoolConfig,
    pub http: Option<HttpConfig>,
    pub amqp: Option<AmqpConfig>,
    /// Upper bound on each shutdown wait.
    pub shutdown_timeout: Duration,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                     | Default          |
    /// |-----------------------------|------------------|
    /// | `SCRIPTS_PATH`              | required         |
    /// | `SCRIPT_EXTENSION`          | `ps1`            |
    /// | `POWERSHELL_PATH`           | `pwsh`           |
    /// | `PS_MODULES`                | empty            |
    /// | `PS_EXECUTION_POLICY`       | `None`           |
    /// | `POOL_MIN_SIZE`             | `4`              |
    /// | `POOL_MAX_SIZE`             | unbounded        |
    /// | `OUTPUT_DELIMITER`          | `\n`             |
    /// | `INVOCATION_TIMEOUT_SECS`   | unset            |
    /// | `HTTP_LISTEN_ADDR`          | unset            |
    /// | `AUTH_TOKEN`                | unset (no auth)  |
    /// | `AUTH_HEADER`               | `Authorization`  |
    /// | `REQUEST_TIMEOUT_SECS`      | unset            |
    /// | `AMQP_URI`                  | unset            |
    /// | `AMQP_USERNAME`/`_PASSWORD` | unset            |
    /// | `AMQP_REQUEST_QUEUE`        | unset            |
    /// | `AMQP_RESPONSE_EXCHANGE`    | unset            |
    /// | `AMQP_RESPONSE_ROUTING_KEY` | unset            |
    /// | `AMQP_PREFETCH`             | `16`             |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `30`             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let scripts_root = var("SCRIPTS_PATH").ok_or(ConfigError::Missing("SCRIPTS_PATH"))?;
        let mut engine = PowerShellConfig::new(scripts_root);
        engine.extension = var("SCRIPT_EXTENSION")
            .map(|e| e.trim_start_matches('.').to_string())
            .unwrap_or_else(|| DEFAULT_EXTENSION.into());
        engine.executable = var("POWERSHELL_PATH").unwrap_or_else(|| DEFAULT_EXECUTABLE.into());
        engine.modules = var("PS_MODULES")
            .map(|m| {
                m.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        engine.execution_policy = var("PS_EXECUTION_POLICY")
            .as_deref()
            .and_then(ExecutionPolicy::from_setting);

        let mut pool = PoolConfig::default();
        if let Some(min) = parse_var::<usize>(&var, "POOL_MIN_SIZE")? {
            pool.min_size = min;
        }
        pool.max_size = parse_var(&var, "POOL_MAX_SIZE")?;
        if let Some(delimiter) = lookup("OUTPUT_DELIMITER").filter(|d| !d.is_empty()) {
            pool.output_delimiter = unescape(&delimiter);
        }
        pool.invocation_timeout = parse_var(&var, "INVOCATION_TIMEOUT_SECS")?.map(Duration::from_secs);
        pool.validate()?;

        let http = match var("HTTP_LISTEN_ADDR") {
            Some(listen_addr) => {
                let mut auth = AuthConfig::with_token(lookup("AUTH_TOKEN").unwrap_or_default());
                if let Some(header) = var("AUTH_HEADER") {
                    auth.header = HeaderName::from_bytes(header.trim().as_bytes()).map_err(|e| {
                        ConfigError::Invalid {
                            name: "AUTH_HEADER",
                            value: header.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                }
                let request_timeout =
                    parse_var(&var, "REQUEST_TIMEOUT_SECS")?.map(Duration::from_secs);
                Some(HttpConfig {
                    listen_addr,
                    auth,
                    request_timeout,
                })
            }
            None => None,
        };

        let amqp = match (
            var("AMQP_URI"),
            var("AMQP_REQUEST_QUEUE"),
            var("AMQP_RESPONSE_EXCHANGE"),
            var("AMQP_RESPONSE_ROUTING_KEY"),
        ) {
            (Some(uri), Some(queue), Some(exchange), Some(routing_key)) => {
                let mut amqp = AmqpConfig::new(uri, queue, exchange, routing_key);
                amqp.username = var("AMQP_USERNAME");
                amqp.password = lookup("AMQP_PASSWORD");
                if let Some(prefetch) = parse_var::<u16>(&var, "AMQP_PREFETCH")? {
                    amqp.prefetch = prefetch;
                }
                Some(amqp)
            }
            (None, None, None, None) => None,
            _ => {
                tracing::warn!(
                    "AMQP front-end partially configured; it needs AMQP_URI, AMQP_REQUEST_QUEUE, \
                     AMQP_RESPONSE_EXCHANGE and AMQP_RESPONSE_ROUTING_KEY and will not start",
                );
                None
            }
        };

        if http.is_none() && amqp.is_none() {
            return Err(ConfigError::NoFrontEnd);
        }

        let shutdown_timeout = Duration::from_secs(
            parse_var(&var, "SHUTDOWN_TIMEOUT_SECS")?.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        );

        Ok(Self {
            engine,
            pool,
            http,
            amqp,
            shutdown_timeout,
        })
    }
}

fn parse_var<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Expand `\n`, `\r`, `\t` and `\\` so delimiters can be written in `.env`.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
