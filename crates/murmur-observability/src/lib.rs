use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Engine,
    Agent,
    Sidecar,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Engine => "engine",
            ProcessKind::Agent => "agent",
            ProcessKind::Sidecar => "sidecar",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: String,
    pub logs_dir: Option<String>,
    pub initialized_at: DateTime<Utc>,
}

/// A structured observability record emitted alongside free-form log lines.
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub graph_id: Option<&'a str>,
    pub task_id: Option<&'a str>,
    pub agent_id: Option<&'a str>,
    pub status: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Replace prompt-sized payloads with a length + stable hash marker so logs
/// never carry user content.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!(
        "[redacted len={} hash={}]",
        trimmed.len(),
        short_hash(trimmed)
    )
}

pub fn short_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    macro_rules! log_at {
        ($macro:ident) => {
            tracing::$macro!(
                target: "murmur.obs",
                process = process.as_str(),
                component = event.component,
                event = event.event,
                graph_id = event.graph_id.unwrap_or(""),
                task_id = event.task_id.unwrap_or(""),
                agent_id = event.agent_id.unwrap_or(""),
                status = event.status.unwrap_or(""),
                detail = event.detail.unwrap_or(""),
            )
        };
    }
    match level {
        Level::ERROR => log_at!(error),
        Level::WARN => log_at!(warn),
        Level::INFO => log_at!(info),
        Level::DEBUG => log_at!(debug),
        Level::TRACE => log_at!(trace),
    }
}

/// Install the global subscriber: env-filtered stderr output, plus a daily
/// rolling file appender when `logs_dir` is given.
///
/// Returns a guard that must be held for the process lifetime to keep the
/// file writer flushing, plus an init record for diagnostics.
pub fn init_logging(
    process: ProcessKind,
    logs_dir: Option<&Path>,
) -> anyhow::Result<(Option<WorkerGuard>, LoggingInitInfo)> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let guard = if let Some(dir) = logs_dir {
        fs::create_dir_all(dir)?;
        let appender =
            tracing_appender::rolling::daily(dir, format!("murmur-{}.log", process.as_str()));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;
        None
    };

    Ok((
        guard,
        LoggingInitInfo {
            process: process.as_str().to_string(),
            logs_dir: logs_dir.map(|p| p.display().to_string()),
            initialized_at: Utc::now(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_hides_content_but_keeps_length() {
        let redacted = redact_text("do the secret thing");
        assert!(redacted.starts_with("[redacted len=19"));
        assert!(!redacted.contains("secret"));
    }

    #[test]
    fn redact_empty_is_empty() {
        assert_eq!(redact_text("   "), "");
    }

    #[test]
    fn short_hash_is_stable() {
        assert_eq!(short_hash("abc"), short_hash("abc"));
        assert_ne!(short_hash("abc"), short_hash("abd"));
    }
}
