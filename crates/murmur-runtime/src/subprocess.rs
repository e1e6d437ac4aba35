// Subprocess Runtime Driver
// Spawns an external agent CLI per prompt, resolves {placeholder} tokens in
// its argv template, and streams interleaved stdout/stderr lines.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use murmur_core::{MurmurError, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::driver::RuntimeDriver;

/// Resolve `{name}` placeholders in a template, case-insensitively and in a
/// single pass: a substituted value is never re-scanned for further tokens.
/// Unknown tokens are left in place.
pub fn resolve_placeholders(template: &str, values: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        match rest[open..].find('}') {
            Some(offset) => {
                let token = &rest[open + 1..open + offset];
                match values.get(&token.to_ascii_lowercase()) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[open..=open + offset]),
                }
                rest = &rest[open + offset + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Driver for catalog entries of type `cli`.
pub struct SubprocessDriver {
    agent_id: String,
    executable: String,
    args_template: Vec<String>,
    env: BTreeMap<String, String>,
    /// Literal placeholder values, lowest precedence in the merge
    defaults: BTreeMap<String, String>,
    /// Effective model after the registry merge
    provider: Option<String>,
    model_id: Option<String>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    pending_events: Option<mpsc::UnboundedReceiver<String>>,
    started: bool,
}

impl SubprocessDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: impl Into<String>,
        executable: impl Into<String>,
        args_template: Vec<String>,
        env: BTreeMap<String, String>,
        defaults: BTreeMap<String, String>,
        provider: Option<String>,
        model_id: Option<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            executable: executable.into(),
            args_template,
            env,
            defaults,
            provider,
            model_id,
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            pending_events: None,
            started: false,
        }
    }

    /// Placeholder values for one spawn: catalog defaults, overlaid with the
    /// effective model spec, overlaid with the prompt. Keys are lowercase so
    /// template tokens resolve case-insensitively.
    fn placeholder_values(&self, prompt: &str) -> BTreeMap<String, String> {
        let mut values: BTreeMap<String, String> = self
            .defaults
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        if let Some(provider) = &self.provider {
            values.insert("provider".to_string(), provider.clone());
        }
        if let Some(model_id) = &self.model_id {
            values.insert("model".to_string(), model_id.clone());
        }
        values.insert("prompt".to_string(), prompt.to_string());
        values
    }
}

#[async_trait]
impl RuntimeDriver for SubprocessDriver {
    async fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(MurmurError::InvalidOperation(format!(
                "driver for {} already started",
                self.agent_id
            )));
        }
        self.cancel = CancellationToken::new();
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        self.pending_events = None;
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send(&mut self, prompt: &str) -> Result<()> {
        if !self.started {
            return Err(MurmurError::InvalidOperation(format!(
                "driver for {} not started",
                self.agent_id
            )));
        }
        if self.running.load(Ordering::SeqCst) {
            return Err(MurmurError::InvalidOperation(format!(
                "runtime for {} is already executing",
                self.agent_id
            )));
        }
        if self.cancel.is_cancelled() {
            // A previous stop consumed the token; runs after a stop get a
            // fresh one.
            self.cancel = CancellationToken::new();
        }

        let values = self.placeholder_values(prompt);
        let args: Vec<String> = self
            .args_template
            .iter()
            .map(|arg| resolve_placeholders(arg, &values))
            .collect();

        let mut child = Command::new(&self.executable)
            .args(&args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MurmurError::Runtime(format!("failed to spawn {}: {}", self.executable, e))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MurmurError::Runtime("child stdout was not captured".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            MurmurError::Runtime("child stderr was not captured".to_string())
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.pending_events = Some(rx);
        self.running.store(true, Ordering::SeqCst);

        let cancel = self.cancel.clone();
        let running = self.running.clone();
        let agent_id = self.agent_id.clone();
        tokio::spawn(async move {
            let mut stdout_lines = BufReader::new(stdout).lines();
            let mut stderr_lines = BufReader::new(stderr).lines();
            let mut stdout_open = true;
            let mut stderr_open = true;

            // Interleave both pipes into one stream until both close or the
            // driver is cancelled. Dropping `tx` is what ends the stream.
            while stdout_open || stderr_open {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = child.kill().await {
                            tracing::debug!("kill after cancel failed for {agent_id}: {e}");
                        }
                        break;
                    }
                    line = stdout_lines.next_line(), if stdout_open => match line {
                        Ok(Some(line)) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Ok(None) => stdout_open = false,
                        Err(e) => {
                            tracing::debug!("stdout read error for {agent_id}: {e}");
                            stdout_open = false;
                        }
                    },
                    line = stderr_lines.next_line(), if stderr_open => match line {
                        Ok(Some(line)) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Ok(None) => stderr_open = false,
                        Err(e) => {
                            tracing::debug!("stderr read error for {agent_id}: {e}");
                            stderr_open = false;
                        }
                    },
                }
            }

            match child.wait().await {
                Ok(status) => {
                    tracing::debug!("runtime for {agent_id} exited with {status}");
                }
                Err(e) => {
                    tracing::debug!("wait failed for {agent_id}: {e}");
                }
            }
            running.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    fn events(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.pending_events.take()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolves_known_tokens() {
        let resolved = resolve_placeholders(
            "--model {model} -p {prompt}",
            &values(&[("model", "sonnet"), ("prompt", "hi")]),
        );
        assert_eq!(resolved, "--model sonnet -p hi");
    }

    #[test]
    fn resolution_is_case_insensitive() {
        let resolved = resolve_placeholders("{Prompt}", &values(&[("prompt", "hello")]));
        assert_eq!(resolved, "hello");
    }

    #[test]
    fn resolved_values_are_not_rescanned() {
        // A prompt containing a token must come through literally.
        let resolved = resolve_placeholders(
            "{prompt}",
            &values(&[("prompt", "say {model} please"), ("model", "x")]),
        );
        assert_eq!(resolved, "say {model} please");
    }

    #[test]
    fn unknown_tokens_are_left_alone() {
        let resolved = resolve_placeholders("{mystery} {prompt}", &values(&[("prompt", "p")]));
        assert_eq!(resolved, "{mystery} p");
    }

    #[test]
    fn unterminated_brace_passes_through() {
        let resolved = resolve_placeholders("tail {prompt", &values(&[("prompt", "p")]));
        assert_eq!(resolved, "tail {prompt");
    }

    #[tokio::test]
    async fn send_before_start_is_rejected() {
        let mut driver = SubprocessDriver::new(
            "a1",
            "true",
            Vec::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            None,
            None,
        );
        assert!(driver.send("hello").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn echo_run_streams_prompt_and_ends() {
        let mut driver = SubprocessDriver::new(
            "a1",
            "echo",
            vec!["{prompt}".to_string()],
            BTreeMap::new(),
            BTreeMap::new(),
            None,
            None,
        );
        driver.start().await.unwrap();
        driver.send("hello runtime").await.unwrap();
        let mut events = driver.events().unwrap();

        let line = events.recv().await.unwrap();
        assert_eq!(line, "hello runtime");
        // Stream ends on process exit.
        assert!(events.recv().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_closes_stream_without_panic() {
        let mut driver = SubprocessDriver::new(
            "a1",
            "sleep",
            vec!["5".to_string()],
            BTreeMap::new(),
            BTreeMap::new(),
            None,
            None,
        );
        driver.start().await.unwrap();
        driver.send("ignored").await.unwrap();
        assert!(driver.is_running());
        driver.stop().await;
        assert!(!driver.is_running());
    }
}
