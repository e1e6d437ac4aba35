// Runtime Driver Contract

use async_trait::async_trait;
use murmur_core::Result;
use murmur_types::AgentProfile;
use tokio::sync::mpsc;

/// A single agent's runtime process (or remote endpoint).
///
/// Lifecycle: `start` once, then any number of `send` calls, each producing
/// a line stream obtained from `events`; `stop` terminates whatever is
/// running. The stream for a run ends when the underlying process exits.
#[async_trait]
pub trait RuntimeDriver: Send {
    async fn start(&mut self) -> Result<()>;

    /// Terminate the current child, if any, and close its stream gracefully.
    async fn stop(&mut self);

    /// Deliver a prompt. For subprocess runtimes this launches the child
    /// with `{prompt}` resolved into the argv template.
    async fn send(&mut self, prompt: &str) -> Result<()>;

    /// Take the interleaved stdout/stderr line stream for the most recent
    /// `send`. Returns `None` when no run is pending or the stream was
    /// already taken.
    fn events(&mut self) -> Option<mpsc::UnboundedReceiver<String>>;

    fn is_running(&self) -> bool;
}

/// Builds a driver for an agent profile. The production implementation is
/// the runtime registry; tests substitute scripted drivers.
pub trait DriverFactory: Send + Sync {
    fn create(&self, profile: &AgentProfile) -> Result<Box<dyn RuntimeDriver>>;
}
