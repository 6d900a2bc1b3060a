//! Connection handle contract.
//!
//! A [`HostConnection`] is what a successful `connect` hands back. Its
//! lifecycle belongs to the protocol that produced it; the broker only passes
//! it through.

use async_trait::async_trait;

use crate::error::Result;
use crate::options::OperatingSystemFamily;

/// Output from a command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,

    /// Standard error.
    pub stderr: String,

    /// Exit code reported by the target (`-1` when it reported none).
    pub exit_code: i64,

    /// Whether the command succeeded (exit_code == 0).
    pub success: bool,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i64) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            success: exit_code == 0,
        }
    }

    /// Build from raw output buffers, replacing invalid UTF-8.
    pub fn from_bytes(stdout: &[u8], stderr: &[u8], exit_code: i64) -> Self {
        Self::new(
            String::from_utf8_lossy(stdout),
            String::from_utf8_lossy(stderr),
            exit_code,
        )
    }
}

/// A live connection to a host.
#[async_trait]
pub trait HostConnection: Send + Sync {
    /// Protocol that produced this connection
    fn protocol(&self) -> &str;

    /// Operating system family of the connected host
    fn operating_system(&self) -> OperatingSystemFamily;

    /// Execute a non-interactive command and capture its output.
    async fn execute(&self, command: &str) -> Result<CommandOutput>;

    /// Release the connection. Closing twice is a no-op.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn HostConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConnection")
            .field("protocol", &self.protocol())
            .field("operating_system", &self.operating_system())
            .finish()
    }
}
