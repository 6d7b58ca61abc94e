//! Remote command execution over ssh-like channels.
//!
//! [`RemoteSession`] walks a priority-ordered host list, retrying each host
//! until its timeout before failing over to the next, and runs commands on
//! whichever host accepted. The transport is abstracted behind
//! [`HostConnector`] so the session logic is independent of the ssh client.

mod session;
mod ssh;

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::RemoteError;

pub use session::{
    parse_host_list, RemoteResponse, RemoteSession, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RETRY_DELAY,
};
pub use ssh::OpenSshConnector;

/// Opens command channels to a named host.
#[async_trait]
pub trait HostConnector: Send + Sync {
    /// Makes one connection attempt; `timeout` bounds this attempt only.
    async fn connect(&self, host: &str, timeout: Duration) -> Result<(), RemoteError>;

    /// Builds the local process that runs `remote_command` on `host`.
    fn command(&self, host: &str, remote_command: &str) -> Command;
}
