//! Runtime configuration captured at boot and passed explicitly to the hub
//! and each connection handler.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::DaemonError;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 8080;

/// Buffer size for socket reads and storage streaming.
pub const DEFAULT_BUFFER_SIZE: usize = protocol::DEFAULT_BUFFER_SIZE;

/// Deadline for chunk reads and in-transfer confirmations.
pub const CHUNK_READ_TIMEOUT: Duration = Duration::from_secs(20);

/// Deadline for the idle wait on a new command or transfer.
pub const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Name of the storage root directory under the executable directory.
pub const FS_ROOT_DIR: &str = ".fs";

/// Daemon configuration.
///
/// Both read deadlines are configurable so tests can shrink them; the
/// defaults match the production protocol discipline.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Address the listener binds to.
    pub address: SocketAddr,
    /// OS path of the storage root, `/`-separated.
    pub root: String,
    /// Chunk size for socket reads and storage streaming.
    pub buffer_size: usize,
    /// Short read deadline (chunks, confirmations).
    pub chunk_timeout: Duration,
    /// Long read deadline (idle wait for a new command).
    pub idle_timeout: Duration,
}

impl DaemonConfig {
    /// Builds a configuration with default address, buffer size, and
    /// deadlines over the given storage root.
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            root: root.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            chunk_timeout: CHUNK_READ_TIMEOUT,
            idle_timeout: IDLE_READ_TIMEOUT,
        }
    }

    /// Resolves the default storage root: the executable directory plus
    /// [`FS_ROOT_DIR`], with platform separators translated to `/`.
    ///
    /// Failing to discover the executable directory is fatal for the daemon.
    pub fn default_root() -> Result<String, DaemonError> {
        let exe = std::env::current_exe().map_err(|_| DaemonError::ExecDir)?;
        let dir = exe.parent().ok_or(DaemonError::ExecDir)?;
        let mut root = dir.to_string_lossy().replace('\\', "/");
        root.push('/');
        root.push_str(FS_ROOT_DIR);
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_constants() {
        let config = DaemonConfig::new("/srv/store");
        assert_eq!(config.address.port(), DEFAULT_PORT);
        assert!(config.address.ip().is_unspecified());
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.chunk_timeout, Duration::from_secs(20));
        assert_eq!(config.idle_timeout, Duration::from_secs(1200));
    }

    #[test]
    fn default_root_lives_under_the_executable_directory() {
        let root = DaemonConfig::default_root().expect("default root");
        assert!(root.ends_with(FS_ROOT_DIR));
        assert!(!root.contains('\\'));
    }
}
