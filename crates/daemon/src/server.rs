//! The TCP listener: binds, spawns the hub, and hands accepted sockets to
//! connection handlers.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use fs::{storage, File, Path};

use crate::client::{self, ClientOptions};
use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::hub::{Hub, HubHandle};

/// A bound file server ready to accept connections.
pub struct Server {
    listener: TcpListener,
    hub: HubHandle,
    config: DaemonConfig,
}

impl Server {
    /// Ensures the storage root exists, starts the hub event loop, and binds
    /// the listener.
    pub async fn bind(config: DaemonConfig) -> Result<Self, DaemonError> {
        let root = File::new(Path::root()).to_os_file(config.root.clone());
        storage::create_dir_if_not_exists(&root).await?;

        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let listener = TcpListener::bind(config.address).await?;
        info!(
            address = %listener.local_addr()?,
            root = %config.root,
            "server listening"
        );
        Ok(Self {
            listener,
            hub: handle,
            config,
        })
    }

    /// The bound address; useful when binding to an ephemeral port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever. Accept errors are logged and the loop
    /// continues.
    pub async fn run(self) -> Result<(), DaemonError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    let hub = self.hub.clone();
                    let options = ClientOptions::from(&self.config);
                    tokio::spawn(client::run_client(stream, hub, options));
                }
                Err(err) => {
                    warn!(error = %err, "fail to accept client");
                }
            }
        }
    }
}
