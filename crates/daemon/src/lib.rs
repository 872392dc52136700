//! The file server daemon: per-connection protocol handling, the transfer
//! FSM, the connection hub, and the TCP listener.
//!
//! [`run`] is the binary entry point: it parses the command line, installs
//! the tracing subscriber, builds the runtime, and serves until the process
//! is terminated. [`Server`] is the embeddable form used by the end-to-end
//! tests.

#![deny(unsafe_code)]

mod client;
mod command;
pub mod config;
mod error;
pub mod hub;
pub mod process;
mod server;

use std::ffi::OsString;
use std::process::ExitCode;

use clap::{Arg, Command};
use tracing::error;
use tracing_subscriber::EnvFilter;

pub use config::DaemonConfig;
pub use error::DaemonError;
pub use server::Server;

/// Runs the daemon with the given command-line arguments.
pub fn run<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = match cli().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err) => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match serve(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "daemon terminated");
            ExitCode::FAILURE
        }
    }
}

fn cli() -> Command {
    Command::new("filehubd")
        .about("Channel-organized TCP file server")
        .arg(
            Arg::new("address")
                .long("address")
                .value_name("ADDR")
                .help("Socket address to listen on (default 0.0.0.0:8080)"),
        )
        .arg(
            Arg::new("root")
                .long("root")
                .value_name("DIR")
                .help("Storage root directory (default: the executable directory plus /.fs)"),
        )
        .arg(
            Arg::new("buffer-size")
                .long("buffer-size")
                .value_name("BYTES")
                .help("Socket and storage chunk size (default 1024)"),
        )
}

fn serve(matches: &clap::ArgMatches) -> Result<(), DaemonError> {
    let config = config_from_matches(matches)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let server = Server::bind(config).await?;
        server.run().await
    })
}

fn config_from_matches(matches: &clap::ArgMatches) -> Result<DaemonConfig, DaemonError> {
    let root = match matches.get_one::<String>("root") {
        Some(dir) => dir.replace('\\', "/"),
        None => DaemonConfig::default_root()?,
    };
    let mut config = DaemonConfig::new(root);
    if let Some(address) = matches.get_one::<String>("address") {
        config.address = address
            .parse()
            .map_err(|_| DaemonError::InvalidArgument {
                option: "--address",
                value: address.clone(),
            })?;
    }
    if let Some(size) = matches.get_one::<String>("buffer-size") {
        config.buffer_size = size
            .parse()
            .map_err(|_| DaemonError::InvalidArgument {
                option: "--buffer-size",
                value: size.clone(),
            })?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listen_address_and_buffer_size() {
        let matches = cli()
            .try_get_matches_from([
                "filehubd",
                "--address",
                "127.0.0.1:9000",
                "--root",
                "/srv/store",
                "--buffer-size",
                "4096",
            ])
            .expect("valid arguments");
        let config = config_from_matches(&matches).expect("config");
        assert_eq!(config.address.to_string(), "127.0.0.1:9000");
        assert_eq!(config.root, "/srv/store");
        assert_eq!(config.buffer_size, 4096);
    }

    #[test]
    fn rejects_malformed_listen_address() {
        let matches = cli()
            .try_get_matches_from(["filehubd", "--address", "not-an-addr", "--root", "/tmp"])
            .expect("arguments parse");
        let error = config_from_matches(&matches).unwrap_err();
        assert!(matches!(
            error,
            DaemonError::InvalidArgument {
                option: "--address",
                ..
            }
        ));
    }
}
