use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{TransferConfig, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_METADATA_LEN};

#[derive(Parser, Debug)]
#[command(name = "sepcast")]
#[command(about = "Send a single file over a raw TCP stream", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Bytes moved per read/write call
    #[arg(long, global = true, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Skip the one-byte acknowledgement after the metadata (both ends must agree)
    #[arg(long, global = true)]
    pub no_handshake: bool,

    /// Give up when connect or any read/write stalls this long (e.g. "30s", "2m")
    #[arg(long, global = true, default_value = "30s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Wait forever on a silent peer
    #[arg(long, global = true, conflicts_with = "timeout")]
    pub no_timeout: bool,

    /// Reject metadata frames longer than this many bytes
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_METADATA_LEN)]
    pub max_metadata_len: usize,

    /// Show a progress bar on stderr
    #[arg(long, global = true)]
    pub progress: bool,

    /// Verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a file to a listening receiver
    Send {
        /// File to send
        filename: PathBuf,

        /// Receiver address
        host: String,

        /// Receiver port
        port: u16,
    },

    /// Wait for one sender and receive its file
    Recv {
        /// Address to listen on
        host: String,

        /// Port to listen on
        port: u16,

        /// Directory to write the received file into
        #[arg(long, short = 'd', default_value = ".")]
        receive_dir: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Settings for the transfer this invocation runs
    pub fn transfer_config(&self) -> TransferConfig {
        let config = TransferConfig::new()
            .with_buffer_size(self.buffer_size)
            .with_handshake(!self.no_handshake)
            .with_io_timeout((!self.no_timeout).then_some(self.timeout))
            .with_max_metadata_len(self.max_metadata_len)
            .with_progress(self.progress);

        match &self.command {
            Commands::Recv { receive_dir, .. } => config.with_receive_dir(receive_dir),
            Commands::Send { .. } => config,
        }
    }
}
