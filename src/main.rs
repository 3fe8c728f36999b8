mod cli;
mod config;
mod error;
mod network;
mod progress;
mod protocol;
mod session;
mod transfer;

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use error::TransferError;
use session::{Receiver, Sender};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        tracing::error!("{:#}", err);
        let code = err
            .downcast_ref::<TransferError>()
            .map(TransferError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.transfer_config();

    match cli.command {
        Commands::Send { filename, host, port } => {
            Sender::new(config)?
                .send(&filename, &host, port)
                .await
                .with_context(|| format!("sending {} to {}:{}", filename.display(), host, port))?;
        }
        Commands::Recv { host, port, .. } => {
            let receiver = Receiver::bind(config, &host, port).await?;
            receiver.receive().await.context("receiving file")?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise info, or debug with `--verbose`
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}
