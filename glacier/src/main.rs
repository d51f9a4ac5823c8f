use std::process::ExitCode;

use clap::{Parser, Subcommand};
use glacier_observability::init_observability;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{
    compact::CompactArgs,
    error::{ObservabilitySnafu, Result},
    ingest::IngestArgs,
    list::ListArgs,
    reconcile::ReconcileArgs,
    recover::RecoverArgs,
};

mod args;
mod compact;
mod error;
mod ingest;
mod list;
mod reconcile;
mod recover;

#[derive(Parser)]
#[command(name = "glacier")]
#[command(about = "Buffer records and materialize them as Parquet snapshots")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest JSON lines through the buffer pipeline
    Ingest {
        #[clap(flatten)]
        inner: IngestArgs,
    },
    /// Merge the snapshots of a partition
    Compact {
        #[clap(flatten)]
        inner: CompactArgs,
    },
    /// Upload spilled buffers
    Recover {
        #[clap(flatten)]
        inner: RecoverArgs,
    },
    /// Compare stored snapshots with the index
    Reconcile {
        #[clap(flatten)]
        inner: ReconcileArgs,
    },
    /// List the snapshots of a partition
    List {
        #[clap(flatten)]
        inner: ListArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(err = ?err, kind = ?err.kind(), "Command failed");
            eprintln!("error: {err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::from(err.kind().exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    init_observability(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .context(ObservabilitySnafu {})?;

    let ct = CancellationToken::new();

    let ct_clone = ct.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ct_clone.cancel();
    });

    match cli.command {
        Commands::Ingest { inner } => inner.run(ct).await,
        Commands::Compact { inner } => inner.run(ct).await,
        Commands::Recover { inner } => inner.run(ct).await,
        Commands::Reconcile { inner } => inner.run(ct).await,
        Commands::List { inner } => inner.run(ct).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }
}
