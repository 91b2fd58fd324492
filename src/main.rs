//! Command-line entry point.

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use riptide::metainfo::Metainfo;
use riptide::session::{Config, Session};

#[derive(Parser, Debug)]
#[command(author, version, about = "A BitTorrent client")]
struct Args {
    /// URL or path of the torrent descriptor.
    #[arg(long)]
    torrent: String,

    /// Directory the payload files are stored under.
    #[arg(long, default_value = ".")]
    file_dir: PathBuf,

    /// Listen port; 0 lets the OS pick one.
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// Open the listen port on the gateway via UPnP.
    #[arg(long)]
    use_upnp: bool,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    // Usage errors (a missing --torrent, say) exit 1; --help and --version
    // exit 0.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };

    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Err(err) = run(args).await {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let metainfo = Metainfo::load(&args.torrent)
        .await
        .with_context(|| format!("could not load torrent {}", args.torrent))?;
    info!(
        name = %metainfo.info.name,
        size = metainfo.info.total_length,
        tracker = %metainfo.announce,
        "torrent loaded"
    );

    let config = Config {
        file_dir: args.file_dir,
        port: args.port,
        use_upnp: args.use_upnp,
    };
    let session = Session::new(metainfo, config)
        .await
        .context("could not start session")?;
    session.run().await;
    Ok(())
}
