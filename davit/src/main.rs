use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use davit::auth::BasicAuthPlugin;
use davit::config::{self, Config};
use davit::memtree::MemTree;
use davit_proto::{DavServer, Server};

#[derive(Debug, Parser)]
#[command(about, version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "DAVIT_CONFIG", default_value = "davit.toml")]
    config: PathBuf,

    /// Override the listening address from the configuration
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config: Config = config::read_config(args.config)?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let tree = MemTree::with_options(config.extended_mkcol, config.quota_bytes);
    let mut dav = DavServer::new(Arc::new(tree), &config.base_uri, &config.staging_dir);
    if let Some(auth) = config.auth.clone() {
        dav.register_plugin(Arc::new(BasicAuthPlugin::new(auth)));
    }

    let (exit_tx, exit_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(err=?e, "unable to listen for the interrupt signal");
        }
        tracing::info!("interrupt received, shutting down");
        let _ = exit_tx.send(true);
    });

    Server::new(config.bind_addr, dav).run(exit_rx).await
}
