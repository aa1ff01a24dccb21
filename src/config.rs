use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// A minimal Docker Registry v1 server.
#[derive(Debug, Parser)]
#[command(name = "cargobay", version, about)]
pub(crate) struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:5000")]
    pub listen: SocketAddr,

    /// Directory layer blobs are stored under.
    #[arg(long, default_value = "/tmp/registry")]
    pub datadir: PathBuf,
}
