use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "denuncia",
    about = "Denuncia: anonymous complaint intake",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML configuration file with `[backend]` and `[sdk]` tables
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve the intake API over HTTP
    Serve(ServeArgs),
    /// Show the resolved backend configuration and where it came from
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Largest accepted request body in bytes
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}
