use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use reqwest::Url;

use crate::server::{ServerConfig, DEFAULT_PUBLIC_DIR, DEFAULT_SUBSCRIBER_BUFFER};

/// Running without a subcommand starts the server, configured by the
/// top-level flags.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(flatten)]
    pub serve: ServeArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server.
    Serve(ServeArgs),
    /// Publish one message to a running server.
    Send(SendArgs),
    /// Print messages from a running server as they arrive.
    Listen(ListenArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Interface to bind to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Directory holding the chat page and other static files.
    #[arg(long, default_value = DEFAULT_PUBLIC_DIR)]
    pub public_dir: PathBuf,

    /// Messages buffered per event-stream client before it starts missing them.
    #[arg(long, default_value_t = DEFAULT_SUBSCRIBER_BUFFER)]
    pub subscriber_buffer: usize,

    /// Seconds between keep-alive comments on idle event streams.
    #[arg(long, default_value_t = 15)]
    pub keep_alive_secs: u64,
}

impl ServeArgs {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            public_dir: self.public_dir.clone(),
            subscriber_buffer: self.subscriber_buffer,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Base URL of the chat server.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    pub server: Url,

    /// Text to publish.
    #[arg(long, short)]
    pub message: String,
}

#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    /// Base URL of the chat server.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    pub server: Url,
}
