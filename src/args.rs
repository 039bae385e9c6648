use crate::client;
use crate::server;
use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::debug;

/// Command line surface: one binary, one subcommand per role.
#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Multi-room chat and file relay over TCP")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the chat server
    Serve {
        /// Port to listen on (1-10000)
        #[arg(value_name = "PORT")]
        port: u16,
    },
    /// Connect to a running chat server as a terminal client
    Connect {
        /// Server address, e.g. 127.0.0.1
        #[arg(value_name = "HOST")]
        host: String,
        /// Server port (1-10000)
        #[arg(value_name = "PORT")]
        port: u16,
    },
}

impl Default for Args {
    fn default() -> Self {
        Self::new()
    }
}

impl Args {
    pub fn new() -> Self {
        Self::parse()
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        debug!("args: {:#?}", self);
        match &self.command {
            Some(Commands::Serve { port }) => {
                check_port(*port)?;
                server::start(*port).await
            }
            Some(Commands::Connect { host, port }) => {
                check_port(*port)?;
                client::start(host, *port).await
            }
            None => bail!("No command given. Usage: parley <serve PORT | connect HOST PORT>"),
        }
    }
}

fn check_port(port: u16) -> anyhow::Result<()> {
    if port == 0 || port > 10_000 {
        bail!("Invalid port number: {port} (expected 1-10000)");
    }
    Ok(())
}
