use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "fwo", about = "Firmware update orchestration service", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the API server and control loop.
    Serve {
        /// Address to bind the HTTP listener to.
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Port to bind the HTTP listener to.
        #[arg(long, env = "PORT", default_value_t = 28800)]
        port: u16,
    },
}
