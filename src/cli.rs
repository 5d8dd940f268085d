use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{
    config::Config,
    error::Error,
    protocol::{Ack, ControlMessage, Notice, Outgoing},
    server::DEFAULT_PORT,
};

/// The command line interface for the serial bridge.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// The port to serve on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON request for opening a port.
    Connect,

    /// Show an example JSON request for closing the port.
    Disconnect,

    /// Show an example JSON request of writing to the port.
    Send,

    /// Show an example JSON acknowledgement.
    Ack,

    /// Show an example JSON status message, sent when the port is lost.
    Status,
}

/// Print what the command asks for.
pub fn handle_command(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Examples(example) => {
            let text = match example {
                Examples::Config => Config::example().serialize_pretty()?,
                Examples::Connect => ControlMessage::example_connect().serialize(),
                Examples::Disconnect => ControlMessage::disconnect().serialize(),
                Examples::Send => ControlMessage::example_send().serialize(),
                Examples::Ack => Outgoing::Ack(Ack::example_connect_ok()).into_text(),
                Examples::Status => Outgoing::Notice(Notice::example_transport_lost()).into_text(),
            };

            println!("{text}");
        }
    }

    Ok(())
}
