use std::io::Write;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use serial_bridge::{
    client::{ClientHandle, Output},
    config::DEFAULT_BAUD,
    protocol::Notice,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Watch a device through a running bridge.
/// Device output is printed, lines typed on stdin are sent to the device.
#[derive(Parser, Debug)]
struct Args {
    /// Server address.
    #[arg(short, long, default_value = "localhost")]
    address: String,

    /// Server port.
    #[arg(short = 'P', long, default_value_t = serial_bridge::server::DEFAULT_PORT)]
    server_port: u16,

    /// The device port to open, e.g. `/dev/ttyACM0`.
    /// If not given, whatever the bridge has open is watched.
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate for the device port.
    #[arg(short, long, default_value_t = DEFAULT_BAUD)]
    baud: u32,
}

async fn run(args: Args) -> Result<()> {
    let mut client = ClientHandle::new(&args.address, args.server_port).await?;

    if let Some(port) = &args.port {
        if !client.connect(port, args.baud).await? {
            return Err(eyre!("The bridge could not open {port}"));
        }
        info!(%port, baud = args.baud, "Opened");
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            output = client.next_output() => match output {
                Some(Output::Text(text)) => {
                    let mut stdout = std::io::stdout();
                    stdout.write_all(text.as_bytes())?;
                    stdout.flush()?;
                }
                Some(Output::Notice(Notice::Status { port, reason, .. })) => {
                    warn!(%port, %reason, "Port closed");
                }
                None => return Err(eyre!("The bridge went away")),
            },
            line = stdin.next_line() => match line? {
                Some(line) => {
                    if !client.send(format!("{line}\n")).await? {
                        warn!("Send failed, is a port open?");
                    }
                }
                None => return Ok(()),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    serial_bridge::logging::init(None).await;

    let args = Args::parse();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting");
            Ok(())
        }
        result = run(args) => result,
    }
}
