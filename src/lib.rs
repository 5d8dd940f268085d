#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// Code relating to setting up the server which sets up connections and spawns handlers for clients.
pub mod server;

/// Clients.
pub mod client;

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;

/// Output read from the device.
pub mod frame;

/// A connected viewer.
pub mod subscriber;

/// What subscribers and the bridge say to each other.
pub mod protocol;

/// Opening, reading and writing the device.
pub mod transport;

/// Delivery to every connected subscriber.
pub mod fanout;

/// The single session and the task owning it.
pub mod session;

/// Events the session emits.
pub mod events;

/// Serial devices on this machine.
pub mod ports;

/// The external board toolchain.
pub mod toolchain;

/// The sketch workspace.
pub mod storage;

/// HTTP routes for everything besides the session.
pub(crate) mod api;

/// Handles incoming websockets.
pub(crate) mod websocket;

/// The actor spawned from a connected subscriber.
pub(crate) mod peer;
