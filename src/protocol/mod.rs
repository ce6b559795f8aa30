//! Client-server communication protocol.
//!
//! This module implements the binary request/response protocol spoken between Rime
//! clients and the server, the per-connection session state, authentication, and the
//! connection manager that ties them together.
//!
//! # Overview
//!
//! A connection starts with the server sending a fixed-size [`banner`]. After that the
//! client sends one request at a time and reads exactly one response back; there is no
//! pipelining and no explicit framing. A request is a single command byte followed by
//! that command's arguments, and the shape of the response is implied by the command.
//!
//! # Binary Format
//!
//! - Integers are zig-zag varints, least significant group first (see [`codec`]).
//! - Strings and buffers are a varint length followed by the raw bytes.
//! - Every response starts with a status byte: `1` for success followed by the
//!   command's result, `0` for failure followed by an error message.
//!
//! # Key Components
//!
//! - [`ProtocolTransport`]: buffered bidirectional stream the codec reads from.
//! - [`Request`] / [`Response`]: typed messages for every [`Command`].
//! - [`Session`]: handles and authentication state of one connection.
//! - [`Dispatcher`]: executes requests against the database.
//! - [`Server`]: accepts connections and hands requests to a [`ThreadPool`].
//!
//! # See Also
//!
//! - [`storage`](crate::storage): in-memory engine the server executes against.
pub mod auth;
pub mod codec;
pub mod command;
pub mod dispatch;
pub mod registry;
pub mod request;
pub mod response;
pub mod server;
pub mod session;
pub mod thread;
pub mod transport;

pub use auth::TokenSet;
pub use command::{Command, PROTOCOL_VERSION};
pub use dispatch::Dispatcher;
pub use registry::Registry;
pub use request::Request;
pub use response::Response;
pub use server::{BANNER_PREFIX, BANNER_SIZE, Server, ServerError, banner};
pub use session::Session;
pub use thread::ThreadPool;
pub use transport::ProtocolTransport;
