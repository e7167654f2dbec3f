//! Line-oriented TCP chat with a login handshake.
//!
//! A server accepts TCP connections, insists that every connection opens with
//! `#login <id>`, and relays each later line to every connected client as
//! `<id>: <text>`. Both the server and the client are driven by a console
//! whose `#`-prefixed lines are local commands.
//!
//! - [`message`] defines the newline-delimited wire lines.
//! - [`command`] is the prefix-command router shared by both consoles.
//! - [`session`] tracks per-connection login state on the server.
//! - [`transport`] accepts connections and owns the per-connection reader
//!   and writer tasks; the chat cores only see it through a trait.
//! - [`server`] holds the session set, broadcast relay, and admin commands.
//! - [`client`] owns the single outbound connection and its local commands.
//! - [`console`] is where user-visible output goes.
//! - [`cli`] and [`logging`] are shared by the `server` and `client` binaries.

pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod console;
pub mod logging;
pub mod message;
pub mod server;
pub mod session;
pub mod transport;
