//! A tuple space served over TCP.
//!
//! Clients READ, GET (destructive read) and PUT string tuples in a shared
//! in-memory space using a length-prefixed line protocol. Each module
//! focuses on a concrete responsibility:
//!
//! - [`protocol`] frames and parses requests and responses (`003 R a`,
//!   `020 ERR a does not exist`) and reads/writes frames on async streams.
//! - [`store`] owns the tuple map and operation counters behind one lock.
//! - [`server`] accepts connections and runs one request loop per client.
//! - [`stats`] periodically reports averages and counters from the store.
//! - [`script`] turns `PUT`/`READ`/`GET` request files into requests.
//! - [`client`] replays a request file over a connection.
//! - [`demo`] runs a server and several clients in one process.
//! - [`cli`] parses the command-line interface.

pub mod cli;
pub mod client;
pub mod demo;
pub mod protocol;
pub mod script;
pub mod server;
pub mod stats;
pub mod store;
