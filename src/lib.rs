//! abcd - a structure-record database client
//!
//! Filter tokens are compiled into a backend-neutral condition set, run
//! against a pluggable store, or forwarded over ssh to a peer running
//! `abcd serve`.

pub mod backend;
pub mod cli;
pub mod query;
pub mod remote;
pub mod server;
pub mod translate;
