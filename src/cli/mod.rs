//! Command-line interface
//!
//! Parses arguments with clap, loads the JSON configuration and runs one
//! command against a local store or a remote host.

mod args;
mod commands;
mod config;
mod errors;
mod io;

pub use args::{Cli, Command, Selection};
pub use commands::{run, run_command, split_host, strip_remote_args};
pub use config::{Config, RemoteConfig};
pub use errors::{CliError, CliResult};
pub use io::{parse_kvp, parse_projection, parse_sort, read_records};
