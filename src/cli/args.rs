//! CLI argument definitions using clap
//!
//! Commands:
//! - abcd list
//! - abcd show|count|ids|keys DB [QUERY..]
//! - abcd insert|update DB FILE..
//! - abcd remove|add-keys|remove-keys DB [QUERY..]
//! - abcd serve USER
//! - abcd --remote HOST forward ARGS..

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

const QUERY_HELP: &str = "\
Queries:
  Each QUERY token is KEY<op>VALUE[,VALUE..] with <op> one of
  = != > >= < <= ~. Tokens are combined with AND.

  energy<0.6            energy below 0.6
  id=1,2                id is 1 OR 2
  id!=10,11,12          id is none of 10, 11 and 12 (AND of exclusions)
  elements~C,H          contains C or H

  Range operators take a single value. ~ is only valid on 'elements'.
  A database may be given as HOST:DATABASE instead of --remote HOST.";

/// abcd - query and edit structure-record databases, locally or over ssh
#[derive(Parser, Debug)]
#[command(name = "abcd")]
#[command(version, about, long_about = None, after_help = QUERY_HELP)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// More output; repeat for debug logs and transport diagnostics
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Less output
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub quiet: u8,

    /// Run against a database on HOST, reached over ssh
    #[arg(long, global = true, value_name = "HOST")]
    pub remote: Option<String>,

    /// Local user whose databases to use
    #[arg(long, global = true, value_name = "USER")]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Record selection shared by the read and write commands
#[derive(clap::Args, Debug, Clone)]
pub struct Selection {
    /// Database name, or HOST:DATABASE
    pub database: String,

    /// Filter tokens, e.g. 'energy<0.6' 'elements~C,H'
    pub query: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the databases you have access to
    List,

    /// Print matching records as JSON lines
    Show {
        #[command(flatten)]
        selection: Selection,

        /// Sort keys, e.g. energy:D,id:A
        #[arg(long, default_value = "")]
        sort: String,

        /// Return at most N records (0 means all)
        #[arg(long, default_value_t = 0)]
        limit: usize,

        /// Keys to return, comma separated ('+' for all)
        #[arg(long)]
        keys: Option<String>,

        /// Return every key except those given with --keys
        #[arg(long)]
        omit_keys: bool,
    },

    /// Count matching records
    Count {
        #[command(flatten)]
        selection: Selection,
    },

    /// Print the uid of each matching record
    Ids {
        #[command(flatten)]
        selection: Selection,
    },

    /// Print every key of the matching records with the number of records carrying it
    Keys {
        #[command(flatten)]
        selection: Selection,
    },

    /// Insert records from JSON files
    Insert {
        /// Database name, or HOST:DATABASE
        database: String,

        /// Files holding one JSON record or an array of records
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Key-value pairs added to every record, e.g. project=x,temp=300
        #[arg(long)]
        kvp: Option<String>,
    },

    /// Update records by uid from JSON files
    Update {
        /// Database name, or HOST:DATABASE
        database: String,

        /// Files holding one JSON record or an array of records
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Insert records whose uid is not in the database
        #[arg(long)]
        upsert: bool,

        /// Overwrite records instead of merging keys
        #[arg(long)]
        replace: bool,
    },

    /// Remove matching records
    Remove {
        #[command(flatten)]
        selection: Selection,

        /// Remove at most one record
        #[arg(long)]
        just_one: bool,
    },

    /// Add key-value pairs to matching records
    AddKeys {
        #[command(flatten)]
        selection: Selection,

        /// Key-value pairs, e.g. project=x,temp=300
        #[arg(long, required = true)]
        kvp: String,
    },

    /// Remove keys from matching records
    RemoveKeys {
        #[command(flatten)]
        selection: Selection,

        /// Keys to remove, comma separated
        #[arg(long, required = true)]
        keys: String,
    },

    /// Answer one request line from stdin (remote end of --remote)
    Serve {
        /// User the request runs as
        user: String,
    },

    /// Run the remaining arguments on the --remote host and print its output
    Forward {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

impl Cli {
    /// 1 by default, raised by -v and lowered by -q
    pub fn verbosity(&self) -> i16 {
        1 + i16::from(self.verbose) - i16::from(self.quiet)
    }
}
