//! CLI command implementations
//!
//! Every command resolves its target (local store or `--remote` host),
//! opens a backend through the registry or the ssh client, runs exactly one
//! backend operation and prints the outcome to stdout.

use std::env;
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::{
    Backend, BackendRegistry, BackendSettings, Credentials, FindQuery, KeyValuePairs, OpenGuard,
    Record,
};
use crate::query::compile;
use crate::remote::{RemoteBackend, SshTransport, Transport};
use crate::server::Dispatcher;

use super::args::{Cli, Command, Selection};
use super::config::{Config, RemoteConfig};
use super::errors::{CliError, CliResult};
use super::io::{
    key_counts, parse_kvp, parse_projection, parse_sort, read_records, split_list,
    write_databases, write_ids, write_key_counts, write_records, write_result,
};

/// Program run on the remote host by `forward` when no command is configured
const REMOTE_PROGRAM: &str = "abcd";

/// Entry point used by `main`
pub fn run() -> ExitCode {
    let raw: Vec<OsString> = env::args_os().collect();
    let mut verbosity = 1;

    let result = prepare(raw).and_then(|(cli, config)| {
        verbosity = cli.verbosity();
        init_logging(verbosity);
        let registry = BackendRegistry::with_defaults();
        let stdout = io::stdout();
        let mut out = stdout.lock();
        run_command(cli, &config, &registry, io::stdin().lock(), &mut out)
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e, verbosity);
            ExitCode::FAILURE
        }
    }
}

/// Load the configuration and parse the command line with its `opts` in front
fn prepare(raw: Vec<OsString>) -> CliResult<(Cli, Config)> {
    let explicit = config_path(&raw);
    let config = Config::discover(explicit.as_deref())?;

    let mut argv = raw.into_iter();
    let mut full: Vec<OsString> = argv.next().into_iter().collect();
    full.extend(config.opts.iter().map(OsString::from));
    full.extend(argv);

    Ok((Cli::parse_from(full), config))
}

/// `--config` has to be known before clap runs, since the file may add arguments
fn config_path(raw: &[OsString]) -> Option<PathBuf> {
    let mut iter = raw.iter().skip(1);
    while let Some(arg) = iter.next() {
        let arg = arg.to_string_lossy();
        if arg == "--" {
            break;
        }
        if arg == "--config" {
            return iter.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

fn init_logging(verbosity: i16) {
    let level = match verbosity {
        i16::MIN..=0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // stdout is reserved for command output and the wire protocol
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn report(err: &CliError, verbosity: i16) {
    eprintln!("{}: {}", err.kind(), err);
    if verbosity >= 2 {
        if let Some(detail) = err.detail() {
            eprintln!("{}", detail);
        }
    }
}

/// Split `HOST:DATABASE` into its parts; a plain name has no host
pub fn split_host(target: &str) -> (Option<&str>, &str) {
    match target.split_once(':') {
        Some((host, database)) if !host.is_empty() => (Some(host), database),
        _ => (None, target),
    }
}

/// Remove `--remote HOST` and `--remote=HOST` from an argument list
pub fn strip_remote_args(args: &[String]) -> Vec<String> {
    let mut stripped = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--remote" {
            iter.next();
        } else if !arg.starts_with("--remote=") {
            stripped.push(arg.clone());
        }
    }
    stripped
}

/// Quote one argument for the remote login shell
fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Where a command runs: an optional remote host plus a database name
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: Option<String>,
    database: Option<String>,
}

impl Target {
    fn resolve(cli: &Cli, database: Option<&str>) -> CliResult<Self> {
        let (host, database) = match database.map(split_host) {
            Some((Some(host), database)) => {
                if cli.remote.is_some() {
                    return Err(CliError::usage(format!(
                        "Remote host given twice: '{}' and --remote",
                        host
                    )));
                }
                (Some(host.to_string()), Some(database))
            }
            Some((None, database)) => (cli.remote.clone(), Some(database)),
            None => (cli.remote.clone(), None),
        };
        if host.is_some() && cli.user.is_some() {
            return Err(CliError::usage("--user cannot be used with a remote host"));
        }
        if database == Some("") {
            return Err(CliError::usage("Database name must not be empty"));
        }
        Ok(Self {
            host,
            database: database.map(String::from),
        })
    }
}

fn ssh_transport(host: &str, remote: &RemoteConfig) -> SshTransport {
    SshTransport::new(host)
        .with_program(remote.program.clone())
        .with_args(remote.args.clone())
        .with_command(remote.command.clone())
        .with_timeout_secs(remote.timeout_secs)
}

fn open_backend(
    target: &Target,
    user: Option<&str>,
    config: &Config,
    registry: &BackendRegistry,
) -> CliResult<Box<dyn Backend>> {
    if let Some(host) = &target.host {
        debug!(host = %host, database = ?target.database, "using remote backend");
        let transport = ssh_transport(host, &config.remote);
        return Ok(Box::new(RemoteBackend::new(transport, target.database.clone())));
    }

    if !registry.contains(&config.backend) {
        return Err(CliError::config_error(format!(
            "Unknown backend '{}' (available: {})",
            config.backend,
            registry.names().join(", ")
        )));
    }
    let settings = BackendSettings {
        databases_dir: config.databases_dir.clone(),
        database: target.database.clone(),
        user: user.map(String::from),
    };
    Ok(registry.create(&config.backend, &settings)?)
}

fn read_all(files: &[PathBuf]) -> CliResult<Vec<Record>> {
    let mut records = Vec::new();
    for path in files {
        records.extend(read_records(path)?);
    }
    Ok(records)
}

/// Execute a parsed command line
pub fn run_command<R: Read, W: Write>(
    cli: Cli,
    config: &Config,
    registry: &BackendRegistry,
    input: R,
    out: &mut W,
) -> CliResult<()> {
    let database = match &cli.command {
        Command::List | Command::Serve { .. } | Command::Forward { .. } => None,
        Command::Show { selection, .. }
        | Command::Count { selection }
        | Command::Ids { selection }
        | Command::Keys { selection }
        | Command::Remove { selection, .. }
        | Command::AddKeys { selection, .. }
        | Command::RemoveKeys { selection, .. } => Some(selection.database.as_str()),
        Command::Insert { database, .. } | Command::Update { database, .. } => {
            Some(database.as_str())
        }
    };

    match &cli.command {
        Command::Serve { user } => return serve(user, config, registry, input, out),
        Command::Forward { args } => return forward(&cli, args, config, out),
        _ => {}
    }

    let target = Target::resolve(&cli, database)?;
    let mut backend = open_backend(&target, cli.user.as_deref(), config, registry)?;
    let mut guard = OpenGuard::new(backend.as_mut())?;
    let token = guard.authenticate(&Credentials::new(cli.user.clone()))?;
    info!(command = ?cli.command, host = ?target.host, "running command");

    match cli.command {
        Command::List => {
            let names = guard.list(&token)?;
            let greeting = match (&target.host, token.username()) {
                (Some(host), _) => host.clone(),
                (None, Some(user)) => user.to_string(),
                (None, None) => "local".to_string(),
            };
            write_databases(out, &greeting, &names)?;
        }
        Command::Show {
            selection,
            sort,
            limit,
            keys,
            omit_keys,
        } => {
            let query = FindQuery {
                filter: compile(&selection.query)?,
                sort: parse_sort(&sort)?,
                limit,
                projection: parse_projection(keys.as_deref(), omit_keys)?,
            };
            let n = write_records(out, guard.find(&token, &query)?)?;
            debug!(records = n, "printed records");
        }
        Command::Count { selection } => {
            let n = guard.find(&token, &selected(&selection)?)?.count();
            writeln!(out, "Found: {}", n)?;
        }
        Command::Ids { selection } => {
            write_ids(out, guard.find(&token, &selected(&selection)?)?)?;
        }
        Command::Keys { selection } => {
            let counts = key_counts(guard.find(&token, &selected(&selection)?)?);
            write_key_counts(out, &counts)?;
        }
        Command::Insert { files, kvp, .. } => {
            let records = read_all(&files)?;
            let kvp = match kvp {
                Some(raw) => parse_kvp(&raw)?,
                None => KeyValuePairs::new(),
            };
            let result = guard.insert(&token, records, &kvp)?;
            write_result(out, &result.into())?;
        }
        Command::Update {
            files,
            upsert,
            replace,
            ..
        } => {
            let records = read_all(&files)?;
            let result = guard.update(&token, records, upsert, replace)?;
            write_result(out, &result.into())?;
        }
        Command::Remove {
            selection,
            just_one,
        } => {
            let filter = compile(&selection.query)?;
            let result = guard.remove(&token, &filter, just_one)?;
            write_result(out, &result.into())?;
        }
        Command::AddKeys { selection, kvp } => {
            let filter = compile(&selection.query)?;
            let result = guard.add_keys(&token, &filter, &parse_kvp(&kvp)?)?;
            write_result(out, &result.into())?;
        }
        Command::RemoveKeys { selection, keys } => {
            let filter = compile(&selection.query)?;
            let result = guard.remove_keys(&token, &filter, &split_list(&keys))?;
            write_result(out, &result.into())?;
        }
        Command::Serve { .. } | Command::Forward { .. } => {}
    }
    out.flush()?;
    Ok(())
}

fn selected(selection: &Selection) -> CliResult<FindQuery> {
    Ok(FindQuery::new(compile(&selection.query)?))
}

/// Answer one request line from `input` as `user`
fn serve<R: Read, W: Write>(
    user: &str,
    config: &Config,
    registry: &BackendRegistry,
    input: R,
    out: &mut W,
) -> CliResult<()> {
    if !registry.contains(&config.backend) {
        return Err(CliError::config_error(format!(
            "Unknown backend '{}'",
            config.backend
        )));
    }
    let mut dispatcher = Dispatcher::new(user, |database: Option<&str>, user: &str| {
        let settings = BackendSettings {
            databases_dir: config.databases_dir.clone(),
            database: database.map(String::from),
            user: Some(user.to_string()),
        };
        registry.create(&config.backend, &settings)
    });
    let response = dispatcher.serve(input, out)?;
    info!(code = response.code().as_u16(), "response written");
    Ok(())
}

/// Re-run `args` on the `--remote` host and copy its output
fn forward<W: Write>(cli: &Cli, args: &[String], config: &Config, out: &mut W) -> CliResult<()> {
    let host = cli
        .remote
        .as_deref()
        .ok_or_else(|| CliError::usage("forward needs --remote HOST"))?;

    let mut command = if config.remote.command.is_empty() {
        vec![REMOTE_PROGRAM.to_string()]
    } else {
        config.remote.command.clone()
    };
    command.extend(strip_remote_args(args).iter().map(|arg| shell_quote(arg)));

    let transport = ssh_transport(host, &config.remote).with_command(command);
    debug!(command = ?transport.command_line(), "forwarding");
    let output = transport.call("")?;

    out.write_all(output.stdout.as_bytes())?;
    out.flush()?;
    if !output.stderr.is_empty() {
        eprint!("{}", output.stderr);
    }
    if output.status != Some(0) {
        warn!(status = ?output.status, "remote command failed");
        return Err(CliError::Remote {
            status: output.status,
        });
    }
    Ok(())
}
