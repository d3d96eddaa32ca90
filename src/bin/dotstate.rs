// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotstate::{
    compose,
    config::Config,
    path::{default_config_file, default_state_file},
    record::{ENTRY_STATE_BUCKET, SCRIPT_STATE_BUCKET},
    state::{SqliteState, TracingSink},
    ComposedState, PersistentState, StackOptions, StateError, StateMode,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::{collections::BTreeMap, fs::read_to_string, path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  dotstate [options] <dotstate-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(flatten)]
    pub options: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self, config: Config) -> Result<()> {
        let options = StackOptions {
            mode: self.options.mode().unwrap_or(config.state.mode),
            debug: self.options.debug || config.state.debug,
            overlay: self.options.overlay || config.state.overlay,
        };
        let configured = config.state.path.map(|path| path.as_path().to_path_buf());
        let path = match self.options.state.or(configured) {
            Some(path) => path,
            None => default_state_file()?,
        };

        let mut state = compose(SqliteState::new(path), options, TracingSink);
        state.open_or_create()?;

        match self.command {
            Command::Get(opts) => run_get(&state, opts)?,
            Command::Set(opts) => run_set(&mut state, opts)?,
            Command::Delete(opts) => run_delete(&mut state, opts)?,
            Command::Dump(opts) => run_dump(&state, opts)?,
            Command::Reset(opts) => run_reset(&mut state, opts)?,
        }

        report_dry_run(&state);

        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
struct GlobalOptions {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Path to persistent state file.
    #[arg(short, long, global = true, value_name = "path")]
    pub state: Option<PathBuf>,

    /// Report changes to persistent state without making them.
    #[arg(short = 'n', long, global = true, conflicts_with_all = ["read_only", "no_state"])]
    pub dry_run: bool,

    /// Reject any change to persistent state.
    #[arg(short, long, global = true, conflicts_with = "no_state")]
    pub read_only: bool,

    /// Neither read nor write persistent state.
    #[arg(long, global = true)]
    pub no_state: bool,

    /// Let dry runs read back their own changes.
    #[arg(long, global = true)]
    pub overlay: bool,

    /// Log every persistent state call.
    #[arg(short, long, global = true)]
    pub debug: bool,
}

impl GlobalOptions {
    fn mode(&self) -> Option<StateMode> {
        if self.dry_run {
            Some(StateMode::DryRun)
        } else if self.read_only {
            Some(StateMode::ReadOnly)
        } else if self.no_state {
            Some(StateMode::Null)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Print value of key in bucket.
    #[command(override_usage = "dotstate get [options] --bucket <bucket> --key <key>")]
    Get(GetOptions),

    /// Insert or replace value of key in bucket.
    #[command(override_usage = "dotstate set [options] --bucket <bucket> --key <key> --value <value>")]
    Set(SetOptions),

    /// Remove key from bucket.
    #[command(override_usage = "dotstate delete [options] --bucket <bucket> --key <key>")]
    Delete(DeleteOptions),

    /// Print contents of buckets as TOML.
    #[command(override_usage = "dotstate dump [options] [--bucket <bucket>]...")]
    Dump(DumpOptions),

    /// Remove every key from bucket.
    #[command(override_usage = "dotstate reset [options] --bucket <bucket>")]
    Reset(ResetOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct GetOptions {
    /// Bucket to read from.
    #[arg(short, long, value_name = "bucket")]
    pub bucket: String,

    /// Key to read.
    #[arg(short, long, value_name = "key")]
    pub key: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SetOptions {
    /// Bucket to write into.
    #[arg(short, long, value_name = "bucket")]
    pub bucket: String,

    /// Key to write.
    #[arg(short, long, value_name = "key")]
    pub key: String,

    /// Value to write.
    #[arg(short, long, value_name = "value")]
    pub value: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeleteOptions {
    /// Bucket to remove from.
    #[arg(short, long, value_name = "bucket")]
    pub bucket: String,

    /// Key to remove.
    #[arg(short, long, value_name = "key")]
    pub key: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DumpOptions {
    /// Buckets to print, entry and script state by default.
    #[arg(short, long = "bucket", value_name = "bucket")]
    pub buckets: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ResetOptions {
    /// Bucket to empty.
    #[arg(short, long, value_name = "bucket")]
    pub bucket: String,
}

fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let default_level = if cli.options.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run(cli) {
        match error.downcast_ref::<StateError>() {
            Some(state_error) if state_error.is_read_only_failure() => {
                error!("not permitted in this mode: {state_error}");
            }
            _ => error!("{error:?}"),
        }
        exit(1);
    }

    exit(0)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.options.config.clone())?;
    cli.run(config)
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    // INVARIANT: Only an explicitly requested configuration file must exist.
    let (path, required) = match path {
        Some(path) => (path, true),
        None => (default_config_file()?, false),
    };

    if !required && !path.exists() {
        return Ok(Config::default());
    }

    let data = read_to_string(&path)
        .with_context(|| format!("failed to read configuration file {:?}", path.display()))?;
    let config = data
        .parse::<Config>()
        .with_context(|| format!("failed to parse configuration file {:?}", path.display()))?;

    Ok(config)
}

fn run_get(state: &ComposedState<'_>, opts: GetOptions) -> Result<()> {
    let value = state.get(opts.bucket.as_bytes(), opts.key.as_bytes())?;
    println!("{}", String::from_utf8_lossy(&value));

    Ok(())
}

fn run_set(state: &mut ComposedState<'_>, opts: SetOptions) -> Result<()> {
    state.set(
        opts.bucket.as_bytes(),
        opts.key.as_bytes(),
        opts.value.as_bytes(),
    )?;
    info!("set {:?} in bucket {:?}", opts.key, opts.bucket);

    Ok(())
}

fn run_delete(state: &mut ComposedState<'_>, opts: DeleteOptions) -> Result<()> {
    state.delete(opts.bucket.as_bytes(), opts.key.as_bytes())?;
    info!("delete {:?} from bucket {:?}", opts.key, opts.bucket);

    Ok(())
}

fn run_dump(state: &ComposedState<'_>, opts: DumpOptions) -> Result<()> {
    let buckets = if opts.buckets.is_empty() {
        vec![ENTRY_STATE_BUCKET.to_vec(), SCRIPT_STATE_BUCKET.to_vec()]
    } else {
        opts.buckets.into_iter().map(String::into_bytes).collect()
    };

    let mut dump = BTreeMap::new();
    for bucket in buckets {
        let mut entries = BTreeMap::new();
        state.for_each(&bucket, &mut |key, value| {
            entries.insert(
                String::from_utf8_lossy(key).into_owned(),
                String::from_utf8_lossy(value).into_owned(),
            );
            Ok(())
        })?;
        dump.insert(String::from_utf8_lossy(&bucket).into_owned(), entries);
    }

    print!("{}", toml::ser::to_string_pretty(&dump)?);

    Ok(())
}

fn run_reset(state: &mut ComposedState<'_>, opts: ResetOptions) -> Result<()> {
    let bucket = opts.bucket.as_bytes();
    let mut keys = Vec::new();
    state.for_each(bucket, &mut |key, _| {
        keys.push(key.to_vec());
        Ok(())
    })?;

    for key in &keys {
        state.delete(bucket, key)?;
    }
    info!("reset {} keys in bucket {:?}", keys.len(), opts.bucket);

    Ok(())
}

fn report_dry_run(state: &ComposedState<'_>) {
    if state.mode() != StateMode::DryRun {
        return;
    }

    if state.modified() {
        info!("dry run: persistent state would have been modified");
    } else {
        info!("dry run: persistent state would have been left untouched");
    }
}
