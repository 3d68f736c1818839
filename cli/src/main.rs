use std::borrow::Cow;
use std::path::PathBuf;

use anyhow::Context as AnyhowContext;
use clap::{Parser, Subcommand};
use flexi_logger::{FileSpec, LevelFilter, LogSpecification, Logger, LoggerHandle, WriteMode};

use blocker::{Context, DefaultContext};

mod device;
mod parsers;
mod printer;

mod apps;
use apps::Apps;

mod check_root;
use check_root::CheckRoot;

mod components;
use components::Components;

mod manifest;
use manifest::Manifest;

mod state;
use state::{SetState, State};

mod rules;
use rules::{Export, Import};

mod ifw;
use ifw::Ifw;

const SIMPLE_VERSION_STRING: &'static str =
    include!(concat!(env!("OUT_DIR"), "/simple_version_string"));
const VERSION_STRING: &'static str = include!(concat!(env!("OUT_DIR"), "/version_string"));

#[derive(Parser)]
#[command(name = "blocker")]
#[command(version(SIMPLE_VERSION_STRING))]
#[command(long_version(VERSION_STRING))]
struct Cli {
    /// `-e`, `--log-stderr`: Log to `stderr` instead of the log file
    #[arg(short = 'e', long, help = "Log to stderr instead of a file", action = clap::ArgAction::SetTrue, default_value_t = false)]
    log_stderr: bool,

    /// `-f`, `--log-file`: Path of the log file. Defaults to `log` in the
    /// user's local data directory
    #[arg(short = 'f', long, help = "Send log output to the given file")]
    log_file: Option<PathBuf>,

    /// `-s`, `--log-spec`: A [flexi_logger](https://docs.rs/flexi_logger/latest/flexi_logger/struct.LogSpecification.html)
    /// log specification, wins over `--log-level`
    #[arg(short = 's', long, help = "Log spec for flexi_logger")]
    log_spec: Option<String>,

    /// `-l`, `--log-level`: Log verbosity of the `blocker` crates:
    ///
    /// | Value | Log Level |
    /// | ----- | --------- |
    /// | **0** | **Warn** |
    /// | 1 | Info |
    /// | 2 | Debug |
    /// | 3 | Trace |
    #[arg(
        short = 'l',
        long,
        help = "Set the log level, 0 = warn, 1 = info, etc",
        long_help = None,
        default_value_t = 0
    )]
    log_level: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the full version string and exit
    #[command()]
    Version,

    /// Check whether root and the companion are available
    #[command()]
    CheckRoot(CheckRoot),

    /// List installed applications
    #[command()]
    Apps(Apps),

    /// List the components of an application
    #[command()]
    Components(Components),

    /// Print the components declared in a manifest
    #[command()]
    Manifest(Manifest),

    /// Enable a component through the configured controller
    #[command()]
    Enable(SetState),

    /// Disable a component through the configured controller
    #[command()]
    Disable(SetState),

    /// Show the platform and firewall state of a component
    #[command()]
    State(State),

    /// Write a rule document per application to the backup location
    #[command()]
    Export(Export),

    /// Apply the rule documents in the backup location
    #[command()]
    Import(Import),

    /// Intent firewall rule files
    #[command()]
    Ifw(Ifw),
}

impl Cli {
    fn configure_loggers(&self, ctx: &DefaultContext) -> anyhow::Result<LoggerHandle> {
        let log_spec = match &self.log_spec {
            Some(s) => {
                LogSpecification::parse(s).with_context(|| format!("parsing log spec {}", s))?
            }
            None => {
                let lvl = match self.log_level {
                    0 => LevelFilter::Warn,
                    1 => LevelFilter::Info,
                    2 => LevelFilter::Debug,
                    _ => LevelFilter::Trace,
                };
                LogSpecification::builder()
                    .default(LevelFilter::Warn)
                    .module("blocker", lvl)
                    .build()
            }
        };

        let mut logger = Logger::with(log_spec);

        if self.log_stderr {
            return Ok(logger.start().with_context(|| "starting logger")?);
        }

        let path = match &self.log_file {
            Some(v) if v.is_absolute() => Some(Cow::Borrowed(v)),
            Some(v) => Some(Cow::Owned(std::env::current_dir()?.join(v))),
            None => ctx
                .get_user_local_dir()
                .and_then(|dir| {
                    blocker::utils::ensure_dir_exists(&dir)?;
                    Ok(dir.join("log"))
                })
                .map(Cow::Owned)
                .ok(),
        };

        if let Some(p) = &path {
            logger = logger
                .log_to_file(FileSpec::try_from(p.as_ref()).with_context(|| "creating filespec")?)
                .append()
                .write_mode(WriteMode::BufferAndFlush);
        }

        Ok(logger.start().with_context(|| "starting logger")?)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = &cli.command {
        println!("{}", VERSION_STRING);
        return Ok(());
    }

    let ctx = DefaultContext::new();
    let log_handle = cli.configure_loggers(&ctx)?;

    let res = match &cli.command {
        Commands::CheckRoot(c) => c.run(),
        Commands::Apps(c) => c.run(),
        Commands::Components(c) => c.run(),
        Commands::Manifest(c) => c.run(),
        Commands::Enable(c) => c.run(true),
        Commands::Disable(c) => c.run(false),
        Commands::State(c) => c.run(),
        Commands::Export(c) => c.run(),
        Commands::Import(c) => c.run(),
        Commands::Ifw(c) => c.run(),

        Commands::Version => Ok(()),
    };

    log_handle.flush();
    res
}
