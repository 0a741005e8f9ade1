use clap::{ArgAction, Parser, Subcommand};
use execenv::{
    batch::BatchInfo,
    config::{Config, ConfigErrors},
    env::EnvSnapshot,
    environment::{prepare_snapshot, ExecEnvironment},
    exec::{command_line, CommandError, SystemRunner},
    resources::{ProbeError, ResourceInfo},
    script::ShellKind,
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "execenv", version, about = "Inspect the batch system and MPI launcher of a job")]
struct Cli {
    /// YAML configuration, command line flags take precedence
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MPI variant, e.g., MPICH2, OpenMPI or LAM_MPI
    #[arg(long, global = true, value_name = "VARIANT")]
    mpi: Option<String>,

    /// directory of the MPI installation, searched before PATH
    #[arg(long, global = true, value_name = "DIR")]
    mpi_bindir: Option<PathBuf>,

    /// number of processes, overrides what the resource manager grants
    #[arg(short = 'n', long, global = true, value_name = "NUM")]
    procs: Option<usize>,

    /// number of processes if none could be detected
    #[arg(long, global = true, value_name = "NUM")]
    procs_default: Option<usize>,

    /// working directory for generated hosts files
    #[arg(long, global = true, value_name = "DIR")]
    wdir: Option<PathBuf>,

    /// timeout for introspection commands in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    command_timeout: Option<u64>,

    /// increase log verbosity, RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print batch system and resource information
    Detect,
    /// Print the complete execution environment
    Show,
    /// Print the selected MPI environment
    Mpi,
    /// Print the hosts file path, generating it from the hosts list if needed
    Hostsfile,
    /// Run the information commands of the MPI implementation
    Info,
    /// Print the commands starting the MPI daemons
    Boot,
    /// Print the commands stopping the MPI daemons
    Halt,
    /// Print the remaining wall time of the job, if the scheduler reports it
    RemainingTime,
    /// Print a variable export for the current shell
    Export { var: String, value: String },
    /// Print a command prepending a directory to a PATH like variable
    PrependPath { var: String, path: String },
    /// Run a command in the prepared environment and exit with its status
    Run {
        /// print the command line before running it
        #[arg(long)]
        echo: bool,

        /// directory put in front of PATH, e.g., the bin directory of the installation
        #[arg(long, value_name = "DIR")]
        path_prefix: Option<PathBuf>,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("Failed to serialize output: {0}")]
    Output(serde_yaml::Error),
    #[error(transparent)]
    Command(#[from] CommandError),
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli) {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

/// merge the configuration file with the command line and validate the result
fn load_config(cli: &Cli) -> Result<Config, ConfigErrors> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(variant) = &cli.mpi {
        config.mpi.variant = variant.clone();
    }
    if let Some(bindir) = &cli.mpi_bindir {
        config.mpi.bindir = Some(bindir.clone());
    }
    if cli.procs.is_some() {
        config.procs = cli.procs;
    }
    if cli.procs_default.is_some() {
        config.procs_default = cli.procs_default;
    }
    if let Some(wdir) = &cli.wdir {
        config.wdir = Some(wdir.clone());
    }
    if let Some(timeout) = cli.command_timeout {
        config.command_timeout = timeout;
    }

    if !config.preflight_checks() {
        return Err(ConfigErrors::FailedPreflight);
    }
    debug!(config = ?config, "Loaded configuration");

    Ok(config)
}

fn print_yaml<T: Serialize>(value: &T) -> Result<(), CliError> {
    print!("{}", serde_yaml::to_string(value).map_err(CliError::Output)?);
    Ok(())
}

fn print_fragment(fragments: &[Option<&str>]) {
    for fragment in fragments.iter().flatten() {
        println!("{fragment}");
    }
}

/// exit code of the process, non-zero only for `run`
fn run(cli: Cli) -> Result<i32, CliError> {
    let config = load_config(&cli)?;
    let captured = EnvSnapshot::capture();
    let runner = SystemRunner::new(
        ShellKind::detect(&captured).interpreter(),
        config.command_timeout(),
    );
    let env = prepare_snapshot(&config.environment, &captured, &runner);
    let runner = runner.with_environment(&env);

    match &cli.command {
        Commands::Detect => {
            print_yaml(&ResourceInfo::detect(&env, config.procs, config.procs_default)?)?
        }
        Commands::Show => print_yaml(&ExecEnvironment::build(&config, &env, &runner)?)?,
        Commands::Mpi => print_yaml(&ExecEnvironment::build(&config, &env, &runner)?.mpi)?,
        Commands::Hostsfile => {
            let resources = ResourceInfo::detect(&env, config.procs, config.procs_default)?;
            let wdir = match &config.wdir {
                Some(wdir) => wdir.clone(),
                None => std::env::current_dir().map_err(ConfigErrors::CurrentDir)?,
            };

            if let Some(hosts_file) = resources.hosts_file(Some(&wdir), &runner)? {
                println!("{hosts_file}");
            }
        }
        Commands::Info => {
            let exec_env = ExecEnvironment::build(&config, &env, &runner)?;
            print!("{}", exec_env.mpi.info(&runner));
        }
        Commands::Boot => {
            let mpi = ExecEnvironment::build(&config, &env, &runner)?.mpi;
            print_fragment(&[mpi.gen_hostsfile(), mpi.boot()]);
        }
        Commands::Halt => {
            let mpi = ExecEnvironment::build(&config, &env, &runner)?.mpi;
            print_fragment(&[mpi.halt(), mpi.del_hostsfile()]);
        }
        Commands::RemainingTime => {
            if let Some(remaining) = BatchInfo::detect(&env).remaining_time(&runner) {
                println!("{remaining}");
            }
        }
        Commands::Export { var, value } => {
            print!("{}", ShellKind::detect(&env).export_env(var, value))
        }
        Commands::PrependPath { var, path } => {
            print!("{}", ShellKind::detect(&env).prepend_path(var, path))
        }
        Commands::Run {
            echo,
            path_prefix,
            command,
        } => {
            let prefix = path_prefix
                .clone()
                .or_else(|| config.environment.path_prefix.clone());

            return Ok(runner
                .with_path_prefix(prefix)
                .status(&command_line(command), *echo)?);
        }
    }

    Ok(0)
}
