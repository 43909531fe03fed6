// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use nix::sys::signal::Signal;
use tokio::runtime;
use tracing::{error, info};

use restartrc::config::{
    signal_from_name, LaunchSpec, SupervisorConfig, DEFAULT_CONFIG_FILE, DEFAULT_FD_LIMIT,
};
use restartrc::log::init_log;
use restartrc::procs::{
    self, DaemonLauncher, ProcessLocator, ServiceQuery, Supervisor, SysinfoProvider,
};
use restartrc::Error;

const CONFIG: &str = "config";
const LOG_LEVEL: &str = "log-level";
const MAX_ATTEMPTS: &str = "max-attempts";
const ATTEMPT_DELAY_MS: &str = "attempt-delay-ms";
const SERVICE: &str = "service";
const PATTERN: &str = "pattern";
const EXECUTABLE: &str = "executable";
const WORKING_DIR: &str = "working-dir";
const LOG_PATH: &str = "log-path";
const FD_LIMIT: &str = "fd-limit";
const SIGNAL: &str = "signal";
const APPEND_LOG: &str = "append-log";
const ARGS: &str = "args";

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
    fn retry_opts(self) -> Self;
}

impl SetupClapApp for Command {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }

    fn retry_opts(self) -> Self {
        self.arg(
            Arg::new(MAX_ATTEMPTS)
                .long(MAX_ATTEMPTS)
                .value_name("NUMBER")
                .value_parser(value_parser!(u32).range(1..))
                .help("how many times to look for a running instance before launching anyway"),
        )
        .arg(
            Arg::new(ATTEMPT_DELAY_MS)
                .long(ATTEMPT_DELAY_MS)
                .value_name("MILLIS")
                .value_parser(value_parser!(u64))
                .help("delay between looks for a running instance"),
        )
    }
}

fn restart_sub_command() -> Command {
    Command::new(procs::RESTART)
        .about("kill the running instance of a configured service and launch a new one")
        .arg(
            Arg::new(SERVICE)
                .required(true)
                .value_name("SERVICE")
                .help("name of a [service.<name>] table in the configuration"),
        )
}

fn exec_sub_command() -> Command {
    Command::new(procs::EXEC)
        .about("kill and relaunch a service described entirely on the command line")
        .arg(
            Arg::new(PATTERN)
                .long(PATTERN)
                .short('p')
                .required(true)
                .value_name("TEXT")
                .help("text identifying the service in a process command line"),
        )
        .arg(
            Arg::new(EXECUTABLE)
                .long(EXECUTABLE)
                .short('e')
                .required(true)
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("program to launch"),
        )
        .arg(
            Arg::new(WORKING_DIR)
                .long(WORKING_DIR)
                .short('w')
                .value_name("DIR")
                .default_value(".")
                .value_parser(value_parser!(PathBuf))
                .help("directory to launch the program in"),
        )
        .arg(
            Arg::new(LOG_PATH)
                .long(LOG_PATH)
                .short('l')
                .value_name("FILE")
                .default_value("service.log")
                .value_parser(value_parser!(PathBuf))
                .help("file receiving the program's output, relative to the working directory"),
        )
        .arg(
            Arg::new(FD_LIMIT)
                .long(FD_LIMIT)
                .value_name("NUMBER")
                .default_value("65536")
                .value_parser(value_parser!(u64))
                .help("open file limit for the launched program"),
        )
        .arg(
            Arg::new(SIGNAL)
                .long(SIGNAL)
                .short('s')
                .value_name("NAME")
                .default_value("KILL")
                .help("signal sent to the running instance"),
        )
        .arg(
            Arg::new(APPEND_LOG)
                .long(APPEND_LOG)
                .action(ArgAction::SetTrue)
                .help("keep the previous log instead of truncating it"),
        )
        .arg(
            Arg::new(ARGS)
                .num_args(0..)
                .last(true)
                .value_name("ARGS")
                .value_parser(value_parser!(OsString))
                .help("arguments passed to the program"),
        )
}

fn find_sub_command() -> Command {
    Command::new(procs::FIND)
        .about("list the processes matching a pattern")
        .arg(Arg::new(PATTERN).required(true).value_name("TEXT"))
}

fn app() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new(CONFIG)
                .short('c')
                .long(CONFIG)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("configuration file, restart defaults to ./resources/restartrc.toml if present"),
        )
        .arg(
            Arg::new(LOG_LEVEL)
                .long(LOG_LEVEL)
                .value_name("LEVEL")
                .global(true)
                .help("maximum level of the supervisor's own log output"),
        )
        .subcommand(restart_sub_command().setup_clap_app().retry_opts())
        .subcommand(exec_sub_command().setup_clap_app().retry_opts())
        .subcommand(find_sub_command().setup_clap_app())
}

/// Only `restart` names its service in the configuration, the others read a file when given one
fn fallback_config(subcommand: Option<&str>) -> Option<&'static Path> {
    match subcommand {
        Some(procs::RESTART) => Some(Path::new(DEFAULT_CONFIG_FILE)),
        _ => None,
    }
}

fn main() -> Result<(), Error> {
    let args = app().get_matches();

    let mut config = SupervisorConfig::load(
        args.get_one::<PathBuf>(CONFIG).map(PathBuf::as_path),
        fallback_config(args.subcommand_name()),
    )?;
    let sub_args = args.subcommand().map(|(_, sub_args)| sub_args);
    config.merge_command_args(
        args.get_one::<String>(LOG_LEVEL).cloned(),
        sub_args.and_then(|a| a.try_get_one::<u32>(MAX_ATTEMPTS).ok().flatten().copied()),
        sub_args.and_then(|a| a.try_get_one::<u64>(ATTEMPT_DELAY_MS).ok().flatten().copied()),
    );
    init_log(config.max_log_level())?;

    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async move {
        match args.subcommand() {
            Some((procs::RESTART, args)) => restart(&config, args).await,
            Some((procs::EXEC, args)) => exec(&config, args).await,
            Some((procs::FIND, args)) => find(args),
            other => {
                println!("unexpected command: {:?}", other.map(|(name, _)| name));
                println!("{}", app().render_usage());
                std::process::exit(2);
            }
        }
    });

    if let Err(err) = &result {
        error!("{}", err);
    }
    result
}

async fn restart(config: &SupervisorConfig, args: &ArgMatches) -> Result<(), Error> {
    let name = args
        .get_one::<String>(SERVICE)
        .ok_or_else(|| "service is a required parameter")?;
    let service = config.service(name)?;

    run_supervisor(
        config,
        service.query()?,
        service.launch_spec(),
        service.signal()?,
    )
    .await
}

async fn exec(config: &SupervisorConfig, args: &ArgMatches) -> Result<(), Error> {
    let pattern = args
        .get_one::<String>(PATTERN)
        .ok_or_else(|| "pattern is a required parameter")?;
    let executable = args
        .get_one::<PathBuf>(EXECUTABLE)
        .ok_or_else(|| "executable is a required parameter")?;
    let working_dir = args
        .get_one::<PathBuf>(WORKING_DIR)
        .ok_or_else(|| "working-dir has a default")?;
    let log_path = args
        .get_one::<PathBuf>(LOG_PATH)
        .ok_or_else(|| "log-path has a default")?;
    let fd_limit = args
        .get_one::<u64>(FD_LIMIT)
        .copied()
        .unwrap_or(DEFAULT_FD_LIMIT);
    let signal_name = args
        .get_one::<String>(SIGNAL)
        .ok_or_else(|| "signal has a default")?;
    let signal = signal_from_name(signal_name)
        .ok_or_else(|| Error::config(format!("unknown signal name: {}", signal_name)))?;

    let mut spec = LaunchSpec::new(executable, working_dir, log_path)
        .fd_limit(fd_limit)
        .args(args.get_many::<OsString>(ARGS).into_iter().flatten());
    spec.append_log = args.get_flag(APPEND_LOG);

    run_supervisor(config, ServiceQuery::new(pattern.as_str())?, spec, signal).await
}

async fn run_supervisor(
    config: &SupervisorConfig,
    query: ServiceQuery,
    spec: LaunchSpec,
    signal: Signal,
) -> Result<(), Error> {
    let supervisor = Supervisor::new(
        SysinfoProvider::new(),
        DaemonLauncher::new(),
        config.retry_policy()?,
    )
    .with_signal(signal);

    let report = supervisor.restart(&query, &spec).await?;
    info!("{} is running as pid {}", query, report.daemon.pid());
    Ok(())
}

fn find(args: &ArgMatches) -> Result<(), Error> {
    let pattern = args
        .get_one::<String>(PATTERN)
        .ok_or_else(|| "pattern is a required parameter")?;
    let query = ServiceQuery::new(pattern.as_str())?;

    let provider = SysinfoProvider::new();
    for handle in ProcessLocator::new(&provider).find(&query) {
        println!("{}\t{}", handle.pid(), handle.command_line());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_is_valid() {
        app().debug_assert();
    }

    #[test]
    fn test_subcommand_required() {
        let err = app().try_get_matches_from(["restartrc"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );

        let err = app()
            .try_get_matches_from(["restartrc", "--log-level", "debug"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingSubcommand);
    }

    #[test]
    fn test_usage_lists_subcommands() {
        let usage = app().render_usage().to_string();
        assert!(usage.contains("restartrc"));
        assert!(usage.contains("COMMAND"));
    }

    #[test]
    fn test_only_restart_reads_default_config() {
        assert_eq!(
            fallback_config(Some(procs::RESTART)),
            Some(Path::new(DEFAULT_CONFIG_FILE))
        );
        assert_eq!(fallback_config(Some(procs::EXEC)), None);
        assert_eq!(fallback_config(Some(procs::FIND)), None);
    }

    #[test]
    fn test_exec_args_parse() {
        let args = app()
            .try_get_matches_from([
                "restartrc", "exec", "-p", "svc-proxy", "-e", "./svc-proxy", "--", "--port", "80",
            ])
            .unwrap();
        let (name, sub_args) = args.subcommand().unwrap();
        assert_eq!(name, procs::EXEC);
        assert_eq!(
            sub_args.get_one::<PathBuf>(WORKING_DIR),
            Some(&PathBuf::from("."))
        );
        assert_eq!(
            sub_args
                .get_many::<OsString>(ARGS)
                .unwrap()
                .collect::<Vec<_>>(),
            ["--port", "80"]
        );
    }
}
