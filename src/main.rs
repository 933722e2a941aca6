use std::{fs::File, process::ExitCode};

use anyhow::{Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, error};
use syslog::{BasicLogger, Facility, Formatter3164};

use raspifand::{
    application::Application,
    cli::{Cli, Command},
    install,
    supervisor::Supervisor,
};

fn init_log() -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "raspifand".into(),
        pid: 0,
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(LevelFilter::Info))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn into_daemon() -> Result<()> {
    File::create("/var/tmp/raspifand.log")
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_log() {
        eprintln!("Cannot initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    if matches!(cli.command, Some(Command::Install)) {
        return match install::install_service() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Service installation failed: {e:#}");
                eprintln!("Service installation failed: {e:#}");
                ExitCode::FAILURE
            }
        };
    }

    // Fork before the runtime exists; tokio does not survive a fork.
    if cli.daemonize {
        if let Err(e) = into_daemon() {
            error!("Cannot daemonize: {e:#}");
            return ExitCode::FAILURE;
        }
    }

    let supervisor = Supervisor::from_env();

    let app = match Application::builder()
        .with_config_path(cli.config)
        .with_supervisor(supervisor.clone())
        .build()
    {
        Ok(app) => app,
        Err(e) => {
            // Fatal startup failure: tell the supervisor not to expect
            // service, then exit without entering the loop.
            error!("Startup failed: {e:#}");
            supervisor.errno(libc::EINVAL);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Cannot start runtime: {e:#}");
            supervisor.errno(libc::EINVAL);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(app.run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Control loop failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
