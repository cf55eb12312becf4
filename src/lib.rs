use std::env;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::cli::{Args, Command};
use crate::config::io::ConfigIO;
use crate::error::AppRunError;

pub mod app;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod session;
pub mod uwb;

pub fn init_logging(level: log::LevelFilter) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        // btleplug is very chatty at debug level
        .level_for("btleplug", log::LevelFilter::Info)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {},
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Interrupted, shutting down"),
                    Err(err) => warn!("Failed to listen for Ctrl-C: {}", err),
                }
                cancel.cancel();
            },
        }
    });
}

async fn run_command(command: Command, mut config_io: ConfigIO) -> Result<(), AppRunError> {
    let config = config_io.read().await?;

    match command {
        Command::PrintConfig => app::print_config(&config),
        Command::WriteConfig => {
            let mut config_locker = config_io.locker()?;
            let _lock_guard = config_locker.lock()?;
            app::write_config(&config_io, &config).await
        },
        Command::Scan => {
            let mut config_locker = config_io.locker()?;
            let _lock_guard = config_locker.lock()?;
            app::scan(&config).await
        },
        Command::Range { name } => {
            let mut config_locker = config_io.locker()?;
            let _lock_guard = config_locker.lock()?;

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let result = app::range(&config, name.as_deref(), cancel.clone()).await;
            cancel.cancel();
            result
        },
    }
}

pub fn run(args: Args) -> Result<(), AppRunError> {
    let config_io = match &args.config {
        Some(path) => ConfigIO::open(path)?,
        None => ConfigIO::new_sync()?,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_command(args.command, config_io))
}
