use clap::Parser;
use log::{error, info, LevelFilter};
use uwb_ranging::cli::Args;
use uwb_ranging::error::{AppRunError, ConfigError};
use uwb_ranging::{init_logging, run};

fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    info!(concat!("UWB Ranging ", env!("CARGO_PKG_VERSION")));

    match run(args) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("Another instance is already using the bluetooth adapter");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
