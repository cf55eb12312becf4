use std::path::PathBuf;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Pairs with UWB accessories over BLE and prints ranging results", long_about = None)]
pub struct Args {
    /// Use this config file instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List nearby accessories with a supported name
    Scan,
    /// Connect to nearby accessories and print their positions until Ctrl-C
    Range {
        /// Only use accessories whose name contains this text
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Print the effective configuration as JSON
    PrintConfig,
    /// Write the effective configuration, defaults included, to the config file
    WriteConfig,
}
