use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "gvimctl",
    about = "Drive gVim over its client-server channel and verify the console script",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch gVim, open the console and run scenarios against it
    Run {
        /// Scenario to run (repeatable; default: all)
        #[arg(long = "scenario", value_enum)]
        scenarios: Vec<ScenarioArg>,

        /// Override the bulk scenario line count
        #[arg(long)]
        lines: Option<usize>,

        /// Append a JSON-lines run log to this file
        #[arg(long)]
        log: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the server names registered with the editor
    Servers,

    /// Show the resolved gvim and vim binaries
    Locate,

    /// Send keys to a running server (fire-and-forget)
    Send {
        /// Server name to address
        #[arg(long)]
        server: String,

        /// Keys in Vim notation, e.g. ":echo 1<CR>"
        keys: String,
    },

    /// Evaluate an expression in a running server and print the result
    Expr {
        /// Server name to address
        #[arg(long)]
        server: String,

        /// Vim expression, e.g. "line('$')"
        expr: String,
    },

    /// Show effective configuration
    Config {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScenarioArg {
    EchoServerName,
    EchoAlphabet,
    BulkType,
}
