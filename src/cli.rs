//! Command line interface built on clap.
//!
//! [`Cli`] carries the [`Command`] to run (demo, config) and the global
//! flags (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// taskfloor: an inversion-of-control job runtime.
#[derive(Debug, Parser)]
#[command(name = "taskfloor", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Office configuration file (defaults to ./taskfloor.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the built-in order pipeline and prints its report.
    Demo {
        /// Items ordered.
        #[arg(long, default_value_t = 3)]
        quantity: u32,

        /// Items in stock when the office opens.
        #[arg(long, default_value_t = 10)]
        stock: u32,
    },

    /// Prints the effective office configuration.
    Config {
        /// Print JSON instead of TOML.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_demo_subcommand() {
        let cli = Cli::parse_from(["taskfloor", "demo", "--quantity", "5", "--stock", "2"]);
        match cli.command {
            Command::Demo { quantity, stock } => {
                assert_eq!(quantity, 5);
                assert_eq!(stock, 2);
            }
            _ => panic!("expected Demo command"),
        }
    }

    #[test]
    fn demo_defaults() {
        let cli = Cli::parse_from(["taskfloor", "demo"]);
        assert!(matches!(cli.command, Command::Demo { quantity: 3, stock: 10 }));
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["taskfloor", "--config", "office.toml", "--verbose", "config", "--json"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("office.toml")));
        assert!(matches!(cli.command, Command::Config { json: true }));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
