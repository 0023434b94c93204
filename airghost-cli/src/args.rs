//! CLI argument parsing

use airghost_core::{AttackKind, AttackParameters, InterfaceMode, MacAddr, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "airghost")]
#[command(version, about = "Wireless attack orchestration for authorized assessments", long_about = None)]
pub struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v, -vv, -vvv for increasing verbosity)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an attack and run it until interrupted
    Start {
        /// Attack kind (evil_twin, captive_portal, deauth)
        kind: AttackKind,

        /// Attack parameters (key=value pairs)
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Write the daemon configuration for an attack without launching it
    Render {
        /// Attack kind (evil_twin, captive_portal)
        kind: AttackKind,

        /// Attack parameters (key=value pairs)
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Write into this directory instead of the configured one
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Inspect or change wireless interface modes
    Interface {
        #[command(subcommand)]
        command: InterfaceCommand,
    },

    /// Print the effective settings as TOML
    Config,

    /// List attack kinds
    Attacks,
}

#[derive(Subcommand, Debug)]
pub enum InterfaceCommand {
    /// Show the driver-reported mode and MAC
    Status {
        /// Interface name
        name: String,
    },

    /// Put an interface into a mode
    Prepare {
        /// Interface name
        name: String,

        #[arg(value_enum)]
        mode: ModeArg,
    },

    /// Return an interface to managed mode
    Reset {
        /// Interface name
        name: String,
    },

    /// Change the MAC address (random unless --mac is given)
    Mac {
        /// Interface name
        name: String,

        #[arg(long, value_name = "MAC")]
        mac: Option<MacAddr>,
    },
}

/// Interface mode as accepted on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Managed,
    Monitor,
    Ap,
}

impl From<ModeArg> for InterfaceMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Managed => InterfaceMode::Managed,
            ModeArg::Monitor => InterfaceMode::Monitor,
            ModeArg::Ap => InterfaceMode::Ap,
        }
    }
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Convert `KEY=VALUE` strings into attack parameters
pub fn parse_params(params: &[String]) -> Result<AttackParameters> {
    AttackParameters::from_assignments(params)
}
