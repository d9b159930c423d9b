use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rttd", version, about, long_about = None)]
pub struct Cli {
    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, action = ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Arbiter config file (JSON); RTTD_* variables override it
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Runs clients against a simulated radio and prints every notification
    Simulate(SimulateArgs),
    /// Prints the effective arbiter configuration
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of ranging clients
    #[arg(long, default_value_t = 3)]
    pub clients: u32,

    /// Ranging requests per client
    #[arg(long, default_value_t = 2)]
    pub requests: u32,

    /// Responder clients, enabled after all ranging has finished
    #[arg(long, default_value_t = 0)]
    pub responders: u32,

    /// Peers ranged per request
    #[arg(long, default_value_t = 2)]
    pub targets: u8,

    /// Simulated burst duration
    #[arg(long, default_value_t = 50)]
    pub delay_ms: u64,

    /// Fraction of bursts the simulated driver rejects
    #[arg(long, default_value_t = 0.0, value_parser = parse_reject_rate)]
    pub reject_rate: f64,
}

fn parse_reject_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("{rate} is not between 0.0 and 1.0"));
    }
    Ok(rate)
}
