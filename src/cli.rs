use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::utils::version;

#[derive(Parser)]
#[command(author, version = version(), about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
#[command(subcommand_value_name = "SUBCOMMAND")]
#[command(subcommand_help_heading = "Subcommands")]
pub struct Cli {
    /// Path to config file (default: `$XDG_CONFIG_HOME/rose/config.kdl`).
    ///
    /// This can also be set with the `ROSE_CONFIG` environment variable. If both are set, the
    /// command line argument takes precedence.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Size of the headless output to start with, e.g. `1920x1080`.
    #[arg(long, value_parser = parse_size, default_value = "1920x1080")]
    pub headless_size: (i32, i32),

    #[command(subcommand)]
    pub subcommand: Option<Sub>,
}

#[derive(Subcommand)]
pub enum Sub {
    /// Validate the config file.
    Validate {
        /// Path to config file (default: `$XDG_CONFIG_HOME/rose/config.kdl`).
        ///
        /// This can also be set with the `ROSE_CONFIG` environment variable. If both are set, the
        /// command line argument takes precedence.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn parse_size(s: &str) -> Result<(i32, i32), String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let w: i32 = w.parse().map_err(|err| format!("invalid width: {err}"))?;
    let h: i32 = h.parse().map_err(|err| format!("invalid height: {err}"))?;
    if w <= 0 || h <= 0 {
        return Err(String::from("size must be positive"));
    }
    Ok((w, h))
}
