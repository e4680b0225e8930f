use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::UnseededPolicy;
use crate::logging::LogArgs;

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Hexadecimal (lowercase)
    Hex,
    /// Uppercase hexadecimal
    HexUpper,
    /// Raw binary bytes
    Raw,
    /// Base64 (standard, with padding)
    Base64,
    /// Base64 URL-safe (no padding)
    Base64url,
}

#[derive(Debug, Args)]
pub struct GeneratorArgs {
    /// Behaviour of reads before the first reseed
    #[arg(long, value_enum)]
    pub unseeded: Option<UnseededPolicy>,

    /// How long a blocked read waits for the first reseed, in milliseconds
    #[arg(long)]
    pub seed_timeout: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Sample /dev/hwrng periodically
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub enable_hwrng: Option<bool>,

    /// Sample the kernel context-switch counter periodically
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub enable_ctxt: Option<bool>,

    /// Hash a monotonic timestamp periodically
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub enable_timestamp: Option<bool>,

    /// Hardware RNG sampling interval in milliseconds
    #[arg(long)]
    pub hwrng_interval: Option<u64>,

    /// Context-switch sampling interval in milliseconds
    #[arg(long)]
    pub ctxt_interval: Option<u64>,

    /// Timestamp sampling interval in milliseconds
    #[arg(long)]
    pub timestamp_interval: Option<u64>,
}

#[derive(Debug, Parser)]
#[command(name = "fortunad", about = "Fortuna random number service")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Number of random bytes to generate
    #[arg(short = 'n', long = "bytes", default_value_t = 32)]
    pub bytes: usize,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value_t = OutputFormat::Hex)]
    pub format: OutputFormat,

    /// Write output to a file instead of stdout
    #[arg(short = 'o', long = "output-file")]
    pub output_file: Option<PathBuf>,

    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the generator as a `random` pseudo-file on a Unix socket
    Serve(ServeArgs),
}

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Unix socket path (default: /run/fortunad/random.sock)
    #[arg(short = 's', long)]
    pub socket: Option<PathBuf>,

    /// Capacity of the write-entropy queue, 0 rejects writes (default: 10)
    #[arg(short = 'q', long)]
    pub write_queue: Option<usize>,

    /// Configuration file path (default: /etc/fortunad.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub generator: GeneratorArgs,

    #[command(flatten)]
    pub sources: SourceArgs,

    #[command(flatten)]
    pub log: LogArgs,
}
