mod cli;
mod config;
mod daemon;
mod device;
mod entropy;
mod error;
mod fortuna;
mod logging;
mod mixer;
mod output;
mod server;

use std::process;

use clap::Parser;

use cli::{Cli, Command, ServeArgs};
use config::Config;
use error::Error;
use fortuna::{Fortuna, MonotonicClock, MAX_REQUEST};

/// Build a Config by layering: defaults → TOML file → CLI overrides.
///
/// A problem with an explicit `--config` file is an error. A broken default
/// file only costs a warning.
fn build_config(args: &ServeArgs) -> Result<Config, Error> {
    let mut cfg = match config::load_config(args.config_file.as_deref()) {
        Ok(c) => c,
        Err(e) if args.config_file.is_some() => return Err(e),
        Err(e) => {
            log::warn!("{}", e);
            Config::default()
        }
    };

    apply_serve_overrides(&mut cfg, args);

    cfg.validate();
    Ok(cfg)
}

fn apply_serve_overrides(cfg: &mut Config, args: &ServeArgs) {
    if let Some(ref v) = args.socket {
        cfg.server.socket = v.clone();
    }
    if let Some(v) = args.write_queue {
        cfg.server.write_queue = v;
    }
    if let Some(v) = args.generator.unseeded {
        cfg.generator.unseeded = v;
    }
    if let Some(v) = args.generator.seed_timeout {
        cfg.generator.seed_timeout_ms = v;
    }
    if let Some(v) = args.sources.enable_hwrng {
        cfg.sources.enable_hwrng = v;
    }
    if let Some(v) = args.sources.enable_ctxt {
        cfg.sources.enable_ctxt = v;
    }
    if let Some(v) = args.sources.enable_timestamp {
        cfg.sources.enable_timestamp = v;
    }
    if let Some(v) = args.sources.hwrng_interval {
        cfg.sources.hwrng_interval_ms = v;
    }
    if let Some(v) = args.sources.ctxt_interval {
        cfg.sources.ctxt_interval_ms = v;
    }
    if let Some(v) = args.sources.timestamp_interval {
        cfg.sources.timestamp_interval_ms = v;
    }
}

/// Seeds a private generator from the OS RNG and reads `count` bytes.
fn generate(count: usize) -> Result<Vec<u8>, Error> {
    if count == 0 {
        return Err(Error::InvalidArgs("byte count must be greater than 0".into()));
    }
    if count > MAX_REQUEST {
        return Err(Error::RequestTooLarge(count));
    }
    let fortuna = Fortuna::new(MonotonicClock);
    entropy::seed(&fortuna)?;
    let bytes = fortuna.get_random_bytes(count);
    fortuna.close();
    bytes
}

fn run_generate(cli: &Cli) {
    match generate(cli.bytes) {
        Ok(bytes) => {
            if let Err(e) = output::write_output(&bytes, &cli.format, cli.output_file.as_deref()) {
                log::error!("error writing output: {}", e);
                process::exit(1);
            }
        }
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    }
}

fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Some(Command::Serve(args)) => {
            logging::init(&args.log, true);
            let cfg = match build_config(args) {
                Ok(c) => c,
                Err(e) => {
                    log::error!("{}", e);
                    process::exit(1);
                }
            };
            if let Err(e) = daemon::run(&cfg) {
                log::error!("{}", e);
                process::exit(1);
            }
        }
        None => {
            logging::init(&cli.log, false);
            run_generate(&cli);
        }
    }
}
