//! `supervisor-bus` - inspect and drive objects on the system or session bus.

use std::{error::Error, process, sync::Arc};

use clap::Parser;
use supervisor_bus::{
    cli::{Cli, CommandContext, formatting::format_error},
    config::{BusConfig, BusKind, ConfigPaths},
    dbus::{SharedTransport, ZbusTransport},
    tracing_config,
};
use tracing::debug;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BusConfig::load(path),
        None => BusConfig::load_default(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_error(&e.to_string()));
            process::exit(2);
        }
    };

    let _guard = if cli.log_file {
        let log_dir = ConfigPaths::log_dir()?;
        Some(tracing_config::init_with_file(config.log_level, &log_dir)?)
    } else {
        tracing_config::init(config.log_level)?;
        None
    };
    debug!(?config, "Loaded configuration");

    let bus = if cli.session {
        BusKind::Session
    } else {
        config.bus
    };
    let transport = match bus {
        BusKind::System => ZbusTransport::system(config.call_timeout()).await,
        BusKind::Session => ZbusTransport::session(config.call_timeout()).await,
    };
    let transport: SharedTransport = match transport {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            eprintln!("{}", format_error(&e.to_string()));
            process::exit(1);
        }
    };

    let context = CommandContext {
        transport,
        policy: config.introspect_policy(),
        output: cli.output(),
    };

    match cli.command.run(&context).await {
        Ok(output) => {
            if !output.trim().is_empty() {
                println!("{output}");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", format_error(&e.to_string()));
            process::exit(1);
        }
    }
}
