//! # Paged Export (CLI)
//!
//! Exports one Oracle table page by page into a CSV (optionally gzip) file or
//! a multipart object upload. Ctrl-C or SIGTERM cancels the run cleanly: the
//! partial file is removed and an unfinished upload is aborted.

use clap::Parser;
use log::{error, info, warn};
use paged_export::application::cancellation::CancellationToken;
use paged_export::application::orchestrator::run_export;
use paged_export::application::report::RunReport;
use paged_export::application::runtime::RuntimeContext;
use paged_export::config::{AppConfig, CliArgs, DestinationConfig};
use paged_export::domain::errors::Result;
use paged_export::infrastructure::object_storage::local_object_store::LocalObjectStore;
use paged_export::infrastructure::oracle::record_store::OracleRecordStore;
use paged_export::infrastructure::usage::sysinfo_reporter::SysinfoUsageReporter;
use paged_export::ports::object_store::ObjectStore;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::process;
use std::sync::Arc;
use std::thread;

fn main() {
    // 1. Initialize Logging
    env_logger::init();

    // 2. Parse Arguments and Load Config
    let args = CliArgs::parse();
    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(2);
        }
    };

    // 3. Cancellation on SIGINT / SIGTERM
    let cancel = CancellationToken::new();
    if let Err(e) = install_signal_handler(&cancel) {
        warn!("Could not install signal handlers, Ctrl-C will not cancel cleanly: {}", e);
    }

    // 4. Initialize Hexagonal Components
    let runtime = match RuntimeContext::init(&config) {
        Ok(r) => r,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    let record_store = match OracleRecordStore::new(runtime.pool.clone(), &config.source.table_source()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("{}", e);
            process::exit(2);
        }
    };
    let object_store: Option<Arc<dyn ObjectStore>> = match &config.destination {
        DestinationConfig::Remote { store_root, .. } => Some(Arc::new(LocalObjectStore::new(store_root))),
        DestinationConfig::File { .. } => None,
    };

    let run_config = match config.to_run_config() {
        Ok(r) => r,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(2);
        }
    };

    // 5. Run
    info!("Starting export of {}.{}...", config.source.schema, config.source.table);
    let outcome = run_export(
        &run_config,
        record_store,
        object_store,
        Arc::new(SysinfoUsageReporter::new()),
        &cancel,
    );

    // 6. Report
    let report = RunReport::from_outcome(&outcome);
    match report.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to render run report: {}", e),
    }
    if let DestinationConfig::File { path } = &config.destination {
        match report.write_beside(path) {
            Ok(p) => info!("Run report written to {}", p.display()),
            Err(e) => warn!("Failed to write run report: {}", e),
        }
    }

    match outcome {
        Ok(_) => {}
        Err(e) if e.is_cancelled() => {
            warn!("{}", e);
            process::exit(130);
        }
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_cli(args)?,
    };
    config.merge_cli(args);
    config.validate()?;
    Ok(config)
}

/// Cancels `token` on the first SIGINT or SIGTERM; a second one exits at once.
fn install_signal_handler(token: &CancellationToken) -> std::io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let token = token.clone();
    thread::Builder::new()
        .name("signal-handler".into())
        .spawn(move || {
            for sig in signals.forever() {
                if token.is_cancelled() {
                    error!("Received signal {} again, exiting without cleanup", sig);
                    process::exit(130);
                }
                warn!("Received signal {}, cancelling export...", sig);
                token.cancel();
            }
        })?;
    Ok(())
}
