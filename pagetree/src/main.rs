#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code so corrupt pages surface as errors.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::path::PathBuf;
use std::process::ExitCode;

use pagetree::config::CliConfig;
use pagetree::database::Database;
use pagetree::script::{parse_script, run_script};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: pagetree <script>";

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagetree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args_os().skip(1);
    let (Some(script_path), None) = (args.next().map(PathBuf::from), args.next()) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    // Load configuration from environment variables
    let config = match CliConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        "Loaded configuration: db_path={}, order={}, page_size={}, page_count={}",
        config.db_path.display(),
        config.tree.order,
        config.tree.page_size,
        config.tree.page_count
    );

    let script = match std::fs::read_to_string(&script_path) {
        Ok(script) => script,
        Err(e) => {
            tracing::error!("Failed to read {}: {e}", script_path.display());
            return ExitCode::FAILURE;
        }
    };
    let steps = match parse_script(&script) {
        Ok(steps) => steps,
        Err(e) => {
            tracing::error!("Invalid script {}: {e}", script_path.display());
            return ExitCode::FAILURE;
        }
    };

    let mut db = match Database::open_or_create(&config.db_path, config.tree) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to open {}: {e}", config.db_path.display());
            return ExitCode::FAILURE;
        }
    };

    let report = match run_script(&mut db, &steps) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Script aborted: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = db.flush() {
        tracing::error!("Failed to flush {}: {e}", config.db_path.display());
        return ExitCode::FAILURE;
    }

    for mismatch in &report.mismatches {
        println!("FAIL {mismatch}");
    }
    println!(
        "{} commands, {} checked, {} failed",
        report.executed,
        report.checked,
        report.mismatches.len()
    );

    if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
