#![cfg(not(tarpaulin_include))]

use recydash::app;
use recydash::config::DashboardConfig;
use std::env;
use std::path::PathBuf;

/// Main entry point for the dashboard web server
///
/// Reads the configuration file named by the first argument, if any, then
/// applies `RECYDASH_*` environment overrides and serves the JSON API.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config_file = env::args().nth(1).map(PathBuf::from);
    let config = DashboardConfig::load(config_file.as_deref())?;

    app::run(config).await
}
