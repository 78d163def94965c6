//! SONiC Salt Deployer - Entry Point
//!
//! Brings a fleet of SONiC switches to a desired Salt minion state over SSH:
//! minion binary, grains updater, minion configuration and systemd units.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use sonic_salt_deployer::app::options::{AppOptions, ServerOptions};
use sonic_salt_deployer::app::run::run;
use sonic_salt_deployer::logs::{init_logging, LogOptions};
use sonic_salt_deployer::settings::Settings;
use sonic_salt_deployer::ssh::ConnectOptions;
use sonic_salt_deployer::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --dry-run
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version).unwrap());
        return;
    }

    // Retrieve the settings file
    let settings_path = cli_args
        .get("settings")
        .map(String::as_str)
        .unwrap_or("settings.json");
    let mut settings = match Settings::load(settings_path).await {
        Ok(settings) => settings,
        Err(e) => {
            println!("Unable to read settings file {}: {}", settings_path, e);
            std::process::exit(1);
        }
    };

    // CLI flags override the settings file
    if cli_args.contains_key("force") {
        settings.force = true;
    }
    if cli_args.contains_key("dry-run") {
        settings.dry_run = true;
    }

    if let Err(e) = settings.validate() {
        println!("Invalid settings: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        pretty: settings.pretty_logs,
        json_format: settings.json_logs,
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    // Run the deployment
    let options = AppOptions {
        force: settings.force,
        dry_run: settings.dry_run,
        connect: ConnectOptions {
            port: settings.ssh.port,
            timeout: Duration::from_secs(settings.ssh.connect_timeout_secs),
        },
        server: ServerOptions {
            host: settings.server.host.clone(),
            port: settings.server.port,
        },
    };

    info!("Running SONiC Salt Deployer with options: {:?}", options);
    if let Err(e) = run(&settings, &options).await {
        error!("Failed to run the deployer: {e}");
        std::process::exit(1);
    }
}
