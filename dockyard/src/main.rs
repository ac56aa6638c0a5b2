//! Dockyard - Entry Point
//!
//! Builds project source trees into containers and serves the control API.

use std::collections::HashMap;
use std::env;

use dockyard::app::options::AppOptions;
use dockyard::app::run::run;
use dockyard::authn::password::hash_password;
use dockyard::errors::DockyardError;
use dockyard::logs::{init_logging, LogOptions};
use dockyard::models::project::AdminAccount;
use dockyard::storage::layout::StorageLayout;
use dockyard::storage::settings::Settings;
use dockyard::store::{JsonStore, Store};
use dockyard::utils::version_info;

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
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let mut settings = match Settings::load(&layout.settings_file()).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e}");
            return;
        }
    };
    if let Err(e) = settings.apply_env() {
        eprintln!("Invalid environment: {e}");
        return;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    // Reset the admin password and exit
    if let Some(password) = cli_args.get("reset-password") {
        match reset_password(&layout, password, cli_args.get("email")).await {
            Ok(email) => info!("Password updated for {}", email),
            Err(e) => error!("Failed to reset password: {}", e),
        }
        return;
    }

    let options = match AppOptions::from_settings(&settings, layout) {
        Ok(options) => options,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    info!("Running Dockyard with options: {:?}", options);
    let result = run(version.version, options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run: {e}");
    }
}

async fn reset_password(
    layout: &StorageLayout,
    password: &str,
    email: Option<&String>,
) -> Result<String, DockyardError> {
    layout.setup().await?;
    let store = JsonStore::open(layout.store_file()).await?;

    let email = match (email, store.admin_account().await?) {
        (Some(email), _) => email.clone(),
        (None, Some(account)) => account.email,
        (None, None) => "admin@localhost".to_string(),
    };
    let password_hash = hash_password(password)?;
    store
        .set_admin_account(AdminAccount {
            email: email.clone(),
            password_hash,
        })
        .await?;
    Ok(email)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut sigterm), Ok(mut sigint)) =
            (signal(SignalKind::terminate()), signal(SignalKind::interrupt()))
        else {
            error!("Unable to install signal handlers, waiting for Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
