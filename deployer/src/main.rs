//! Autodeploy - Entry Point
//!
//! Without arguments, runs the HTTP service. With `--submit`, acts as a client
//! for a running service.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;
use std::time::Duration;

use autodeploy::app::run::run;
use autodeploy::http::client::{submit_command, SubmitArgs, DEFAULT_SERVER};
use autodeploy::logs::{init_logging, LogLevel, LogOptions};
use autodeploy::storage::settings::Settings;
use autodeploy::utils::version_info;
use openapi_server::models::JobStatus;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
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
        return ExitCode::SUCCESS;
    }

    if cli_args.contains_key("submit") {
        return submit(&cli_args).await;
    }

    // Retrieve the settings file
    let settings_path = Settings::resolve_path(cli_args.get("settings").map(String::as_str));
    let settings = match Settings::load(settings_path.as_deref()).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let _log_guard = match init_logging(settings.log_options()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the server
    let options = settings.app_options();
    info!("Running autodeploy with options: {:?}", options);
    match run(version.version, options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run autodeploy: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn submit(cli_args: &HashMap<String, String>) -> ExitCode {
    let (Some(description), Some(repo_url)) = (cli_args.get("description"), cli_args.get("repo"))
    else {
        eprintln!(
            "Usage: autodeploy --submit --description=<text> --repo=<url> [--server=<url>] [--follow]"
        );
        return ExitCode::from(2);
    };

    let _ = init_logging(LogOptions {
        log_level: LogLevel::Warn,
        ..Default::default()
    });

    let args = SubmitArgs {
        server: cli_args
            .get("server")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SERVER.to_string()),
        description: description.clone(),
        repo_url: repo_url.clone(),
        follow: cli_args.contains_key("follow"),
        poll_interval: Duration::from_secs(2),
    };

    match submit_command(args).await {
        Ok(JobStatus::Failed) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
