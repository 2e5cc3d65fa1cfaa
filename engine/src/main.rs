//! Shipyard - Entry Point
//!
//! Operator utilities around the orchestration engine. The engine itself is
//! consumed as a library by the request layer.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use tracing::{error, info};

use shipyard::bootstrap::package::resolve_package;
use shipyard::filesys::file::File;
use shipyard::logs::{init_logging, LogOptions};
use shipyard::storage::layout::PackageLayout;
use shipyard::storage::settings::EngineSettings;
use shipyard::utils::version_info;
use shipyard::vault::cipher::generate_key_b64;
use shipyard_models::RuntimeType;

const USAGE: &str = "usage: shipyard [--settings=<path>] \
    (--version | --gen-vault-key | --check-package --runtime=<k8s|compose> --package-version=<v>)";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let mut cli_args: HashMap<String, String> = HashMap::new();
    for arg in env::args().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            cli_args.insert(key.trim_start_matches('-').to_string(), value.to_string());
        } else if arg.starts_with("--") {
            cli_args.insert(arg.trim_start_matches('-').to_string(), "true".to_string());
        }
    }

    if cli_args.contains_key("version") {
        return match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{} {}", "error:".red().bold(), e);
                ExitCode::FAILURE
            }
        };
    }

    if cli_args.contains_key("gen-vault-key") {
        println!("{}", generate_key_b64());
        return ExitCode::SUCCESS;
    }

    let settings = match load_settings(cli_args.get("settings")).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let _guard = match init_logging(LogOptions::from_settings(&settings)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    if cli_args.contains_key("check-package") {
        return match check_package(&settings, &cli_args).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Package check failed: {:#}", e);
                eprintln!("{} {:#}", "failed".red().bold(), e);
                ExitCode::FAILURE
            }
        };
    }

    eprintln!("{}", USAGE);
    ExitCode::FAILURE
}

async fn load_settings(path: Option<&String>) -> anyhow::Result<EngineSettings> {
    let Some(path) = path else {
        return Ok(EngineSettings::default());
    };
    EngineSettings::load(&File::new(PathBuf::from(path)))
        .await
        .with_context(|| format!("loading settings from {}", path))
}

/// Resolve a package and verify its checksum without touching any host
async fn check_package(settings: &EngineSettings, cli_args: &HashMap<String, String>) -> anyhow::Result<()> {
    let (Some(runtime), Some(version)) = (cli_args.get("runtime"), cli_args.get("package-version"))
    else {
        bail!(USAGE);
    };
    let runtime: RuntimeType = runtime
        .parse()
        .map_err(|e: String| anyhow!(e))
        .context("--runtime")?;

    let layout = PackageLayout::new(settings.package_base_dir.clone());
    let package = match resolve_package(&layout, runtime, version).await {
        Ok(package) => package,
        Err(e) if e.is_not_found() => {
            return Err(anyhow!(e).context(format!(
                "no {} package {} under {}",
                runtime,
                version,
                layout.runtime_root().path().display()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    info!("Package {} {} verified", package.runtime, package.version);
    println!(
        "{} {} {} ({})",
        "ok".green().bold(),
        package.runtime,
        package.version,
        package.manifest_path.display()
    );
    if let Some(sha) = &package.sha256 {
        println!("   sha256 {}", sha);
    }
    Ok(())
}
