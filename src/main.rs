// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Entry point.
//!
//! ```text
//! cli::parse() --> Config (files, env, flags) --> Logging --> Command Dispatch
//!   Run | Config | Version
//! ```

use std::process::ExitCode;

use procmux::cli::{self, Command};
use procmux::cmd::config::{run_files_command, run_options_command};
use procmux::cmd::run::run_command;
use procmux::config::Config;
use procmux::config::loader::ConfigLoader;
use procmux::logging::init_logging;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::parse();

    if matches!(cli.command, Some(Command::Version)) {
        handle_version_command();
        return ExitCode::SUCCESS;
    }

    let loader = match build_config_loader(&cli) {
        Ok(loader) => loader,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    let loaded_files = loader.format_loaded_files();
    let config = match loader.build() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match init_logging(&config.log_config()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    dispatch_command(&cli, &config, &loaded_files).await
}

async fn dispatch_command(cli: &cli::Cli, config: &Config, loaded_files: &[String]) -> ExitCode {
    let result = match &cli.command {
        Some(Command::Run(args)) => run_command(args, config).await,
        Some(Command::Config(args)) => {
            if args.files {
                run_files_command(loaded_files);
            } else {
                run_options_command(config);
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Version) => {
            handle_version_command();
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("No command specified. Use --help for usage information.");
            Err(anyhow::anyhow!("No command specified"))
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn handle_version_command() {
    println!("{}", env!("CARGO_PKG_VERSION"));
}

fn build_config_loader(cli: &cli::Cli) -> procmux::error::Result<ConfigLoader> {
    let cwd = std::env::current_dir()?;
    let mut loader = if cli.global.no_default_config {
        cli.global
            .configs
            .iter()
            .fold(ConfigLoader::new(), ConfigLoader::add_toml_file)
            .with_env_prefix(procmux::config::ENV_PREFIX)
    } else {
        Config::standard_loader(&cwd, &cli.global.configs)
    };

    for (key, value) in cli.config_overrides() {
        loader = loader.set(key, value)?;
    }
    Ok(loader)
}
