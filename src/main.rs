//! `svcmgr`: operator CLI over the service-manager coordination framework.
#![allow(clippy::print_stdout)]

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use svcmgr::cli::{resolve_instance, Cli, Command};
use svcmgr::command::CommandValidator;
use svcmgr::config::Config;
use svcmgr::coordinator::ManagerCoordinator;
use svcmgr::instance::Instance;
use svcmgr::logging::init_tracing;
use svcmgr::manager::ManagerFactory;
use svcmgr::store::MemoryStore;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_directive());

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("svcmgr failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let path = cli.config.clone().unwrap_or_else(Config::config_path);
    let config = Config::load_from(&path).with_context(|| format!("loading {}", path.display()))?;

    let validator = Arc::new(CommandValidator::new());
    config.apply_exec_rules(&validator);
    let factory = Arc::new(ManagerFactory::with_validator(validator));
    let store = Arc::new(MemoryStore::from_instances(config.instances.clone()));
    let coordinator = Arc::new(ManagerCoordinator::new(
        factory,
        store.clone(),
        store.clone(),
        config.monitor.settings(),
    ));
    let outcome = dispatch(&cli, &config, &coordinator).await;
    coordinator.shutdown().await;
    outcome
}

async fn dispatch(cli: &Cli, config: &Config, coordinator: &Arc<ManagerCoordinator>) -> Result<ExitCode> {
    let cancel = CancellationToken::new();

    let code = match &cli.command {
        Command::List => {
            for instance in &config.instances {
                println!(
                    "{:<38} {:<20} {:<11} {:<8} {}",
                    instance.id,
                    instance.name,
                    instance.service_type,
                    instance.status,
                    instance.address()
                );
            }
            ExitCode::SUCCESS
        }
        Command::Check { instance } => {
            let instance = lookup(config, instance)?;
            let status = coordinator.health_check(&instance.id, &cancel).await?;
            print_json(&status)?;
            if status.healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Metrics { instance } => {
            let instance = lookup(config, instance)?;
            let metrics = coordinator.collect_metrics(&instance.id, &cancel).await?;
            print_json(&metrics)?;
            ExitCode::SUCCESS
        }
        Command::Info { instance } => {
            let instance = lookup(config, instance)?;
            let info = coordinator.get_info(&instance.id, &cancel).await?;
            print_json(&info)?;
            ExitCode::SUCCESS
        }
        Command::Validate { instance } => {
            let instance = lookup(config, instance)?;
            coordinator.validate_config(instance.service_type, &instance.config)?;
            println!("{} ({}): configuration is valid", instance.name, instance.service_type);
            ExitCode::SUCCESS
        }
        Command::Exec {
            instance,
            container,
            command,
        } => {
            let instance = lookup(config, instance)?;
            let output = coordinator.exec(&instance.id, container, command, &cancel).await?;
            print!("{}", output.output);
            match output.exit_code {
                Some(0) | None => ExitCode::SUCCESS,
                Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
            }
        }
        Command::Monitor => {
            if config.instances.is_empty() {
                bail!("no instances configured");
            }
            coordinator.start_monitoring();
            wait_for_signal().await;
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

fn lookup<'a>(config: &'a Config, key: &str) -> Result<&'a Instance> {
    match resolve_instance(&config.instances, key) {
        Some(instance) => Ok(instance),
        None => bail!("no instance with id or name '{}'", key),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C"),
        _ = term.recv() => tracing::info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received Ctrl-C");
}
