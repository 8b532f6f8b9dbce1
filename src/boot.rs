use std::{env, str::FromStr as _};

use clap::Parser as _;
use config_rs::Config as ConfigRs;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    app_info::AppInfo,
    cli::{Cli, Commands},
    commands::{migrate, serve, version},
    config::Config,
    environment::Environment,
    jobs::{job_registry::JobRegistry, job_service::ServiceError},
    setup_tracing::setup_tracing_for_command,
};

const ENVIRONMENT_VARIABLE: &str = "APP_ENVIRONMENT";

#[derive(Debug, Error)]
pub enum BootError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config_rs::ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Job service error: {0}")]
    Service(#[from] ServiceError),
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

/// Everything a worker binary hands over to start up.
pub struct BootConfig {
    pub app_info: AppInfo,
    pub job_registry: JobRegistry,
}

impl BootConfig {
    #[must_use]
    pub const fn new(app_info: AppInfo, job_registry: JobRegistry) -> Self {
        Self {
            app_info,
            job_registry,
        }
    }
}

pub async fn boot(config: BootConfig) -> Result<(), BootError> {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Version)) {
        version::print_version_info(config.app_info);
        return Ok(());
    }

    let environment = set_environment();

    let app_config = read_config(&environment)?;

    setup_tracing_for_command(cli.command.as_ref(), &app_config.tracing.log_level);

    debug!("Environment set to: {:?}", environment);
    trace!("Configuration loaded: {:?}", app_config);

    handle_command(app_config, cli, config.job_registry, config.app_info).await
}

#[must_use]
pub fn set_environment() -> Environment {
    env::var(ENVIRONMENT_VARIABLE)
        .ok()
        .and_then(|s| Environment::from_str(&s).ok())
        .unwrap_or_default()
}

/// `config/<environment>` overridden by `APP_*` variables (`APP_DATABASE__URL`).
pub fn read_config(environment: &Environment) -> Result<Config, config_rs::ConfigError> {
    let config_file_name = format!("config/{environment}");

    trace!("Reading configuration from: {}", config_file_name);

    ConfigRs::builder()
        .add_source(config_rs::File::with_name(&config_file_name))
        .add_source(
            config_rs::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?
        .try_deserialize()
}

pub async fn handle_command(
    config: Config,
    cli: Cli,
    job_registry: JobRegistry,
    app_info: AppInfo,
) -> Result<(), BootError> {
    match cli.command {
        Some(Commands::Migrate { action }) => {
            migrate::handle_migrate_command(&config, action).await;
        }
        Some(Commands::Version) => {
            version::print_version_info(app_info);
        }
        Some(Commands::Serve) | None => {
            serve::handle_serve_command(config, job_registry).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_test_environment_config() {
        let config = read_config(&Environment::Test).unwrap();

        assert_eq!(config.database.pool_size, 1);
        assert!(!config.jobs.recovery.enabled);
        assert_eq!(config.jobs.coalescing.delay_ms, 2000);

        let thumbnail = &config.jobs.workers.workers["thumbnail"];
        assert_eq!(thumbnail.count, 1);
        assert_eq!(thumbnail.max_tries, 3);
        assert_eq!(thumbnail.poll_interval_ms, 50);
    }
}
