use std::{sync::Arc, time::Duration};

use tracing::{error, info};

use crate::{
    boot::BootError,
    config::Config,
    database::{job_dao::DatabaseJobDao, setup_database},
    jobs::{job_registry::JobRegistry, job_service::JobService},
};

/// Runs the worker pools until Ctrl+C, then stops them gracefully.
pub async fn handle_serve_command(
    config: Config,
    job_registry: JobRegistry,
) -> Result<(), BootError> {
    let db = match setup_database(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!("❌ Database setup failed: {}", e);
            return Err(e.into());
        }
    };

    let grace = Duration::from_secs(config.jobs.shutdown_grace_seconds);
    let dao = Arc::new(DatabaseJobDao::new(db));
    let mut service = JobService::new(config.jobs, dao, job_registry);

    service.start()?;
    info!("👷 Job service running, press Ctrl+C to stop");

    let signal = tokio::signal::ctrl_c().await;

    service.stop(grace).await?;
    signal?;

    Ok(())
}
