use std::{error::Error, process};

use sea_orm::DatabaseConnection;
use sea_orm_migration::{Migration, MigratorTrait};

use crate::{
    cli::MigrateAction,
    config::Config,
    database::{migrations::Migrator, setup_database_connection},
};

pub async fn handle_migrate_command(config: &Config, action: MigrateAction) {
    let db = match setup_database_connection(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("❌ Could not connect to the database: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = handle_migration_command(&db, action).await {
        eprintln!("❌ Migration failed: {e}");
        process::exit(1);
    }
}

fn print_migrations<'a>(
    header: &str,
    marker: &str,
    migrations: impl Iterator<Item = &'a Migration>,
) {
    println!("{header}");
    for migration in migrations {
        println!("  {marker} {}", migration.name());
    }
}

fn step_count(migrations: &[Migration]) -> Result<u32, Box<dyn Error>> {
    u32::try_from(migrations.len()).map_err(|_| "Too many migrations".into())
}

pub async fn handle_migration_command(
    db: &DatabaseConnection,
    action: MigrateAction,
) -> Result<(), Box<dyn Error>> {
    match action {
        MigrateAction::Up { steps } => {
            let pending = Migrator::get_pending_migrations(db).await?;
            if pending.is_empty() {
                println!("✅ All migrations are already up to date");
                return Ok(());
            }

            let count = steps.map_or(pending.len(), |steps| (steps as usize).min(pending.len()));
            print_migrations("Applying:", "📄", pending[..count].iter());

            Migrator::up(db, steps).await?;
            println!("✅ Applied {count} migration(s)");
        }
        MigrateAction::Down { steps } => {
            let applied = Migrator::get_applied_migrations(db).await?;
            if applied.is_empty() {
                println!("❌ No migrations to roll back");
                return Ok(());
            }

            let count = (steps as usize).min(applied.len());
            print_migrations(
                "Rolling back:",
                "📄",
                applied[applied.len() - count..].iter().rev(),
            );

            Migrator::down(db, Some(steps)).await?;
            println!("✅ Rolled back {count} migration(s)");
        }
        MigrateAction::Status => {
            let applied = Migrator::get_applied_migrations(db).await?;
            let pending = Migrator::get_pending_migrations(db).await?;

            print_migrations("📋 Applied migrations:", "✓", applied.iter());
            if pending.is_empty() {
                println!("✅ All migrations are up to date");
            } else {
                print_migrations("📋 Pending migrations:", "-", pending.iter());
            }
        }
        MigrateAction::Reset => {
            println!("🔄 Resetting database (this will drop all jobs!)...");

            let applied = Migrator::get_applied_migrations(db).await?;
            let applied_count = step_count(&applied)?;
            if applied_count > 0 {
                Migrator::down(db, Some(applied_count)).await?;
                println!("✅ Rolled back {applied_count} migration(s)");
            }

            Migrator::up(db, None).await?;
            println!("✅ Database reset completed successfully");
        }
    }

    Ok(())
}
