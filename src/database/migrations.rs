pub use sea_orm_migration::prelude::*;

mod m20260112_093000_create_job;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20260112_093000_create_job::Migration)]
    }
}

pub struct Migrator;
