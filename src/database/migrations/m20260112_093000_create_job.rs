use sea_orm_migration::{
    prelude::*,
    schema::{integer, json, string, string_len, text_null, timestamp, timestamp_null, uuid},
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Status is a plain string column so the table works on SQLite as well
        manager
            .create_table(
                Table::create()
                    .table(Job::Table)
                    .if_not_exists()
                    .col(uuid(Job::Id).primary_key())
                    .col(string(Job::ActionType))
                    .col(json(Job::Parameters))
                    .col(string_len(Job::Status, 16).default("new"))
                    .col(timestamp(Job::Added))
                    .col(timestamp_null(Job::Started))
                    .col(timestamp_null(Job::Finished))
                    .col(integer(Job::Tries).default(0))
                    .col(text_null(Job::LastException))
                    .col(timestamp_null(Job::NextAttemptAt))
                    .to_owned(),
            )
            .await?;

        // Serves claim_next: oldest claimable record of one action type
        manager
            .create_index(
                Index::create()
                    .name("idx-job-action_type-status-added")
                    .table(Job::Table)
                    .col(Job::ActionType)
                    .col(Job::Status)
                    .col(Job::Added)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Job::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Job {
    Table,
    Id,
    ActionType,
    Parameters,
    Status,
    Added,
    Started,
    Finished,
    Tries,
    LastException,
    NextAttemptAt,
}
