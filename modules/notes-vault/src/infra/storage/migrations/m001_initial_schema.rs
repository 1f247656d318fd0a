use async_trait::async_trait;
use sea_orm_migration::prelude::*;
use vault_db::{ApplyOutcome, MigrationContext, MigrationStep, StepError};

use crate::infra::storage::schema;

/// The pre-ownership, pre-encryption layout every device starts from.
pub struct InitialSchema;

#[async_trait]
impl MigrationStep for InitialSchema {
    fn version(&self) -> i64 {
        1
    }

    fn description(&self) -> &str {
        "initial_schema"
    }

    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        let introspector = ctx.introspector();
        for table in schema::OWNED_TABLES {
            if !introspector.table_exists(table).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn apply(&self, ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
        let manager = SchemaManager::new(ctx.conn());
        for table in tables() {
            manager.create_table(table).await?;
        }
        Ok(ApplyOutcome::Completed)
    }
}

fn tables() -> Vec<TableCreateStatement> {
    vec![
        Table::create()
            .table(Notes::Table)
            .if_not_exists()
            .col(ColumnDef::new(Notes::Id).text().not_null().primary_key())
            .col(ColumnDef::new(Notes::Title).text().not_null().default(""))
            .col(ColumnDef::new(Notes::Body).text().not_null().default(""))
            .col(ColumnDef::new(Notes::IsPinned).boolean().not_null().default(false))
            .col(ColumnDef::new(Notes::CreatedAt).big_integer().not_null())
            .col(ColumnDef::new(Notes::UpdatedAt).big_integer())
            .col(ColumnDef::new(Notes::Deleted).boolean().not_null().default(false))
            .col(ColumnDef::new(Notes::Version).integer().not_null().default(1))
            .to_owned(),
        Table::create()
            .table(NoteTasks::Table)
            .if_not_exists()
            .col(ColumnDef::new(NoteTasks::Id).text().not_null().primary_key())
            .col(ColumnDef::new(NoteTasks::NoteId).text().not_null())
            .col(ColumnDef::new(NoteTasks::Content).text().not_null().default(""))
            .col(ColumnDef::new(NoteTasks::Status).text().not_null().default("open"))
            .col(ColumnDef::new(NoteTasks::DueDate).big_integer())
            .col(ColumnDef::new(NoteTasks::ReminderId).text())
            .col(ColumnDef::new(NoteTasks::Position).integer().not_null().default(0))
            .col(ColumnDef::new(NoteTasks::CreatedAt).big_integer().not_null())
            .col(ColumnDef::new(NoteTasks::UpdatedAt).big_integer())
            .col(ColumnDef::new(NoteTasks::Deleted).boolean().not_null().default(false))
            .to_owned(),
        Table::create()
            .table(Folders::Table)
            .if_not_exists()
            .col(ColumnDef::new(Folders::Id).text().not_null().primary_key())
            .col(ColumnDef::new(Folders::Name).text().not_null())
            .col(ColumnDef::new(Folders::ParentId).text())
            .col(ColumnDef::new(Folders::SortOrder).integer().not_null().default(0))
            .col(ColumnDef::new(Folders::CreatedAt).big_integer().not_null())
            .col(ColumnDef::new(Folders::UpdatedAt).big_integer())
            .col(ColumnDef::new(Folders::Deleted).boolean().not_null().default(false))
            .to_owned(),
        Table::create()
            .table(NoteFolders::Table)
            .if_not_exists()
            .col(ColumnDef::new(NoteFolders::NoteId).text().not_null().primary_key())
            .col(ColumnDef::new(NoteFolders::FolderId).text().not_null())
            .col(ColumnDef::new(NoteFolders::AddedAt).big_integer().not_null())
            .to_owned(),
        Table::create()
            .table(NoteTags::Table)
            .if_not_exists()
            .col(ColumnDef::new(NoteTags::NoteId).text().not_null())
            .col(ColumnDef::new(NoteTags::Tag).text().not_null())
            .primary_key(Index::create().col(NoteTags::NoteId).col(NoteTags::Tag))
            .to_owned(),
        Table::create()
            .table(NoteLinks::Table)
            .if_not_exists()
            .col(ColumnDef::new(NoteLinks::SourceId).text().not_null())
            .col(ColumnDef::new(NoteLinks::TargetTitle).text().not_null())
            .col(ColumnDef::new(NoteLinks::TargetId).text())
            .primary_key(
                Index::create()
                    .col(NoteLinks::SourceId)
                    .col(NoteLinks::TargetTitle),
            )
            .to_owned(),
        Table::create()
            .table(NoteReminders::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(NoteReminders::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(ColumnDef::new(NoteReminders::NoteId).text().not_null())
            .col(ColumnDef::new(NoteReminders::Title).text().not_null().default(""))
            .col(ColumnDef::new(NoteReminders::Body).text().not_null().default(""))
            .col(ColumnDef::new(NoteReminders::RemindAt).big_integer())
            .col(ColumnDef::new(NoteReminders::IsActive).boolean().not_null().default(true))
            .col(ColumnDef::new(NoteReminders::CreatedAt).big_integer().not_null())
            .col(ColumnDef::new(NoteReminders::UpdatedAt).big_integer())
            .to_owned(),
        Table::create()
            .table(Templates::Table)
            .if_not_exists()
            .col(ColumnDef::new(Templates::Id).text().not_null().primary_key())
            .col(ColumnDef::new(Templates::Title).text().not_null().default(""))
            .col(ColumnDef::new(Templates::Body).text().not_null().default(""))
            .col(ColumnDef::new(Templates::Category).text())
            .col(ColumnDef::new(Templates::CreatedAt).big_integer().not_null())
            .col(ColumnDef::new(Templates::UpdatedAt).big_integer())
            .col(ColumnDef::new(Templates::Deleted).boolean().not_null().default(false))
            .to_owned(),
        Table::create()
            .table(Attachments::Table)
            .if_not_exists()
            .col(ColumnDef::new(Attachments::Id).text().not_null().primary_key())
            .col(ColumnDef::new(Attachments::NoteId).text().not_null())
            .col(ColumnDef::new(Attachments::FileName).text().not_null())
            .col(ColumnDef::new(Attachments::MimeType).text())
            .col(ColumnDef::new(Attachments::SizeBytes).big_integer())
            .col(ColumnDef::new(Attachments::CreatedAt).big_integer().not_null())
            .to_owned(),
        Table::create()
            .table(SavedSearches::Table)
            .if_not_exists()
            .col(ColumnDef::new(SavedSearches::Id).text().not_null().primary_key())
            .col(ColumnDef::new(SavedSearches::Name).text().not_null())
            .col(ColumnDef::new(SavedSearches::Query).text().not_null())
            .col(ColumnDef::new(SavedSearches::CreatedAt).big_integer().not_null())
            .col(ColumnDef::new(SavedSearches::UpdatedAt).big_integer())
            .to_owned(),
        Table::create()
            .table(PendingOps::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(PendingOps::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(ColumnDef::new(PendingOps::EntityId).text().not_null())
            .col(ColumnDef::new(PendingOps::Kind).text().not_null())
            .col(ColumnDef::new(PendingOps::Payload).text())
            .col(ColumnDef::new(PendingOps::CreatedAt).big_integer().not_null())
            .to_owned(),
    ]
}

#[derive(DeriveIden)]
enum Notes {
    Table,
    Id,
    Title,
    Body,
    IsPinned,
    CreatedAt,
    UpdatedAt,
    Deleted,
    Version,
}

#[derive(DeriveIden)]
enum NoteTasks {
    Table,
    Id,
    NoteId,
    Content,
    Status,
    DueDate,
    ReminderId,
    Position,
    CreatedAt,
    UpdatedAt,
    Deleted,
}

#[derive(DeriveIden)]
enum Folders {
    Table,
    Id,
    Name,
    ParentId,
    SortOrder,
    CreatedAt,
    UpdatedAt,
    Deleted,
}

#[derive(DeriveIden)]
enum NoteFolders {
    Table,
    NoteId,
    FolderId,
    AddedAt,
}

#[derive(DeriveIden)]
enum NoteTags {
    Table,
    NoteId,
    Tag,
}

#[derive(DeriveIden)]
enum NoteLinks {
    Table,
    SourceId,
    TargetTitle,
    TargetId,
}

#[derive(DeriveIden)]
enum NoteReminders {
    Table,
    Id,
    NoteId,
    Title,
    Body,
    RemindAt,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Templates {
    Table,
    Id,
    Title,
    Body,
    Category,
    CreatedAt,
    UpdatedAt,
    Deleted,
}

#[derive(DeriveIden)]
enum Attachments {
    Table,
    Id,
    NoteId,
    FileName,
    MimeType,
    SizeBytes,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SavedSearches {
    Table,
    Id,
    Name,
    Query,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PendingOps {
    Table,
    Id,
    EntityId,
    Kind,
    Payload,
    CreatedAt,
}
