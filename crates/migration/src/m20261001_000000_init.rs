//! Initial schema.
//!
//! - `accounts`: tracked accounts, with the aggregator item and sync cursor
//! - `transactions`: ledger entries ordered by `(tx_date, sequence_num)`

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum Accounts {
    Table,
    Id,
    UserId,
    ReferenceId,
    Name,
    ItemId,
    AccessToken,
    Cursor,
}

#[derive(Iden)]
enum Transactions {
    Table,
    Id,
    UserId,
    AccountId,
    Source,
    SourceId,
    SequenceNum,
    TxDate,
    Payee,
    Memo,
    Category,
    Location,
    Icon,
    Tags,
    AmountMinor,
    BalanceMinor,
    CreatedAt,
    UpdatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Accounts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Accounts::UserId).string().not_null())
                    .col(ColumnDef::new(Accounts::ReferenceId).string())
                    .col(ColumnDef::new(Accounts::Name).string().not_null())
                    .col(ColumnDef::new(Accounts::ItemId).string())
                    .col(ColumnDef::new(Accounts::AccessToken).string())
                    .col(ColumnDef::new(Accounts::Cursor).string())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-accounts-user_id-reference_id-unique")
                    .table(Accounts::Table)
                    .col(Accounts::UserId)
                    .col(Accounts::ReferenceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transactions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Transactions::UserId).string().not_null())
                    .col(
                        ColumnDef::new(Transactions::AccountId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::Source).string().not_null())
                    .col(ColumnDef::new(Transactions::SourceId).string())
                    .col(ColumnDef::new(Transactions::SequenceNum).big_integer())
                    .col(ColumnDef::new(Transactions::TxDate).date().not_null())
                    .col(ColumnDef::new(Transactions::Payee).string())
                    .col(ColumnDef::new(Transactions::Memo).string())
                    .col(ColumnDef::new(Transactions::Category).string())
                    .col(ColumnDef::new(Transactions::Location).text())
                    .col(ColumnDef::new(Transactions::Icon).string())
                    .col(ColumnDef::new(Transactions::Tags).text())
                    .col(
                        ColumnDef::new(Transactions::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::BalanceMinor).big_integer())
                    .col(
                        ColumnDef::new(Transactions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transactions-account_id")
                            .from(Transactions::Table, Transactions::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Repeated delivery of one external id must hit the same row.
        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-account_id-source_id-unique")
                    .table(Transactions::Table)
                    .col(Transactions::AccountId)
                    .col(Transactions::SourceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // NULL sequence numbers (detached entries) never conflict.
        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-account_id-tx_date-sequence_num-unique")
                    .table(Transactions::Table)
                    .col(Transactions::AccountId)
                    .col(Transactions::TxDate)
                    .col(Transactions::SequenceNum)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-user_id")
                    .table(Transactions::Table)
                    .col(Transactions::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Transactions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await?;
        Ok(())
    }
}
