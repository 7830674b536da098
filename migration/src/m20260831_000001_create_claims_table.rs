use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Claims table: one row per (wallet, IP) pair that ever received a drip
        manager
            .create_table(
                Table::create()
                    .table(Claims::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Claims::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Claims::WalletAddress)
                            .string_len(42) // 0x + 40 hex chars
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Claims::IpAddress)
                            .string_len(45) // IPv6 max length
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Claims::TxHash)
                            .string_len(66) // 0x + 64 hex chars
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Claims::LastVisit)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    // One claim row per (wallet, IP) pair; upserts key off this
                    .index(
                        Index::create()
                            .name("idx_claims_wallet_ip")
                            .col(Claims::WalletAddress)
                            .col(Claims::IpAddress)
                            .unique(),
                    )
                    // Index for the 24h per-IP cooldown lookup
                    .index(
                        Index::create()
                            .name("idx_claims_ip_time")
                            .col(Claims::IpAddress)
                            .col(Claims::LastVisit),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Claims::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Claims {
    Table,
    Id,
    WalletAddress,
    IpAddress,
    TxHash,
    LastVisit,
}
