use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_payment_attempts_table::Migration),
            Box::new(m20250301_000002_create_orders_table::Migration),
        ]
    }
}

// Migration implementations

mod m20250301_000001_create_payment_attempts_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000001_create_payment_attempts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Aligned with entities::payment_attempt Model
            manager
                .create_table(
                    Table::create()
                        .table(PaymentAttempts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentAttempts::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::SessionId)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::PaymentIntentId)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::CustomerName)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::CustomerEmail)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::CustomerPhone)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::AddressLine1)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::AddressCity)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::AddressPostalCode)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::AddressCountry)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::DeliveryMethod)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::PaymentMethod)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentAttempts::Items).json().not_null())
                        .col(
                            ColumnDef::new(PaymentAttempts::Subtotal)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::DeliveryFee)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(PaymentAttempts::Total).decimal().not_null())
                        .col(
                            ColumnDef::new(PaymentAttempts::PaymentStatus)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::ProcessorStatus)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::FailureReason)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::Currency)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::AmountReceived)
                                .decimal()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::Refunded)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::RefundAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::OrderCreated)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(PaymentAttempts::OrderId).uuid().null())
                        .col(ColumnDef::new(PaymentAttempts::Metadata).json().not_null())
                        .col(
                            ColumnDef::new(PaymentAttempts::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Admin listing filters
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_attempts_customer_email")
                        .table(PaymentAttempts::Table)
                        .col(PaymentAttempts::CustomerEmail)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_attempts_payment_status")
                        .table(PaymentAttempts::Table)
                        .col(PaymentAttempts::PaymentStatus)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_attempts_created_at")
                        .table(PaymentAttempts::Table)
                        .col(PaymentAttempts::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentAttempts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentAttempts {
        Table,
        Id,
        SessionId,
        PaymentIntentId,
        CustomerName,
        CustomerEmail,
        CustomerPhone,
        AddressLine1,
        AddressCity,
        AddressPostalCode,
        AddressCountry,
        DeliveryMethod,
        PaymentMethod,
        Items,
        Subtotal,
        DeliveryFee,
        Total,
        PaymentStatus,
        ProcessorStatus,
        FailureReason,
        Currency,
        AmountReceived,
        Refunded,
        RefundAmount,
        OrderCreated,
        OrderId,
        Metadata,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000002_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000002_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // The unique session_id key turns a concurrent double-materialize
            // into a rejected insert the service can recover from.
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Orders::SessionId)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::PaymentIntentId).string().null())
                        .col(ColumnDef::new(Orders::CustomerName).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerEmail).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerPhone).string().null())
                        .col(ColumnDef::new(Orders::AddressLine1).string().not_null())
                        .col(ColumnDef::new(Orders::AddressCity).string().not_null())
                        .col(
                            ColumnDef::new(Orders::AddressPostalCode)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::AddressCountry).string().not_null())
                        .col(ColumnDef::new(Orders::DeliveryMethod).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string().not_null())
                        .col(ColumnDef::new(Orders::Products).json().not_null())
                        .col(ColumnDef::new(Orders::Subtotal).decimal().not_null())
                        .col(
                            ColumnDef::new(Orders::DeliveryFee)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Total).decimal().not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string().not_null())
                        .col(ColumnDef::new(Orders::OrderStatus).string().not_null())
                        .col(ColumnDef::new(Orders::Notes).string().null())
                        .col(ColumnDef::new(Orders::StatusHistory).json().not_null())
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_order_status")
                        .table(Orders::Table)
                        .col(Orders::OrderStatus)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_created_at")
                        .table(Orders::Table)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        SessionId,
        PaymentIntentId,
        CustomerName,
        CustomerEmail,
        CustomerPhone,
        AddressLine1,
        AddressCity,
        AddressPostalCode,
        AddressCountry,
        DeliveryMethod,
        PaymentMethod,
        Products,
        Subtotal,
        DeliveryFee,
        Total,
        PaymentStatus,
        OrderStatus,
        Notes,
        StatusHistory,
        CreatedAt,
        UpdatedAt,
    }
}
